//! Markdown document parsing

mod parser;

pub use parser::MarkdownParser;
