//! Filesystem access for sync passes

mod scanner;

pub use scanner::{DEFAULT_EXTENSIONS, FsScanner};
