//! Infrastructure layer
//!
//! Implementations of the domain seams over SQLite, the filesystem and
//! markdown text.

pub mod filesystem;
pub mod graph;
pub mod markdown;
