//! Commands module - all operations as library functions
//!
//! These are the entry points used by the CLI.

pub mod project;
pub mod sync;
