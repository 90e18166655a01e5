//! Domain layer
//!
//! Permalinks, the graph model and the sync engine. Nothing here knows about
//! SQLite, the filesystem or markdown syntax; those arrive through the
//! repository, scanner and parser seams.

pub mod document;
pub mod graph;
pub mod permalink;
pub mod sync;
