//! Notegraph Core Library
//!
//! This crate keeps a graph of notes in step with a directory of markdown
//! files:
//! - Commands (project registry, sync, status, moves)
//! - Domain (permalinks, graph model, change detection, sync coordination)
//! - Infrastructure (SQLite entity store, markdown parser, directory scanner)
//! - Storage (SQLite pool and migrations)
//! - Configuration

pub mod commands;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod storage;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::domain::graph::{EntityRepository, HydratedEntity};
    pub use crate::domain::permalink::generate_permalink;
    pub use crate::domain::sync::{ChangeSet, FileMove, SyncReport, SyncService, SyncSettings};
    pub use crate::error::{Error, Result};
    pub use crate::storage::Database;
}
