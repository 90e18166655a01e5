//! Sync pass summary

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A file that could not be synced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub path: String,
    /// Stable error code, see [`Error::code`]
    pub code: String,
    pub message: String,
}

impl SyncFailure {
    pub fn new(path: impl Into<String>, error: &Error) -> Self {
        Self {
            path: path.into(),
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

/// Counts and failures of one pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub moved: usize,
    pub unchanged: usize,
    pub errors: Vec<SyncFailure>,
    /// Forward references that found their target during the pass
    pub relations_resolved: u64,
    /// Forward references still without a target afterwards
    pub relations_unresolved: u64,
    /// The pass stopped early; skipped files are picked up next time
    pub cancelled: bool,
}

impl SyncReport {
    /// Files written, moved or removed
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.deleted + self.moved
    }

    /// No failures and not cancelled
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && !self.cancelled
    }

    pub(crate) fn record_failure(&mut self, path: &str, error: &Error) {
        self.errors.push(SyncFailure::new(path, error));
    }

    /// Fold another project's report into this one
    pub fn merge(&mut self, other: &SyncReport) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.moved += other.moved;
        self.unchanged += other.unchanged;
        self.errors.extend(other.errors.iter().cloned());
        self.relations_resolved += other.relations_resolved;
        self.relations_unresolved += other.relations_unresolved;
        self.cancelled |= other.cancelled;
    }
}
