//! Directory snapshots
//!
//! A snapshot is the `path -> checksum` view of a project directory at one
//! instant. Paths are relative to the project root and `/`-separated.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Current files of a project and the checksum of each
///
/// `skipped` maps files and directories that could not be read to the reason.
/// Their stored entities are left alone rather than treated as deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectorySnapshot {
    pub files: BTreeMap<String, String>,
    #[serde(default)]
    pub skipped: BTreeMap<String, String>,
}

impl DirectorySnapshot {
    /// Build a snapshot from `(path, checksum)` pairs
    pub fn from_files<I, P, C>(files: I) -> Self
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<String>,
    {
        Self {
            files: files.into_iter().map(|(p, c)| (p.into(), c.into())).collect(),
            skipped: BTreeMap::new(),
        }
    }

    /// Mark `path` (a file, or a directory and everything below it) unreadable
    pub fn skip(&mut self, path: impl Into<String>, reason: impl Into<String>) {
        self.skipped.insert(path.into(), reason.into());
    }

    /// True when `path` or one of its parent directories could not be read
    pub fn is_skipped(&self, path: &str) -> bool {
        self.skipped.keys().any(|skipped| {
            skipped.is_empty()
                || path == skipped
                || path.strip_prefix(skipped.as_str()).is_some_and(|rest| rest.starts_with('/'))
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn checksum(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }
}

/// Lists the syncable files under a project root
#[async_trait]
pub trait DirectoryScanner: Send + Sync {
    async fn scan(&self, root: &Path) -> Result<DirectorySnapshot>;
}

/// Hex-encoded SHA-256 of file content
pub fn content_checksum(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_checksum_is_stable() {
        let a = content_checksum(b"# Note\n");
        assert_eq!(a, content_checksum(b"# Note\n"));
        assert_ne!(a, content_checksum(b"# Note!\n"));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_snapshot_lookup() {
        let snapshot = DirectorySnapshot::from_files([("a.md", "1"), ("b/c.md", "2")]);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.checksum("b/c.md"), Some("2"));
        assert!(snapshot.checksum("missing.md").is_none());
    }

    #[test]
    fn test_skipped_covers_directory_contents() {
        let mut snapshot = DirectorySnapshot::default();
        snapshot.skip("locked", "permission denied");
        snapshot.skip("notes/broken.md", "permission denied");

        assert!(snapshot.is_skipped("locked/a.md"));
        assert!(snapshot.is_skipped("locked/deep/b.md"));
        assert!(snapshot.is_skipped("notes/broken.md"));
        assert!(!snapshot.is_skipped("locked-out.md"));
        assert!(!snapshot.is_skipped("notes/other.md"));
    }
}
