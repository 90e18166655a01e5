//! Directory scanning
//!
//! Walks a project root on the blocking pool and checksums every file that
//! passes the extension and ignore filters. Hidden files and directories are
//! never synced.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::domain::sync::{DirectoryScanner, DirectorySnapshot, content_checksum};
use crate::error::{Error, Result};

/// Extensions synced when none are configured
pub const DEFAULT_EXTENSIONS: &[&str] = &["md"];

/// Scanner over the local filesystem
#[derive(Debug, Clone)]
pub struct FsScanner {
    extensions: Vec<String>,
    ignore: Vec<String>,
}

impl Default for FsScanner {
    fn default() -> Self {
        Self::new(DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(), Vec::new())
    }
}

impl FsScanner {
    /// `extensions` without the leading dot; `ignore` holds names matched
    /// against any path component, or `*.ext` suffix patterns
    pub fn new(extensions: Vec<String>, ignore: Vec<String>) -> Self {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            ignore,
        }
    }

    fn is_ignored(&self, name: &str) -> bool {
        self.ignore.iter().any(|pattern| match pattern.strip_prefix('*') {
            Some(suffix) => name.ends_with(suffix),
            None => name == pattern,
        })
    }

    fn keep_entry(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        !name.starts_with('.') && !self.is_ignored(&name)
    }

    fn has_synced_extension(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .is_some_and(|ext| self.extensions.iter().any(|e| *e == ext))
    }

    fn scan_blocking(&self, root: &Path) -> Result<DirectorySnapshot> {
        if !root.is_dir() {
            return Err(Error::InvalidInput(format!(
                "project root '{}' is not a directory",
                root.display()
            )));
        }

        let mut snapshot = DirectorySnapshot::default();
        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| self.keep_entry(entry));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    if err.depth() == 0 {
                        return Err(Error::Other(format!(
                            "cannot read project root '{}': {}",
                            root.display(),
                            err
                        )));
                    }
                    let Some(relative) = err.path().and_then(|path| relative_path(root, path)) else {
                        warn!(error = %err, "Skipping unreadable entry outside the root");
                        continue;
                    };
                    warn!(file_path = %relative, error = %err, "Skipping unreadable entry");
                    snapshot.skip(relative, err.to_string());
                    continue;
                }
            };
            if !entry.file_type().is_file() || !self.has_synced_extension(entry.path()) {
                continue;
            }

            let Some(relative) = relative_path(root, entry.path()) else {
                continue;
            };
            match std::fs::read(entry.path()) {
                Ok(bytes) => {
                    snapshot.files.insert(relative, content_checksum(&bytes));
                }
                Err(err) => {
                    warn!(file_path = %relative, error = %err, "Skipping unreadable file");
                    snapshot.skip(relative, err.to_string());
                }
            }
        }

        debug!(
            root = %root.display(),
            files = snapshot.len(),
            skipped = snapshot.skipped.len(),
            "Directory scanned"
        );
        Ok(snapshot)
    }
}

#[async_trait]
impl DirectoryScanner for FsScanner {
    async fn scan(&self, root: &Path) -> Result<DirectorySnapshot> {
        let scanner = self.clone();
        let root: PathBuf = root.to_path_buf();

        // walkdir and std::fs are blocking
        tokio::task::spawn_blocking(move || scanner.scan_blocking(&root))
            .await
            .map_err(|e| Error::Other(format!("Scan task join error: {}", e)))?
    }
}

/// `/`-separated path relative to `root`
fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}
