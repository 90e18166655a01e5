//! Change detection
//!
//! Compares the directory as it is now with the checksums recorded by the last
//! pass and classifies every path. Renames are recognized by content: a path
//! whose old content vanished is paired with a path where that exact content
//! appeared.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::snapshot::DirectorySnapshot;

/// A rename recognized by content
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileMove {
    pub from: String,
    pub to: String,
}

impl FileMove {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Classification of every path seen on either side
///
/// Apply in field order: `deleted`, `moved`, `modified`, `created`.
/// `deleted` also lists paths whose stored entity must make room for an
/// incoming move.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub deleted: Vec<String>,
    pub moved: Vec<FileMove>,
    pub modified: Vec<String>,
    pub created: Vec<String>,
    pub unchanged: Vec<String>,
    /// Unreadable files and directories with the reason; entities stored
    /// under them are kept as they are
    #[serde(default)]
    pub skipped: BTreeMap<String, String>,
}

impl ChangeSet {
    /// True when nothing needs to be written
    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.moved.is_empty() && self.modified.is_empty() && self.created.is_empty()
    }

    /// Number of events a pass will apply
    pub fn pending(&self) -> usize {
        self.deleted.len() + self.moved.len() + self.modified.len() + self.created.len()
    }
}

/// Classify the current directory against the stored checksums
///
/// A stored checksum of `None` marks content that was never fully synced; such
/// a path always counts as modified and never acts as a rename source.
pub fn detect_changes(current: &DirectorySnapshot, stored: &BTreeMap<String, Option<String>>) -> ChangeSet {
    let mut changes = ChangeSet::default();

    let mut gone = Vec::new();
    let mut appeared = Vec::new();
    let mut changed = Vec::new();

    for (path, checksum) in &current.files {
        match stored.get(path) {
            Some(Some(old)) if old == checksum => changes.unchanged.push(path.clone()),
            Some(_) => changed.push(path.as_str()),
            None => appeared.push(path.as_str()),
        }
    }
    for path in stored.keys() {
        if current.files.contains_key(path) {
            continue;
        }
        if current.is_skipped(path) {
            changes.unchanged.push(path.clone());
        } else {
            gone.push(path.as_str());
        }
    }
    changes.skipped = current.skipped.clone();

    // Vanished paths pair before edited ones so a plain rename wins over an
    // edit that happens to reproduce old content elsewhere
    let sources: Vec<(&str, &str)> = gone
        .iter()
        .chain(changed.iter())
        .filter_map(|path| stored.get(*path).and_then(|c| c.as_deref()).map(|c| (*path, c)))
        .collect();
    let destinations: Vec<(&str, &str)> = appeared
        .iter()
        .chain(changed.iter())
        .filter_map(|path| current.checksum(path).map(|c| (*path, c)))
        .collect();

    let mut used_sources = BTreeSet::new();
    let mut used_destinations = BTreeSet::new();

    for (from, old_checksum) in &sources {
        let target = destinations
            .iter()
            .find(|(to, new_checksum)| to != from && new_checksum == old_checksum && !used_destinations.contains(to));

        if let Some((to, _)) = target {
            used_sources.insert(*from);
            used_destinations.insert(*to);
            changes.moved.push(FileMove::new(*from, *to));
        }
    }

    for path in gone {
        if !used_sources.contains(path) {
            changes.deleted.push(path.to_string());
        }
    }
    for path in appeared {
        if !used_destinations.contains(path) {
            changes.created.push(path.to_string());
        }
    }
    for path in changed {
        match (used_sources.contains(path), used_destinations.contains(path)) {
            // Its entity moved away; the new content is a new document
            (true, false) => changes.created.push(path.to_string()),
            // Another file was renamed over it; the old occupant goes first
            (false, true) => changes.deleted.push(path.to_string()),
            (true, true) => {}
            (false, false) => changes.modified.push(path.to_string()),
        }
    }

    changes.deleted.sort();
    changes.moved.sort();
    changes.created.sort();
    changes.unchanged.sort();
    changes
}
