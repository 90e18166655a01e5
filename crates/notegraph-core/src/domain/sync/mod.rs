//! File-to-graph synchronization
//!
//! [`SyncService`] runs passes over a project directory. Change detection and
//! move resolution are exposed on their own for callers that need finer
//! control, such as applying a rename reported by a file watcher.

pub mod detector;
pub mod moves;
pub mod report;
pub mod service;
pub mod snapshot;

pub use detector::{ChangeSet, FileMove, detect_changes};
pub use moves::{MoveOutcome, MoveResolver};
pub use report::{SyncFailure, SyncReport};
pub use service::{SyncService, SyncSettings, WriteStrategy};
pub use snapshot::{DirectoryScanner, DirectorySnapshot, content_checksum};
