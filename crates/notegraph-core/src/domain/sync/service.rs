//! Sync coordinator
//!
//! Drives one pass over a project directory: scan, compare with stored
//! checksums, then apply deletions, moves, modifications and creations in that
//! order. Per-file problems are collected in the report; only failures that
//! make the whole pass meaningless are returned as errors.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::detector::{ChangeSet, FileMove, detect_changes};
use super::moves::{MoveOutcome, MoveResolver, path_permalink};
use super::report::SyncReport;
use super::snapshot::{DirectoryScanner, content_checksum};
use crate::domain::document::DocumentParser;
use crate::domain::graph::{
    ConflictTarget, DEFAULT_ENTITY_TYPE, Entity, EntityDraft, EntityFields, EntityId, EntityRepository,
    HydratedEntity,
};
use crate::error::{Error, Result};

/// Default number of resolution rounds a forward reference gets
pub const DEFAULT_MAX_RESOLVE_ATTEMPTS: u32 = 5;

/// Primitive used for regular file writes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteStrategy {
    /// Single `ON CONFLICT(file_path)` statement, identity upsert on permalink clashes
    #[default]
    Atomic,
    /// Look up by file path, then update or insert
    Identity,
}

impl std::str::FromStr for WriteStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "atomic" => Ok(Self::Atomic),
            "identity" => Ok(Self::Identity),
            other => Err(Error::InvalidInput(format!(
                "unknown write strategy '{}', expected 'atomic' or 'identity'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for WriteStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Atomic => write!(f, "atomic"),
            Self::Identity => write!(f, "identity"),
        }
    }
}

/// Behavior switches for a sync pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub write_strategy: WriteStrategy,
    /// Recompute path-derived permalinks when a file moves
    pub update_permalinks_on_move: bool,
    /// Resolution rounds before a forward reference stops being retried
    pub max_relation_resolve_attempts: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            write_strategy: WriteStrategy::default(),
            update_permalinks_on_move: true,
            max_relation_resolve_attempts: DEFAULT_MAX_RESOLVE_ATTEMPTS,
        }
    }
}

/// Which list an event came from; decides how it is counted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileEvent {
    Modified,
    Created,
}

/// Keeps one project's graph in step with its directory
pub struct SyncService {
    root: PathBuf,
    repo: Arc<dyn EntityRepository>,
    parser: Arc<dyn DocumentParser>,
    scanner: Arc<dyn DirectoryScanner>,
    settings: SyncSettings,
}

impl SyncService {
    pub fn new(
        root: impl Into<PathBuf>,
        repo: Arc<dyn EntityRepository>,
        parser: Arc<dyn DocumentParser>,
        scanner: Arc<dyn DirectoryScanner>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            root: root.into(),
            repo,
            parser,
            scanner,
            settings,
        }
    }

    /// Project directory this service syncs
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn repository(&self) -> &dyn EntityRepository {
        self.repo.as_ref()
    }

    /// Run a full pass
    pub async fn sync(&self) -> Result<SyncReport> {
        self.sync_with_cancel(CancellationToken::new()).await
    }

    /// Run a full pass, stopping between events once `token` is cancelled
    pub async fn sync_with_cancel(&self, token: CancellationToken) -> Result<SyncReport> {
        let started = Instant::now();
        let changes = self.detect_changes().await?;

        info!(
            project_id = self.repo.project_id(),
            root = %self.root.display(),
            deleted = changes.deleted.len(),
            moved = changes.moved.len(),
            modified = changes.modified.len(),
            created = changes.created.len(),
            unchanged = changes.unchanged.len(),
            skipped = changes.skipped.len(),
            "Sync pass started"
        );

        let mut report = SyncReport {
            unchanged: changes.unchanged.len(),
            ..Default::default()
        };
        for (path, reason) in &changes.skipped {
            report.record_failure(path, &Error::Io(std::io::Error::other(reason.clone())));
        }

        match self.apply_changes(&changes, &token, &mut report).await {
            Ok(()) => {}
            Err(Error::Cancelled) => {
                report.cancelled = true;
                warn!(project_id = self.repo.project_id(), "Sync pass cancelled");
            }
            Err(err) => return Err(err),
        }

        if !report.cancelled {
            let resolution = self
                .repo
                .resolve_forward_relations(self.settings.max_relation_resolve_attempts)
                .await?;
            report.relations_resolved += resolution.resolved;
            report.relations_unresolved = resolution.pending + resolution.exhausted;
        }

        info!(
            project_id = self.repo.project_id(),
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            moved = report.moved,
            errors = report.errors.len(),
            relations_resolved = report.relations_resolved,
            relations_unresolved = report.relations_unresolved,
            cancelled = report.cancelled,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Sync pass finished"
        );
        Ok(report)
    }

    /// Dry run: classify the directory without writing anything
    pub async fn detect_changes(&self) -> Result<ChangeSet> {
        let snapshot = self.scanner.scan(&self.root).await?;
        let stored = self.repo.checksum_snapshot().await?;
        Ok(detect_changes(&snapshot, &stored))
    }

    pub async fn get_by_file_path(&self, file_path: &str) -> Result<Option<HydratedEntity>> {
        match self.repo.get_by_file_path(file_path).await? {
            Some(entity) => Ok(self.repo.hydrate(vec![entity]).await?.pop()),
            None => Ok(None),
        }
    }

    pub async fn get_by_permalink(&self, permalink: &str) -> Result<Option<HydratedEntity>> {
        match self.repo.get_by_permalink(permalink).await? {
            Some(entity) => Ok(self.repo.hydrate(vec![entity]).await?.pop()),
            None => Ok(None),
        }
    }

    pub async fn find_by_permalinks(&self, permalinks: &[String]) -> Result<Vec<HydratedEntity>> {
        let entities = self.repo.find_by_permalinks(permalinks).await?;
        self.repo.hydrate(entities).await
    }

    /// Move one entity as a single-move pass
    ///
    /// When no entity is stored at `old_path` (another pass already moved it)
    /// the file at `new_path` is synced instead.
    pub async fn handle_move(&self, old_path: &str, new_path: &str) -> Result<HydratedEntity> {
        let mut moved = self.apply_moves(&[FileMove::new(old_path, new_path)]).await?;
        moved
            .pop()
            .ok_or_else(|| Error::EntityNotFound(old_path.to_string()))
    }

    /// Apply several moves in one pass
    ///
    /// The final state does not depend on the order of `moves`. Returns the
    /// moved entities in request order.
    pub async fn apply_moves(&self, moves: &[FileMove]) -> Result<Vec<HydratedEntity>> {
        let mut resolver = MoveResolver::new(self.repo.as_ref(), self.settings.update_permalinks_on_move);
        let mut ids = Vec::with_capacity(moves.len());

        for mv in moves {
            match resolver.apply(&mv.from, &mv.to).await {
                Ok(outcome) => ids.push((outcome.entity_id(), mv)),
                Err(err) => {
                    // Settle what was parked so far before reporting
                    if let Err(finish_err) = resolver.finish().await {
                        warn!(error = %finish_err, "Could not settle parked entities");
                    }
                    return Err(err);
                }
            }
        }
        resolver.finish().await?;

        let mut entities = Vec::with_capacity(ids.len());
        for (id, mv) in ids {
            let entity = match id {
                Some(id) => self
                    .repo
                    .get_by_id(id)
                    .await?
                    .ok_or_else(|| Error::InvariantViolation(format!("moved entity {} vanished", id)))?,
                None => self.sync_missing_move(mv).await?,
            };
            self.repo.resolve_relations_to(&entity).await?;
            entities.push(entity);
        }

        self.repo.hydrate(entities).await
    }

    async fn apply_changes(
        &self,
        changes: &ChangeSet,
        token: &CancellationToken,
        report: &mut SyncReport,
    ) -> Result<()> {
        for path in &changes.deleted {
            checkpoint(token)?;
            match self.repo.delete_by_file_path(path).await {
                Ok(true) => {
                    report.deleted += 1;
                    debug!(file_path = %path, "Entity deleted for missing file");
                }
                Ok(false) => {}
                Err(err) => absorb(report, path, err)?,
            }
        }

        self.apply_detected_moves(&changes.moved, token, report).await?;

        for path in &changes.modified {
            checkpoint(token)?;
            self.apply_file(path, FileEvent::Modified, report).await?;
        }

        for path in &changes.created {
            checkpoint(token)?;
            self.apply_file(path, FileEvent::Created, report).await?;
        }

        Ok(())
    }

    async fn apply_detected_moves(
        &self,
        moves: &[FileMove],
        token: &CancellationToken,
        report: &mut SyncReport,
    ) -> Result<()> {
        if moves.is_empty() {
            return Ok(());
        }

        let mut resolver = MoveResolver::new(self.repo.as_ref(), self.settings.update_permalinks_on_move);
        let mut moved: Vec<EntityId> = Vec::new();
        let mut interrupted = None;

        for mv in moves {
            if let Err(err) = checkpoint(token) {
                interrupted = Some(err);
                break;
            }

            match resolver.apply(&mv.from, &mv.to).await {
                Ok(MoveOutcome::Moved(id)) | Ok(MoveOutcome::Parked(id)) => {
                    report.moved += 1;
                    moved.push(id);
                }
                Ok(MoveOutcome::Missing) => match self.sync_missing_move(mv).await {
                    Ok(_) => report.updated += 1,
                    Err(err) => {
                        if let Err(fatal) = absorb(report, &mv.to, err) {
                            interrupted = Some(fatal);
                            break;
                        }
                    }
                },
                Err(err) => {
                    if let Err(fatal) = absorb(report, &mv.from, err) {
                        interrupted = Some(fatal);
                        break;
                    }
                }
            }
        }

        // Parked entities are settled even when the pass is cut short
        resolver.finish().await?;

        for id in moved {
            let entity = self
                .repo
                .get_by_id(id)
                .await?
                .ok_or_else(|| Error::InvariantViolation(format!("moved entity {} vanished", id)))?;
            report.relations_resolved += self.repo.resolve_relations_to(&entity).await?;
        }

        match interrupted {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn apply_file(&self, path: &str, event: FileEvent, report: &mut SyncReport) -> Result<()> {
        match self.sync_file(path, self.settings.write_strategy).await {
            Ok((entity, created, resolved)) => {
                if created {
                    report.created += 1;
                } else {
                    report.updated += 1;
                }
                report.relations_resolved += resolved;
                debug!(entity_id = entity.id, file_path = %path, ?event, created, "File synced");
                Ok(())
            }
            Err(err) => absorb(report, path, err),
        }
    }

    /// Source vanished from the store; bring the destination file in directly
    async fn sync_missing_move(&self, mv: &FileMove) -> Result<Entity> {
        debug!(from = %mv.from, to = %mv.to, "Move source already gone, syncing destination");
        self.sync_file(&mv.to, WriteStrategy::Atomic)
            .await
            .map(|(entity, _, _)| entity)
    }

    /// Parse one file and write entity, content and checksum
    ///
    /// The entity is written first without a checksum; the checksum is stamped
    /// together with observations and relations, so an interrupted write is
    /// picked up as modified by the next pass.
    async fn sync_file(&self, path: &str, strategy: WriteStrategy) -> Result<(Entity, bool, u64)> {
        let bytes = tokio::fs::read(self.root.join(path)).await?;
        let checksum = content_checksum(&bytes);
        let content = String::from_utf8(bytes).map_err(|e| Error::ParseError {
            path: path.to_string(),
            message: format!("not valid UTF-8: {}", e),
        })?;

        let parsed = self.parser.parse(path, &content).await?;
        let existing = self.repo.get_by_file_path(path).await?;

        let permalink = match (&parsed.permalink, &existing) {
            (Some(declared), _) if !declared.trim().is_empty() => declared.trim().to_string(),
            (_, Some(entity)) => entity.permalink.clone(),
            _ => path_permalink(path),
        };

        let draft = EntityDraft::new(path, permalink, parsed.title.clone())
            .with_entity_type(parsed.entity_type.as_deref().unwrap_or(DEFAULT_ENTITY_TYPE))
            .with_content_type(parsed.content_type.clone())
            .with_metadata(parsed.metadata.clone());

        // `created` comes from the write itself; `existing` may be stale when
        // another pass writes the same path concurrently
        let (entity, created) = match strategy {
            WriteStrategy::Identity => self.identity_write(&draft).await?,
            WriteStrategy::Atomic => {
                let now = Utc::now();
                let fields = EntityFields::from_draft(&draft, now);
                match self.repo.upsert_entity_atomic(&fields, ConflictTarget::FilePath).await {
                    // An update keeps the stored created_at
                    Ok(entity) => {
                        let created = entity.created_at == now;
                        (entity, created)
                    }
                    Err(err) if err.is_permalink_conflict() => {
                        debug!(file_path = %path, "Permalink clash on atomic write, using identity upsert");
                        self.identity_write(&draft).await?
                    }
                    Err(err) => return Err(err),
                }
            }
        };

        self.repo
            .replace_content(entity.id, &parsed.observations, &parsed.relations, &checksum)
            .await?;

        let identity_changed = existing
            .as_ref()
            .is_none_or(|old| old.permalink != entity.permalink || old.title != entity.title);
        let resolved = if identity_changed {
            self.repo.resolve_relations_to(&entity).await?
        } else {
            0
        };

        Ok((entity, created, resolved))
    }

    async fn identity_write(&self, draft: &EntityDraft) -> Result<(Entity, bool)> {
        let upserted = self.repo.upsert_entity(draft).await?;
        Ok((upserted.entity.entity, upserted.inserted))
    }
}

fn checkpoint(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

/// Record a per-file failure; fatal errors end the pass
fn absorb(report: &mut SyncReport, path: &str, err: Error) -> Result<()> {
    match err {
        Error::InvariantViolation(_) | Error::Cancelled => Err(err),
        err => {
            warn!(file_path = %path, code = err.code(), error = %err, "File sync failed");
            report.record_failure(path, &err);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_strategy_parse() {
        assert_eq!("atomic".parse::<WriteStrategy>().unwrap(), WriteStrategy::Atomic);
        assert_eq!("identity".parse::<WriteStrategy>().unwrap(), WriteStrategy::Identity);
        assert!("optimistic".parse::<WriteStrategy>().is_err());
        assert_eq!(WriteStrategy::default().to_string(), "atomic");
    }

    #[test]
    fn test_checkpoint() {
        let token = CancellationToken::new();
        assert!(checkpoint(&token).is_ok());
        token.cancel();
        assert!(matches!(checkpoint(&token), Err(Error::Cancelled)));
    }

    #[test]
    fn test_absorb_keeps_pass_alive_for_file_errors() {
        let mut report = SyncReport::default();
        absorb(&mut report, "a.md", Error::InvalidInput("x".into())).unwrap();
        assert_eq!(report.errors.len(), 1);

        let fatal = absorb(&mut report, "b.md", Error::InvariantViolation("gone".into()));
        assert!(fatal.is_err());
        assert_eq!(report.errors.len(), 1);
    }
}
