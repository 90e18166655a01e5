//! End-to-end sync passes over real directories

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use notegraph_core::commands::project::ensure_with_db;
use notegraph_core::domain::graph::EntityRepository;
use notegraph_core::domain::sync::{DirectoryScanner, DirectorySnapshot, SyncService, SyncSettings, WriteStrategy};
use notegraph_core::infrastructure::filesystem::FsScanner;
use notegraph_core::infrastructure::graph::SqliteEntityRepository;
use notegraph_core::infrastructure::markdown::MarkdownParser;
use notegraph_core::storage::{Database, DatabaseConfig};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn write(root: &Path, path: &str, content: &str) {
    let full = root.join(path);
    fs::create_dir_all(full.parent().unwrap()).unwrap();
    fs::write(full, content).unwrap();
}

async fn service(db: &Database, root: &Path, settings: SyncSettings) -> SyncService {
    let project = ensure_with_db(db, "main", root).await.unwrap();
    SyncService::new(
        root,
        Arc::new(SqliteEntityRepository::new(db.pool().clone(), project.id)),
        Arc::new(MarkdownParser::new()),
        Arc::new(FsScanner::default()),
        settings,
    )
}

async fn setup() -> (TempDir, Database) {
    let dir = TempDir::new().unwrap();
    let db = Database::in_memory().await.expect("Failed to create database");
    (dir, db)
}

async fn assert_no_duplicates(repo: &dyn EntityRepository) {
    let entities = repo.list_entities().await.unwrap();
    let paths: BTreeSet<&str> = entities.iter().map(|e| e.file_path.as_str()).collect();
    let permalinks: BTreeSet<&str> = entities.iter().map(|e| e.permalink.as_str()).collect();
    assert_eq!(paths.len(), entities.len(), "duplicate file paths: {entities:?}");
    assert_eq!(permalinks.len(), entities.len(), "duplicate permalinks: {entities:?}");
}

#[tokio::test]
async fn test_resync_of_unchanged_content_writes_nothing() {
    let (dir, db) = setup().await;
    write(dir.path(), "alpha.md", "# Alpha\n\n- [fact] first letter\n- precedes [[Beta]]");
    write(dir.path(), "greek/beta.md", "# Beta");
    let service = service(&db, dir.path(), SyncSettings::default()).await;

    let first = service.sync().await.unwrap();
    assert_eq!(first.created, 2);
    assert!(first.is_clean());

    let second = service.sync().await.unwrap();
    assert_eq!(second.total_changes(), 0);
    assert_eq!(second.unchanged, 2);
    assert!(second.is_clean());
}

#[tokio::test]
async fn test_modified_file_updates_content() {
    let (dir, db) = setup().await;
    write(dir.path(), "alpha.md", "# Alpha\n\n- [fact] one");
    let service = service(&db, dir.path(), SyncSettings::default()).await;
    service.sync().await.unwrap();
    let before = service.get_by_file_path("alpha.md").await.unwrap().unwrap();

    write(dir.path(), "alpha.md", "# Alpha\n\n- [fact] one\n- [fact] two");
    let report = service.sync().await.unwrap();
    assert_eq!(report.updated, 1);

    let after = service.get_by_file_path("alpha.md").await.unwrap().unwrap();
    assert_eq!(after.id(), before.id());
    assert_eq!(after.observations.len(), 2);
    assert_eq!(after.entity.permalink, "alpha");
}

#[tokio::test]
async fn test_shared_permalink_base_gets_suffix() {
    for strategy in [WriteStrategy::Atomic, WriteStrategy::Identity] {
        let (dir, db) = setup().await;
        write(dir.path(), "a.md", "---\npermalink: shared\n---\n# A");
        write(dir.path(), "b.md", "---\npermalink: shared\n---\n# B");
        let settings = SyncSettings {
            write_strategy: strategy,
            ..Default::default()
        };
        let service = service(&db, dir.path(), settings).await;

        let report = service.sync().await.unwrap();
        assert_eq!(report.created, 2, "strategy {strategy}");
        assert!(report.is_clean(), "strategy {strategy}: {report:?}");

        let a = service.get_by_file_path("a.md").await.unwrap().unwrap();
        let b = service.get_by_file_path("b.md").await.unwrap().unwrap();
        assert_eq!(a.entity.permalink, "shared");
        assert_eq!(b.entity.permalink, "shared-1");

        // Stable across passes
        write(dir.path(), "b.md", "---\npermalink: shared\n---\n# B\n\nedited");
        service.sync().await.unwrap();
        let b = service.get_by_file_path("b.md").await.unwrap().unwrap();
        assert_eq!(b.entity.permalink, "shared-1");
        assert_no_duplicates(service.repository()).await;
    }
}

#[tokio::test]
async fn test_deleted_file_reverts_incoming_links() {
    let (dir, db) = setup().await;
    write(dir.path(), "a.md", "# A\n\n- depends on [[B]]");
    write(dir.path(), "b.md", "# B");
    let service = service(&db, dir.path(), SyncSettings::default()).await;
    service.sync().await.unwrap();

    let a = service.get_by_file_path("a.md").await.unwrap().unwrap();
    assert_eq!(a.unresolved_relations().count(), 0);

    fs::remove_file(dir.path().join("b.md")).unwrap();
    let report = service.sync().await.unwrap();
    assert_eq!(report.deleted, 1);
    assert!(service.get_by_file_path("b.md").await.unwrap().is_none());

    let a = service.get_by_file_path("a.md").await.unwrap().unwrap();
    assert_eq!(a.unresolved_relations().count(), 1);
    assert_eq!(report.relations_unresolved, 1);
}

#[tokio::test]
async fn test_renamed_file_keeps_entity_id() {
    let (dir, db) = setup().await;
    write(dir.path(), "draft.md", "# Idea\n\n- [note] keep me");
    let service = service(&db, dir.path(), SyncSettings::default()).await;
    service.sync().await.unwrap();
    let before = service.get_by_file_path("draft.md").await.unwrap().unwrap();

    fs::create_dir_all(dir.path().join("ideas")).unwrap();
    fs::rename(dir.path().join("draft.md"), dir.path().join("ideas/final.md")).unwrap();

    let changes = service.detect_changes().await.unwrap();
    assert_eq!(changes.moved.len(), 1);

    let report = service.sync().await.unwrap();
    assert_eq!(report.moved, 1);
    assert_eq!(report.created, 0);
    assert_eq!(report.deleted, 0);

    let after = service.get_by_file_path("ideas/final.md").await.unwrap().unwrap();
    assert_eq!(after.id(), before.id());
    assert_eq!(after.entity.permalink, "ideas/final");
    assert_eq!(after.observations.len(), 1);
}

#[tokio::test]
async fn test_declared_permalink_survives_move() {
    let (dir, db) = setup().await;
    write(dir.path(), "a.md", "---\npermalink: fixed\n---\n# A");
    let service = service(&db, dir.path(), SyncSettings::default()).await;
    service.sync().await.unwrap();

    fs::rename(dir.path().join("a.md"), dir.path().join("z.md")).unwrap();
    service.sync().await.unwrap();

    let moved = service.get_by_file_path("z.md").await.unwrap().unwrap();
    assert_eq!(moved.entity.permalink, "fixed");
}

#[tokio::test]
async fn test_swap_on_disk_preserves_both_ids() {
    let (dir, db) = setup().await;
    write(dir.path(), "a.md", "# First");
    write(dir.path(), "b.md", "# Second");
    let service = service(&db, dir.path(), SyncSettings::default()).await;
    service.sync().await.unwrap();
    let first = service.get_by_file_path("a.md").await.unwrap().unwrap().id();
    let second = service.get_by_file_path("b.md").await.unwrap().unwrap().id();

    write(dir.path(), "a.md", "# Second");
    write(dir.path(), "b.md", "# First");

    let report = service.sync().await.unwrap();
    assert_eq!(report.moved, 2);
    assert!(report.is_clean(), "{report:?}");

    let at_a = service.get_by_file_path("a.md").await.unwrap().unwrap();
    let at_b = service.get_by_file_path("b.md").await.unwrap().unwrap();
    assert_eq!(at_a.id(), second);
    assert_eq!(at_b.id(), first);
    assert_eq!(at_a.entity.title, "Second");
    assert_eq!(at_a.entity.permalink, "a");
    assert_eq!(at_b.entity.permalink, "b");

    assert_no_duplicates(service.repository()).await;
    assert_eq!(service.sync().await.unwrap().total_changes(), 0);
}

#[tokio::test]
async fn test_forward_reference_resolves_when_target_appears() {
    let (dir, db) = setup().await;
    write(dir.path(), "a.md", "# A\n\n- implements [[Storage Layer]]");
    let service = service(&db, dir.path(), SyncSettings::default()).await;

    let report = service.sync().await.unwrap();
    assert_eq!(report.relations_unresolved, 1);

    write(dir.path(), "design/storage.md", "# Storage Layer");
    let report = service.sync().await.unwrap();
    assert_eq!(report.relations_unresolved, 0);
    assert!(report.relations_resolved >= 1);

    let a = service.get_by_file_path("a.md").await.unwrap().unwrap();
    let targets: Vec<&str> = a.outgoing_targets().map(|t| t.file_path.as_str()).collect();
    assert_eq!(targets, vec!["design/storage.md"]);

    let target = service.get_by_permalink("design/storage").await.unwrap().unwrap();
    assert_eq!(target.incoming_relations.len(), 1);
}

#[tokio::test]
async fn test_find_by_permalinks() {
    let (dir, db) = setup().await;
    write(dir.path(), "a.md", "# A");
    write(dir.path(), "b.md", "# B");
    write(dir.path(), "c.md", "# C");
    let service = service(&db, dir.path(), SyncSettings::default()).await;
    service.sync().await.unwrap();

    let found = service
        .find_by_permalinks(&["a".to_string(), "c".to_string(), "missing".to_string()])
        .await
        .unwrap();
    let mut titles: Vec<&str> = found.iter().map(|e| e.entity.title.as_str()).collect();
    titles.sort();
    assert_eq!(titles, vec!["A", "C"]);

    assert!(service.find_by_permalinks(&[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_bad_file_is_reported_not_fatal() {
    let (dir, db) = setup().await;
    write(dir.path(), "good.md", "# Good");
    fs::write(dir.path().join("binary.md"), [0xff, 0xfe, 0x00, 0x80]).unwrap();
    let service = service(&db, dir.path(), SyncSettings::default()).await;

    let report = service.sync().await.unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].path, "binary.md");
    assert_eq!(report.errors[0].code, "E200");
}

#[tokio::test]
async fn test_cancelled_pass_is_resumed_by_next_pass() {
    let (dir, db) = setup().await;
    write(dir.path(), "a.md", "# A");
    write(dir.path(), "b.md", "# B");
    let service = service(&db, dir.path(), SyncSettings::default()).await;

    let token = CancellationToken::new();
    token.cancel();
    let report = service.sync_with_cancel(token).await.unwrap();
    assert!(report.cancelled);
    assert_eq!(report.created, 0);

    let report = service.sync().await.unwrap();
    assert!(!report.cancelled);
    assert_eq!(report.created, 2);
}

#[tokio::test]
async fn test_concurrent_passes_leave_no_duplicates() {
    for strategy in [WriteStrategy::Atomic, WriteStrategy::Identity] {
        let dir = TempDir::new().unwrap();
        let notes = dir.path().join("notes");
        for i in 0..20 {
            write(&notes, &format!("note-{i}.md"), &format!("# Note {i}\n\n- follows [[Note {}]]", i + 1));
        }

        let db = Database::new(DatabaseConfig::with_path(dir.path().join("graph.db")).max_connections(4))
            .await
            .expect("Failed to create database");
        let settings = SyncSettings {
            write_strategy: strategy,
            ..Default::default()
        };
        let first = service(&db, &notes, settings.clone()).await;
        let second = service(&db, &notes, settings).await;

        let (a, b) = tokio::join!(first.sync(), second.sync());
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(a.errors.is_empty(), "{strategy}: {:?}", a.errors);
        assert!(b.errors.is_empty(), "{strategy}: {:?}", b.errors);

        // Each row is inserted by exactly one of the passes
        assert_eq!(a.created + b.created, 20, "{strategy}: {a:?} {b:?}");

        let again = first.sync().await.unwrap();
        assert!(again.is_clean(), "{strategy}: {again:?}");

        assert_eq!(first.repository().count_entities().await.unwrap(), 20);
        assert_no_duplicates(first.repository()).await;
        assert!(first.detect_changes().await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_rewrite_of_unstamped_row_counts_as_update() {
    for strategy in [WriteStrategy::Atomic, WriteStrategy::Identity] {
        let (dir, db) = setup().await;
        write(dir.path(), "a.md", "# A");
        let settings = SyncSettings {
            write_strategy: strategy,
            ..Default::default()
        };
        let service = service(&db, dir.path(), settings).await;

        // The row exists but its checksum was never stamped
        let report = service.sync().await.unwrap();
        assert_eq!(report.created, 1);
        sqlx::query("UPDATE entities SET checksum = NULL")
            .execute(db.pool())
            .await
            .unwrap();

        let report = service.sync().await.unwrap();
        assert_eq!((report.created, report.updated), (0, 1), "{strategy}");
    }
}

/// Reports one path as unreadable, as a permission error would
struct LockedScanner {
    inner: FsScanner,
    locked: &'static str,
}

#[async_trait]
impl DirectoryScanner for LockedScanner {
    async fn scan(&self, root: &Path) -> notegraph_core::Result<DirectorySnapshot> {
        let mut snapshot = self.inner.scan(root).await?;
        snapshot.files.retain(|path, _| !path.starts_with(self.locked));
        snapshot.skip(self.locked, "Permission denied (os error 13)");
        Ok(snapshot)
    }
}

#[tokio::test]
async fn test_unreadable_paths_keep_their_entities() {
    let (dir, db) = setup().await;
    write(dir.path(), "open.md", "# Open");
    write(dir.path(), "private/secret.md", "# Secret\n\n- [fact] hidden");
    let plain = service(&db, dir.path(), SyncSettings::default()).await;
    assert_eq!(plain.sync().await.unwrap().created, 2);
    let secret = plain.get_by_file_path("private/secret.md").await.unwrap().unwrap();

    let project = ensure_with_db(&db, "main", dir.path()).await.unwrap();
    let locked = SyncService::new(
        dir.path(),
        Arc::new(SqliteEntityRepository::new(db.pool().clone(), project.id)),
        Arc::new(MarkdownParser::new()),
        Arc::new(LockedScanner {
            inner: FsScanner::default(),
            locked: "private",
        }),
        SyncSettings::default(),
    );

    let changes = locked.detect_changes().await.unwrap();
    assert!(changes.deleted.is_empty());
    assert!(changes.skipped.contains_key("private"));

    let report = locked.sync().await.unwrap();
    assert_eq!(report.deleted, 0);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].path, "private");
    assert_eq!(report.errors[0].code, "E9999");
    assert!(report.errors[0].message.contains("Permission denied"));

    let kept = locked.get_by_file_path("private/secret.md").await.unwrap().unwrap();
    assert_eq!(kept.id(), secret.id());
    assert_eq!(kept.observations.len(), 1);

    // Readable again: nothing to do
    let report = plain.sync().await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.total_changes(), 0);
}
