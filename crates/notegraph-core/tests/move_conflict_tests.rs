//! Move handling when destinations are occupied or writes fail

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use notegraph_core::commands::project::ensure_with_db;
use notegraph_core::domain::graph::{
    ConflictTarget, Entity, EntityDraft, EntityFields, EntityId, EntityRepository, HydratedEntity,
    NewObservation, NewRelation, ProjectId, RelationResolution, Upserted,
};
use notegraph_core::domain::sync::{FileMove, SyncService, SyncSettings};
use notegraph_core::error::UniqueConstraint;
use notegraph_core::infrastructure::filesystem::FsScanner;
use notegraph_core::infrastructure::graph::SqliteEntityRepository;
use notegraph_core::infrastructure::markdown::MarkdownParser;
use notegraph_core::storage::Database;
use notegraph_core::{Error, Result};
use tempfile::TempDir;

/// Delegates to SQLite but fails the first `update_entity` with a queued error
///
/// A forgetful repository instead lets every update succeed and then loses
/// the written row from `get_by_id`.
struct FaultyRepository {
    inner: SqliteEntityRepository,
    fault: Mutex<Option<Error>>,
    updates: Mutex<usize>,
    forget_updates: bool,
    forgotten: Mutex<BTreeSet<EntityId>>,
}

impl FaultyRepository {
    fn new(inner: SqliteEntityRepository, fault: Error) -> Self {
        Self {
            inner,
            fault: Mutex::new(Some(fault)),
            updates: Mutex::new(0),
            forget_updates: false,
            forgotten: Mutex::new(BTreeSet::new()),
        }
    }

    fn forgetful(inner: SqliteEntityRepository) -> Self {
        Self {
            inner,
            fault: Mutex::new(None),
            updates: Mutex::new(0),
            forget_updates: true,
            forgotten: Mutex::new(BTreeSet::new()),
        }
    }

    fn update_calls(&self) -> usize {
        *self.updates.lock().unwrap()
    }
}

#[async_trait]
impl EntityRepository for FaultyRepository {
    fn project_id(&self) -> ProjectId {
        self.inner.project_id()
    }

    async fn get_by_id(&self, id: EntityId) -> Result<Option<Entity>> {
        let forgotten = self.forgotten.lock().unwrap().contains(&id);
        if forgotten {
            return Ok(None);
        }
        self.inner.get_by_id(id).await
    }

    async fn get_by_file_path(&self, file_path: &str) -> Result<Option<Entity>> {
        self.inner.get_by_file_path(file_path).await
    }

    async fn get_by_permalink(&self, permalink: &str) -> Result<Option<Entity>> {
        self.inner.get_by_permalink(permalink).await
    }

    async fn find_by_permalinks(&self, permalinks: &[String]) -> Result<Vec<Entity>> {
        self.inner.find_by_permalinks(permalinks).await
    }

    async fn list_entities(&self) -> Result<Vec<Entity>> {
        self.inner.list_entities().await
    }

    async fn count_entities(&self) -> Result<u64> {
        self.inner.count_entities().await
    }

    async fn checksum_snapshot(&self) -> Result<BTreeMap<String, Option<String>>> {
        self.inner.checksum_snapshot().await
    }

    async fn hydrate(&self, entities: Vec<Entity>) -> Result<Vec<HydratedEntity>> {
        self.inner.hydrate(entities).await
    }

    async fn upsert_entity(&self, draft: &EntityDraft) -> Result<Upserted> {
        self.inner.upsert_entity(draft).await
    }

    async fn upsert_entity_atomic(&self, fields: &EntityFields, target: ConflictTarget) -> Result<Entity> {
        self.inner.upsert_entity_atomic(fields, target).await
    }

    async fn update_entity(&self, id: EntityId, fields: &EntityFields) -> Result<Entity> {
        *self.updates.lock().unwrap() += 1;
        let fault = self.fault.lock().unwrap().take();
        if let Some(err) = fault {
            return Err(err);
        }
        let entity = self.inner.update_entity(id, fields).await?;
        if self.forget_updates {
            self.forgotten.lock().unwrap().insert(id);
        }
        Ok(entity)
    }

    async fn delete_entity(&self, id: EntityId) -> Result<bool> {
        self.inner.delete_entity(id).await
    }

    async fn delete_by_file_path(&self, file_path: &str) -> Result<bool> {
        self.inner.delete_by_file_path(file_path).await
    }

    async fn unique_permalink(&self, base: &str, excluding: Option<EntityId>) -> Result<String> {
        self.inner.unique_permalink(base, excluding).await
    }

    async fn replace_content(
        &self,
        id: EntityId,
        observations: &[NewObservation],
        relations: &[NewRelation],
        checksum: &str,
    ) -> Result<()> {
        self.inner.replace_content(id, observations, relations, checksum).await
    }

    async fn resolve_relations_to(&self, entity: &Entity) -> Result<u64> {
        self.inner.resolve_relations_to(entity).await
    }

    async fn resolve_forward_relations(&self, max_attempts: u32) -> Result<RelationResolution> {
        self.inner.resolve_forward_relations(max_attempts).await
    }
}

struct Fixture {
    dir: TempDir,
    db: Database,
    project_id: ProjectId,
}

impl Fixture {
    /// Sync `files` into a fresh project
    async fn with_files(files: &[(&str, &str)]) -> Self {
        let dir = TempDir::new().unwrap();
        for (path, content) in files {
            fs::write(dir.path().join(path), content).unwrap();
        }
        let db = Database::in_memory().await.expect("Failed to create database");
        let project_id = ensure_with_db(&db, "main", dir.path()).await.unwrap().id;

        let fixture = Self { dir, db, project_id };
        let report = fixture.service().sync().await.unwrap();
        assert!(report.is_clean(), "{report:?}");
        fixture
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn sqlite(&self) -> SqliteEntityRepository {
        SqliteEntityRepository::new(self.db.pool().clone(), self.project_id)
    }

    fn service(&self) -> SyncService {
        self.service_over(Arc::new(self.sqlite()))
    }

    fn service_over(&self, repo: Arc<dyn EntityRepository>) -> SyncService {
        SyncService::new(
            self.root(),
            repo,
            Arc::new(MarkdownParser::new()),
            Arc::new(FsScanner::default()),
            SyncSettings::default(),
        )
    }

    async fn id_at(&self, path: &str) -> Option<EntityId> {
        self.sqlite().get_by_file_path(path).await.unwrap().map(|e| e.id)
    }
}

#[tokio::test]
async fn test_file_path_conflict_during_move_is_resolved() {
    let fixture = Fixture::with_files(&[("file_a.md", "# File A"), ("file_b.md", "# File B")]).await;
    let id_a = fixture.id_at("file_a.md").await.unwrap();
    let id_b = fixture.id_at("file_b.md").await.unwrap();

    // file_a.md was renamed over file_b.md
    fs::rename(fixture.root().join("file_a.md"), fixture.root().join("file_b.md")).unwrap();

    let faulty = Arc::new(FaultyRepository::new(
        fixture.sqlite(),
        Error::UniqueViolation(UniqueConstraint::FilePath),
    ));
    let service = fixture.service_over(faulty.clone());

    let moved = service.handle_move("file_a.md", "file_b.md").await.unwrap();

    assert_eq!(moved.id(), id_a);
    assert_eq!(moved.entity.file_path, "file_b.md");
    assert_eq!(moved.entity.permalink, "file-b");
    assert!(faulty.update_calls() > 1);

    assert_eq!(fixture.id_at("file_b.md").await, Some(id_a));
    assert_eq!(fixture.id_at("file_a.md").await, None);
    assert!(fixture.sqlite().get_by_id(id_b).await.unwrap().is_none());
    assert_eq!(fixture.sqlite().count_entities().await.unwrap(), 1);

    let report = fixture.service().sync().await.unwrap();
    assert_eq!(report.total_changes(), 0, "{report:?}");
}

#[tokio::test]
async fn test_unrelated_integrity_violation_propagates() {
    let fixture = Fixture::with_files(&[("file_a.md", "# File A")]).await;
    let id_a = fixture.id_at("file_a.md").await.unwrap();

    let message = "UNIQUE constraint failed: entities.some_other_field";
    let faulty = Arc::new(FaultyRepository::new(
        fixture.sqlite(),
        Error::UniqueViolation(UniqueConstraint::from_message(message)),
    ));
    let service = fixture.service_over(faulty);

    let err = service.handle_move("file_a.md", "file_c.md").await.unwrap_err();
    match err {
        Error::UniqueViolation(UniqueConstraint::Other(raw)) => assert_eq!(raw, message),
        other => panic!("unexpected error: {other:?}"),
    }

    // Nothing moved
    assert_eq!(fixture.id_at("file_a.md").await, Some(id_a));
    assert_eq!(fixture.id_at("file_c.md").await, None);
}

#[tokio::test]
async fn test_swap_via_apply_moves_is_order_independent() {
    for reversed in [false, true] {
        let fixture = Fixture::with_files(&[("a.md", "# A"), ("b.md", "# B")]).await;
        let id_a = fixture.id_at("a.md").await.unwrap();
        let id_b = fixture.id_at("b.md").await.unwrap();

        let mut moves = vec![FileMove::new("a.md", "b.md"), FileMove::new("b.md", "a.md")];
        if reversed {
            moves.reverse();
        }

        let moved = fixture.service().apply_moves(&moves).await.unwrap();
        assert_eq!(moved.len(), 2);

        assert_eq!(fixture.id_at("b.md").await, Some(id_a));
        assert_eq!(fixture.id_at("a.md").await, Some(id_b));

        let a = fixture.sqlite().get_by_id(id_a).await.unwrap().unwrap();
        assert_eq!(a.permalink, "b");
        assert!(!a.file_path.starts_with(".notegraph-pending"));
    }
}

#[tokio::test]
async fn test_rotation_of_three_files() {
    let fixture = Fixture::with_files(&[("a.md", "# A"), ("b.md", "# B"), ("c.md", "# C")]).await;
    let id_a = fixture.id_at("a.md").await.unwrap();
    let id_b = fixture.id_at("b.md").await.unwrap();
    let id_c = fixture.id_at("c.md").await.unwrap();

    let moves = [
        FileMove::new("a.md", "b.md"),
        FileMove::new("b.md", "c.md"),
        FileMove::new("c.md", "a.md"),
    ];
    fixture.service().apply_moves(&moves).await.unwrap();

    assert_eq!(fixture.id_at("b.md").await, Some(id_a));
    assert_eq!(fixture.id_at("c.md").await, Some(id_b));
    assert_eq!(fixture.id_at("a.md").await, Some(id_c));
    assert_eq!(fixture.sqlite().count_entities().await.unwrap(), 3);
}

#[tokio::test]
async fn test_three_step_swap_through_temp_path() {
    let fixture = Fixture::with_files(&[("a.md", "# A"), ("b.md", "# B")]).await;
    let id_a = fixture.id_at("a.md").await.unwrap();
    let id_b = fixture.id_at("b.md").await.unwrap();
    let service = fixture.service();

    service.handle_move("a.md", "tmp.md").await.unwrap();
    service.handle_move("b.md", "a.md").await.unwrap();
    service.handle_move("tmp.md", "b.md").await.unwrap();

    assert_eq!(fixture.id_at("a.md").await, Some(id_b));
    assert_eq!(fixture.id_at("b.md").await, Some(id_a));
    assert_eq!(fixture.id_at("tmp.md").await, None);

    let b = fixture.sqlite().get_by_id(id_b).await.unwrap().unwrap();
    assert_eq!(b.permalink, "a");
}

#[tokio::test]
async fn test_move_of_missing_source_syncs_destination() {
    let fixture = Fixture::with_files(&[("a.md", "# A")]).await;
    fs::write(fixture.root().join("new.md"), "# New").unwrap();

    let moved = fixture.service().handle_move("ghost.md", "new.md").await.unwrap();
    assert_eq!(moved.entity.file_path, "new.md");
    assert_eq!(moved.entity.title, "New");
}

#[tokio::test]
async fn test_empty_move_path_is_invalid() {
    let fixture = Fixture::with_files(&[("a.md", "# A")]).await;
    let err = fixture.service().handle_move("a.md", " ").await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn test_entity_missing_after_write_ends_the_pass() {
    let fixture = Fixture::with_files(&[("a.md", "# A"), ("b.md", "# B")]).await;
    let id_a = fixture.id_at("a.md").await.unwrap();

    fs::rename(fixture.root().join("a.md"), fixture.root().join("renamed.md")).unwrap();
    fs::write(fixture.root().join("c.md"), "# C").unwrap();

    let forgetful = Arc::new(FaultyRepository::forgetful(fixture.sqlite()));
    let err = fixture.service_over(forgetful.clone()).sync().await.unwrap_err();
    assert!(matches!(err, Error::InvariantViolation(_)), "{err:?}");
    assert_eq!(forgetful.update_calls(), 1);

    // The move itself landed; later events of the pass did not run
    assert_eq!(fixture.id_at("renamed.md").await, Some(id_a));
    assert_eq!(fixture.id_at("c.md").await, None);
}
