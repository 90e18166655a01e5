//! Repository trait for knowledge graph persistence
//!
//! The repository is the only component allowed to mutate entities. Each
//! instance is scoped to one project; every read and write it performs is
//! filtered by that project's id.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::entity::{Entity, EntityDraft, EntityFields, EntityId, ProjectId};
use super::hydration::HydratedEntity;
use super::relation::{NewObservation, NewRelation, RelationResolution};

/// How an identity upsert landed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// No entity existed for the file path
    Inserted,
    /// The entity at the file path was overwritten in place
    UpdatedExisting,
    /// The requested permalink was taken; the entity got a suffixed one
    ConflictResolved { permalink: String },
}

/// Result of an identity upsert
#[derive(Debug, Clone, PartialEq)]
pub struct Upserted {
    pub outcome: UpsertOutcome,
    /// This write created the row, whatever `outcome` says about permalinks
    pub inserted: bool,
    pub entity: HydratedEntity,
}

/// Unique key targeted by the native `ON CONFLICT` upsert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictTarget {
    #[default]
    FilePath,
    Permalink,
}

impl ConflictTarget {
    /// Column name of the conflict key
    pub fn column(&self) -> &'static str {
        match self {
            Self::FilePath => "file_path",
            Self::Permalink => "permalink",
        }
    }
}

/// Project-scoped entity store
#[async_trait]
pub trait EntityRepository: Send + Sync {
    /// Project every operation is scoped to
    fn project_id(&self) -> ProjectId;

    // ========== Reads ==========

    /// Get an entity by id
    async fn get_by_id(&self, id: EntityId) -> Result<Option<Entity>>;

    /// Get the entity backed by a file
    async fn get_by_file_path(&self, file_path: &str) -> Result<Option<Entity>>;

    /// Get an entity by permalink
    async fn get_by_permalink(&self, permalink: &str) -> Result<Option<Entity>>;

    /// Get every entity whose permalink is in the list
    ///
    /// An empty list returns an empty result without touching the store.
    async fn find_by_permalinks(&self, permalinks: &[String]) -> Result<Vec<Entity>>;

    /// List all entities ordered by file path
    async fn list_entities(&self) -> Result<Vec<Entity>>;

    /// Count entities
    async fn count_entities(&self) -> Result<u64>;

    /// Stored `file_path -> checksum` map used by change detection
    async fn checksum_snapshot(&self) -> Result<BTreeMap<String, Option<String>>>;

    /// Load observations, both relation views and relation endpoints
    async fn hydrate(&self, entities: Vec<Entity>) -> Result<Vec<HydratedEntity>>;

    // ========== Writes ==========

    /// Insert or update by `(project, file_path)` identity
    ///
    /// Resolves file path races by re-checking and updating, and permalink
    /// collisions by suffixing. Afterwards exactly one entity exists for the
    /// draft's file path.
    async fn upsert_entity(&self, draft: &EntityDraft) -> Result<Upserted>;

    /// Single-statement upsert keyed on one unique column
    ///
    /// Writes every supplied field except the conflict key. Violations of the
    /// other unique key surface as `Error::UniqueViolation`.
    async fn upsert_entity_atomic(&self, fields: &EntityFields, target: ConflictTarget) -> Result<Entity>;

    /// Partial update of an existing entity
    async fn update_entity(&self, id: EntityId, fields: &EntityFields) -> Result<Entity>;

    /// Delete an entity; incoming relations become forward references again
    async fn delete_entity(&self, id: EntityId) -> Result<bool>;

    /// Delete the entity backed by a file, if any
    async fn delete_by_file_path(&self, file_path: &str) -> Result<bool>;

    /// First of `base`, `base-1`, `base-2`, ... not owned by another entity
    async fn unique_permalink(&self, base: &str, excluding: Option<EntityId>) -> Result<String>;

    /// Replace observations and outgoing relations, then stamp the checksum
    ///
    /// Runs in one transaction so a checksum is only ever recorded for fully
    /// written content.
    async fn replace_content(
        &self,
        id: EntityId,
        observations: &[NewObservation],
        relations: &[NewRelation],
        checksum: &str,
    ) -> Result<()>;

    /// Point forward references at a newly created or moved entity
    ///
    /// Ignores the attempt budget. Returns the number of relations resolved.
    async fn resolve_relations_to(&self, entity: &Entity) -> Result<u64>;

    /// One bounded resolution round over all forward references
    async fn resolve_forward_relations(&self, max_attempts: u32) -> Result<RelationResolution>;
}
