//! Knowledge graph domain
//!
//! Entities projected from markdown documents, the observations and relations
//! parsed out of them, and the repository seam that persists all three.

pub mod entity;
pub mod hydration;
pub mod relation;
pub mod repository;

pub use entity::{
    DEFAULT_ENTITY_TYPE, Entity, EntityDraft, EntityFields, EntityId, EntitySummary,
    MARKDOWN_CONTENT_TYPE, Metadata, ProjectId,
};
pub use hydration::HydratedEntity;
pub use relation::{NewObservation, NewRelation, Observation, Relation, RelationResolution};
pub use repository::{ConflictTarget, EntityRepository, UpsertOutcome, Upserted};
