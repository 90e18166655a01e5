//! Entity types for the knowledge graph
//!
//! An entity is the projection of one markdown document. Its identity within
//! a project is carried twice: by `file_path` (where the document lives) and by
//! `permalink` (how other documents refer to it). Both are unique per project.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Store-assigned surrogate key of an entity
pub type EntityId = i64;

/// Store-assigned key of a project
pub type ProjectId = i64;

/// Frontmatter key/value pairs, stored as a JSON object
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Content type recorded for markdown documents
pub const MARKDOWN_CONTENT_TYPE: &str = "text/markdown";

/// Entity type used when the frontmatter does not declare one
pub const DEFAULT_ENTITY_TYPE: &str = "note";

/// A persisted knowledge graph node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Surrogate key
    pub id: EntityId,
    /// Owning project
    pub project_id: ProjectId,
    /// Path relative to the project root, `/`-separated
    pub file_path: String,
    /// Normalized identifier, unique per project
    pub permalink: String,
    /// Human-readable title
    pub title: String,
    /// Free-form type from frontmatter (`note`, `person`, ...)
    pub entity_type: String,
    /// MIME type of the backing file
    pub content_type: String,
    /// Hash of the last fully-synced content; `None` until content is written
    pub checksum: Option<String>,
    /// Frontmatter metadata
    pub metadata: Metadata,
    /// When the entity was first synced
    pub created_at: DateTime<Utc>,
    /// When the entity was last written
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    /// Lightweight view used as a relation endpoint
    pub fn summary(&self) -> EntitySummary {
        EntitySummary {
            id: self.id,
            title: self.title.clone(),
            permalink: self.permalink.clone(),
            file_path: self.file_path.clone(),
            entity_type: self.entity_type.clone(),
        }
    }
}

/// Candidate entity handed to the identity upsert
///
/// Carries every mutable field; `id` and timestamps are owned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityDraft {
    pub file_path: String,
    pub permalink: String,
    pub title: String,
    pub entity_type: String,
    pub content_type: String,
    pub checksum: Option<String>,
    pub metadata: Metadata,
}

impl EntityDraft {
    /// Create a draft for a markdown document
    pub fn new(
        file_path: impl Into<String>,
        permalink: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            permalink: permalink.into(),
            title: title.into(),
            entity_type: DEFAULT_ENTITY_TYPE.to_string(),
            content_type: MARKDOWN_CONTENT_TYPE.to_string(),
            checksum: None,
            metadata: Metadata::new(),
        }
    }

    /// Set the entity type
    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = entity_type.into();
        self
    }

    /// Set the content type
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Set the checksum
    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    /// Set frontmatter metadata
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Sparse set of entity columns
///
/// Used for partial updates and for the native `ON CONFLICT` upsert, where
/// only the supplied (`Some`) fields are written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityFields {
    pub file_path: Option<String>,
    pub permalink: Option<String>,
    pub title: Option<String>,
    pub entity_type: Option<String>,
    pub content_type: Option<String>,
    pub checksum: Option<String>,
    pub metadata: Option<Metadata>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl EntityFields {
    /// Fields for relocating an entity
    pub fn relocate(file_path: impl Into<String>, permalink: impl Into<String>) -> Self {
        Self {
            file_path: Some(file_path.into()),
            permalink: Some(permalink.into()),
            ..Default::default()
        }
    }

    /// Every field of a draft, stamped with the given time
    pub fn from_draft(draft: &EntityDraft, now: DateTime<Utc>) -> Self {
        Self {
            file_path: Some(draft.file_path.clone()),
            permalink: Some(draft.permalink.clone()),
            title: Some(draft.title.clone()),
            entity_type: Some(draft.entity_type.clone()),
            content_type: Some(draft.content_type.clone()),
            checksum: draft.checksum.clone(),
            metadata: Some(draft.metadata.clone()),
            created_at: Some(now),
            updated_at: Some(now),
        }
    }

    /// True when no column is supplied
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Relation endpoint as stored in the hydration arena
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySummary {
    pub id: EntityId,
    pub title: String,
    pub permalink: String,
    pub file_path: String,
    pub entity_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draft_defaults() {
        let draft = EntityDraft::new("notes/a.md", "notes/a", "A");
        assert_eq!(draft.entity_type, DEFAULT_ENTITY_TYPE);
        assert_eq!(draft.content_type, MARKDOWN_CONTENT_TYPE);
        assert!(draft.checksum.is_none());
        assert!(draft.metadata.is_empty());
    }

    #[test]
    fn test_draft_builder() {
        let mut metadata = Metadata::new();
        metadata.insert("tags".into(), serde_json::json!(["rust"]));

        let draft = EntityDraft::new("people/ada.md", "people/ada", "Ada")
            .with_entity_type("person")
            .with_checksum("abc")
            .with_metadata(metadata.clone());

        assert_eq!(draft.entity_type, "person");
        assert_eq!(draft.checksum.as_deref(), Some("abc"));
        assert_eq!(draft.metadata, metadata);
    }

    #[test]
    fn test_fields_from_draft_supplies_everything() {
        let draft = EntityDraft::new("a.md", "a", "A");
        let fields = EntityFields::from_draft(&draft, Utc::now());
        assert_eq!(fields.file_path.as_deref(), Some("a.md"));
        assert!(fields.checksum.is_none());
        assert!(fields.created_at.is_some());
        assert!(!fields.is_empty());
        assert!(EntityFields::default().is_empty());
    }
}
