//! Observations and relations
//!
//! Both are owned by the entity they were parsed from and are rewritten as a
//! whole whenever that entity's document changes.

use serde::{Deserialize, Serialize};

use super::entity::EntityId;
use crate::domain::permalink::generate_permalink;

/// An atomic fact attached to an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub id: i64,
    pub entity_id: EntityId,
    /// Category written in brackets, e.g. `[decision]`
    pub category: String,
    pub content: String,
    pub tags: Vec<String>,
    /// Trailing parenthesized context, if any
    pub context: Option<String>,
}

/// Observation parsed from a document, not yet persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewObservation {
    pub category: String,
    pub content: String,
    pub tags: Vec<String>,
    pub context: Option<String>,
}

impl NewObservation {
    /// Create an observation with no tags or context
    pub fn new(category: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            content: content.into(),
            tags: Vec::new(),
            context: None,
        }
    }

    /// Set tags
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Set context
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// A directed, typed edge between two entities
///
/// `to_id` is `None` while the target has not been synced yet (a forward
/// reference). The edge keeps the target text so it can be resolved later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub id: i64,
    pub from_id: EntityId,
    pub to_id: Option<EntityId>,
    /// Target as written in the source document
    pub to_name: String,
    /// Normalized target used for resolution
    pub to_permalink: String,
    pub relation_type: String,
    pub context: Option<String>,
}

impl Relation {
    /// True while the target entity is unknown
    pub fn is_forward_reference(&self) -> bool {
        self.to_id.is_none()
    }
}

/// Relation parsed from a document, not yet persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRelation {
    pub relation_type: String,
    pub to_name: String,
    pub context: Option<String>,
}

impl NewRelation {
    /// Create a relation to a named target
    pub fn new(relation_type: impl Into<String>, to_name: impl Into<String>) -> Self {
        Self {
            relation_type: relation_type.into(),
            to_name: to_name.into(),
            context: None,
        }
    }

    /// Set context
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Permalink the target is expected to have once synced
    pub fn target_permalink(&self) -> String {
        generate_permalink(&self.to_name)
    }
}

/// Outcome of one forward-reference resolution round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationResolution {
    /// Relations whose target was found in this round
    pub resolved: u64,
    /// Relations still unresolved and eligible for another round
    pub pending: u64,
    /// Relations that used up their attempts; only a matching new entity resolves them now
    pub exhausted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_permalink_normalizes_name() {
        let rel = NewRelation::new("relates_to", "Search Design");
        assert_eq!(rel.target_permalink(), "search-design");

        let rel = NewRelation::new("part_of", "specs/Sync Engine");
        assert_eq!(rel.target_permalink(), "specs/sync-engine");
    }

    #[test]
    fn test_forward_reference() {
        let rel = Relation {
            id: 1,
            from_id: 1,
            to_id: None,
            to_name: "Later".into(),
            to_permalink: "later".into(),
            relation_type: "links_to".into(),
            context: None,
        };
        assert!(rel.is_forward_reference());
    }

    #[test]
    fn test_observation_builder() {
        let obs = NewObservation::new("tech", "Uses SQLite")
            .with_tags(vec!["db".into()])
            .with_context("storage");
        assert_eq!(obs.tags, vec!["db".to_string()]);
        assert_eq!(obs.context.as_deref(), Some("storage"));
    }
}
