//! Parsed documents
//!
//! The sync engine never reads markdown itself; it hands file contents to a
//! [`DocumentParser`] and works with the structured result.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::graph::{Metadata, NewObservation, NewRelation};
use crate::error::Result;

/// Structured view of one document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedDocument {
    /// Title from frontmatter, first heading or file name
    pub title: String,
    /// Declared entity type, if any
    pub entity_type: Option<String>,
    /// MIME type of the source
    pub content_type: String,
    /// Permalink declared in frontmatter; `None` means derive from the path
    pub permalink: Option<String>,
    /// Remaining frontmatter
    pub metadata: Metadata,
    pub observations: Vec<NewObservation>,
    pub relations: Vec<NewRelation>,
}

/// Turns raw file content into a [`ParsedDocument`]
#[async_trait]
pub trait DocumentParser: Send + Sync {
    /// Parse the content of the file at `path` (relative to the project root)
    async fn parse(&self, path: &str, content: &str) -> Result<ParsedDocument>;
}
