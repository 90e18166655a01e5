//! Markdown parser
//!
//! Understands the note conventions the graph is built from:
//!
//! ```text
//! ---
//! title: Search Design
//! type: design
//! permalink: design/search
//! ---
//!
//! # Search Design
//!
//! - [decision] Use SQLite FTS #storage (keeps deployment simple)
//! - implements [[Storage Layer]] (phase one)
//!
//! Free text may link to [[Other Notes]] inline.
//! ```
//!
//! Bracketed list items are observations, list items of the form
//! `relation_type [[Target]]` are relations, and any other wiki link becomes a
//! `links_to` relation. Fenced code blocks are skipped.

use std::path::Path;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::domain::document::{DocumentParser, ParsedDocument};
use crate::domain::graph::{MARKDOWN_CONTENT_TYPE, Metadata, NewObservation, NewRelation};
use crate::error::{Error, Result};

/// Relation type given to inline wiki links
pub const INLINE_LINK_RELATION: &str = "links_to";

static OBSERVATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[-*]\s+\[([^\[\]]+)\]\s+(.+?)\s*$").expect("observation pattern is valid")
});

static RELATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[-*]\s+([\w][\w \-]*?)\s+\[\[([^\]]+)\]\]\s*(?:\((.*)\))?\s*$")
        .expect("relation pattern is valid")
});

static WIKI_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\]]+)\]\]").expect("wiki link pattern is valid"));

static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)#([\w\-/]+)").expect("tag pattern is valid"));

static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#\s+(.+?)\s*#*\s*$").expect("heading pattern is valid"));

/// Parser for markdown notes with YAML frontmatter
#[derive(Debug, Clone, Default)]
pub struct MarkdownParser;

impl MarkdownParser {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous parse, shared by the async trait implementation
    pub fn parse_str(&self, path: &str, content: &str) -> Result<ParsedDocument> {
        let (metadata, body) = split_frontmatter(path, content)?;

        let mut observations = Vec::new();
        let mut relations = Vec::new();
        let mut heading = None;
        let mut in_fence = false;

        for line in body.lines() {
            if line.trim_start().starts_with("```") {
                in_fence = !in_fence;
                continue;
            }
            if in_fence {
                continue;
            }

            if heading.is_none() {
                if let Some(caps) = HEADING.captures(line) {
                    heading = Some(caps[1].to_string());
                    continue;
                }
            }

            if let Some(caps) = RELATION.captures(line) {
                let mut relation = NewRelation::new(caps[1].trim(), link_target(&caps[2]));
                if let Some(context) = caps.get(3).map(|m| m.as_str().trim()).filter(|c| !c.is_empty()) {
                    relation = relation.with_context(context);
                }
                push_relation(&mut relations, relation);
                continue;
            }

            if let Some(caps) = OBSERVATION.captures(line) {
                let category = caps[1].trim();
                // Task list checkboxes are not observations
                if !matches!(category, "" | " " | "x" | "X") {
                    observations.push(parse_observation(category, &caps[2]));
                }
            }

            for caps in WIKI_LINK.captures_iter(line) {
                push_relation(&mut relations, NewRelation::new(INLINE_LINK_RELATION, link_target(&caps[1])));
            }
        }

        let title = string_field(&metadata, "title")
            .or(heading)
            .unwrap_or_else(|| file_stem(path));

        Ok(ParsedDocument {
            title,
            entity_type: string_field(&metadata, "type"),
            content_type: MARKDOWN_CONTENT_TYPE.to_string(),
            permalink: string_field(&metadata, "permalink"),
            metadata,
            observations,
            relations,
        })
    }
}

#[async_trait]
impl DocumentParser for MarkdownParser {
    async fn parse(&self, path: &str, content: &str) -> Result<ParsedDocument> {
        self.parse_str(path, content)
    }
}

/// Split YAML frontmatter from the body
fn split_frontmatter<'a>(path: &str, content: &'a str) -> Result<(Metadata, &'a str)> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);

    let Some(rest) = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))
    else {
        return Ok((Metadata::new(), content));
    };

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Ok((parse_yaml(path, yaml)?, body));
        }
        offset += line.len();
    }

    // Unterminated block: treat the whole file as body
    Ok((Metadata::new(), content))
}

fn parse_yaml(path: &str, yaml: &str) -> Result<Metadata> {
    if yaml.trim().is_empty() {
        return Ok(Metadata::new());
    }

    let value: serde_json::Value = serde_yaml::from_str(yaml).map_err(|e| Error::ParseError {
        path: path.to_string(),
        message: format!("invalid frontmatter: {}", e),
    })?;

    match value {
        serde_json::Value::Object(map) => Ok(map),
        serde_json::Value::Null => Ok(Metadata::new()),
        other => Err(Error::ParseError {
            path: path.to_string(),
            message: format!("frontmatter must be a mapping, found {}", other),
        }),
    }
}

fn parse_observation(category: &str, text: &str) -> NewObservation {
    let (content, context) = split_context(text);
    let tags = TAG
        .captures_iter(content)
        .map(|caps| caps[1].to_string())
        .collect();

    let observation = NewObservation::new(category, content).with_tags(tags);
    match context {
        Some(context) => observation.with_context(context),
        None => observation,
    }
}

/// Trailing `(context)` of an observation
fn split_context(text: &str) -> (&str, Option<&str>) {
    let text = text.trim();
    if text.ends_with(')') {
        if let Some(open) = text.rfind(" (") {
            let context = text[open + 2..text.len() - 1].trim();
            if !context.is_empty() {
                return (text[..open].trim_end(), Some(context));
            }
        }
    }
    (text, None)
}

/// `[[Target|alias]]` links to `Target`
fn link_target(inner: &str) -> String {
    inner.split('|').next().unwrap_or(inner).trim().to_string()
}

fn push_relation(relations: &mut Vec<NewRelation>, relation: NewRelation) {
    if relation.to_name.is_empty() {
        return;
    }
    let duplicate = relations
        .iter()
        .any(|r| r.to_name == relation.to_name && r.relation_type == relation.relation_type);
    if !duplicate {
        relations.push(relation);
    }
}

fn string_field(metadata: &Metadata, key: &str) -> Option<String> {
    metadata
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn file_stem(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}
