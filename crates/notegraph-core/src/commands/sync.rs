//! Sync commands
//!
//! Wires a project's configuration and the shared database into a
//! [`SyncService`] and runs passes, dry runs and moves against it.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::project::ensure_with_db;
use crate::config::Config;
use crate::domain::graph::HydratedEntity;
use crate::domain::sync::{ChangeSet, SyncReport, SyncService};
use crate::infrastructure::filesystem::FsScanner;
use crate::infrastructure::graph::SqliteEntityRepository;
use crate::infrastructure::markdown::MarkdownParser;
use crate::storage::Database;
use crate::{Error, Result};

/// Outcome of one project's pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectReport {
    pub project: String,
    pub root: PathBuf,
    #[serde(flatten)]
    pub report: SyncReport,
}

/// Name and root of a project, `root` overriding the configured path
pub fn resolve_project(config: &Config, name: Option<&str>, root: Option<&Path>) -> Result<(String, PathBuf)> {
    let name = name.unwrap_or(&config.default_project).to_string();
    let root = match root {
        Some(root) => root.to_path_buf(),
        None => config
            .project_path(&name)
            .map(Path::to_path_buf)
            .ok_or_else(|| Error::ProjectNotFound(name.clone()))?,
    };
    Ok((name, root))
}

/// Register the project and build its sync service
pub async fn open_service(db: &Database, config: &Config, name: &str, root: &Path) -> Result<SyncService> {
    let project = ensure_with_db(db, name, root).await?;

    let repo = SqliteEntityRepository::new(db.pool().clone(), project.id);
    let scanner = FsScanner::new(config.sync.extensions.clone(), config.sync.ignore.clone());

    Ok(SyncService::new(
        root,
        Arc::new(repo),
        Arc::new(MarkdownParser::new()),
        Arc::new(scanner),
        config.sync.settings(),
    ))
}

/// Run one pass over a project
pub async fn sync_project(
    db: &Database,
    config: &Config,
    name: Option<&str>,
    root: Option<&Path>,
    token: CancellationToken,
) -> Result<ProjectReport> {
    let (name, root) = resolve_project(config, name, root)?;
    let service = open_service(db, config, &name, &root).await?;
    let report = service.sync_with_cancel(token).await?;

    Ok(ProjectReport {
        project: name,
        root,
        report,
    })
}

/// Run passes over several projects in parallel
///
/// Projects share the pool and nothing else, so one failing does not stop
/// the others.
pub async fn sync_projects(
    db: &Database,
    config: &Config,
    names: &[String],
    token: CancellationToken,
) -> Vec<(String, Result<ProjectReport>)> {
    info!(projects = names.len(), "Syncing projects");

    let passes = names
        .iter()
        .map(|name| sync_project(db, config, Some(name), None, token.clone()));
    let results = join_all(passes).await;

    names.iter().cloned().zip(results).collect()
}

/// Pending changes without applying them
pub async fn status(db: &Database, config: &Config, name: Option<&str>, root: Option<&Path>) -> Result<ChangeSet> {
    let (name, root) = resolve_project(config, name, root)?;
    let service = open_service(db, config, &name, &root).await?;
    service.detect_changes().await
}

/// Look up a note by permalink
pub async fn show(db: &Database, config: &Config, name: Option<&str>, permalink: &str) -> Result<HydratedEntity> {
    let (name, root) = resolve_project(config, name, None)?;
    let service = open_service(db, config, &name, &root).await?;
    service
        .get_by_permalink(permalink)
        .await?
        .ok_or_else(|| Error::EntityNotFound(permalink.to_string()))
}

/// Rename a note on disk and carry its entity along
///
/// Paths are relative to the project root, or absolute paths inside it.
pub async fn move_file(
    db: &Database,
    config: &Config,
    name: Option<&str>,
    old_path: &str,
    new_path: &str,
) -> Result<HydratedEntity> {
    let (name, root) = resolve_project(config, name, None)?;
    let old_path = project_relative(&root, old_path)?;
    let new_path = project_relative(&root, new_path)?;

    let source = root.join(&old_path);
    let destination = root.join(&new_path);
    if !tokio::fs::try_exists(&source).await? {
        return Err(Error::InvalidInput(format!("'{}' does not exist", old_path)));
    }
    if tokio::fs::try_exists(&destination).await? {
        return Err(Error::InvalidInput(format!("'{}' already exists", new_path)));
    }
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::rename(&source, &destination).await?;
    debug!(from = %old_path, to = %new_path, "File renamed");

    let service = open_service(db, config, &name, &root).await?;
    service.handle_move(&old_path, &new_path).await
}

/// Normalize `path` to the `/`-separated form entities are stored under
///
/// `.` components are dropped. Paths that climb out of `root` are rejected.
fn project_relative(root: &Path, path: &str) -> Result<String> {
    let raw = Path::new(path.trim());
    let relative = if raw.is_absolute() {
        raw.strip_prefix(root)
            .map_err(|_| Error::InvalidInput(format!("'{}' is outside the project root", path)))?
    } else {
        raw
    };

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::InvalidInput(format!("'{}' is outside the project root", path)));
            }
        }
    }

    if parts.is_empty() {
        return Err(Error::InvalidInput("move paths must not be empty".into()));
    }
    Ok(parts.join("/"))
}
