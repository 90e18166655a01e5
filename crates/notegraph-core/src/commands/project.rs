//! Project registry commands
//!
//! A project is a named directory whose markdown files form one independent
//! graph. The registry row owns every entity and relation of that graph.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;

use crate::domain::graph::ProjectId;
use crate::storage::Database;
use crate::{Error, Result};

/// A registered project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Store-assigned key
    pub id: ProjectId,
    /// Unique project name
    pub name: String,
    /// Directory the project syncs from
    pub root_path: PathBuf,
    /// When the project was first registered
    pub created_at: DateTime<Utc>,
}

/// Project repository for database operations
pub struct ProjectRepository<'a> {
    db: &'a Database,
}

impl<'a> ProjectRepository<'a> {
    /// Create a new project repository
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Register a project, or update the root of an existing one
    ///
    /// Safe to call from concurrent passes: the name is the conflict key.
    pub async fn ensure(&self, name: &str, root_path: &Path) -> Result<Project> {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("project name must not be empty".into()));
        }

        sqlx::query(
            r#"
            INSERT INTO projects (name, root_path, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET root_path = excluded.root_path
            "#,
        )
        .bind(name)
        .bind(root_path.to_string_lossy().as_ref())
        .bind(Utc::now().to_rfc3339())
        .execute(self.db.pool())
        .await?;

        self.get_by_name(name)
            .await?
            .ok_or_else(|| Error::InvariantViolation(format!("project '{}' missing after registration", name)))
    }

    /// Get a project by ID
    pub async fn get(&self, id: ProjectId) -> Result<Option<Project>> {
        let row = sqlx::query("SELECT id, name, root_path, created_at FROM projects WHERE id = ?")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(row.map(|r| self.row_to_project(r)))
    }

    /// Get a project by name
    pub async fn get_by_name(&self, name: &str) -> Result<Option<Project>> {
        let row = sqlx::query("SELECT id, name, root_path, created_at FROM projects WHERE name = ?")
            .bind(name)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(row.map(|r| self.row_to_project(r)))
    }

    /// List all projects
    pub async fn list(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query("SELECT id, name, root_path, created_at FROM projects ORDER BY name")
            .fetch_all(self.db.pool())
            .await?;

        Ok(rows.into_iter().map(|r| self.row_to_project(r)).collect())
    }

    /// Check if a project name exists
    pub async fn name_exists(&self, name: &str) -> Result<bool> {
        let row: Option<(i32,)> = sqlx::query_as("SELECT 1 FROM projects WHERE name = ?")
            .bind(name)
            .fetch_optional(self.db.pool())
            .await?;

        Ok(row.is_some())
    }

    /// Remove a project and its whole graph
    pub async fn delete(&self, name: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM projects WHERE name = ?")
            .bind(name)
            .execute(self.db.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::ProjectNotFound(name.to_string()));
        }
        Ok(())
    }

    /// Convert a database row to a Project
    fn row_to_project(&self, row: sqlx::sqlite::SqliteRow) -> Project {
        let root_path: String = row.get("root_path");
        let created_at: String = row.get("created_at");

        Project {
            id: row.get("id"),
            name: row.get("name"),
            root_path: PathBuf::from(root_path),
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        }
    }
}

/// Register a project and return it
pub async fn ensure_with_db(db: &Database, name: &str, root_path: &Path) -> Result<Project> {
    let project = ProjectRepository::new(db).ensure(name, root_path).await?;
    tracing::debug!(project_id = project.id, name = %project.name, root = %project.root_path.display(), "Project registered");
    Ok(project)
}

/// List registered projects
pub async fn list_with_db(db: &Database) -> Result<Vec<Project>> {
    ProjectRepository::new(db).list().await
}
