//! Database migrations
//!
//! This module manages SQLite schema migrations for notegraph.
//! Migrations are versioned and applied automatically on database connection.

use sqlx::SqlitePool;

/// Current schema version
pub const CURRENT_VERSION: i32 = 1;

/// SQL for creating the migrations tracking table
const CREATE_MIGRATIONS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS _migrations (
        version INTEGER PRIMARY KEY NOT NULL,
        applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    );
"#;

/// Migration 1: Knowledge graph schema
///
/// Every graph table is scoped by project. Identity is enforced by the two
/// unique indexes on entities; the sync engine relies on them being the only
/// source of truth for "one entity per file" and "one entity per permalink".
const MIGRATION_V1: &str = r#"
    -- Project registry
    CREATE TABLE IF NOT EXISTS projects (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        root_path TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    -- One row per markdown document
    CREATE TABLE IF NOT EXISTS entities (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        file_path TEXT NOT NULL,
        permalink TEXT NOT NULL,
        title TEXT NOT NULL,
        entity_type TEXT NOT NULL,
        content_type TEXT NOT NULL,
        checksum TEXT,
        metadata TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE UNIQUE INDEX IF NOT EXISTS uix_entities_file_path ON entities(project_id, file_path);
    CREATE UNIQUE INDEX IF NOT EXISTS uix_entities_permalink ON entities(project_id, permalink);
    CREATE INDEX IF NOT EXISTS idx_entities_title ON entities(project_id, title);

    -- Facts owned by an entity
    CREATE TABLE IF NOT EXISTS observations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        entity_id INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
        category TEXT NOT NULL,
        content TEXT NOT NULL,
        tags TEXT,
        context TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_observations_entity_id ON observations(entity_id);

    -- Directed edges; to_id stays NULL until the target is synced
    CREATE TABLE IF NOT EXISTS relations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        from_id INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
        to_id INTEGER REFERENCES entities(id) ON DELETE SET NULL,
        to_name TEXT NOT NULL,
        -- Target permalink derived from to_name, used while to_id is NULL
        to_permalink TEXT NOT NULL DEFAULT '',
        -- Resolution rounds spent on a forward reference
        resolve_attempts INTEGER NOT NULL DEFAULT 0,
        relation_type TEXT NOT NULL,
        context TEXT,
        UNIQUE (from_id, to_name, relation_type)
    );

    CREATE INDEX IF NOT EXISTS idx_relations_from_id ON relations(from_id);
    CREATE INDEX IF NOT EXISTS idx_relations_to_id ON relations(to_id);
    CREATE INDEX IF NOT EXISTS idx_relations_unresolved
        ON relations(project_id, to_permalink) WHERE to_id IS NULL;
"#;

/// Get the current schema version from the database
async fn get_current_version(pool: &SqlitePool) -> anyhow::Result<i32> {
    sqlx::raw_sql(CREATE_MIGRATIONS_TABLE).execute(pool).await?;

    let row: Option<(Option<i32>,)> = sqlx::query_as("SELECT MAX(version) FROM _migrations")
        .fetch_optional(pool)
        .await?;

    Ok(row.and_then(|(v,)| v).unwrap_or(0))
}

/// Record that a migration has been applied
async fn record_migration(pool: &SqlitePool, version: i32) -> anyhow::Result<()> {
    sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> anyhow::Result<()> {
    let current_version = get_current_version(pool).await?;

    tracing::info!(
        current_version = current_version,
        target_version = CURRENT_VERSION,
        "Checking database migrations"
    );

    if current_version >= CURRENT_VERSION {
        tracing::debug!("Database is up to date");
        return Ok(());
    }

    if current_version < 1 {
        tracing::info!("Applying migration v1: Knowledge graph schema");
        sqlx::raw_sql(MIGRATION_V1).execute(pool).await?;
        record_migration(pool, 1).await?;
    }

    tracing::info!("Database migrations completed");
    Ok(())
}

/// Check if the database needs migrations
pub async fn needs_migration(pool: &SqlitePool) -> anyhow::Result<bool> {
    let current_version = get_current_version(pool).await?;
    Ok(current_version < CURRENT_VERSION)
}

/// Get migration status information
pub async fn migration_status(pool: &SqlitePool) -> anyhow::Result<MigrationStatus> {
    let current_version = get_current_version(pool).await?;
    Ok(MigrationStatus {
        current_version,
        target_version: CURRENT_VERSION,
        needs_migration: current_version < CURRENT_VERSION,
    })
}

/// Migration status information
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    /// Current schema version in the database
    pub current_version: i32,
    /// Target schema version (latest)
    pub target_version: i32,
    /// Whether migrations need to be run
    pub needs_migration: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create test pool")
    }

    #[tokio::test]
    async fn test_run_migrations() {
        let pool = create_test_pool().await;

        let status = migration_status(&pool).await.unwrap();
        assert_eq!(status.current_version, 0);
        assert!(status.needs_migration);

        run_migrations(&pool).await.unwrap();

        let status = migration_status(&pool).await.unwrap();
        assert_eq!(status.current_version, CURRENT_VERSION);
        assert!(!status.needs_migration);
        assert!(!needs_migration(&pool).await.unwrap());
    }

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let pool = create_test_pool().await;

        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let status = migration_status(&pool).await.unwrap();
        assert_eq!(status.current_version, CURRENT_VERSION);
    }

    #[tokio::test]
    async fn test_tables_created() {
        let pool = create_test_pool().await;
        run_migrations(&pool).await.unwrap();

        for table in ["projects", "entities", "observations", "relations"] {
            let result: (i32,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(&pool)
                .await
                .unwrap_or_else(|_| panic!("Table {} should exist", table));
            assert_eq!(result.0, 0, "Table {} should be empty", table);
        }
    }

    #[tokio::test]
    async fn test_relations_track_forward_references() {
        let pool = create_test_pool().await;
        run_migrations(&pool).await.unwrap();

        let columns: Vec<(String,)> = sqlx::query_as("SELECT name FROM pragma_table_info('relations')")
            .fetch_all(&pool)
            .await
            .unwrap();
        let columns: Vec<&str> = columns.iter().map(|(c,)| c.as_str()).collect();
        assert!(columns.contains(&"to_permalink"));
        assert!(columns.contains(&"resolve_attempts"));

        let versions: Vec<(i32,)> = sqlx::query_as("SELECT version FROM _migrations")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(versions, vec![(1,)]);
    }

    #[tokio::test]
    async fn test_file_path_unique_per_project() {
        let pool = create_test_pool().await;
        run_migrations(&pool).await.unwrap();

        sqlx::query("INSERT INTO projects (id, name, root_path, created_at) VALUES (1, 'a', '/a', ''), (2, 'b', '/b', '')")
            .execute(&pool)
            .await
            .unwrap();

        let insert = r#"
            INSERT INTO entities (project_id, file_path, permalink, title, entity_type, content_type, created_at, updated_at)
            VALUES (?, 'note.md', ?, 'Note', 'note', 'text/markdown', '', '')
        "#;

        sqlx::query(insert).bind(1).bind("note").execute(&pool).await.unwrap();
        // Same path in another project is fine
        sqlx::query(insert).bind(2).bind("note").execute(&pool).await.unwrap();

        let err = sqlx::query(insert)
            .bind(1)
            .bind("other")
            .execute(&pool)
            .await
            .expect_err("duplicate file_path must be rejected");
        let err = crate::Error::from(err);
        assert!(err.is_file_path_conflict(), "unexpected error: {err}");
    }
}
