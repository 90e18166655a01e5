//! SQLite implementation of the EntityRepository
//!
//! Writes are single autocommit statements wherever possible. Multi-statement
//! work that must be atomic (content replacement, deletion) opens its
//! transaction with a write so concurrent passes never need to upgrade a read
//! snapshot.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::{FromRow, Sqlite, SqlitePool, Transaction};
use tracing::{debug, info, warn};

use crate::domain::graph::{
    ConflictTarget, DEFAULT_ENTITY_TYPE, Entity, EntityDraft, EntityFields, EntityId,
    EntityRepository, EntitySummary, HydratedEntity, MARKDOWN_CONTENT_TYPE, Metadata,
    NewObservation, NewRelation, Observation, ProjectId, Relation, RelationResolution,
    UpsertOutcome, Upserted, hydration,
};
use crate::domain::permalink::{UNTITLED_PERMALINK, generate_permalink};
use crate::error::{Error, Result};

/// Upper bound on retries of a single identity write
const MAX_WRITE_ATTEMPTS: usize = 16;

const ENTITY_COLUMNS: &str = "id, project_id, file_path, permalink, title, entity_type, \
     content_type, checksum, metadata, created_at, updated_at";

const RELATION_COLUMNS: &str = "id, from_id, to_id, to_name, to_permalink, relation_type, context";

/// Best target for a relation: exact permalink, then exact title, then the
/// shortest permalink ending in `/<to_permalink>`
const MATCH_TARGET_SQL: &str = r#"
    SELECT id FROM entities
    WHERE project_id = ?
      AND (permalink = ? OR title = ? OR (? != '' AND permalink LIKE '%/' || ?))
    ORDER BY (permalink = ?) DESC, (title = ?) DESC, length(permalink), id
    LIMIT 1
"#;

/// SQLite implementation of the entity repository
#[derive(Debug, Clone)]
pub struct SqliteEntityRepository {
    pool: SqlitePool,
    project_id: ProjectId,
}

impl SqliteEntityRepository {
    /// Create a repository scoped to one project
    pub fn new(pool: SqlitePool, project_id: ProjectId) -> Self {
        Self { pool, project_id }
    }

    /// Underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Re-fetch after a write that reported success
    async fn fetch_written(&self, id: EntityId) -> Result<Entity> {
        self.get_by_id(id).await?.ok_or_else(|| {
            Error::InvariantViolation(format!("entity {} missing immediately after write", id))
        })
    }

    async fn hydrate_one(&self, entity: Entity) -> Result<HydratedEntity> {
        let id = entity.id;
        self.hydrate(vec![entity])
            .await?
            .pop()
            .ok_or_else(|| Error::InvariantViolation(format!("entity {} lost during hydration", id)))
    }

    async fn insert_draft(&self, draft: &EntityDraft, permalink: &str) -> Result<EntityId> {
        let now = Utc::now().to_rfc3339();
        let metadata = encode_metadata(&draft.metadata)?;

        let result = sqlx::query(
            r#"
            INSERT INTO entities (
                project_id, file_path, permalink, title, entity_type,
                content_type, checksum, metadata, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(self.project_id)
        .bind(&draft.file_path)
        .bind(permalink)
        .bind(&draft.title)
        .bind(&draft.entity_type)
        .bind(&draft.content_type)
        .bind(&draft.checksum)
        .bind(&metadata)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Overwrite the mutable fields of an entity; false when the row is gone
    async fn overwrite_draft(&self, id: EntityId, draft: &EntityDraft, permalink: &str) -> Result<bool> {
        let metadata = encode_metadata(&draft.metadata)?;

        let result = sqlx::query(
            r#"
            UPDATE entities SET
                title = ?, entity_type = ?, metadata = ?, content_type = ?,
                permalink = ?, checksum = ?, updated_at = ?
            WHERE id = ? AND project_id = ?
            "#,
        )
        .bind(&draft.title)
        .bind(&draft.entity_type)
        .bind(&metadata)
        .bind(&draft.content_type)
        .bind(permalink)
        .bind(&draft.checksum)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .bind(self.project_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn match_target(
        &self,
        tx: Option<&mut Transaction<'_, Sqlite>>,
        to_name: &str,
        to_permalink: &str,
    ) -> Result<Option<EntityId>> {
        let query = sqlx::query_as::<_, (i64,)>(MATCH_TARGET_SQL)
            .bind(self.project_id)
            .bind(to_permalink)
            .bind(to_name)
            .bind(to_permalink)
            .bind(to_permalink)
            .bind(to_permalink)
            .bind(to_name);

        let row = match tx {
            Some(tx) => query.fetch_optional(&mut **tx).await?,
            None => query.fetch_optional(&self.pool).await?,
        };
        Ok(row.map(|(id,)| id))
    }
}

#[async_trait]
impl EntityRepository for SqliteEntityRepository {
    fn project_id(&self) -> ProjectId {
        self.project_id
    }

    // ========== Reads ==========

    async fn get_by_id(&self, id: EntityId) -> Result<Option<Entity>> {
        let row: Option<EntityRow> = sqlx::query_as(&format!(
            "SELECT {} FROM entities WHERE id = ? AND project_id = ?",
            ENTITY_COLUMNS
        ))
        .bind(id)
        .bind(self.project_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(EntityRow::into_entity).transpose()
    }

    async fn get_by_file_path(&self, file_path: &str) -> Result<Option<Entity>> {
        let row: Option<EntityRow> = sqlx::query_as(&format!(
            "SELECT {} FROM entities WHERE project_id = ? AND file_path = ?",
            ENTITY_COLUMNS
        ))
        .bind(self.project_id)
        .bind(file_path)
        .fetch_optional(&self.pool)
        .await?;

        row.map(EntityRow::into_entity).transpose()
    }

    async fn get_by_permalink(&self, permalink: &str) -> Result<Option<Entity>> {
        let row: Option<EntityRow> = sqlx::query_as(&format!(
            "SELECT {} FROM entities WHERE project_id = ? AND permalink = ?",
            ENTITY_COLUMNS
        ))
        .bind(self.project_id)
        .bind(permalink)
        .fetch_optional(&self.pool)
        .await?;

        row.map(EntityRow::into_entity).transpose()
    }

    async fn find_by_permalinks(&self, permalinks: &[String]) -> Result<Vec<Entity>> {
        if permalinks.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {} FROM entities WHERE project_id = ? AND permalink IN ({}) ORDER BY permalink",
            ENTITY_COLUMNS,
            placeholders(permalinks.len())
        );
        let mut query = sqlx::query_as::<_, EntityRow>(&sql).bind(self.project_id);
        for permalink in permalinks {
            query = query.bind(permalink);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(EntityRow::into_entity).collect()
    }

    async fn list_entities(&self) -> Result<Vec<Entity>> {
        let rows: Vec<EntityRow> = sqlx::query_as(&format!(
            "SELECT {} FROM entities WHERE project_id = ? ORDER BY file_path",
            ENTITY_COLUMNS
        ))
        .bind(self.project_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(EntityRow::into_entity).collect()
    }

    async fn count_entities(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM entities WHERE project_id = ?")
            .bind(self.project_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn checksum_snapshot(&self) -> Result<BTreeMap<String, Option<String>>> {
        let rows: Vec<(String, Option<String>)> =
            sqlx::query_as("SELECT file_path, checksum FROM entities WHERE project_id = ?")
                .bind(self.project_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().collect())
    }

    async fn hydrate(&self, entities: Vec<Entity>) -> Result<Vec<HydratedEntity>> {
        if entities.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<EntityId> = entities.iter().map(|e| e.id).collect();
        let marks = placeholders(ids.len());

        let sql = format!(
            "SELECT id, entity_id, category, content, tags, context FROM observations \
             WHERE entity_id IN ({}) ORDER BY id",
            marks
        );
        let mut query = sqlx::query_as::<_, ObservationRow>(&sql);
        for id in &ids {
            query = query.bind(id);
        }
        let observations: Vec<Observation> = query
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(ObservationRow::into_observation)
            .collect::<Result<_>>()?;

        let sql = format!(
            "SELECT {} FROM relations WHERE project_id = ? AND (from_id IN ({}) OR to_id IN ({})) ORDER BY id",
            RELATION_COLUMNS, marks, marks
        );
        let mut query = sqlx::query_as::<_, RelationRow>(&sql).bind(self.project_id);
        for id in ids.iter().chain(ids.iter()) {
            query = query.bind(id);
        }
        let relations: Vec<Relation> = query
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(RelationRow::into_relation)
            .collect();

        let mut endpoints: BTreeMap<EntityId, EntitySummary> =
            entities.iter().map(|e| (e.id, e.summary())).collect();

        let missing: BTreeSet<EntityId> = relations
            .iter()
            .flat_map(|rel| [Some(rel.from_id), rel.to_id])
            .flatten()
            .filter(|id| !endpoints.contains_key(id))
            .collect();

        if !missing.is_empty() {
            let sql = format!(
                "SELECT id, title, permalink, file_path, entity_type FROM entities WHERE id IN ({})",
                placeholders(missing.len())
            );
            let mut query = sqlx::query_as::<_, (i64, String, String, String, String)>(&sql);
            for id in &missing {
                query = query.bind(id);
            }
            for (id, title, permalink, file_path, entity_type) in query.fetch_all(&self.pool).await? {
                endpoints.insert(
                    id,
                    EntitySummary {
                        id,
                        title,
                        permalink,
                        file_path,
                        entity_type,
                    },
                );
            }
        }

        Ok(hydration::assemble(entities, observations, relations, &endpoints))
    }

    // ========== Writes ==========

    async fn upsert_entity(&self, draft: &EntityDraft) -> Result<Upserted> {
        validate_file_path(&draft.file_path)?;

        let mut permalink = non_empty_permalink(&draft.permalink);
        let mut suffixed = false;

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let existing = self.get_by_file_path(&draft.file_path).await?;

            let written = match &existing {
                Some(entity) => self
                    .overwrite_draft(entity.id, draft, &permalink)
                    .await
                    .map(|found| found.then_some(entity.id)),
                None => self.insert_draft(draft, &permalink).await.map(Some),
            };

            match written {
                Ok(Some(id)) => {
                    let entity = self.fetch_written(id).await?;
                    let outcome = if suffixed {
                        UpsertOutcome::ConflictResolved {
                            permalink: entity.permalink.clone(),
                        }
                    } else if existing.is_some() {
                        UpsertOutcome::UpdatedExisting
                    } else {
                        UpsertOutcome::Inserted
                    };

                    debug!(
                        entity_id = id,
                        file_path = %entity.file_path,
                        permalink = %entity.permalink,
                        ?outcome,
                        "Entity upserted"
                    );
                    return Ok(Upserted {
                        outcome,
                        inserted: existing.is_none(),
                        entity: self.hydrate_one(entity).await?,
                    });
                }
                // Row deleted between lookup and update; start over as an insert
                Ok(None) => continue,
                Err(err) if err.is_file_path_conflict() => {
                    debug!(file_path = %draft.file_path, attempt, "Concurrent insert won, retrying as update");
                }
                Err(err) if err.is_permalink_conflict() => {
                    let excluding = existing.as_ref().map(|e| e.id);
                    permalink = self.unique_permalink(&draft.permalink, excluding).await?;
                    suffixed = true;
                    debug!(file_path = %draft.file_path, %permalink, attempt, "Permalink taken, using suffix");
                }
                Err(err) => return Err(err),
            }
        }

        Err(Error::Other(format!(
            "Could not write entity '{}' after {} attempts",
            draft.file_path, MAX_WRITE_ATTEMPTS
        )))
    }

    async fn upsert_entity_atomic(&self, fields: &EntityFields, target: ConflictTarget) -> Result<Entity> {
        let file_path = fields.file_path.as_deref().unwrap_or_default();
        validate_file_path(file_path)?;

        let key = target.column();
        let key_value = match target {
            ConflictTarget::FilePath => file_path.to_string(),
            ConflictTarget::Permalink => fields
                .permalink
                .clone()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| Error::InvalidInput("permalink is required for a permalink upsert".into()))?,
        };

        let supplied = column_values(fields)?;
        let updates: Vec<&str> = supplied
            .iter()
            .map(|(column, _)| *column)
            .filter(|column| *column != key && *column != "created_at")
            .collect();

        // Columns the INSERT branch needs even when the caller left them out
        let now = Utc::now().to_rfc3339();
        let mut columns = supplied.clone();
        let mut ensure = |column: &'static str, value: String| {
            if !columns.iter().any(|(c, _)| *c == column) {
                columns.push((column, value));
            }
        };
        ensure("permalink", non_empty_permalink(&generate_permalink(file_path)));
        ensure("title", default_title(file_path));
        ensure("entity_type", DEFAULT_ENTITY_TYPE.to_string());
        ensure("content_type", MARKDOWN_CONTENT_TYPE.to_string());
        ensure("created_at", now.clone());
        ensure("updated_at", now);

        let names: Vec<&str> = columns.iter().map(|(c, _)| *c).collect();
        let conflict_action = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            let sets: Vec<String> = updates.iter().map(|c| format!("{c} = excluded.{c}")).collect();
            format!("DO UPDATE SET {}", sets.join(", "))
        };
        let sql = format!(
            "INSERT INTO entities (project_id, {}) VALUES (?, {}) ON CONFLICT(project_id, {}) {}",
            names.join(", "),
            placeholders(names.len()),
            key,
            conflict_action
        );

        let mut query = sqlx::query(&sql).bind(self.project_id);
        for (_, value) in &columns {
            query = query.bind(value);
        }
        query.execute(&self.pool).await?;

        let entity = match target {
            ConflictTarget::FilePath => self.get_by_file_path(&key_value).await?,
            ConflictTarget::Permalink => self.get_by_permalink(&key_value).await?,
        }
        .ok_or_else(|| {
            Error::InvariantViolation(format!("entity with {} '{}' missing after upsert", key, key_value))
        })?;

        debug!(entity_id = entity.id, file_path = %entity.file_path, target = key, "Entity upserted atomically");
        Ok(entity)
    }

    async fn update_entity(&self, id: EntityId, fields: &EntityFields) -> Result<Entity> {
        if let Some(file_path) = &fields.file_path {
            validate_file_path(file_path)?;
        }

        let mut columns = column_values(fields)?;
        if !columns.iter().any(|(c, _)| *c == "updated_at") {
            columns.push(("updated_at", Utc::now().to_rfc3339()));
        }

        let sets: Vec<String> = columns.iter().map(|(c, _)| format!("{c} = ?")).collect();
        let sql = format!(
            "UPDATE entities SET {} WHERE id = ? AND project_id = ?",
            sets.join(", ")
        );

        let mut query = sqlx::query(&sql);
        for (_, value) in &columns {
            query = query.bind(value);
        }
        let result = query.bind(id).bind(self.project_id).execute(&self.pool).await?;

        if result.rows_affected() == 0 {
            return Err(Error::EntityNotFound(id.to_string()));
        }
        self.fetch_written(id).await
    }

    async fn delete_entity(&self, id: EntityId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE relations SET to_id = NULL, resolve_attempts = 0 WHERE project_id = ? AND to_id = ? AND from_id != ?",
        )
        .bind(self.project_id)
        .bind(id)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let result = sqlx::query("DELETE FROM entities WHERE id = ? AND project_id = ?")
            .bind(id)
            .bind(self.project_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(entity_id = id, "Entity deleted");
        }
        Ok(deleted)
    }

    async fn delete_by_file_path(&self, file_path: &str) -> Result<bool> {
        match self.get_by_file_path(file_path).await? {
            Some(entity) => self.delete_entity(entity.id).await,
            None => Ok(false),
        }
    }

    async fn unique_permalink(&self, base: &str, excluding: Option<EntityId>) -> Result<String> {
        let base = non_empty_permalink(base);
        let prefix = format!("{}-", base);

        let taken: HashSet<String> = sqlx::query_as::<_, (String,)>(
            r#"
            SELECT permalink FROM entities
            WHERE project_id = ?
              AND (permalink = ? OR substr(permalink, 1, length(?)) = ?)
              AND id != ?
            "#,
        )
        .bind(self.project_id)
        .bind(&base)
        .bind(&prefix)
        .bind(&prefix)
        .bind(excluding.unwrap_or(-1))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|(permalink,)| permalink)
        .collect();

        if !taken.contains(&base) {
            return Ok(base);
        }

        let mut suffix = 1u64;
        loop {
            let candidate = format!("{}-{}", base, suffix);
            if !taken.contains(&candidate) {
                return Ok(candidate);
            }
            suffix += 1;
        }
    }

    async fn replace_content(
        &self,
        id: EntityId,
        observations: &[NewObservation],
        relations: &[NewRelation],
        checksum: &str,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM observations WHERE entity_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        for observation in observations {
            let tags = serde_json::to_string(&observation.tags)
                .map_err(|e| Error::Other(format!("Failed to serialize tags: {}", e)))?;

            sqlx::query(
                "INSERT INTO observations (entity_id, category, content, tags, context) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(id)
            .bind(&observation.category)
            .bind(&observation.content)
            .bind(&tags)
            .bind(&observation.context)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("DELETE FROM relations WHERE from_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let mut unresolved = 0usize;
        for relation in relations {
            let to_permalink = relation.target_permalink();
            let to_id = self
                .match_target(Some(&mut tx), &relation.to_name, &to_permalink)
                .await?;
            if to_id.is_none() {
                unresolved += 1;
            }

            // Duplicate edges in one document collapse onto the unique key
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO relations (
                    project_id, from_id, to_id, to_name, to_permalink, relation_type, context
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(self.project_id)
            .bind(id)
            .bind(to_id)
            .bind(&relation.to_name)
            .bind(&to_permalink)
            .bind(&relation.relation_type)
            .bind(&relation.context)
            .execute(&mut *tx)
            .await?;
        }

        // Stamped last: a checksum only ever describes fully written content
        let result = sqlx::query("UPDATE entities SET checksum = ? WHERE id = ? AND project_id = ?")
            .bind(checksum)
            .bind(id)
            .bind(self.project_id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::EntityNotFound(id.to_string()));
        }

        tx.commit().await?;

        debug!(
            entity_id = id,
            observations = observations.len(),
            relations = relations.len(),
            unresolved,
            "Entity content replaced"
        );
        Ok(())
    }

    async fn resolve_relations_to(&self, entity: &Entity) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE relations SET to_id = ?, resolve_attempts = 0
            WHERE project_id = ? AND to_id IS NULL
              AND (to_permalink = ? OR to_name = ? OR (to_permalink != '' AND ? LIKE '%/' || to_permalink))
            "#,
        )
        .bind(entity.id)
        .bind(self.project_id)
        .bind(&entity.permalink)
        .bind(&entity.title)
        .bind(&entity.permalink)
        .execute(&self.pool)
        .await?;

        let resolved = result.rows_affected();
        if resolved > 0 {
            debug!(entity_id = entity.id, permalink = %entity.permalink, resolved, "Forward references resolved");
        }
        Ok(resolved)
    }

    async fn resolve_forward_relations(&self, max_attempts: u32) -> Result<RelationResolution> {
        let max_attempts = i64::from(max_attempts);

        let candidates: Vec<(i64, String, String, i64)> = sqlx::query_as(
            r#"
            SELECT id, to_name, to_permalink, resolve_attempts FROM relations
            WHERE project_id = ? AND to_id IS NULL AND resolve_attempts < ?
            ORDER BY id
            "#,
        )
        .bind(self.project_id)
        .bind(max_attempts)
        .fetch_all(&self.pool)
        .await?;

        let (already_exhausted,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM relations WHERE project_id = ? AND to_id IS NULL AND resolve_attempts >= ?",
        )
        .bind(self.project_id)
        .bind(max_attempts)
        .fetch_one(&self.pool)
        .await?;

        let mut resolution = RelationResolution {
            exhausted: already_exhausted as u64,
            ..Default::default()
        };

        for (relation_id, to_name, to_permalink, attempts) in candidates {
            match self.match_target(None, &to_name, &to_permalink).await? {
                Some(to_id) => {
                    sqlx::query("UPDATE relations SET to_id = ?, resolve_attempts = 0 WHERE id = ? AND to_id IS NULL")
                        .bind(to_id)
                        .bind(relation_id)
                        .execute(&self.pool)
                        .await?;
                    resolution.resolved += 1;
                }
                None => {
                    sqlx::query("UPDATE relations SET resolve_attempts = resolve_attempts + 1 WHERE id = ?")
                        .bind(relation_id)
                        .execute(&self.pool)
                        .await?;
                    if attempts + 1 >= max_attempts {
                        resolution.exhausted += 1;
                    } else {
                        resolution.pending += 1;
                    }
                }
            }
        }

        if resolution.exhausted > 0 {
            warn!(
                project_id = self.project_id,
                exhausted = resolution.exhausted,
                "Forward references gave up resolving; they resolve only when a matching entity is synced"
            );
        }
        Ok(resolution)
    }
}

fn validate_file_path(file_path: &str) -> Result<()> {
    if file_path.trim().is_empty() {
        return Err(Error::InvalidInput("entity file_path must not be empty".into()));
    }
    Ok(())
}

fn non_empty_permalink(permalink: &str) -> String {
    if permalink.is_empty() {
        UNTITLED_PERMALINK.to_string()
    } else {
        permalink.to_string()
    }
}

fn default_title(file_path: &str) -> String {
    let name = file_path.rsplit('/').next().unwrap_or(file_path);
    match name.rfind('.') {
        Some(idx) if idx > 0 => name[..idx].to_string(),
        _ => name.to_string(),
    }
}

fn encode_metadata(metadata: &Metadata) -> Result<String> {
    serde_json::to_string(metadata).map_err(|e| Error::Other(format!("Failed to serialize metadata: {}", e)))
}

/// Supplied columns of a sparse update, encoded as TEXT
fn column_values(fields: &EntityFields) -> Result<Vec<(&'static str, String)>> {
    let mut columns = Vec::new();
    let mut push = |column: &'static str, value: Option<String>| {
        if let Some(value) = value {
            columns.push((column, value));
        }
    };

    push("file_path", fields.file_path.clone());
    push("permalink", fields.permalink.clone());
    push("title", fields.title.clone());
    push("entity_type", fields.entity_type.clone());
    push("content_type", fields.content_type.clone());
    push("checksum", fields.checksum.clone());
    push("metadata", fields.metadata.as_ref().map(encode_metadata).transpose()?);
    push("created_at", fields.created_at.map(|t| t.to_rfc3339()));
    push("updated_at", fields.updated_at.map(|t| t.to_rfc3339()));

    Ok(columns)
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| decode_error(column, e))
}

/// Stored JSON text, `None` meaning the default value
fn parse_json<T: DeserializeOwned + Default>(column: &str, value: Option<&str>) -> Result<T> {
    match value {
        Some(text) => serde_json::from_str(text).map_err(|e| decode_error(column, e)),
        None => Ok(T::default()),
    }
}

fn decode_error(column: &str, source: impl std::error::Error + Send + Sync + 'static) -> Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(source),
    }
    .into()
}

// ========== Row Types ==========

#[derive(FromRow)]
struct EntityRow {
    id: i64,
    project_id: i64,
    file_path: String,
    permalink: String,
    title: String,
    entity_type: String,
    content_type: String,
    checksum: Option<String>,
    metadata: Option<String>,
    created_at: String,
    updated_at: String,
}

impl EntityRow {
    fn into_entity(self) -> Result<Entity> {
        let metadata: Metadata = parse_json("metadata", self.metadata.as_deref())?;

        Ok(Entity {
            id: self.id,
            project_id: self.project_id,
            file_path: self.file_path,
            permalink: self.permalink,
            title: self.title,
            entity_type: self.entity_type,
            content_type: self.content_type,
            checksum: self.checksum,
            metadata,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
        })
    }
}

#[derive(FromRow)]
struct ObservationRow {
    id: i64,
    entity_id: i64,
    category: String,
    content: String,
    tags: Option<String>,
    context: Option<String>,
}

impl ObservationRow {
    fn into_observation(self) -> Result<Observation> {
        Ok(Observation {
            id: self.id,
            entity_id: self.entity_id,
            category: self.category,
            content: self.content,
            tags: parse_json("tags", self.tags.as_deref())?,
            context: self.context,
        })
    }
}

#[derive(FromRow)]
struct RelationRow {
    id: i64,
    from_id: i64,
    to_id: Option<i64>,
    to_name: String,
    to_permalink: String,
    relation_type: String,
    context: Option<String>,
}

impl RelationRow {
    fn into_relation(self) -> Relation {
        Relation {
            id: self.id,
            from_id: self.from_id,
            to_id: self.to_id,
            to_name: self.to_name,
            to_permalink: self.to_permalink,
            relation_type: self.relation_type,
            context: self.context,
        }
    }
}
