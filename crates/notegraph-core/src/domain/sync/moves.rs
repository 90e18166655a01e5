//! Move resolution
//!
//! Applies renames to stored entities while keeping every entity id. A move
//! whose destination is still held by another entity (a swap, a rotation, or
//! a stale row) parks the moving entity at a unique placeholder and finishes
//! it once the destination frees up, or at the end of the pass.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::graph::{Entity, EntityFields, EntityId, EntityRepository};
use crate::domain::permalink::{UNTITLED_PERMALINK, generate_permalink};
use crate::error::{Error, Result};

/// Directory parked entities live under until their destination is free
pub const PLACEHOLDER_DIR: &str = ".notegraph-pending";

/// Upper bound on permalink retries for one relocation
const MAX_PERMALINK_ATTEMPTS: usize = 16;

/// What happened to one move request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "entity_id", rename_all = "snake_case")]
pub enum MoveOutcome {
    /// The entity now lives at the destination
    Moved(EntityId),
    /// The destination was occupied; the entity waits at a placeholder
    Parked(EntityId),
    /// No entity was stored at the source path
    Missing,
}

impl MoveOutcome {
    pub fn entity_id(&self) -> Option<EntityId> {
        match self {
            Self::Moved(id) | Self::Parked(id) => Some(*id),
            Self::Missing => None,
        }
    }
}

/// How the permalink should look after a move
#[derive(Debug, Clone, PartialEq, Eq)]
enum PermalinkPlan {
    /// Declared or path-independent permalink; travels unchanged
    Keep(String),
    /// Derived from the path; recomputed from the destination
    Derive,
}

#[derive(Debug, Clone)]
struct PendingMove {
    entity_id: EntityId,
    from: String,
    permalink: PermalinkPlan,
}

/// Move state for a single pass
///
/// Create one per pass, feed it every move with [`MoveResolver::apply`], then
/// call [`MoveResolver::finish`]. Dropping it without finishing leaves parked
/// entities at their placeholders until the next pass moves them.
pub struct MoveResolver<'a> {
    repo: &'a dyn EntityRepository,
    update_permalinks: bool,
    pending: BTreeMap<String, PendingMove>,
}

impl<'a> MoveResolver<'a> {
    pub fn new(repo: &'a dyn EntityRepository, update_permalinks: bool) -> Self {
        Self {
            repo,
            update_permalinks,
            pending: BTreeMap::new(),
        }
    }

    /// Number of entities waiting for their destination
    pub fn parked(&self) -> usize {
        self.pending.len()
    }

    /// Move the entity stored at `from` to `to`
    pub async fn apply(&mut self, from: &str, to: &str) -> Result<MoveOutcome> {
        if from.trim().is_empty() || to.trim().is_empty() {
            return Err(Error::InvalidInput("move paths must not be empty".into()));
        }

        let Some(entity) = self.repo.get_by_file_path(from).await? else {
            debug!(from, to, "No entity at move source");
            return Ok(MoveOutcome::Missing);
        };

        if from == to {
            return Ok(MoveOutcome::Moved(entity.id));
        }

        let plan = self.plan_permalink(&entity, from);

        match self.relocate(entity.id, to, &plan).await {
            Ok(moved) => {
                debug!(entity_id = moved.id, from, to, permalink = %moved.permalink, "Entity moved");
                self.vacated(from).await?;
                Ok(MoveOutcome::Moved(entity.id))
            }
            Err(err) if err.is_file_path_conflict() => {
                self.park(&entity, from, to, plan).await?;
                self.vacated(from).await?;
                Ok(MoveOutcome::Parked(entity.id))
            }
            Err(err) => Err(err),
        }
    }

    /// Settle every parked entity
    ///
    /// A destination that is still occupied at this point holds a stale row:
    /// the directory says the moving document lives there now. The stale row
    /// is deleted and the parked entity takes its place. Returns the ids of the
    /// entities settled here.
    pub async fn finish(mut self) -> Result<Vec<EntityId>> {
        let pending = std::mem::take(&mut self.pending);
        let mut settled = Vec::with_capacity(pending.len());

        for (to, parked) in pending {
            match self.relocate(parked.entity_id, &to, &parked.permalink).await {
                Ok(_) => {}
                Err(err) if err.is_file_path_conflict() => {
                    if let Some(occupant) = self.repo.get_by_file_path(&to).await? {
                        warn!(
                            entity_id = occupant.id,
                            file_path = %to,
                            replaced_by = parked.entity_id,
                            "Deleting stale entity at move destination"
                        );
                        self.repo.delete_entity(occupant.id).await?;
                    }
                    self.relocate(parked.entity_id, &to, &parked.permalink).await?;
                }
                Err(err) => return Err(err),
            }

            info!(entity_id = parked.entity_id, from = %parked.from, to = %to, "Parked entity settled");
            settled.push(parked.entity_id);
        }

        Ok(settled)
    }

    fn plan_permalink(&self, entity: &Entity, from: &str) -> PermalinkPlan {
        if self.update_permalinks && is_derived_from(&entity.permalink, from) {
            PermalinkPlan::Derive
        } else {
            PermalinkPlan::Keep(entity.permalink.clone())
        }
    }

    /// Point an entity at `to`, suffixing its permalink if another entity owns it
    async fn relocate(&self, id: EntityId, to: &str, plan: &PermalinkPlan) -> Result<Entity> {
        let base = match plan {
            PermalinkPlan::Keep(permalink) => permalink.clone(),
            PermalinkPlan::Derive => path_permalink(to),
        };
        let mut permalink = self.repo.unique_permalink(&base, Some(id)).await?;

        for _ in 0..MAX_PERMALINK_ATTEMPTS {
            match self.repo.update_entity(id, &EntityFields::relocate(to, &permalink)).await {
                Err(err) if err.is_permalink_conflict() => {
                    permalink = self.repo.unique_permalink(&base, Some(id)).await?;
                    debug!(entity_id = id, %permalink, "Permalink taken during move, retrying");
                }
                result => return result,
            }
        }

        Err(Error::Other(format!(
            "Could not find a free permalink for '{}' after {} attempts",
            to, MAX_PERMALINK_ATTEMPTS
        )))
    }

    async fn park(&mut self, entity: &Entity, from: &str, to: &str, plan: PermalinkPlan) -> Result<()> {
        let token = Uuid::new_v4().simple().to_string();
        let placeholder_path = format!("{}/{}.md", PLACEHOLDER_DIR, token);
        let placeholder_permalink = format!("{}/{}", PLACEHOLDER_DIR.trim_start_matches('.'), token);

        self.repo
            .update_entity(entity.id, &EntityFields::relocate(&placeholder_path, &placeholder_permalink))
            .await?;

        info!(
            entity_id = entity.id,
            from,
            to,
            placeholder = %placeholder_path,
            "Move destination occupied, entity parked"
        );

        if let Some(previous) = self.pending.insert(
            to.to_string(),
            PendingMove {
                entity_id: entity.id,
                from: from.to_string(),
                permalink: plan,
            },
        ) {
            // Two documents cannot both move onto one path in a single pass
            return Err(Error::InvariantViolation(format!(
                "entities {} and {} both moving to '{}'",
                previous.entity_id, entity.id, to
            )));
        }
        Ok(())
    }

    /// A path just became free; settle whatever waits for it
    async fn vacated(&mut self, path: &str) -> Result<()> {
        let Some(parked) = self.pending.remove(path) else {
            return Ok(());
        };

        match self.relocate(parked.entity_id, path, &parked.permalink).await {
            Ok(_) => {
                debug!(entity_id = parked.entity_id, to = path, "Parked entity moved into vacated path");
                Ok(())
            }
            Err(err) if err.is_file_path_conflict() => {
                // Re-occupied already; finish() sorts it out
                self.pending.insert(path.to_string(), parked);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

/// Permalink generated for a path, never empty
pub(crate) fn path_permalink(path: &str) -> String {
    let permalink = generate_permalink(path);
    if permalink.is_empty() {
        UNTITLED_PERMALINK.to_string()
    } else {
        permalink
    }
}

/// True when `permalink` is the path's generated permalink or a suffixed copy
fn is_derived_from(permalink: &str, path: &str) -> bool {
    let base = path_permalink(path);
    if permalink == base {
        return true;
    }
    permalink
        .strip_prefix(base.as_str())
        .and_then(|rest| rest.strip_prefix('-'))
        .is_some_and(|suffix| !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()))
}
