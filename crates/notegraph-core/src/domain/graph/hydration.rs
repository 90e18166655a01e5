//! Hydrated entities
//!
//! A hydrated entity bundles one entity with its observations, both relation
//! views and every relation endpoint. Endpoints live in an arena keyed by
//! entity id, so relations stay plain id pairs and entities never own each
//! other.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::entity::{Entity, EntityId, EntitySummary};
use super::relation::{Observation, Relation};

/// An entity together with its local neighborhood
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HydratedEntity {
    pub entity: Entity,
    pub observations: Vec<Observation>,
    /// Relations where this entity is `from`
    pub outgoing_relations: Vec<Relation>,
    /// Relations where this entity is `to`
    pub incoming_relations: Vec<Relation>,
    /// Arena of every entity referenced by the relations above
    pub endpoints: BTreeMap<EntityId, EntitySummary>,
}

impl HydratedEntity {
    /// Wrap an entity with empty views
    pub fn bare(entity: Entity) -> Self {
        let mut endpoints = BTreeMap::new();
        endpoints.insert(entity.id, entity.summary());
        Self {
            entity,
            observations: Vec::new(),
            outgoing_relations: Vec::new(),
            incoming_relations: Vec::new(),
            endpoints,
        }
    }

    /// Surrogate key of the hydrated entity
    pub fn id(&self) -> EntityId {
        self.entity.id
    }

    /// Look up a relation endpoint
    pub fn endpoint(&self, id: EntityId) -> Option<&EntitySummary> {
        self.endpoints.get(&id)
    }

    /// Resolved targets of outgoing relations, in relation order
    pub fn outgoing_targets(&self) -> impl Iterator<Item = &EntitySummary> {
        self.outgoing_relations
            .iter()
            .filter_map(|rel| rel.to_id)
            .filter_map(|id| self.endpoints.get(&id))
    }

    /// Sources of incoming relations, in relation order
    pub fn incoming_sources(&self) -> impl Iterator<Item = &EntitySummary> {
        self.incoming_relations
            .iter()
            .filter_map(|rel| self.endpoints.get(&rel.from_id))
    }

    /// Outgoing relations whose target is not synced yet
    pub fn unresolved_relations(&self) -> impl Iterator<Item = &Relation> {
        self.outgoing_relations.iter().filter(|rel| rel.is_forward_reference())
    }
}

/// Assemble hydrated entities from rows fetched in bulk
///
/// `relations` may contain edges for any of the entities; each edge lands in
/// the outgoing view of its source and the incoming view of its target.
/// `endpoints` must cover every id referenced by `relations`; missing ids are
/// simply absent from the arena.
pub fn assemble(
    entities: Vec<Entity>,
    observations: Vec<Observation>,
    relations: Vec<Relation>,
    endpoints: &BTreeMap<EntityId, EntitySummary>,
) -> Vec<HydratedEntity> {
    let mut by_id: BTreeMap<EntityId, HydratedEntity> = BTreeMap::new();
    let order: Vec<EntityId> = entities.iter().map(|e| e.id).collect();

    for entity in entities {
        by_id.insert(entity.id, HydratedEntity::bare(entity));
    }

    for observation in observations {
        if let Some(hydrated) = by_id.get_mut(&observation.entity_id) {
            hydrated.observations.push(observation);
        }
    }

    for relation in relations {
        let ids = [Some(relation.from_id), relation.to_id];

        if let Some(target) = relation.to_id.and_then(|id| by_id.get_mut(&id)) {
            target.incoming_relations.push(relation.clone());
            link_endpoints(target, &ids, endpoints);
        }
        if let Some(source) = by_id.get_mut(&relation.from_id) {
            source.outgoing_relations.push(relation);
            link_endpoints(source, &ids, endpoints);
        }
    }

    order.into_iter().filter_map(|id| by_id.remove(&id)).collect()
}

fn link_endpoints(
    hydrated: &mut HydratedEntity,
    ids: &[Option<EntityId>],
    endpoints: &BTreeMap<EntityId, EntitySummary>,
) {
    for id in ids.iter().flatten() {
        if let Some(summary) = endpoints.get(id) {
            hydrated.endpoints.entry(*id).or_insert_with(|| summary.clone());
        }
    }
}
