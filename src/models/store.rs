use std::collections::HashMap;

use crate::models::colors;
use crate::models::entity::{Entity, EntityId, EntityKind};
use crate::models::geometry::Rgba;

/// Read-only view of a building model.
///
/// Relation lists must be returned in a stable order; the export output is
/// only reproducible if the store enumerates deterministically.
pub trait ModelStore {
    /// Site-level roots of the spatial hierarchy.
    fn sites(&self) -> &[EntityId];

    fn entity(&self, id: EntityId) -> Option<&Entity>;

    /// Children of aggregation/decomposition relations where `id` is the whole.
    fn decomposed_by(&self, id: EntityId) -> &[EntityId];

    /// Products placed directly in the spatial element `id`.
    fn contained_elements(&self, id: EntityId) -> &[EntityId];

    /// Flat color for entities of `type_name` without per-vertex colors.
    fn default_color(&self, type_name: &str) -> Rgba {
        colors::default_color(type_name)
    }
}

/// A [`ModelStore`] held entirely in memory.
///
/// Sites are registered as roots in insertion order.
#[derive(Debug, Default)]
pub struct InMemoryModel {
    entities: HashMap<EntityId, Entity>,
    sites: Vec<EntityId>,
    decomposition: HashMap<EntityId, Vec<EntityId>>,
    containment: HashMap<EntityId, Vec<EntityId>>,
    next_id: u64,
}

impl InMemoryModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entity and return its handle.
    pub fn insert(&mut self, entity: Entity) -> EntityId {
        self.next_id += 1;
        let id = EntityId(self.next_id);
        if entity.kind == EntityKind::Site {
            self.sites.push(id);
        }
        self.entities.insert(id, entity);
        id
    }

    /// Record that `child` is a part of `whole`.
    pub fn decompose(&mut self, whole: EntityId, child: EntityId) {
        self.decomposition.entry(whole).or_default().push(child);
    }

    /// Record that `product` is placed in the spatial element `container`.
    pub fn contain(&mut self, container: EntityId, product: EntityId) {
        self.containment.entry(container).or_default().push(product);
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl ModelStore for InMemoryModel {
    fn sites(&self) -> &[EntityId] {
        &self.sites
    }

    fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    fn decomposed_by(&self, id: EntityId) -> &[EntityId] {
        self.decomposition.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn contained_elements(&self, id: EntityId) -> &[EntityId] {
        self.containment.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sites_are_roots_in_insertion_order() {
        let mut model = InMemoryModel::new();
        let a = model.insert(Entity::builder().type_name("IfcSite").kind(EntityKind::Site).build());
        let building = model.insert(
            Entity::builder()
                .type_name("IfcBuilding")
                .kind(EntityKind::Building)
                .build(),
        );
        let b = model.insert(Entity::builder().type_name("IfcSite").kind(EntityKind::Site).build());
        model.decompose(a, building);

        assert_eq!(model.sites(), &[a, b]);
        assert_eq!(model.decomposed_by(a), &[building]);
        assert!(model.decomposed_by(b).is_empty());
        assert!(model.contained_elements(a).is_empty());
        assert_eq!(model.len(), 3);
    }
}
