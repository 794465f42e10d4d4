use crate::core::{ComponentId, Entity, storage::SparseIndex};
use fixedbitset::FixedBitSet;
use std::{
    collections::HashMap,
    ops::Index,
    sync::{
        OnceLock,
        atomic::{AtomicU32, Ordering},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArchetypeId(pub u32);

impl ArchetypeId {
    pub const EMPTY: Self = Self(0);

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A table: every entity that has exactly the same set of components.
pub struct Archetype {
    id: ArchetypeId,
    components: Box<[ComponentId]>,
    bitset: FixedBitSet,
    entities: Vec<Entity>,
    dirty: OnceLock<Box<[AtomicU32]>>,
}

impl Archetype {
    fn new(id: ArchetypeId, components: Box<[ComponentId]>) -> Self {
        let mut bitset = FixedBitSet::new();
        for component in components.iter() {
            bitset.grow(component.to_usize() + 1);
            bitset.insert(component.to_usize());
        }

        Self {
            id,
            components,
            bitset,
            entities: Vec::new(),
            dirty: OnceLock::new(),
        }
    }

    pub fn id(&self) -> ArchetypeId {
        self.id
    }

    /// Sorted component ids of this table.
    pub fn components(&self) -> &[ComponentId] {
        &self.components
    }

    pub fn bitset(&self) -> &FixedBitSet {
        &self.bitset
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn has_component(&self, id: ComponentId) -> bool {
        self.bitset.contains(id.to_usize())
    }

    pub fn column(&self, id: ComponentId) -> Option<usize> {
        self.components.binary_search(&id).ok()
    }

    /// How many times a system wrote to the column of `id` in this table.
    pub fn dirty_count(&self, id: ComponentId) -> u32 {
        match (self.column(id), self.dirty.get()) {
            (Some(column), Some(counters)) => counters[column].load(Ordering::Relaxed),
            _ => 0,
        }
    }

    /// Bumps the change counter of a column. Safe to call from several
    /// workers at once.
    pub fn mark_dirty(&self, id: ComponentId) {
        if let Some(column) = self.column(id) {
            self.counters()[column].fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Allocates the change counters if they don't exist yet.
    pub fn touch(&self) {
        self.counters();
    }

    fn counters(&self) -> &[AtomicU32] {
        self.dirty.get_or_init(|| {
            self.components
                .iter()
                .map(|_| AtomicU32::new(0))
                .collect()
        })
    }

    fn push(&mut self, entity: Entity) -> usize {
        self.entities.push(entity);
        self.entities.len() - 1
    }

    /// Removes the entity at `row`, returning the entity that took its place.
    fn swap_remove(&mut self, row: usize) -> Option<Entity> {
        self.entities.swap_remove(row);
        self.entities.get(row).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLocation {
    pub archetype: ArchetypeId,
    pub row: usize,
}

pub struct Archetypes {
    archetypes: Vec<Archetype>,
    archetype_map: HashMap<Box<[ComponentId]>, ArchetypeId>,
    entity_map: HashMap<Entity, EntityLocation>,
    generation: u64,
}

impl Archetypes {
    pub fn new() -> Self {
        let empty: Box<[ComponentId]> = Box::new([]);
        let mut archetype_map = HashMap::new();
        archetype_map.insert(empty.clone(), ArchetypeId::EMPTY);

        Self {
            archetypes: vec![Archetype::new(ArchetypeId::EMPTY, empty)],
            archetype_map,
            entity_map: HashMap::new(),
            generation: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.archetypes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archetypes.is_empty()
    }

    pub fn get(&self, id: ArchetypeId) -> Option<&Archetype> {
        self.archetypes.get(id.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Archetype> {
        self.archetypes.iter()
    }

    /// Changes whenever an entity is created, destroyed or moved.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn entity_count(&self) -> usize {
        self.entity_map.len()
    }

    pub fn location(&self, entity: Entity) -> Option<EntityLocation> {
        self.entity_map.get(&entity).copied()
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.entity_map.contains_key(&entity)
    }

    pub fn has_component(&self, entity: Entity, id: ComponentId) -> bool {
        self.location(entity)
            .is_some_and(|location| self[location.archetype].has_component(id))
    }

    pub fn touch(&self) {
        self.archetypes.iter().for_each(Archetype::touch);
    }

    /// Places `entity` in the table of `components`, moving it if it already
    /// lives somewhere else.
    pub fn insert(&mut self, entity: Entity, components: &[ComponentId]) -> ArchetypeId {
        let mut ids = components.to_vec();
        ids.sort_unstable();
        ids.dedup();

        self.move_entity(entity, ids.into_boxed_slice())
    }

    /// Moves a live entity to the table with `id` added. Entities that were
    /// despawned, possibly earlier in the same merge, stay dead.
    pub fn add_component(&mut self, entity: Entity, id: ComponentId) -> Option<ArchetypeId> {
        if !self.contains(entity) {
            return None;
        }

        let mut ids = self.components_of(entity);
        if let Err(index) = ids.binary_search(&id) {
            ids.insert(index, id);
        }

        Some(self.move_entity(entity, ids.into_boxed_slice()))
    }

    pub fn remove_component(&mut self, entity: Entity, id: ComponentId) -> Option<ArchetypeId> {
        if !self.contains(entity) {
            return None;
        }

        let mut ids = self.components_of(entity);
        ids.retain(|component| *component != id);

        Some(self.move_entity(entity, ids.into_boxed_slice()))
    }

    pub fn despawn(&mut self, entity: Entity) -> bool {
        match self.entity_map.remove(&entity) {
            Some(location) => {
                self.detach(location);
                self.generation += 1;
                true
            }
            None => false,
        }
    }

    fn components_of(&self, entity: Entity) -> Vec<ComponentId> {
        self.location(entity)
            .map(|location| self[location.archetype].components.to_vec())
            .unwrap_or_default()
    }

    fn move_entity(&mut self, entity: Entity, components: Box<[ComponentId]>) -> ArchetypeId {
        let target = self.get_or_insert(components);

        if let Some(location) = self.entity_map.get(&entity).copied() {
            if location.archetype == target {
                return target;
            }

            self.detach(location);
        }

        let row = self.archetypes[target.index()].push(entity);
        self.entity_map.insert(
            entity,
            EntityLocation {
                archetype: target,
                row,
            },
        );

        self.generation += 1;
        target
    }

    fn detach(&mut self, location: EntityLocation) {
        let archetype = &mut self.archetypes[location.archetype.index()];
        if let Some(moved) = archetype.swap_remove(location.row) {
            if let Some(moved) = self.entity_map.get_mut(&moved) {
                moved.row = location.row;
            }
        }
    }

    fn get_or_insert(&mut self, components: Box<[ComponentId]>) -> ArchetypeId {
        if let Some(id) = self.archetype_map.get(&components) {
            return *id;
        }

        let id = ArchetypeId(self.archetypes.len() as u32);
        self.archetype_map.insert(components.clone(), id);
        self.archetypes.push(Archetype::new(id, components));
        id
    }
}

impl Default for Archetypes {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<ArchetypeId> for Archetypes {
    type Output = Archetype;

    fn index(&self, index: ArchetypeId) -> &Self::Output {
        &self.archetypes[index.index()]
    }
}
