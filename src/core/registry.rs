use super::storage::SparseIndex;
use indexmap::IndexMap;
use std::{any::TypeId, ops::Index};

/// Marker for types that can be attached to entities.
pub trait Component: Send + Sync + 'static {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentId(pub u32);

impl SparseIndex for ComponentId {
    #[inline]
    fn to_usize(self) -> usize {
        self.0 as usize
    }
}

pub struct ComponentMeta {
    name: &'static str,
    id: ComponentId,
}

impl ComponentMeta {
    fn new<C: Component>(id: ComponentId) -> Self {
        let name = std::any::type_name::<C>();

        Self {
            name: match name.rfind("::") {
                Some(index) => &name[index + 2..],
                None => name,
            },
            id,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn id(&self) -> ComponentId {
        self.id
    }
}

/// Maps Rust types to dense component ids.
#[derive(Default)]
pub struct Components(IndexMap<TypeId, ComponentMeta>);

impl Components {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    pub fn register<C: Component>(&mut self) -> ComponentId {
        let ty = TypeId::of::<C>();
        match self.0.get(&ty) {
            Some(meta) => meta.id,
            None => {
                let id = ComponentId(self.0.len() as u32);
                self.0.insert(ty, ComponentMeta::new::<C>(id));
                id
            }
        }
    }

    pub fn get_id<C: Component>(&self) -> Option<ComponentId> {
        self.0.get(&TypeId::of::<C>()).map(|meta| meta.id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Index<ComponentId> for Components {
    type Output = ComponentMeta;

    fn index(&self, index: ComponentId) -> &Self::Output {
        &self.0[index.to_usize()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Position;
    impl Component for Position {}

    struct Velocity;
    impl Component for Velocity {}

    #[test]
    fn register_is_idempotent() {
        let mut components = Components::new();
        let position = components.register::<Position>();
        let velocity = components.register::<Velocity>();

        assert_eq!(components.register::<Position>(), position);
        assert_ne!(position, velocity);
        assert_eq!(components.len(), 2);
        assert_eq!(components[velocity].name(), "Velocity");
        assert_eq!(components.get_id::<Velocity>(), Some(velocity));
    }
}
