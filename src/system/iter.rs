use super::{Context, SystemId};
use crate::{
    core::{ComponentId, Entity},
    world::{Stage, World, archetype::Archetype},
};

/// What a system action sees for one batch of entities.
///
/// The world is shared with every other thread running the same op, so all
/// structural changes go through the stage and are applied at the next merge.
pub struct Iter<'a> {
    pub(crate) world: &'a World,
    pub(crate) stage: &'a mut Stage,
    pub(crate) system: SystemId,
    pub(crate) archetype: Option<&'a Archetype>,
    pub(crate) entities: &'a [Entity],
    pub(crate) frame_offset: usize,
    pub(crate) delta_time: f32,
    pub(crate) delta_system_time: f32,
    pub(crate) param: Option<&'a (dyn Context + 'static)>,
    pub(crate) stage_index: usize,
}

impl<'a> Iter<'a> {
    pub fn world(&self) -> &'a World {
        self.world
    }

    pub fn system(&self) -> SystemId {
        self.system
    }

    /// The table being iterated, `None` for systems that don't match tables.
    pub fn archetype(&self) -> Option<&'a Archetype> {
        self.archetype
    }

    pub fn entities(&self) -> &'a [Entity] {
        self.entities
    }

    pub fn count(&self) -> usize {
        self.entities.len()
    }

    /// Position of the first entity of this batch among everything the
    /// system has been handed during this invocation.
    pub fn frame_offset(&self) -> usize {
        self.frame_offset
    }

    pub fn delta_time(&self) -> f32 {
        self.delta_time
    }

    /// Delta time as seen by this system. Differs from [`Iter::delta_time`]
    /// when the system runs off a tick source.
    pub fn delta_system_time(&self) -> f32 {
        self.delta_system_time
    }

    pub fn world_time(&self) -> f64 {
        self.world.world_time()
    }

    pub fn stage_id(&self) -> usize {
        self.stage.id()
    }

    /// Index of the worker running this batch, 0 on the main thread.
    pub fn stage_index(&self) -> usize {
        self.stage_index
    }

    pub fn param<T: Send + Sync + 'static>(&self) -> Option<&'a T> {
        self.param.and_then(|param| param.downcast_ref::<T>())
    }

    pub fn commands(&mut self) -> &mut Stage {
        self.stage
    }

    pub fn spawn(&mut self, components: &[ComponentId]) -> Entity {
        self.stage.spawn(self.world.entities(), components)
    }

    pub fn despawn(&mut self, entity: Entity) {
        self.stage.despawn(entity);
    }

    pub fn add(&mut self, entity: Entity, component: ComponentId) {
        self.stage.add(entity, component);
    }

    pub fn remove(&mut self, entity: Entity, component: ComponentId) {
        self.stage.remove(entity, component);
    }
}
