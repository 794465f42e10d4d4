use super::World;
use crate::core::{ComponentId, Entities, Entity};

pub trait Command: Send + Sync + 'static {
    fn execute(self, world: &mut World);
}

pub struct BoxCommand(Box<dyn FnOnce(&mut World) + Send + Sync + 'static>);

impl BoxCommand {
    pub fn new<C: Command>(command: C) -> Self {
        BoxCommand(Box::new(move |world| command.execute(world)))
    }

    pub fn from_fn(f: impl FnOnce(&mut World) + Send + Sync + 'static) -> Self {
        BoxCommand(Box::new(f))
    }

    pub fn execute(self, world: &mut World) {
        (self.0)(world)
    }
}

pub struct Spawn {
    pub entity: Entity,
    pub components: Vec<ComponentId>,
}

impl Command for Spawn {
    fn execute(self, world: &mut World) {
        world.insert(self.entity, &self.components);
    }
}

pub struct Despawn(pub Entity);

impl Command for Despawn {
    fn execute(self, world: &mut World) {
        world.despawn(self.0);
    }
}

pub struct AddComponent(pub Entity, pub ComponentId);

impl Command for AddComponent {
    fn execute(self, world: &mut World) {
        world.add_component(self.0, self.1);
    }
}

pub struct RemoveComponent(pub Entity, pub ComponentId);

impl Command for RemoveComponent {
    fn execute(self, world: &mut World) {
        world.remove_component(self.0, self.1);
    }
}

/// Per-thread staging area. Systems record structural changes here while
/// the world is shared, and the driver applies them at the next merge.
///
/// Stage 1 belongs to the thread that drives the frame, worker stages are
/// numbered from 2.
pub struct Stage {
    id: usize,
    commands: Vec<BoxCommand>,
}

impl Stage {
    pub const MAIN: usize = 1;

    pub fn new(id: usize) -> Self {
        Self {
            id,
            commands: Vec::new(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn push<C: Command>(&mut self, command: C) {
        self.commands.push(BoxCommand::new(command));
    }

    pub fn push_fn(&mut self, f: impl FnOnce(&mut World) + Send + Sync + 'static) {
        self.commands.push(BoxCommand::from_fn(f));
    }

    /// Reserves an entity id right away and stages its creation.
    pub fn spawn(&mut self, entities: &Entities, components: &[ComponentId]) -> Entity {
        let entity = entities.reserve();
        self.push(Spawn {
            entity,
            components: components.to_vec(),
        });
        entity
    }

    pub fn despawn(&mut self, entity: Entity) {
        self.push(Despawn(entity));
    }

    pub fn add(&mut self, entity: Entity, component: ComponentId) {
        self.push(AddComponent(entity, component));
    }

    pub fn remove(&mut self, entity: Entity, component: ComponentId) {
        self.push(RemoveComponent(entity, component));
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    pub(crate) fn drain(&mut self) -> Vec<BoxCommand> {
        std::mem::take(&mut self.commands)
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("id", &self.id)
            .field("commands", &self.commands.len())
            .finish()
    }
}
