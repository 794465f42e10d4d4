use crate::{
    core::{Component, ComponentId, Components, Entities, Entity, partition},
    system::{
        Context, Iter, StatusAction, SystemAction, SystemDesc, SystemId, Systems,
        query::{Filter, InOut, Oper, Query, Signature},
        schedule::Pipeline,
        timer::TickSource,
    },
};
use archetype::Archetypes;
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

pub mod archetype;
pub mod command;

pub use command::*;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WorldStats {
    pub frame_count_total: u64,
    pub systems_ran_frame: u64,
    pub pipeline_build_count_total: u64,
    pub merge_count_total: u64,
    pub system_time_total: Duration,
}

/// Which rows of the matched tables an invocation covers.
#[derive(Clone, Copy)]
pub struct RunScope<'a> {
    pub offset: usize,
    /// 0 means no limit.
    pub limit: usize,
    pub filter: Option<&'a Filter>,
    pub param: Option<&'a (dyn Context + 'static)>,
    pub stage_index: usize,
    pub stage_count: usize,
}

impl Default for RunScope<'_> {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 0,
            filter: None,
            param: None,
            stage_index: 0,
            stage_count: 1,
        }
    }
}

pub struct World {
    archetypes: Archetypes,
    entities: Entities,
    components: Components,
    systems: Systems,
    pipeline: Pipeline,
    tick_sources: Vec<Arc<dyn TickSource>>,
    delta_time: f32,
    world_time: f64,
    measure_system_time: bool,
    monitor_generation: Option<u64>,
    systems_ran_frame: AtomicU64,
    frame_count_total: u64,
    merge_count_total: u64,
}

impl World {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            archetypes: Archetypes::new(),
            entities: Entities::new(),
            components: Components::new(),
            systems: Systems::new(),
            pipeline,
            tick_sources: Vec::new(),
            delta_time: 0.0,
            world_time: 0.0,
            measure_system_time: false,
            monitor_generation: None,
            systems_ran_frame: AtomicU64::new(0),
            frame_count_total: 0,
            merge_count_total: 0,
        }
    }

    pub fn archetypes(&self) -> &Archetypes {
        &self.archetypes
    }

    pub fn entities(&self) -> &Entities {
        &self.entities
    }

    pub fn components(&self) -> &Components {
        &self.components
    }

    pub fn systems(&self) -> &Systems {
        &self.systems
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.pipeline
    }

    pub fn delta_time(&self) -> f32 {
        self.delta_time
    }

    pub fn world_time(&self) -> f64 {
        self.world_time
    }

    pub(crate) fn set_time(&mut self, delta_time: f32, world_time: f64) {
        self.delta_time = delta_time;
        self.world_time = world_time;
    }

    pub fn set_measure_system_time(&mut self, measure: bool) {
        self.measure_system_time = measure;
    }

    pub fn stats(&self) -> WorldStats {
        WorldStats {
            frame_count_total: self.frame_count_total,
            systems_ran_frame: self.systems_ran_frame.load(Ordering::Relaxed),
            pipeline_build_count_total: self.pipeline.build_count(),
            merge_count_total: self.merge_count_total,
            system_time_total: self.systems.iter().map(|system| system.time_spent()).sum(),
        }
    }

    pub fn register<C: Component>(&mut self) -> ComponentId {
        self.components.register::<C>()
    }
}

impl World {
    pub fn spawn(&mut self, components: &[ComponentId]) -> Entity {
        let entity = self.entities.reserve();
        self.archetypes.insert(entity, components);
        entity
    }

    pub fn insert(&mut self, entity: Entity, components: &[ComponentId]) {
        self.archetypes.insert(entity, components);
    }

    pub fn despawn(&mut self, entity: Entity) -> bool {
        self.archetypes.despawn(entity)
    }

    pub fn add_component(&mut self, entity: Entity, id: ComponentId) {
        self.archetypes.add_component(entity, id);
    }

    pub fn remove_component(&mut self, entity: Entity, id: ComponentId) {
        self.archetypes.remove_component(entity, id);
    }

    pub fn has_component(&self, entity: Entity, id: ComponentId) -> bool {
        self.archetypes.has_component(entity, id)
    }
}

impl World {
    /// Declares a system. Its query is matched right away so that it starts
    /// out with the right activity.
    pub fn add_system(&mut self, desc: SystemDesc, action: impl SystemAction) -> SystemId {
        let query = desc.get_signature().cloned().map(|signature| {
            let mut query = Query::new(signature);
            query.update(&self.archetypes);
            query
        });

        let active = query
            .as_ref()
            .is_none_or(|query| query.is_active(&self.archetypes));

        self.systems.register(desc, Arc::new(action), query, active)
    }

    pub fn enable_system(&mut self, id: SystemId, enabled: bool) {
        self.systems.enable(id, enabled);
    }

    pub fn set_status_action(&mut self, id: SystemId, action: impl StatusAction) {
        self.systems.set_status_action(id, Some(Arc::new(action)));
    }

    pub fn clear_status_action(&mut self, id: SystemId) {
        self.systems.set_status_action(id, None);
    }

    /// Attaches a tick source to a system. Sources are shared, each one is
    /// advanced once per frame however many systems use it.
    pub fn set_tick_source(&mut self, id: SystemId, source: Arc<dyn TickSource>) {
        let known = self
            .tick_sources
            .iter()
            .any(|known| std::ptr::addr_eq(Arc::as_ptr(known), Arc::as_ptr(&source)));
        if !known {
            self.tick_sources.push(source.clone());
        }

        self.systems.set_tick_source(id, Some(source));
    }

    pub(crate) fn update_tick_sources(&self, delta_time: f32) {
        for source in &self.tick_sources {
            source.update(delta_time);
        }
    }

    /// Re-matches queries against tables created since the last call and
    /// updates system activity. Cheap when no entity moved.
    pub fn eval_monitors(&mut self) {
        let generation = self.archetypes.generation();
        if self.monitor_generation == Some(generation) {
            return;
        }

        self.monitor_generation = Some(generation);
        self.sweep();
    }

    /// Re-evaluates the activity of every system, regardless of whether any
    /// table changed.
    pub fn deactivate_systems(&mut self) {
        self.monitor_generation = Some(self.archetypes.generation());
        self.sweep();
    }

    fn sweep(&mut self) {
        let archetypes = &self.archetypes;
        let changes = self
            .systems
            .iter_mut()
            .filter_map(|system| {
                let matched = system.is_matched();
                let query = system.query_mut()?;
                query.update(archetypes);
                if !matched {
                    return None;
                }

                let active = query.is_active(archetypes);
                (active != system.is_active()).then_some((system.id(), active))
            })
            .collect::<Vec<_>>();

        for (id, active) in changes {
            self.systems.activate(id, active);
        }
    }

    /// Applies staged commands in stage order, then refreshes system
    /// activity.
    pub fn merge<'a>(&mut self, stages: impl IntoIterator<Item = &'a mut Stage>) {
        let mut applied = 0;
        let mut count = 0;
        for stage in stages {
            let commands = stage.drain();
            applied += commands.len();
            count += 1;

            for command in commands {
                command.execute(self);
            }
        }

        self.merge_count_total += 1;
        self.eval_monitors();

        tracing::debug!(commands = applied, stages = count, "stages merged");
    }

    /// Rebuilds the plan if any system changed. Returns whether it did.
    pub fn build_pipeline(&mut self) -> bool {
        self.pipeline.build(&self.systems)
    }

    pub(crate) fn begin_frame_stats(&self) {
        self.systems_ran_frame.store(0, Ordering::Relaxed);
    }

    pub(crate) fn end_frame_stats(&mut self) {
        self.frame_count_total += 1;
    }

    /// Runs a system outside of the pipeline.
    pub fn run_system(
        &self,
        stage: &mut Stage,
        id: SystemId,
        delta_time: f32,
        scope: RunScope,
    ) -> bool {
        self.run_intern(stage, id, delta_time, scope)
    }

    pub(crate) fn run_worker(
        &self,
        stage: &mut Stage,
        id: SystemId,
        delta_time: f32,
        stage_index: usize,
        stage_count: usize,
    ) -> bool {
        self.systems_ran_frame.fetch_add(1, Ordering::Relaxed);
        self.run_intern(
            stage,
            id,
            delta_time,
            RunScope {
                stage_index,
                stage_count,
                ..Default::default()
            },
        )
    }

    fn run_intern(&self, stage: &mut Stage, id: SystemId, delta_time: f32, scope: RunScope) -> bool {
        let system = self.systems.get(id);

        let mut delta_system_time = delta_time;
        if let Some(source) = system.tick_source() {
            if !source.tick() {
                return false;
            }
            delta_system_time = source.time_elapsed();
        }

        let start = self.measure_system_time.then(Instant::now);
        let param = scope.param.or(system.context());
        let action = system.action().clone();

        let mut iter = Iter {
            world: self,
            stage,
            system: id,
            archetype: None,
            entities: &[],
            frame_offset: 0,
            delta_time,
            delta_system_time,
            param,
            stage_index: scope.stage_index,
        };

        match system.query().filter(|_| system.is_matched()) {
            Some(query) => {
                let mut skip = scope.offset;
                let mut remaining = match scope.limit {
                    0 => usize::MAX,
                    limit => limit,
                };

                for archetype in query.matched().iter().map(|id| &self.archetypes[*id]) {
                    if remaining == 0 {
                        break;
                    }

                    if archetype.is_empty()
                        || scope
                            .filter
                            .is_some_and(|filter| !filter.matches(archetype.bitset()))
                    {
                        continue;
                    }

                    let rows = partition(archetype.len(), scope.stage_index, scope.stage_count);
                    let entities = &archetype.entities()[rows];
                    if skip >= entities.len() {
                        skip -= entities.len();
                        continue;
                    }

                    let entities = &entities[skip..];
                    let entities = &entities[..entities.len().min(remaining)];
                    skip = 0;
                    remaining -= entities.len();

                    iter.archetype = Some(archetype);
                    iter.entities = entities;
                    action.run(&mut iter);
                    iter.frame_offset += entities.len();

                    if system.has_out() {
                        mark_dirty(system.signature(), archetype);
                    }
                }
            }
            // Systems that match no tables run once per frame, on the first
            // worker only.
            None if scope.stage_index == 0 => action.run(&mut iter),
            None => {}
        }

        system.record_invocation(start.map(|start| start.elapsed()));
        true
    }

    /// Reports closing statuses for every system.
    pub fn teardown(&mut self) {
        self.systems.teardown();
    }
}

fn mark_dirty(signature: Option<&Signature>, archetype: &archetype::Archetype) {
    let Some(signature) = signature else {
        return;
    };

    signature
        .terms()
        .iter()
        .filter(|term| term.inout != InOut::In && term.is_table_term() && term.oper != Oper::Not)
        .for_each(|term| archetype.mark_dirty(term.id));
}
