use crate::error::{PipelineError, fatal};
use downcast_rs::{Downcast, impl_downcast};
use graph::{OnDemandGraph, ProducerId, Trigger};
use indexmap::IndexMap;
use query::{InOut, Oper, Query, Signature};
use schedule::Phase;
use std::{
    borrow::Cow,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use timer::TickSource;

pub mod executor;
pub mod graph;
pub mod iter;
pub mod query;
pub mod schedule;
pub mod timer;

pub use iter::Iter;

pub type SystemName = Cow<'static, str>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SystemId(pub(crate) u32);

impl SystemId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The callable part of a system.
pub trait SystemAction: Send + Sync + 'static {
    fn run(&self, it: &mut Iter);
}

impl<F> SystemAction for F
where
    F: Fn(&mut Iter) + Send + Sync + 'static,
{
    fn run(&self, it: &mut Iter) {
        self(it)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemStatus {
    Enabled,
    Disabled,
    Activated,
    Deactivated,
}

/// Observer for the status transitions of one system.
pub trait StatusAction: Send + Sync + 'static {
    fn on_status(&self, system: SystemId, status: SystemStatus);
}

impl<F> StatusAction for F
where
    F: Fn(SystemId, SystemStatus) + Send + Sync + 'static,
{
    fn on_status(&self, system: SystemId, status: SystemStatus) {
        self(system, status)
    }
}

/// User data attached to a system or passed to a single invocation.
pub trait Context: Downcast + Send + Sync {}
impl_downcast!(Context);

impl<T: Send + Sync + 'static> Context for T {}

pub struct SystemDesc {
    name: SystemName,
    phase: Option<&'static str>,
    signature: Option<Signature>,
    on_demand: bool,
    context: Option<Arc<dyn Context>>,
}

impl SystemDesc {
    pub fn new(name: impl Into<SystemName>) -> Self {
        Self {
            name: name.into(),
            phase: None,
            signature: None,
            on_demand: false,
            context: None,
        }
    }

    pub fn phase(mut self, phase: impl Phase) -> Self {
        self.phase = Some(phase.name());
        self
    }

    pub fn signature(mut self, signature: Signature) -> Self {
        self.signature = Some(signature);
        self
    }

    /// Only run while some other active system reads what this one writes.
    pub fn on_demand(mut self) -> Self {
        self.on_demand = true;
        self
    }

    pub fn context(mut self, context: impl Context) -> Self {
        self.context = Some(Arc::new(context));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get_signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemFlags {
    /// Set by the user.
    pub enabled: bool,
    /// The query has at least one non-empty table.
    pub active: bool,
    /// Set while an on-demand system has nobody to produce for.
    pub disabled_intern: bool,
}

/// What a system currently contributes to the on-demand graph. Mirrors the
/// last status reported to observers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Published {
    enabled: bool,
    active: bool,
}

pub struct SystemData {
    id: SystemId,
    name: SystemName,
    phase: Option<&'static str>,
    action: Arc<dyn SystemAction>,
    query: Option<Query>,
    on_demand: bool,
    producer: Option<ProducerId>,
    context: Option<Arc<dyn Context>>,
    tick_source: Option<Arc<dyn TickSource>>,
    status_action: Option<Arc<dyn StatusAction>>,
    flags: SystemFlags,
    published: Published,
    invoke_count: AtomicU64,
    time_spent: AtomicU64,
}

impl SystemData {
    pub fn id(&self) -> SystemId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> Option<&'static str> {
        self.phase
    }

    pub fn query(&self) -> Option<&Query> {
        self.query.as_ref()
    }

    pub(crate) fn query_mut(&mut self) -> Option<&mut Query> {
        self.query.as_mut()
    }

    pub fn signature(&self) -> Option<&Signature> {
        self.query.as_ref().map(Query::signature)
    }

    pub fn action(&self) -> &Arc<dyn SystemAction> {
        &self.action
    }

    pub fn context(&self) -> Option<&(dyn Context + 'static)> {
        self.context.as_deref()
    }

    pub fn tick_source(&self) -> Option<&Arc<dyn TickSource>> {
        self.tick_source.as_ref()
    }

    pub fn flags(&self) -> SystemFlags {
        self.flags
    }

    pub fn is_on_demand(&self) -> bool {
        self.on_demand
    }

    /// Enabled by the user and not parked by the on-demand graph.
    pub fn is_enabled(&self) -> bool {
        self.flags.enabled && !self.flags.disabled_intern
    }

    pub fn is_active(&self) -> bool {
        self.flags.active
    }

    /// Whether the system follows table matching at all. Systems without a
    /// query, or whose query needs no tables, are always active.
    pub fn is_matched(&self) -> bool {
        self.query
            .as_ref()
            .is_some_and(|query| query.signature().needs_tables())
    }

    /// Whether running the system can change table data.
    pub fn has_out(&self) -> bool {
        self.signature().is_some_and(Signature::has_out)
    }

    pub fn invoke_count(&self) -> u64 {
        self.invoke_count.load(Ordering::Relaxed)
    }

    pub fn time_spent(&self) -> Duration {
        Duration::from_nanos(self.time_spent.load(Ordering::Relaxed))
    }

    pub(crate) fn record_invocation(&self, elapsed: Option<Duration>) {
        self.invoke_count.fetch_add(1, Ordering::Relaxed);
        if let Some(elapsed) = elapsed {
            self.time_spent
                .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
        }
    }

    fn inputs(&self) -> Vec<crate::core::ComponentId> {
        self.signature()
            .map(|signature| signature.inputs().collect())
            .unwrap_or_default()
    }
}

/// Every declared system plus the on-demand graph between them.
///
/// `generation` changes whenever anything that feeds the pipeline plan
/// changes: a new system, or a flip of any flag.
#[derive(Default)]
pub struct Systems {
    systems: IndexMap<SystemName, SystemData>,
    graph: OnDemandGraph,
    generation: u64,
}

impl Systems {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn graph(&self) -> &OnDemandGraph {
        &self.graph
    }

    pub fn get(&self, id: SystemId) -> &SystemData {
        match self.systems.get_index(id.index()) {
            Some((_, system)) => system,
            None => fatal(PipelineError::UnknownSystem(id)),
        }
    }

    fn get_mut(&mut self, id: SystemId) -> &mut SystemData {
        match self.systems.get_index_mut(id.index()) {
            Some((_, system)) => system,
            None => fatal(PipelineError::UnknownSystem(id)),
        }
    }

    pub fn find(&self, name: &str) -> Option<SystemId> {
        self.systems
            .get_index_of(name)
            .map(|index| SystemId(index as u32))
    }

    pub fn iter(&self) -> impl Iterator<Item = &SystemData> {
        self.systems.values()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut SystemData> {
        self.systems.values_mut()
    }

    /// Declares a system. `active` is the initial match state of `query`.
    ///
    /// Declaring a name that already exists must repeat its signature, phase
    /// and on-demand flag exactly, otherwise this is fatal. The action is not
    /// compared: closures have no identity to compare, so the new action
    /// replaces the old one, as does a new context when one is given. Flags,
    /// counters and the system id are kept.
    pub fn register(
        &mut self,
        desc: SystemDesc,
        action: Arc<dyn SystemAction>,
        query: Option<Query>,
        active: bool,
    ) -> SystemId {
        if let Some(index) = self.systems.get_index_of(&desc.name) {
            let system = &mut self.systems[index];
            if system.signature() != desc.signature.as_ref()
                || system.phase != desc.phase
                || system.on_demand != desc.on_demand
            {
                fatal(PipelineError::SystemMismatch(desc.name));
            }

            system.action = action;
            if desc.context.is_some() {
                system.context = desc.context;
            }

            tracing::debug!(system = %system.name, "system redeclared");
            return system.id;
        }

        let id = SystemId(self.systems.len() as u32);
        let on_demand = desc.on_demand;
        self.systems.insert(
            desc.name.clone(),
            SystemData {
                id,
                name: desc.name,
                phase: desc.phase,
                action,
                query,
                on_demand,
                producer: None,
                context: desc.context,
                tick_source: None,
                status_action: None,
                flags: SystemFlags {
                    enabled: true,
                    active,
                    disabled_intern: false,
                },
                published: Published::default(),
                invoke_count: AtomicU64::new(0),
                time_spent: AtomicU64::new(0),
            },
        );

        if on_demand {
            self.register_outputs(id);
        }

        self.generation += 1;
        self.sync(id);

        id
    }

    fn register_outputs(&mut self, id: SystemId) {
        let producer = self.graph.add_producer(id);
        let system = self.get(id);
        let outputs = system
            .signature()
            .map(|signature| {
                signature
                    .terms()
                    .iter()
                    .filter(|term| term.inout == InOut::Out)
                    .map(|term| match term.oper {
                        Oper::Not => (Trigger::Enable, term.id),
                        _ => (Trigger::Activate, term.id),
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        if outputs.is_empty() {
            fatal(PipelineError::NoOutColumns(system.name.clone()));
        }

        for (trigger, component) in outputs {
            self.graph.register_output(trigger, component, producer);
        }

        let demanded = self.graph.is_demanded(producer);
        let system = self.get_mut(id);
        system.producer = Some(producer);
        system.flags.disabled_intern = !demanded;
    }

    /// Sets the match state. No-op if it doesn't change.
    pub fn activate(&mut self, id: SystemId, active: bool) {
        let system = self.get_mut(id);
        if system.flags.active == active {
            return;
        }

        system.flags.active = active;
        tracing::trace!(system = %system.name, active, "system match state changed");

        self.generation += 1;
        self.sync(id);
    }

    pub fn enable(&mut self, id: SystemId, enabled: bool) {
        let system = self.get_mut(id);
        if system.flags.enabled == enabled {
            return;
        }

        system.flags.enabled = enabled;
        tracing::trace!(system = %system.name, enabled, "system enabled state changed");

        self.generation += 1;
        self.sync(id);
    }

    pub fn set_tick_source(&mut self, id: SystemId, source: Option<Arc<dyn TickSource>>) {
        self.get_mut(id).tick_source = source;
    }

    /// Installs a status observer and replays the current state to it.
    pub fn set_status_action(&mut self, id: SystemId, action: Option<Arc<dyn StatusAction>>) {
        let system = self.get_mut(id);
        system.status_action = action;

        if let Some(action) = &system.status_action {
            if system.published.enabled {
                action.on_status(id, SystemStatus::Enabled);
            }
            if system.published.active {
                action.on_status(id, SystemStatus::Activated);
            }
        }
    }

    /// Reports the closing statuses of every system. The graph is left as is.
    pub fn teardown(&mut self) {
        for system in self.systems.values_mut() {
            let published = std::mem::take(&mut system.published);
            let Some(action) = &system.status_action else {
                continue;
            };

            if published.active {
                action.on_status(system.id, SystemStatus::Deactivated);
            }
            if published.enabled {
                action.on_status(system.id, SystemStatus::Disabled);
            }
        }
    }

    /// Brings what each system contributes to the on-demand graph in line
    /// with its flags. Producers flipped along the way are synced as well.
    fn sync(&mut self, id: SystemId) {
        let mut pending = vec![id];

        while let Some(id) = pending.pop() {
            let system = self.get_mut(id);
            let enabled = system.is_enabled();
            let next = Published {
                enabled,
                active: enabled && system.flags.active,
            };
            let previous = system.published;
            if previous == next {
                continue;
            }

            system.published = next;
            let status_action = system.status_action.clone();
            let inputs = system.inputs();

            let mut flips = Vec::new();
            let mut statuses = Vec::new();

            if previous.active && !next.active {
                flips.extend(self.propagate(Trigger::Activate, &inputs, -1));
                statuses.push(SystemStatus::Deactivated);
            }

            if previous.enabled != next.enabled {
                let delta = if next.enabled { 1 } else { -1 };
                flips.extend(self.propagate(Trigger::Enable, &inputs, delta));
                statuses.push(match next.enabled {
                    true => SystemStatus::Enabled,
                    false => SystemStatus::Disabled,
                });
            }

            if !previous.active && next.active {
                flips.extend(self.propagate(Trigger::Activate, &inputs, 1));
                statuses.push(SystemStatus::Activated);
            }

            for (producer, demanded) in flips {
                let system = self.get_mut(producer);
                system.flags.disabled_intern = !demanded;
                tracing::trace!(system = %system.name, demanded, "on-demand system toggled");

                self.generation += 1;
                pending.push(producer);
            }

            if let Some(action) = status_action {
                for status in statuses {
                    action.on_status(id, status);
                }
            }
        }
    }

    fn propagate(
        &mut self,
        trigger: Trigger,
        inputs: &[crate::core::ComponentId],
        delta: i32,
    ) -> Vec<(SystemId, bool)> {
        inputs
            .iter()
            .flat_map(|component| self.graph.propagate(trigger, *component, delta))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ComponentId;
    use query::Term;
    use std::sync::Mutex;

    const POSITION: ComponentId = ComponentId(0);
    const VELOCITY: ComponentId = ComponentId(1);

    fn noop() -> Arc<dyn SystemAction> {
        Arc::new(|_: &mut Iter| {})
    }

    fn reader(name: &'static str, component: ComponentId) -> SystemDesc {
        SystemDesc::new(name).signature(Signature::new().read(component))
    }

    fn producer(name: &'static str, component: ComponentId) -> SystemDesc {
        SystemDesc::new(name)
            .signature(Signature::new().write(component))
            .on_demand()
    }

    fn register(systems: &mut Systems, desc: SystemDesc, active: bool) -> SystemId {
        let query = desc.signature.clone().map(Query::new);
        systems.register(desc, noop(), query, active)
    }

    fn recorder() -> (Arc<Mutex<Vec<SystemStatus>>>, Arc<dyn StatusAction>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let action: Arc<dyn StatusAction> = Arc::new(move |_: SystemId, status: SystemStatus| {
            sink.lock().unwrap().push(status);
        });
        (log, action)
    }

    #[test]
    fn producer_follows_consumer_activity() {
        let mut systems = Systems::new();
        let producer = register(&mut systems, producer("produce", POSITION), true);
        assert!(systems.get(producer).flags().disabled_intern);

        let consumer = register(&mut systems, reader("consume", POSITION), false);
        assert!(!systems.get(producer).is_enabled());

        systems.activate(consumer, true);
        assert!(systems.get(producer).is_enabled());

        systems.activate(consumer, false);
        assert!(!systems.get(producer).is_enabled());
    }

    #[test]
    fn producer_registered_after_active_consumer_starts_enabled() {
        let mut systems = Systems::new();
        register(&mut systems, reader("consume", POSITION), true);
        let producer = register(&mut systems, producer("produce", POSITION), true);

        assert!(systems.get(producer).is_enabled());
    }

    #[test]
    fn disabling_consumer_releases_producer() {
        let mut systems = Systems::new();
        let producer = register(&mut systems, producer("produce", POSITION), true);
        let consumer = register(&mut systems, reader("consume", POSITION), true);
        assert!(systems.get(producer).is_enabled());

        systems.enable(consumer, false);
        assert!(!systems.get(producer).is_enabled());

        systems.enable(consumer, true);
        assert!(systems.get(producer).is_enabled());
    }

    #[test]
    fn not_output_only_needs_enabled_consumers() {
        let mut systems = Systems::new();
        let producer = register(
            &mut systems,
            SystemDesc::new("produce")
                .signature(Signature::new().with(Term::write(VELOCITY).not()))
                .on_demand(),
            true,
        );

        let consumer = register(&mut systems, reader("consume", VELOCITY), false);
        assert!(systems.get(producer).is_enabled());

        systems.enable(consumer, false);
        assert!(!systems.get(producer).is_enabled());
    }

    #[test]
    fn demand_cascades_through_producer_chains() {
        let mut systems = Systems::new();
        // upstream writes Velocity, middle reads Velocity and writes Position
        let upstream = register(&mut systems, producer("upstream", VELOCITY), true);
        let middle = register(
            &mut systems,
            SystemDesc::new("middle")
                .signature(Signature::new().read(VELOCITY).write(POSITION))
                .on_demand(),
            true,
        );
        assert!(!systems.get(upstream).is_enabled());
        assert!(!systems.get(middle).is_enabled());

        let consumer = register(&mut systems, reader("consume", POSITION), true);
        assert!(systems.get(middle).is_enabled());
        assert!(systems.get(upstream).is_enabled());

        systems.activate(consumer, false);
        assert!(!systems.get(middle).is_enabled());
        assert!(!systems.get(upstream).is_enabled());
    }

    #[test]
    fn status_order_and_replay() {
        let mut systems = Systems::new();
        let id = register(&mut systems, reader("consume", POSITION), true);
        let (log, action) = recorder();

        systems.set_status_action(id, Some(action));
        assert_eq!(
            *log.lock().unwrap(),
            vec![SystemStatus::Enabled, SystemStatus::Activated]
        );

        log.lock().unwrap().clear();
        systems.enable(id, false);
        systems.enable(id, true);
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                SystemStatus::Deactivated,
                SystemStatus::Disabled,
                SystemStatus::Enabled,
                SystemStatus::Activated,
            ]
        );

        log.lock().unwrap().clear();
        systems.teardown();
        assert_eq!(
            *log.lock().unwrap(),
            vec![SystemStatus::Deactivated, SystemStatus::Disabled]
        );
    }

    #[test]
    fn redeclaring_replaces_action() {
        let mut systems = Systems::new();
        let first = register(&mut systems, reader("consume", POSITION), true);
        let generation = systems.generation();
        let second = register(&mut systems, reader("consume", POSITION), true);

        assert_eq!(first, second);
        assert_eq!(systems.len(), 1);
        assert_eq!(systems.generation(), generation);
    }

    #[test]
    #[should_panic(expected = "different signature")]
    fn redeclaring_with_other_signature_is_fatal() {
        let mut systems = Systems::new();
        register(&mut systems, reader("consume", POSITION), true);
        register(&mut systems, reader("consume", VELOCITY), true);
    }

    #[test]
    #[should_panic(expected = "no [out] columns")]
    fn on_demand_without_outputs_is_fatal() {
        let mut systems = Systems::new();
        register(
            &mut systems,
            SystemDesc::new("produce")
                .signature(Signature::new().read(POSITION))
                .on_demand(),
            true,
        );
    }

    #[test]
    fn flag_changes_bump_generation() {
        let mut systems = Systems::new();
        let id = register(&mut systems, reader("consume", POSITION), false);
        let generation = systems.generation();

        systems.activate(id, false);
        assert_eq!(systems.generation(), generation);

        systems.activate(id, true);
        assert!(systems.generation() > generation);
    }
}
