use super::SystemId;
use crate::{
    core::ComponentId,
    error::{PipelineError, fatal},
};
use indexmap::IndexMap;

/// Which consumer event creates demand for a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// Consumers that are enabled and have matched tables.
    Activate,
    /// Consumers that are merely enabled. Used by producers whose output is
    /// declared with `Not`, since their consumers can't match anything until
    /// the producer has run.
    Enable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProducerId(usize);

#[derive(Debug, Default)]
struct Demand {
    consumers: i32,
    producers: Vec<ProducerId>,
}

#[derive(Debug)]
struct Producer {
    system: SystemId,
    demanded: i32,
}

/// Reference counts connecting on-demand producers to the consumers that
/// read what they write.
///
/// A producer runs only while at least one of its outputs has a consumer.
#[derive(Debug, Default)]
pub struct OnDemandGraph {
    demands: Vec<Demand>,
    producers: Vec<Producer>,
    on_activate: IndexMap<ComponentId, usize>,
    on_enable: IndexMap<ComponentId, usize>,
}

impl OnDemandGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_producer(&mut self, system: SystemId) -> ProducerId {
        let id = ProducerId(self.producers.len());
        self.producers.push(Producer {
            system,
            demanded: 0,
        });
        id
    }

    pub fn register_output(&mut self, trigger: Trigger, component: ComponentId, producer: ProducerId) {
        let index = self.demand_index(trigger, component);
        let demand = &mut self.demands[index];
        demand.producers.push(producer);

        if demand.consumers > 0 {
            self.producers[producer.0].demanded += 1;
        }
    }

    pub fn is_demanded(&self, producer: ProducerId) -> bool {
        self.producers[producer.0].demanded > 0
    }

    /// Number of consumers currently creating demand for `component`.
    pub fn consumers(&self, trigger: Trigger, component: ComponentId) -> i32 {
        self.map(trigger)
            .get(&component)
            .map_or(0, |index| self.demands[*index].consumers)
    }

    /// Adds (`delta > 0`) or removes one consumer of `component` and returns
    /// the producers whose demanded state flipped, with their new state.
    pub fn propagate(
        &mut self,
        trigger: Trigger,
        component: ComponentId,
        delta: i32,
    ) -> Vec<(SystemId, bool)> {
        let index = self.demand_index(trigger, component);
        let demand = &mut self.demands[index];

        demand.consumers += delta;
        if demand.consumers < 0 {
            fatal(PipelineError::NegativeRefcount(component));
        }

        let first = delta > 0 && demand.consumers == 1;
        let last = delta < 0 && demand.consumers == 0;
        if !first && !last {
            return Vec::new();
        }

        let mut flips = Vec::new();
        for producer in &demand.producers {
            let producer = &mut self.producers[producer.0];
            producer.demanded += delta.signum();

            if (first && producer.demanded == 1) || (last && producer.demanded == 0) {
                flips.push((producer.system, producer.demanded > 0));
            }
        }

        flips
    }

    fn map(&self, trigger: Trigger) -> &IndexMap<ComponentId, usize> {
        match trigger {
            Trigger::Activate => &self.on_activate,
            Trigger::Enable => &self.on_enable,
        }
    }

    fn demand_index(&mut self, trigger: Trigger, component: ComponentId) -> usize {
        let map = match trigger {
            Trigger::Activate => &mut self.on_activate,
            Trigger::Enable => &mut self.on_enable,
        };

        *map.entry(component).or_insert_with(|| {
            self.demands.push(Demand::default());
            self.demands.len() - 1
        })
    }
}
