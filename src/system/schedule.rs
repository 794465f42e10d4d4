use super::{SystemId, Systems, executor::builder::WriteStates};

pub trait Phase: 'static {
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

macro_rules! builtin_phases {
    ($($phase:ident),* $(,)?) => {
        $(
            pub struct $phase;
            impl Phase for $phase {}
        )*

        /// Phases of the builtin pipeline, in rank order.
        pub fn builtin_phases() -> Vec<&'static str> {
            vec![$($phase.name()),*]
        }
    };
}

builtin_phases!(
    PreFrame, OnLoad, PostLoad, PreUpdate, OnUpdate, OnValidate, PostUpdate, PreStore, OnStore,
    PostFrame,
);

/// A contiguous run of systems that can execute without a merge in between.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineOp {
    /// Active systems in this op.
    pub count: usize,
}

/// Ordered phases plus the execution plan computed from them.
pub struct Pipeline {
    phases: Vec<&'static str>,
    pub(crate) run_list: Vec<SystemId>,
    pub(crate) build_list: Vec<SystemId>,
    pub(crate) ops: Vec<PipelineOp>,
    pub(crate) write_states: WriteStates,
    pub(crate) match_generation: Option<u64>,
    pub(crate) build_count: u64,
}

impl Pipeline {
    pub fn new(phases: Vec<&'static str>) -> Self {
        tracing::info!(phases = ?phases, "pipeline created");

        Self {
            phases,
            run_list: Vec::new(),
            build_list: Vec::new(),
            ops: Vec::new(),
            write_states: WriteStates::default(),
            match_generation: None,
            build_count: 0,
        }
    }

    pub fn builtin() -> Self {
        Self::new(builtin_phases())
    }

    /// Appends a phase after every existing one.
    pub fn add_phase(&mut self, phase: impl Phase) -> usize {
        match self.rank(phase.name()) {
            Some(rank) => rank,
            None => {
                self.phases.push(phase.name());
                self.match_generation = None;
                self.phases.len() - 1
            }
        }
    }

    pub fn rank(&self, phase: &str) -> Option<usize> {
        self.phases.iter().position(|name| *name == phase)
    }

    pub fn phases(&self) -> &[&'static str] {
        &self.phases
    }

    /// Systems executed by the driver, in order.
    pub fn run_list(&self) -> &[SystemId] {
        &self.run_list
    }

    pub fn ops(&self) -> &[PipelineOp] {
        &self.ops
    }

    pub fn op_count(&self) -> usize {
        self.ops.len()
    }

    /// Number of times a new plan was computed.
    pub fn build_count(&self) -> u64 {
        self.build_count
    }

    pub fn match_generation(&self) -> Option<u64> {
        self.match_generation
    }

    pub fn is_stale(&self, systems: &Systems) -> bool {
        self.match_generation != Some(systems.generation())
    }

    /// Enabled systems of this pipeline sorted by phase rank, then by
    /// declaration order.
    pub(crate) fn collect(&self, systems: &Systems, include_inactive: bool) -> Vec<SystemId> {
        let mut list = systems
            .iter()
            .filter(|system| system.is_enabled() && (include_inactive || system.is_active()))
            .filter_map(|system| Some((self.rank(system.phase()?)?, system.id())))
            .collect::<Vec<_>>();

        list.sort_unstable();
        list.into_iter().map(|(_, id)| id).collect()
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Custom;
    impl Phase for Custom {}

    #[test]
    fn builtin_rank_order() {
        let pipeline = Pipeline::builtin();

        assert_eq!(pipeline.phases().len(), 10);
        assert_eq!(pipeline.rank(PreFrame.name()), Some(0));
        assert!(pipeline.rank(OnUpdate.name()) < pipeline.rank(PostUpdate.name()));
        assert_eq!(pipeline.rank(PostFrame.name()), Some(9));
    }

    #[test]
    fn added_phase_runs_last_and_invalidates_plan() {
        let mut pipeline = Pipeline::builtin();
        pipeline.match_generation = Some(0);

        assert_eq!(pipeline.add_phase(Custom), 10);
        assert_eq!(pipeline.add_phase(Custom), 10);
        assert_eq!(pipeline.match_generation(), None);
    }
}
