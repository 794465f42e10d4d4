use crate::{
    core::{ComponentId, SparseArray},
    error::{PipelineError, fatal},
    system::{
        Systems,
        query::{InOut, Oper, Source, Term},
        schedule::{Pipeline, PipelineOp},
    },
};

/// Where the latest write to a component within the current op went.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteState {
    #[default]
    NotWritten,
    /// Written in place, visible to later systems right away.
    WriteToMain,
    /// Written through a stage, invisible until the next merge.
    WriteToStage,
}

#[derive(Debug, Default)]
pub struct WriteStates(SparseArray<ComponentId, WriteState>);

impl WriteStates {
    pub fn get(&self, id: ComponentId) -> WriteState {
        self.0.get(id).copied().unwrap_or_default()
    }

    pub fn set(&mut self, id: ComponentId, state: WriteState) {
        self.0.insert(id, state);
    }

    pub fn reset(&mut self) {
        self.0.clear();
    }
}

/// Records what `term` writes and reports whether it reads something that
/// is still sitting in a stage.
fn check_term(term: &Term, active: bool, states: &mut WriteStates) -> bool {
    if term.oper == Oper::Or {
        return false;
    }

    let reads = matches!(term.inout, InOut::In | InOut::InOut);
    let writes = matches!(term.inout, InOut::Out | InOut::InOut);

    if term.is_table_term() && term.oper != Oper::Not {
        if reads && states.get(term.id) == WriteState::WriteToStage {
            return true;
        }

        if active && writes {
            states.set(term.id, WriteState::WriteToMain);
        }
    } else if (term.source == Source::Empty || term.oper == Oper::Not) && active && writes {
        states.set(term.id, WriteState::WriteToStage);
    }

    false
}

fn check_terms(terms: &[Term], active: bool, states: &mut WriteStates) -> bool {
    terms
        .iter()
        .fold(false, |merge, term| check_term(term, active, states) || merge)
}

impl Pipeline {
    /// Recomputes the run list and ops if any system flag changed since the
    /// last build. Returns whether a new plan was produced.
    pub fn build(&mut self, systems: &Systems) -> bool {
        let generation = systems.generation();
        if self.match_generation == Some(generation) {
            return false;
        }

        self.run_list = self.collect(systems, false);
        self.build_list = self.collect(systems, true);

        let mut states = std::mem::take(&mut self.write_states);
        states.reset();

        let mut ops: Vec<PipelineOp> = Vec::new();
        let mut open = false;

        for id in &self.build_list {
            let system = systems.get(*id);
            let active = system.is_active();

            if let Some(signature) = system.signature() {
                if check_terms(signature.terms(), active, &mut states) {
                    states.reset();
                    open = false;

                    if active && check_terms(signature.terms(), true, &mut states) {
                        fatal(PipelineError::InconsistentWriteState(
                            system.name().to_string().into(),
                        ));
                    }
                }
            }

            if !open {
                ops.push(PipelineOp::default());
                open = true;
            }

            if active {
                let last = ops.len() - 1;
                ops[last].count += 1;
            }
        }

        self.ops = ops;
        self.write_states = states;
        self.match_generation = Some(generation);
        self.build_count += 1;

        tracing::debug!(
            ops = self.ops.len(),
            systems = self.run_list.len(),
            build_count = self.build_count,
            "pipeline rebuilt"
        );

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::{
        Iter, SystemAction, SystemDesc, SystemId,
        query::{Query, Signature},
        schedule::{OnUpdate, PostUpdate},
    };
    use std::sync::Arc;

    const A: ComponentId = ComponentId(0);
    const B: ComponentId = ComponentId(1);

    fn add(systems: &mut Systems, desc: SystemDesc, active: bool) -> SystemId {
        let query = desc.get_signature().cloned().map(Query::new);
        let action: Arc<dyn SystemAction> = Arc::new(|_: &mut Iter| {});
        systems.register(desc, action, query, active)
    }

    fn counts(pipeline: &Pipeline) -> Vec<usize> {
        pipeline.ops().iter().map(|op| op.count).collect()
    }

    /// Writes `A` through the stage.
    fn stage_writer(name: &'static str) -> SystemDesc {
        SystemDesc::new(name)
            .phase(OnUpdate)
            .signature(Signature::new().read(B).with(Term::write(A).empty()))
    }

    fn reader(name: &'static str) -> SystemDesc {
        SystemDesc::new(name)
            .phase(OnUpdate)
            .signature(Signature::new().read(A))
    }

    #[test]
    fn staged_write_then_read_needs_merge() {
        let mut systems = Systems::new();
        add(&mut systems, stage_writer("writer"), true);
        add(&mut systems, reader("reader"), true);

        let mut pipeline = Pipeline::builtin();
        assert!(pipeline.build(&systems));
        assert_eq!(counts(&pipeline), vec![1, 1]);
    }

    #[test]
    fn inactive_stage_writer_needs_no_merge() {
        let mut systems = Systems::new();
        let writer = add(&mut systems, stage_writer("writer"), false);
        add(&mut systems, reader("reader"), true);

        let mut pipeline = Pipeline::builtin();
        pipeline.build(&systems);
        assert_eq!(counts(&pipeline), vec![1]);

        systems.activate(writer, true);
        assert!(pipeline.build(&systems));
        assert_eq!(counts(&pipeline), vec![1, 1]);
    }

    #[test]
    fn in_place_writes_share_an_op() {
        let mut systems = Systems::new();
        add(
            &mut systems,
            SystemDesc::new("reader")
                .phase(OnUpdate)
                .signature(Signature::new().read(A)),
            true,
        );
        add(
            &mut systems,
            SystemDesc::new("writer")
                .phase(OnUpdate)
                .signature(Signature::new().write(A)),
            true,
        );
        add(
            &mut systems,
            SystemDesc::new("late_reader")
                .phase(PostUpdate)
                .signature(Signature::new().read(A)),
            true,
        );

        let mut pipeline = Pipeline::builtin();
        pipeline.build(&systems);
        assert_eq!(counts(&pipeline), vec![3]);
    }

    #[test]
    fn not_out_counts_as_staged() {
        let mut systems = Systems::new();
        add(
            &mut systems,
            SystemDesc::new("tagger")
                .phase(OnUpdate)
                .signature(Signature::new().read(B).with(Term::write(A).not())),
            true,
        );
        add(&mut systems, reader("reader"), true);

        let mut pipeline = Pipeline::builtin();
        pipeline.build(&systems);
        assert_eq!(counts(&pipeline), vec![1, 1]);
    }

    #[test]
    fn or_terms_are_ignored() {
        let mut systems = Systems::new();
        add(&mut systems, stage_writer("writer"), true);
        add(
            &mut systems,
            SystemDesc::new("or_reader")
                .phase(OnUpdate)
                .signature(Signature::new().with(Term::read(A).or()).with(Term::read(B).or())),
            true,
        );

        let mut pipeline = Pipeline::builtin();
        pipeline.build(&systems);
        assert_eq!(counts(&pipeline), vec![2]);
    }

    #[test]
    fn op_counts_sum_to_run_list() {
        let mut systems = Systems::new();
        add(&mut systems, stage_writer("w1"), true);
        add(&mut systems, reader("r1"), false);
        add(&mut systems, stage_writer("w2"), true);
        add(&mut systems, reader("r2"), true);
        add(&mut systems, SystemDesc::new("manual"), true);

        let mut pipeline = Pipeline::builtin();
        pipeline.build(&systems);

        let total = pipeline.ops().iter().map(|op| op.count).sum::<usize>();
        assert_eq!(total, pipeline.run_list().len());
        assert_eq!(pipeline.run_list().len(), 3);
    }

    #[test]
    fn inactive_merge_point_leaves_empty_op() {
        let mut systems = Systems::new();
        add(&mut systems, stage_writer("writer"), true);
        add(&mut systems, reader("reader"), false);

        let mut pipeline = Pipeline::builtin();
        pipeline.build(&systems);
        assert_eq!(counts(&pipeline), vec![1, 0]);
    }

    #[test]
    fn rebuild_without_changes_keeps_plan() {
        let mut systems = Systems::new();
        add(&mut systems, stage_writer("writer"), true);
        add(&mut systems, reader("reader"), true);

        let mut pipeline = Pipeline::builtin();
        assert!(pipeline.build(&systems));
        let ops = pipeline.ops().as_ptr();
        let build_count = pipeline.build_count();

        assert!(!pipeline.build(&systems));
        assert_eq!(pipeline.ops().as_ptr(), ops);
        assert_eq!(pipeline.build_count(), build_count);
        assert!(!pipeline.is_stale(&systems));
    }

    #[test]
    fn disabled_systems_leave_the_plan() {
        let mut systems = Systems::new();
        add(&mut systems, stage_writer("writer"), true);
        let reader = add(&mut systems, reader("reader"), true);

        let mut pipeline = Pipeline::builtin();
        pipeline.build(&systems);
        systems.enable(reader, false);

        assert!(pipeline.build(&systems));
        assert_eq!(counts(&pipeline), vec![1]);
        assert!(!pipeline.run_list().contains(&reader));
    }
}
