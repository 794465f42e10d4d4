use super::{SystemId, schedule::Pipeline};
use crate::{
    error::{PipelineError, fatal},
    world::{Stage, World},
};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub mod builder;
pub mod parallel;
pub mod sequential;

pub use parallel::WorkerPool;

/// State every thread of the scheduler can reach.
pub struct Shared {
    pub(crate) world: RwLock<World>,
    pub(crate) main_stage: Mutex<Stage>,
}

impl Shared {
    pub fn new(world: World) -> Self {
        Self {
            world: RwLock::new(world),
            main_stage: Mutex::new(Stage::new(Stage::MAIN)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, World> {
        self.world.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, World> {
        self.world.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn main_stage(&self) -> MutexGuard<'_, Stage> {
        lock(&self.main_stage)
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Position of a thread inside the current plan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    pub op: usize,
    /// Systems run since the last op boundary.
    pub ran: usize,
    /// Next entry of the run list.
    pub index: usize,
}

impl Cursor {
    /// Places the cursor right after `system` in a freshly built plan, with
    /// the op bookkeeping recomputed as if the frame had run on that plan
    /// from the start.
    pub fn seek(pipeline: &Pipeline, system: SystemId) -> Self {
        let ops = pipeline.ops();
        let mut cursor = Cursor::default();

        for (index, id) in pipeline.run_list().iter().enumerate() {
            cursor.ran += 1;
            if cursor.op < ops.len() && cursor.ran == ops[cursor.op].count {
                cursor.ran = 0;
                cursor.op += 1;
            }

            if *id == system {
                cursor.index = index + 1;
                return cursor;
            }
        }

        fatal(PipelineError::ReseekFailed(system))
    }

    /// Whether the system just run closes an op that is followed by a merge.
    fn at_boundary(&self, pipeline: &Pipeline) -> bool {
        let ops = pipeline.ops();
        self.op + 1 < ops.len() && self.ran == ops[self.op].count
    }

    /// Advances the cursor the way a worker does up to its next sync point.
    /// Returns the last system before an intermediate boundary, or `None`
    /// when the next sync is the final one of the frame.
    pub fn skip_to_sync(&mut self, pipeline: &Pipeline) -> Option<SystemId> {
        let ops = pipeline.ops();
        if self.op + 1 >= ops.len() || self.ran >= ops[self.op].count {
            return None;
        }

        self.index += ops[self.op].count - self.ran;
        self.ran = 0;
        self.op += 1;

        pipeline.run_list().get(self.index - 1).copied()
    }
}

/// Runs the plan once from the start on one stage.
///
/// `sync` is called at every intermediate op boundary with no lock held and
/// returns false if the frame should be abandoned. When the plan changed
/// during a sync, the cursor is moved back to the system that ran last.
pub(crate) fn run_pipeline(
    shared: &Shared,
    stage: &Mutex<Stage>,
    stage_index: usize,
    stage_count: usize,
    mut sync: impl FnMut() -> bool,
) {
    let mut cursor = Cursor::default();
    let mut world = shared.read();
    let delta_time = world.delta_time();

    loop {
        let pipeline = world.pipeline();
        let Some(system) = pipeline.run_list().get(cursor.index).copied() else {
            return;
        };

        world.run_worker(&mut lock(stage), system, delta_time, stage_index, stage_count);
        cursor.index += 1;
        cursor.ran += 1;

        if !cursor.at_boundary(pipeline) {
            continue;
        }

        cursor.ran = 0;
        cursor.op += 1;
        let build_count = pipeline.build_count();

        drop(world);
        if !sync() {
            return;
        }
        world = shared.read();

        if world.pipeline().build_count() != build_count {
            cursor = Cursor::seek(world.pipeline(), system);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::schedule::PipelineOp;

    fn plan(counts: &[usize]) -> Pipeline {
        let mut pipeline = Pipeline::builtin();
        pipeline.ops = counts.iter().map(|count| PipelineOp { count: *count }).collect();
        pipeline.run_list = (0..counts.iter().sum::<usize>() as u32).map(SystemId).collect();
        pipeline
    }

    #[test]
    fn seek_counts_op_boundaries() {
        let pipeline = plan(&[2, 3]);

        let cursor = Cursor::seek(&pipeline, SystemId(1));
        assert_eq!(cursor, Cursor { op: 1, ran: 0, index: 2 });

        let cursor = Cursor::seek(&pipeline, SystemId(3));
        assert_eq!(cursor, Cursor { op: 1, ran: 2, index: 4 });
    }

    #[test]
    #[should_panic(expected = "no longer in the run list")]
    fn seek_to_missing_system_is_fatal() {
        Cursor::seek(&plan(&[2]), SystemId(9));
    }

    #[test]
    fn skip_to_sync_stops_at_each_intermediate_boundary() {
        let pipeline = plan(&[2, 1, 3]);
        let mut cursor = Cursor::default();

        assert_eq!(cursor.skip_to_sync(&pipeline), Some(SystemId(1)));
        assert_eq!(cursor.skip_to_sync(&pipeline), Some(SystemId(2)));
        assert_eq!(cursor.skip_to_sync(&pipeline), None);
    }

    #[test]
    fn trailing_empty_op_adds_one_sync() {
        let pipeline = plan(&[2, 0]);
        let mut cursor = Cursor::default();

        assert_eq!(cursor.skip_to_sync(&pipeline), Some(SystemId(1)));
        assert_eq!(cursor.skip_to_sync(&pipeline), None);
    }

    #[test]
    fn skip_after_seek_continues_from_new_position() {
        let pipeline = plan(&[2, 3, 1]);
        let mut cursor = Cursor::seek(&pipeline, SystemId(1));

        assert_eq!(cursor.skip_to_sync(&pipeline), Some(SystemId(4)));
        assert_eq!(cursor.skip_to_sync(&pipeline), None);
    }
}
