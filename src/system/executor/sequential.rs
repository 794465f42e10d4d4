use super::{Shared, run_pipeline};

/// Drives a frame on the calling thread. Merge points commit the main stage
/// directly.
pub struct SequentialExecutor;

impl SequentialExecutor {
    pub fn progress(shared: &Shared) {
        run_pipeline(shared, &shared.main_stage, 0, 1, || {
            Self::merge(shared);
            true
        });
    }

    /// Commits whatever the last op left in the main stage.
    pub fn end(shared: &Shared) {
        Self::merge(shared);
    }

    pub(crate) fn merge(shared: &Shared) {
        let mut world = shared.write();
        let mut stage = shared.main_stage();
        world.merge([&mut *stage]);
        world.build_pipeline();
    }
}
