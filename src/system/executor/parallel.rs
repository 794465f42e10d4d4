use super::{Cursor, Shared, lock, run_pipeline};
use crate::{
    error::{PipelineError, fatal},
    world::{Stage, World},
};
use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread::JoinHandle,
};

#[derive(Debug, Default)]
struct SyncState {
    running: usize,
    waiting: usize,
    release: u64,
    quit: bool,
    /// A worker died inside a system action.
    panicked: bool,
}

/// Rendezvous between the driver and the workers.
///
/// Workers report at every op boundary and wait there until the driver,
/// having merged their stages, lets them continue.
pub struct Barrier {
    count: usize,
    state: Mutex<SyncState>,
    /// Workers wait on this for the next release.
    resume: Condvar,
    /// The driver waits on this for all workers to arrive.
    synced: Condvar,
}

impl Barrier {
    fn new(count: usize) -> Self {
        Self {
            count,
            state: Mutex::default(),
            resume: Condvar::new(),
            synced: Condvar::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, SyncState> {
        lock(&self.state)
    }

    pub fn running(&self) -> usize {
        self.state().running
    }

    fn started(&self) {
        self.state().running += 1;
        self.synced.notify_all();
    }

    fn stopped(&self) {
        self.state().running -= 1;
        self.synced.notify_all();
    }

    /// Called from a worker that is unwinding. It will never arrive again, so
    /// the driver has to stop waiting for it.
    fn panicked(&self) {
        let mut state = self.state();
        state.running -= 1;
        state.panicked = true;
        self.synced.notify_all();
    }

    /// Worker side. Returns false when the pool is shutting down.
    fn arrive(&self, seen: &mut u64) -> bool {
        let mut state = self.state();
        state.waiting += 1;
        if state.waiting == self.count {
            self.synced.notify_one();
        }

        self.wait_release(state, seen)
    }

    fn wait_release(&self, mut state: MutexGuard<'_, SyncState>, seen: &mut u64) -> bool {
        while state.release == *seen && !state.quit {
            state = self
                .resume
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }

        *seen = state.release;
        !state.quit
    }

    /// Driver side: lets every waiting worker continue.
    fn release(&self) {
        let mut state = self.state();
        state.waiting = 0;
        state.release += 1;
        self.resume.notify_all();
    }

    /// Driver side: blocks until every worker arrived. Fatal if a worker
    /// panicked instead.
    fn wait(&self) {
        let mut state = self.state();
        while state.waiting < self.count && !state.panicked {
            state = self
                .synced
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }

        if state.panicked {
            drop(state);
            fatal(PipelineError::WorkerPanicked);
        }
    }

    fn wait_running(&self, running: usize) {
        let mut state = self.state();
        while state.running != running && !state.panicked {
            state = self
                .synced
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn quit(&self) {
        let mut state = self.state();
        state.quit = true;
        self.resume.notify_all();
    }
}

/// Reports a worker that unwinds out of [`worker_main`] to the barrier.
struct PanicGuard<'a>(&'a Barrier);

impl Drop for PanicGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.panicked();
        }
    }
}

struct Worker {
    handle: JoinHandle<()>,
    stage: Arc<Mutex<Stage>>,
}

/// Fixed set of threads that each run the whole plan on their share of every
/// table, meeting at op boundaries.
pub struct WorkerPool {
    barrier: Arc<Barrier>,
    workers: Vec<Worker>,
}

impl WorkerPool {
    pub fn spawn(shared: &Arc<Shared>, count: usize) -> Self {
        let barrier = Arc::new(Barrier::new(count));

        let workers = (0..count)
            .map(|index| {
                let stage = Arc::new(Mutex::new(Stage::new(Stage::MAIN + 1 + index)));
                let handle = std::thread::Builder::new()
                    .name(format!("hive-worker-{index}"))
                    .spawn({
                        let shared = shared.clone();
                        let barrier = barrier.clone();
                        let stage = stage.clone();
                        move || worker_main(&shared, &barrier, &stage, index, count)
                    })
                    .unwrap_or_else(|err| fatal(PipelineError::ThreadSpawn(err)));

                Worker { handle, stage }
            })
            .collect();

        barrier.wait_running(count);
        shared.read().archetypes().touch();

        tracing::info!(threads = count, "worker pool started");

        Self { barrier, workers }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn barrier(&self) -> &Arc<Barrier> {
        &self.barrier
    }

    pub fn stages(&self) -> impl Iterator<Item = &Arc<Mutex<Stage>>> {
        self.workers.iter().map(|worker| &worker.stage)
    }

    /// Runs every op but the last. Must be followed by [`WorkerPool::end`].
    pub fn progress(&self, shared: &Shared) {
        let mut cursor = Cursor::default();

        loop {
            let boundary = cursor.skip_to_sync(shared.read().pipeline());
            self.barrier.release();

            let Some(system) = boundary else {
                return;
            };

            self.barrier.wait();
            let mut world = shared.write();
            self.merge(&mut world, shared);

            if world.build_pipeline() {
                cursor = Cursor::seek(world.pipeline(), system);
            }
        }
    }

    /// Waits for the final op and merges it.
    pub fn end(&self, shared: &Shared) {
        self.barrier.wait();
        let mut world = shared.write();
        self.merge(&mut world, shared);
    }

    fn merge(&self, world: &mut World, shared: &Shared) {
        let mut main = shared.main_stage();
        let mut stages = self
            .workers
            .iter()
            .map(|worker| lock(&worker.stage))
            .collect::<Vec<_>>();

        world.merge(std::iter::once(&mut *main).chain(stages.iter_mut().map(|stage| &mut **stage)));
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.barrier.quit();

        for worker in self.workers.drain(..) {
            if worker.handle.join().is_err() {
                tracing::error!("worker thread panicked");
            }
        }

        tracing::info!("worker pool stopped");
    }
}

fn worker_main(
    shared: &Shared,
    barrier: &Barrier,
    stage: &Mutex<Stage>,
    index: usize,
    count: usize,
) {
    barrier.started();
    let _guard = PanicGuard(barrier);

    let mut seen = 0;
    let mut running = barrier.wait_release(barrier.state(), &mut seen);
    while running {
        let mut abandoned = false;
        run_pipeline(shared, stage, index, count, || {
            abandoned = !barrier.arrive(&mut seen);
            !abandoned
        });

        running = !abandoned && barrier.arrive(&mut seen);
    }

    barrier.stopped();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::schedule::Pipeline;

    #[test]
    fn teardown_joins_workers_and_drops_stages() {
        let shared = Arc::new(Shared::new(World::new(Pipeline::builtin())));
        let pool = WorkerPool::spawn(&shared, 3);

        let barrier = pool.barrier().clone();
        let stages = pool.stages().map(Arc::downgrade).collect::<Vec<_>>();
        assert_eq!(barrier.running(), 3);
        assert_eq!(stages.len(), 3);

        drop(pool);

        assert_eq!(barrier.running(), 0);
        assert!(stages.iter().all(|stage| stage.upgrade().is_none()));
        assert_eq!(Arc::strong_count(&shared), 1);
    }

    #[test]
    fn stage_ids_follow_main_stage() {
        let shared = Arc::new(Shared::new(World::new(Pipeline::builtin())));
        let pool = WorkerPool::spawn(&shared, 2);

        let ids = pool.stages().map(|stage| lock(stage).id()).collect::<Vec<_>>();
        assert_eq!(ids, vec![2, 3]);
    }
}
