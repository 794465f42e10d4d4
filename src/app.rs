use crate::{
    config::PipelineConfig,
    core::{Component, ComponentId, FrameTimer},
    error::{PipelineError, fatal},
    system::{
        Context, StatusAction, SystemAction, SystemDesc, SystemId,
        executor::{Shared, WorkerPool, sequential::SequentialExecutor},
        query::Filter,
        schedule::{Phase, Pipeline},
        timer::TickSource,
    },
    world::{RunScope, World, WorldStats},
};
use std::sync::{Arc, RwLockReadGuard, RwLockWriteGuard};

pub struct AppBuilder {
    world: World,
    config: PipelineConfig,
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            world: World::new(Pipeline::builtin()),
            config: PipelineConfig::default(),
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn config(&mut self, config: PipelineConfig) -> &mut Self {
        self.config = config;
        self
    }

    pub fn register<C: Component>(&mut self) -> ComponentId {
        self.world.register::<C>()
    }

    /// Appends a phase to the pipeline, after every builtin phase.
    pub fn add_phase(&mut self, phase: impl Phase) -> &mut Self {
        self.world.pipeline_mut().add_phase(phase);
        self
    }

    pub fn add_system(&mut self, desc: SystemDesc, action: impl SystemAction) -> SystemId {
        self.world.add_system(desc, action)
    }

    pub fn build(self) -> App {
        let Self { mut world, config } = self;
        world.set_measure_system_time(config.measure_system_time);

        let mut app = App {
            shared: Arc::new(Shared::new(world)),
            pool: None,
            timer: FrameTimer::new(config.target_fps, config.time_scale),
            frame: FrameState::Idle,
            should_quit: false,
        };

        app.set_threads(config.threads);
        app
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    Idle,
    Running { ops: usize, progressed: bool },
}

/// Owns the world, the plan and the worker pool, and drives frames.
pub struct App {
    shared: Arc<Shared>,
    pool: Option<WorkerPool>,
    timer: FrameTimer,
    frame: FrameState,
    should_quit: bool,
}

impl App {
    pub fn new() -> AppBuilder {
        AppBuilder::new()
    }

    pub fn world(&self) -> RwLockReadGuard<'_, World> {
        self.shared.read()
    }

    pub fn world_mut(&mut self) -> RwLockWriteGuard<'_, World> {
        self.shared.write()
    }

    pub fn register<C: Component>(&mut self) -> ComponentId {
        self.world_mut().register::<C>()
    }

    pub fn add_system(&mut self, desc: SystemDesc, action: impl SystemAction) -> SystemId {
        self.world_mut().add_system(desc, action)
    }

    pub fn enable_system(&mut self, id: SystemId, enabled: bool) {
        self.world_mut().enable_system(id, enabled);
    }

    pub fn set_status_action(&mut self, id: SystemId, action: impl StatusAction) {
        self.world_mut().set_status_action(id, action);
    }

    pub fn set_tick_source(&mut self, id: SystemId, source: Arc<dyn TickSource>) {
        self.world_mut().set_tick_source(id, source);
    }

    pub fn is_running(&self) -> bool {
        matches!(self.frame, FrameState::Running { .. })
    }

    /// Number of worker threads, 0 when frames run on the calling thread.
    pub fn worker_count(&self) -> usize {
        self.pool.as_ref().map_or(0, WorkerPool::len)
    }

    /// Replaces the worker pool. Anything above 1 spawns that many workers,
    /// 0 or 1 runs frames on the calling thread.
    pub fn set_threads(&mut self, threads: usize) {
        if self.is_running() {
            fatal(PipelineError::InvalidWhileRunning("set_threads"));
        }

        self.pool = None;
        if threads > 1 {
            self.pool = Some(WorkerPool::spawn(&self.shared, threads));
        }
    }

    pub fn target_fps(&self) -> f32 {
        self.timer.target_fps()
    }

    pub fn set_target_fps(&mut self, fps: f32) {
        self.timer.set_target_fps(fps);
    }

    pub fn set_time_scale(&mut self, scale: f32) {
        self.timer.set_time_scale(scale);
    }

    pub fn reset_clock(&mut self) {
        self.timer.reset_clock();
        let delta_time = self.timer.delta_time();
        self.world_mut().set_time(delta_time, 0.0);
    }

    pub fn timer(&self) -> &FrameTimer {
        &self.timer
    }

    pub fn stats(&self) -> WorldStats {
        self.world().stats()
    }

    pub fn quit(&mut self) {
        self.should_quit = true;
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    /// Starts a frame and returns its delta time. Tick sources advance here.
    pub fn frame_begin(&mut self, user_delta_time: f32) -> f32 {
        let delta_time = self.timer.frame_begin(user_delta_time);
        let world_time = self.timer.world_time();

        let mut world = self.shared.write();
        world.set_time(delta_time, world_time);
        world.update_tick_sources(delta_time);

        delta_time
    }

    pub fn frame_end(&mut self) {
        self.timer.frame_end();
    }

    /// Refreshes system activity and the plan. Returns the number of ops.
    pub fn pipeline_begin(&mut self) -> usize {
        if self.is_running() {
            fatal(PipelineError::FrameInProgress);
        }

        let mut world = self.shared.write();
        world.eval_monitors();
        world.build_pipeline();
        world.begin_frame_stats();

        let ops = world.pipeline().op_count();
        self.frame = FrameState::Running {
            ops,
            progressed: false,
        };

        ops
    }

    /// Runs every system of the plan, merging at each op boundary.
    pub fn pipeline_progress(&mut self, delta_time: f32) {
        let FrameState::Running { ops, progressed } = self.frame else {
            fatal(PipelineError::NoFrame("pipeline_progress"));
        };

        if progressed {
            fatal(PipelineError::AlreadyProgressed);
        }

        self.frame = FrameState::Running {
            ops,
            progressed: true,
        };

        {
            let world_time = self.timer.world_time();
            self.shared.write().set_time(delta_time, world_time);
        }

        match &self.pool {
            Some(pool) if ops > 0 => pool.progress(&self.shared),
            Some(_) => {}
            None => SequentialExecutor::progress(&self.shared),
        }
    }

    /// Waits for the last op and commits it.
    pub fn pipeline_end(&mut self) {
        let FrameState::Running { ops, progressed } = self.frame else {
            fatal(PipelineError::NoFrame("pipeline_end"));
        };

        // Idle workers staged nothing, the main stage may still hold commands.
        match &self.pool {
            Some(pool) if ops > 0 && progressed => pool.end(&self.shared),
            _ => SequentialExecutor::end(&self.shared),
        }

        self.shared.write().end_frame_stats();
        self.frame = FrameState::Idle;
    }

    /// Runs one complete frame. Returns false once [`App::quit`] was called.
    pub fn progress(&mut self, user_delta_time: f32) -> bool {
        let delta_time = self.frame_begin(user_delta_time);
        self.pipeline_begin();
        self.pipeline_progress(delta_time);
        self.pipeline_end();
        self.frame_end();

        !self.should_quit
    }

    pub fn run_system(
        &mut self,
        id: SystemId,
        delta_time: f32,
        param: Option<&(dyn Context + 'static)>,
    ) -> bool {
        self.run_system_w_filter(id, delta_time, 0, 0, None, param)
    }

    /// Runs one system on the calling thread, outside of the plan, and
    /// commits its staged changes right away.
    pub fn run_system_w_filter(
        &mut self,
        id: SystemId,
        delta_time: f32,
        offset: usize,
        limit: usize,
        filter: Option<&Filter>,
        param: Option<&(dyn Context + 'static)>,
    ) -> bool {
        if self.is_running() {
            fatal(PipelineError::InvalidWhileRunning("run_system"));
        }

        let ran = {
            let world = self.shared.read();
            let mut stage = self.shared.main_stage();
            world.run_system(
                &mut stage,
                id,
                delta_time,
                RunScope {
                    offset,
                    limit,
                    filter,
                    param,
                    ..Default::default()
                },
            )
        };

        SequentialExecutor::merge(&self.shared);
        ran
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.pool = None;
        self.shared.write().teardown();
    }
}
