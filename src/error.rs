//! Error types for the scheduler.
//!
//! Almost nothing in the scheduler core is recoverable: a contract violation
//! means the plan no longer describes the world, so these errors are reported
//! through [`fatal`]. Configuration loading is the one place that hands a
//! [`PipelineError`] back to the caller.

use crate::{core::ComponentId, system::SystemId};
use std::borrow::Cow;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// `pipeline_begin` was called while a frame was already running.
    #[error("pipeline_begin called while a frame is in progress")]
    FrameInProgress,

    /// `pipeline_progress`/`pipeline_end` was called outside of a frame.
    #[error("{0} called outside of a frame")]
    NoFrame(&'static str),

    /// `pipeline_progress` was called a second time within one frame.
    #[error("pipeline_progress called twice in one frame")]
    AlreadyProgressed,

    /// An operation that mutates scheduler state was attempted mid-frame.
    #[error("{0} is not allowed while a frame is in progress")]
    InvalidWhileRunning(&'static str),

    /// A system was declared twice with a different query or phase.
    #[error("system `{0}` redeclared with a different signature")]
    SystemMismatch(Cow<'static, str>),

    /// An on-demand system has nothing another system could ask for.
    #[error("on-demand system `{0}` declares no [out] columns")]
    NoOutColumns(Cow<'static, str>),

    /// An on-demand refcount was released more often than it was acquired.
    #[error("on-demand refcount for component {0:?} dropped below zero")]
    NegativeRefcount(ComponentId),

    /// The second column pass after a merge asked for another merge.
    #[error("system `{0}` requested a merge right after the write state was reset")]
    InconsistentWriteState(Cow<'static, str>),

    /// The running system disappeared from the run list during a merge.
    #[error("system {0:?} is no longer in the run list after a merge")]
    ReseekFailed(SystemId),

    #[error("unknown system {0:?}")]
    UnknownSystem(SystemId),

    #[error("a worker thread panicked while running the pipeline")]
    WorkerPanicked,

    #[error("failed to spawn worker thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    #[error("invalid value `{value}` for {key}")]
    InvalidConfig { key: &'static str, value: String },
}

/// Reports a broken invariant and terminates the current thread of control.
#[track_caller]
pub fn fatal(err: PipelineError) -> ! {
    tracing::error!(error = %err, "fatal scheduler error");
    panic!("{err}")
}
