//! Run lifecycle state machine.
//!
//! `IDLE -> RUNNING -> (COMPLETED | TOO_MANY) -> IDLE`
//!
//! The persisted representation is a handful of independent slots (see
//! [`RawRunStatus`]). Everything above the store works with [`RunState`]
//! instead, so combinations like "running and completed at the same time"
//! cannot be expressed.

use super::models::RawRunStatus;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running { started_at: i64 },
    Completed { deleted: u64 },
    TooMany { eligible: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("a cleanup run is already in progress (started at {started_at})")]
    AlreadyRunning { started_at: i64 },
    #[error("no cleanup run is in progress")]
    NotRunning,
}

impl RunState {
    /// Derive the state from raw slots.
    ///
    /// A non-zero `started_at` wins over everything else; a stored result
    /// wins over a stored too-many count.
    pub fn from_raw(raw: &RawRunStatus) -> Self {
        if let Some(started_at) = raw.started_at.filter(|t| *t != 0) {
            return RunState::Running { started_at };
        }
        if let Some(deleted) = raw.last_result_count {
            return RunState::Completed { deleted };
        }
        if let Some(eligible) = raw.too_many_count.filter(|c| *c > 0) {
            return RunState::TooMany { eligible };
        }
        RunState::Idle
    }

    /// Start a run. Prior outcomes are discarded.
    pub fn begin(&self, now: i64) -> Result<RunState, TransitionError> {
        match *self {
            RunState::Running { started_at } => Err(TransitionError::AlreadyRunning { started_at }),
            _ => Ok(RunState::Running { started_at: now }),
        }
    }

    pub fn complete(&self, deleted: u64) -> Result<RunState, TransitionError> {
        match self {
            RunState::Running { .. } => Ok(RunState::Completed { deleted }),
            _ => Err(TransitionError::NotRunning),
        }
    }

    pub fn refuse_too_many(&self, eligible: u64) -> Result<RunState, TransitionError> {
        match self {
            RunState::Running { .. } => Ok(RunState::TooMany { eligible }),
            _ => Err(TransitionError::NotRunning),
        }
    }

    /// Collapse a displayed terminal outcome back to idle.
    pub fn acknowledge(&self) -> RunState {
        match self {
            RunState::Completed { .. } | RunState::TooMany { .. } => RunState::Idle,
            other => *other,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, RunState::Running { .. })
    }

    pub fn started_at(&self) -> Option<i64> {
        match self {
            RunState::Running { started_at } => Some(*started_at),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Running { .. } => "running",
            RunState::Completed { .. } => "completed",
            RunState::TooMany { .. } => "too_many",
        }
    }
}
