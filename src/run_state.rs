//! Run State Machine
//!
//! Authoritative record of where a run is in its story. Transitions are
//! validated so tasks cannot be skipped, repeated or resumed after the run
//! has ended.
//!
//! # State Flow
//!
//! ```text
//! Pending
//!    ↓ start
//! Running(0)
//!    ↓ complete_task
//! Running(1) ... Running(n-1)
//!    ↓ complete_task
//! Succeeded
//!
//! (fail() moves any Running(i) to Failed(i))
//! ```

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Position of a run in its story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    /// Created, nothing dispatched yet
    Pending,
    /// Executing the task at this index
    Running(usize),
    /// Every task completed (terminal)
    Succeeded,
    /// The task at this index failed (terminal)
    Failed(usize),
}

impl RunState {
    /// Returns true for `Succeeded` and `Failed`
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_))
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running(i) => write!(f, "running task {}", i + 1),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed(i) => write!(f, "failed at task {}", i + 1),
        }
    }
}

/// Errors that can occur during state transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunTransitionError {
    /// The run has already ended
    #[error("Cannot transition from terminal state ({from})")]
    FromTerminalState { from: RunState },

    /// A task was completed before the run started
    #[error("Run has not started")]
    NotStarted,

    /// `start` called twice
    #[error("Run already started ({current})")]
    AlreadyStarted { current: RunState },

    /// Completion reported for a task other than the running one
    #[error("Cannot complete task {got} while running task {expected}")]
    SkippedTask { expected: usize, got: usize },

    /// A story with no tasks cannot run
    #[error("Story has no tasks")]
    EmptyStory,
}

/// Owns the state of one run and validates every transition.
///
/// ```
/// use rollout::run_state::{RunContext, RunState};
///
/// let mut run = RunContext::new(2);
/// run.start().unwrap();
/// run.complete_task(0).unwrap();
/// run.complete_task(1).unwrap();
/// assert_eq!(run.state(), RunState::Succeeded);
/// ```
#[derive(Debug, Clone)]
pub struct RunContext {
    state: RunState,
    task_count: usize,
    /// (state entered, unix timestamp)
    history: Vec<(RunState, u64)>,
}

impl RunContext {
    /// New run over a story of `task_count` tasks
    pub fn new(task_count: usize) -> Self {
        Self {
            state: RunState::Pending,
            task_count,
            history: Vec::with_capacity(task_count + 2),
        }
    }

    #[inline]
    pub fn state(&self) -> RunState {
        self.state
    }

    #[inline]
    pub fn task_count(&self) -> usize {
        self.task_count
    }

    /// Index of the task being executed, if any
    pub fn current_task(&self) -> Option<usize> {
        match self.state {
            RunState::Running(i) => Some(i),
            _ => None,
        }
    }

    pub fn history(&self) -> &[(RunState, u64)] {
        &self.history
    }

    /// `Pending -> Running(0)`
    pub fn start(&mut self) -> Result<RunState, RunTransitionError> {
        if self.state.is_terminal() {
            return Err(RunTransitionError::FromTerminalState { from: self.state });
        }
        if self.state != RunState::Pending {
            return Err(RunTransitionError::AlreadyStarted {
                current: self.state,
            });
        }
        if self.task_count == 0 {
            return Err(RunTransitionError::EmptyStory);
        }
        self.enter(RunState::Running(0));
        Ok(self.state)
    }

    /// `Running(i) -> Running(i + 1)`, or `Succeeded` after the last task.
    ///
    /// `index` must be the running task.
    pub fn complete_task(&mut self, index: usize) -> Result<RunState, RunTransitionError> {
        let current = match self.state {
            RunState::Running(i) => i,
            RunState::Pending => return Err(RunTransitionError::NotStarted),
            terminal => return Err(RunTransitionError::FromTerminalState { from: terminal }),
        };
        if index != current {
            return Err(RunTransitionError::SkippedTask {
                expected: current,
                got: index,
            });
        }

        let next = if current + 1 >= self.task_count {
            RunState::Succeeded
        } else {
            RunState::Running(current + 1)
        };
        self.enter(next);
        Ok(next)
    }

    /// `Running(i) -> Failed(i)`
    pub fn fail(&mut self) -> Result<RunState, RunTransitionError> {
        match self.state {
            RunState::Running(i) => {
                self.enter(RunState::Failed(i));
                Ok(self.state)
            }
            RunState::Pending => Err(RunTransitionError::NotStarted),
            terminal => Err(RunTransitionError::FromTerminalState { from: terminal }),
        }
    }

    fn enter(&mut self, state: RunState) {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.history.push((state, timestamp));
        self.state = state;
    }
}
