//! Per-call state machine
//!
//! ```text
//! Pending ──start──▶ Running ──commit──▶ Committed
//!    │                  │
//!    └──cancel──▶ Aborted ◀──abort──┘
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{ExecResult, ExecutionError};

/// Where a call is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallState {
    /// Accepted, not started
    Pending,
    /// Executing
    Running,
    /// Finished and its writes persisted
    Committed,
    /// Cancelled or failed; nothing persisted
    Aborted,
}

impl CallState {
    /// No further transition is possible
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Committed | CallState::Aborted)
    }
}

/// Tracks one call through its states
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallLifecycle {
    state: CallState,
}

impl Default for CallLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl CallLifecycle {
    /// New pending call
    pub fn new() -> Self {
        Self {
            state: CallState::Pending,
        }
    }

    /// Current state
    pub fn state(&self) -> CallState {
        self.state
    }

    fn transition(&mut self, from: CallState, to: CallState) -> ExecResult<()> {
        if self.state != from {
            return Err(ExecutionError::InvalidTransition { from: self.state, to });
        }
        log::trace!("call {:?} -> {:?}", from, to);
        self.state = to;
        Ok(())
    }

    /// Begin execution; only once, only from `Pending`
    pub fn start(&mut self) -> ExecResult<()> {
        self.transition(CallState::Pending, CallState::Running)
    }

    /// Cancel a call that has not started
    pub fn cancel(&mut self) -> ExecResult<()> {
        self.transition(CallState::Pending, CallState::Aborted)
    }

    /// Mark a running call as persisted
    pub fn commit(&mut self) -> ExecResult<()> {
        self.transition(CallState::Running, CallState::Committed)
    }

    /// Mark a running call as failed
    pub fn abort(&mut self) -> ExecResult<()> {
        self.transition(CallState::Running, CallState::Aborted)
    }
}
