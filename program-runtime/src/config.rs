//! Runtime limits

use crate::error::{ExecResult, ExecutionError};

/// Budget used when a call does not ask for one
pub const DEFAULT_COMPUTE_BUDGET: u64 = 200_000;

/// Largest budget a single call may request
pub const MAX_COMPUTE_BUDGET: u64 = 1_400_000;

/// Default limit on nested frames
pub const DEFAULT_MAX_CALL_DEPTH: usize = 64;

/// Default limit on one log line, in bytes
pub const MAX_LOG_LENGTH: usize = 10_000;

/// Stack reserved for the thread running a call
///
/// Sized so that `DEFAULT_MAX_CALL_DEPTH` frames of maximally nested
/// expressions fit.
pub const DEFAULT_STACK_SIZE: usize = 256 << 20;

/// Bytes of materialized value per compute unit
pub const VALUE_BYTES_PER_UNIT: usize = 64;

/// Limits applied to every call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Frames allowed on the call stack, counting every function call
    pub max_call_depth: usize,
    /// Budget granted when none is requested
    pub default_budget: u64,
    /// Largest budget accepted
    pub max_budget: u64,
    /// Forward contract log lines to the `log` facade
    pub debug_mode: bool,
    /// Longest accepted log line in bytes
    pub max_log_length: usize,
    /// Stack size of the execution thread in bytes
    pub stack_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            default_budget: DEFAULT_COMPUTE_BUDGET,
            max_budget: MAX_COMPUTE_BUDGET,
            debug_mode: false,
            max_log_length: MAX_LOG_LENGTH,
            stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

impl Config {
    /// Budget for a call, rejecting zero and anything above `max_budget`
    pub fn budget(&self, requested: Option<u64>) -> ExecResult<u64> {
        let budget = requested.unwrap_or(self.default_budget);
        if budget == 0 || budget > self.max_budget {
            return Err(ExecutionError::InvalidBudget {
                requested: budget,
                max: self.max_budget,
            });
        }
        Ok(budget)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_bounds() {
        let config = Config::default();
        assert_eq!(config.budget(None).unwrap(), DEFAULT_COMPUTE_BUDGET);
        assert_eq!(config.budget(Some(MAX_COMPUTE_BUDGET)).unwrap(), MAX_COMPUTE_BUDGET);
        assert!(matches!(
            config.budget(Some(MAX_COMPUTE_BUDGET.saturating_add(1))),
            Err(ExecutionError::InvalidBudget { max: MAX_COMPUTE_BUDGET, .. })
        ));
        assert!(config.budget(Some(0)).is_err());
    }
}
