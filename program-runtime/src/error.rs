//! Error types for contract execution

use sandlot_store::StoreError;
use sandlot_types::{StorageKey, ValueError};
use thiserror::Error;

use crate::lifecycle::CallState;

/// Result type for contract execution
pub type ExecResult<T> = std::result::Result<T, ExecutionError>;

/// Errors that abort a contract call
///
/// Any of these discards the call's staged writes.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Compute budget exhausted
    #[error("compute budget exhausted: requested {requested} CU with {consumed} of {budget} CU consumed")]
    ResourceExhausted {
        /// Budget granted to the call
        budget: u64,
        /// Units consumed before the failing charge
        consumed: u64,
        /// Units the failing charge asked for
        requested: u64,
    },

    /// Too many nested frames
    #[error("maximum call depth exceeded: depth {depth} > {max}")]
    RecursionLimit {
        /// Depth the call would have reached
        depth: usize,
        /// Configured limit
        max: usize,
    },

    /// Storage access outside the executing contract's rights
    #[error("contract '{contract}' is not allowed to access '{key}'")]
    AuthorizationViolation {
        /// Executing contract
        contract: String,
        /// Key it tried to touch
        key: StorageKey,
    },

    /// Type error, bad argument, overflow or other fault raised by contract code
    #[error("runtime fault: {0}")]
    RuntimeFault(String),

    /// `assert` failed
    #[error("assertion failed: {0}")]
    AssertionFailed(String),

    /// Function missing or not callable from outside
    #[error("contract '{contract}' has no callable function '{function}'")]
    UnknownFunction {
        /// Contract name
        contract: String,
        /// Requested function
        function: String,
    },

    /// Artifact built against another capability table
    #[error("contract '{contract}' targets library version {artifact}, runtime provides {runtime}")]
    LibraryVersionMismatch {
        /// Contract name
        contract: String,
        /// Version recorded in the artifact
        artifact: u32,
        /// Version of the executor's table
        runtime: u32,
    },

    /// Requested budget is zero or above the maximum
    #[error("invalid compute budget {requested} (maximum {max})")]
    InvalidBudget {
        /// Requested budget
        requested: u64,
        /// Largest accepted budget
        max: u64,
    },

    /// Call driven through an illegal lifecycle transition
    #[error("invalid call transition from {from:?} to {to:?}")]
    InvalidTransition {
        /// State the call was in
        from: CallState,
        /// State requested
        to: CallState,
    },

    /// State store failure
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl ExecutionError {
    /// Wrap any displayable failure as a runtime fault
    pub fn fault(message: impl std::fmt::Display) -> Self {
        ExecutionError::RuntimeFault(message.to_string())
    }

    /// Errors that leave a call's budget or rights exceeded rather than a bug in its logic
    pub fn is_limit(&self) -> bool {
        matches!(
            self,
            ExecutionError::ResourceExhausted { .. }
                | ExecutionError::RecursionLimit { .. }
                | ExecutionError::AuthorizationViolation { .. }
        )
    }
}

impl From<ValueError> for ExecutionError {
    fn from(err: ValueError) -> Self {
        ExecutionError::fault(err)
    }
}
