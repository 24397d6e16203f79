//! Sandlot program runtime
//!
//! Execution infrastructure shared by the interpreter and the host calls:
//! the per-call [`InvokeContext`] (compute meter, call stack, logs, staging
//! overlay), runtime limits, the call lifecycle and the execution error type.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            session layer                │
//! │   (deploy / call / commit of deltas)    │
//! └────────────────┬────────────────────────┘
//!                  │ create InvokeContext
//!                  ▼
//! ┌─────────────────────────────────────────┐
//! │  sandlot-program-runtime (this crate)   │
//! │  - compute budget tracking              │
//! │  - call frames and depth limit          │
//! │  - staged storage access                │
//! └────────────────┬────────────────────────┘
//!                  │
//!                  ▼
//! ┌─────────────────────────────────────────┐
//! │  sandlot-syscalls / sandlot-vm          │
//! │  - costed storage and log host calls    │
//! │  - IR interpreter                       │
//! └─────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![deny(clippy::arithmetic_side_effects)]

pub mod config;
pub mod error;
pub mod invoke_context;
pub mod lifecycle;

// Re-export main types
pub use config::{
    Config, DEFAULT_COMPUTE_BUDGET, DEFAULT_MAX_CALL_DEPTH, DEFAULT_STACK_SIZE, MAX_COMPUTE_BUDGET, MAX_LOG_LENGTH,
    VALUE_BYTES_PER_UNIT,
};
pub use error::{ExecResult, ExecutionError};
pub use invoke_context::{
    CallOutput, ChainContext, Frame, InvokeContext, DEFAULT_BLOCK_HASH, DEFAULT_BLOCK_NUM, DEFAULT_NOW, DEFAULT_SIGNER,
};
pub use lifecycle::{CallLifecycle, CallState};
