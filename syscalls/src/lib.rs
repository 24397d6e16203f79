//! Sandlot host calls
//!
//! Every effect a contract can have on the outside world goes through this
//! crate. Each host call takes the [`InvokeContext`] of the running call,
//! charges its compute cost with checked arithmetic and, for storage, checks
//! the access against the executing artifact's manifest.
//!
//! # Available host calls
//!
//! ## Storage
//! - [`storage::storage_read`] - Read a slot, falling back to its default
//! - [`storage::storage_write`] - Write (or delete, with `None`) an owned slot
//!
//! ## Logging
//! - [`logging::log`] - Record a log line (forwarded to `log` in debug mode)
//!
//! ## Context
//! - [`context::context_value`] - `ctx.caller`, `ctx.signer`, `now`, ...

#![warn(missing_docs)]
#![deny(clippy::arithmetic_side_effects)]

pub mod context;
pub mod logging;
pub mod storage;

use sandlot_program_runtime::ExecutionError;
use thiserror::Error as ThisError;

pub use sandlot_program_runtime::InvokeContext;

/// Host call error types
#[derive(Debug, ThisError)]
pub enum SyscallError {
    /// Storage key is too large
    #[error("Key too large: {0} bytes (max {1})")]
    KeyTooLarge(u64, u64),
    /// Storage value is too large
    #[error("Value too large: {0} bytes (max {1})")]
    ValueTooLarge(u64, u64),
    /// Message exceeds maximum length
    #[error("Message too long: {0} bytes (max {1})")]
    MessageTooLong(u64, u64),
    /// Slot id not present in the manifest
    #[error("Unknown storage slot {0}")]
    UnknownSlot(usize),
    /// Sub-key shape does not match the slot kind
    #[error("Storage slot '{0}' accessed with the wrong key shape")]
    KeyShape(String),
}

impl From<SyscallError> for ExecutionError {
    fn from(err: SyscallError) -> Self {
        ExecutionError::fault(err)
    }
}

fn len_u64(len: usize) -> u64 {
    u64::try_from(len).unwrap_or(u64::MAX)
}
