//! Store error types

use sandlot_types::StorageKey;
use thiserror::Error;

/// Store result type
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by the state store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key not found: {0}")]
    NotFound(StorageKey),

    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("state snapshot is corrupt: {0}")]
    Corrupt(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
