//! Error types for value operations

use thiserror::Error;

use crate::decimal::DecimalError;

/// Errors raised while operating on values
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValueError {
    /// Operator applied to incompatible operand types
    #[error("unsupported operand types for {op}: '{left}' and '{right}'")]
    TypeMismatch {
        /// Operator symbol
        op: &'static str,
        /// Left operand type
        left: &'static str,
        /// Right operand type
        right: &'static str,
    },

    /// Operation not defined for a type
    #[error("'{ty}' does not support {op}")]
    Unsupported {
        /// Operation name
        op: &'static str,
        /// Operand type
        ty: &'static str,
    },

    /// Integer overflow
    #[error("integer overflow")]
    Overflow,

    /// Division or modulo by zero
    #[error("division by zero")]
    DivisionByZero,

    /// Negative or fractional exponent
    #[error("exponent must be a non-negative integer")]
    NegativeExponent,

    /// List or map would exceed the collection cap
    #[error("collection of {0} elements exceeds the maximum size")]
    CollectionTooLarge(usize),

    /// String would exceed the length cap
    #[error("string of {0} bytes exceeds the maximum length")]
    StringTooLong(usize),

    /// Collections nested deeper than the cap
    #[error("value nested deeper than {0} levels")]
    NestingTooDeep(usize),

    /// Index outside a list or string
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange {
        /// Requested index
        index: i128,
        /// Container length
        len: usize,
    },

    /// Missing map key
    #[error("key '{0}' not found")]
    KeyNotFound(String),

    /// Value cannot be used as part of a storage key
    #[error("'{0}' cannot be used as a storage key")]
    InvalidKey(&'static str),

    /// Decimal arithmetic failure
    #[error(transparent)]
    Decimal(#[from] DecimalError),
}
