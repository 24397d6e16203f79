//! Sandlot value model
//!
//! Types shared by every layer of the engine: the dynamically typed
//! [`Value`], the fixed-precision [`Decimal`] used for all non-integer
//! arithmetic, and the [`StorageKey`] that addresses persisted state.

pub mod decimal;
pub mod error;
pub mod json;
pub mod key;
pub mod value;

pub use decimal::{Decimal, DecimalError, RoundingMode, DECIMAL_PLACES};
pub use error::ValueError;
pub use json::{JsonError, FIXED_MARKER};
pub use key::StorageKey;
pub use value::{ArithOp, Value, MAX_COLLECTION_LEN, MAX_STRING_LEN, MAX_VALUE_DEPTH};
