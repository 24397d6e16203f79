use sandlot_types::{DecimalError, ValueError};
use thiserror::Error;

/// Errors raised by standard library functions
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StdlibError {
    /// Value operation failed inside a library function
    #[error(transparent)]
    Value(#[from] ValueError),

    /// Argument has the wrong type or an invalid value
    #[error("{function}() {message}")]
    InvalidArgument {
        /// Library function name
        function: &'static str,
        /// Description of the problem
        message: String,
    },

    /// Wrong number of arguments
    #[error("{function}() takes {expected} arguments ({given} given)")]
    Arity {
        /// Library function name
        function: &'static str,
        /// Human-readable accepted count
        expected: String,
        /// Number of arguments passed
        given: usize,
    },
}

impl From<DecimalError> for StdlibError {
    fn from(err: DecimalError) -> Self {
        StdlibError::Value(ValueError::Decimal(err))
    }
}

impl StdlibError {
    pub(crate) fn invalid(function: &'static str, message: impl Into<String>) -> Self {
        StdlibError::InvalidArgument {
            function,
            message: message.into(),
        }
    }
}
