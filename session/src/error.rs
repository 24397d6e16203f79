use sandlot_compiler::CompileError;
use sandlot_program_runtime::ExecutionError;
use sandlot_store::StoreError;
use sandlot_types::JsonError;
use thiserror::Error;

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors surfaced at the session boundary
#[derive(Debug, Error)]
pub enum SessionError {
    /// Source rejected by the compiler
    #[error("Compilation failed:\n{0}")]
    Compile(#[from] CompileError),

    /// Call or constructor aborted
    #[error("Execution failed: {0}")]
    Execution(#[from] ExecutionError),

    /// Store failure, including missing keys
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Value that cannot cross the JSON boundary
    #[error("Invalid value: {0}")]
    Json(#[from] JsonError),

    /// Unreadable `session.json`
    #[error("Session metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Name outside `[A-Za-z0-9_]{1,64}` or reserved
    #[error("Invalid contract name '{0}'")]
    InvalidContractName(String),

    /// Blank contract source
    #[error("Contract code cannot be empty")]
    EmptySource,

    /// Contracts cannot be redeployed
    #[error("Contract '{0}' is already deployed")]
    ContractExists(String),

    /// No such contract in this session
    #[error("Contract '{0}' is not deployed")]
    UnknownContract(String),

    /// Not a uuid-v4 hex id
    #[error("Invalid session id '{0}'")]
    InvalidSessionId(String),

    /// Well-formed id without a session
    #[error("Session '{0}' does not exist")]
    UnknownSession(String),

    /// Unparseable storage key
    #[error("Invalid storage key '{0}'")]
    InvalidKey(String),

    /// Call arguments are not a keyword map
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Unknown environment key or malformed value
    #[error("Invalid environment: {0}")]
    InvalidEnvironment(String),

    /// Malformed state snapshot
    #[error("Invalid state snapshot: {0}")]
    InvalidSnapshot(String),
}

impl SessionError {
    /// Whether the call was stopped by a sandbox limit
    pub fn is_limit(&self) -> bool {
        matches!(self, SessionError::Execution(err) if err.is_limit())
    }
}
