//! Sandlot sessions
//!
//! A [`Session`] is one user's sandbox: a merkle-provable [`Store`], the
//! contracts compiled into it and the runtime environment those contracts
//! see. The [`SessionManager`] hands out session ids, keeps open sessions
//! behind per-session locks and exposes the boundary operations:
//!
//! ```text
//! deploy(session, name, source)   compile, run @construct, commit
//! call(session, contract, fn, ..) execute, commit the delta on success
//! read_state(session, key)        committed value or NotFound
//! prove_state(session, key)       inclusion or absence proof
//! ```
//!
//! Persisted sessions live in `<root>/<session_id>/`: `state.bin` holds the
//! store snapshot (contract sources included, under `contract.__code__`) and
//! `session.json` the environment.
//!
//! [`Store`]: sandlot_store::Store

#![warn(missing_docs)]

mod config;
pub mod environment;
mod error;
mod manager;
mod metadata;
mod session;

pub use config::{SessionConfig, ENV_DEBUG, ENV_DEFAULT_BUDGET, ENV_SESSION_ROOT};
pub use error::{SessionError, SessionResult};
pub use manager::{normalize_session_id, SessionManager, SESSION_ID_LEN};
pub use metadata::{SessionMetadata, METADATA_FILE};
pub use session::{
    arguments_from_json, parse_key, valid_contract_name, ContractDetails, Session, CODE_VARIABLE,
    DEVELOPER_VARIABLE, MAX_CONTRACT_NAME_LEN, RESERVED_CONTRACT_NAME,
};

pub use sandlot_vm::{Arguments, ExecutionResult};
