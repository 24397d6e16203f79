//! One user's sandbox: a store, the contracts deployed into it and the
//! runtime environment they see

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sandlot_compiler::{compile, Artifact, Signature};
use sandlot_program_runtime::{CallLifecycle, ChainContext};
use sandlot_store::{Digest, MerkleProof, StagingArea, Store};
use sandlot_types::{StorageKey, Value};
use sandlot_vm::{Arguments, ExecutionResult, Executor};
use serde::Serialize;
use serde_json::{Map, Value as Json};

use crate::config::SessionConfig;
use crate::environment;
use crate::error::{SessionError, SessionResult};
use crate::metadata::SessionMetadata;

/// Variable holding a contract's source
pub const CODE_VARIABLE: &str = "__code__";
/// Variable holding the account that deployed a contract
pub const DEVELOPER_VARIABLE: &str = "__developer__";
/// Name kept back for the editor's scratch contract
pub const RESERVED_CONTRACT_NAME: &str = "submission";
/// Longest accepted contract name
pub const MAX_CONTRACT_NAME_LEN: usize = 64;

/// Snapshot section that carries runtime bookkeeping, ignored on import
const RUNTIME_SECTION: &str = "__runtime__";

/// Whether `name` is an acceptable contract name: 1 to 64 ASCII letters,
/// digits or underscores
pub fn valid_contract_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_CONTRACT_NAME_LEN
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Source and interface of a deployed contract
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContractDetails {
    /// Contract name
    pub name: String,
    /// Source as submitted
    pub source: String,
    /// Exported functions with their docstrings
    pub exports: Vec<Signature>,
}

/// A contract sandbox owned by one user
pub struct Session {
    id: String,
    dir: Option<PathBuf>,
    config: SessionConfig,
    metadata: SessionMetadata,
    store: Store,
    contracts: BTreeMap<String, Artifact>,
}

impl Session {
    /// Session kept in memory only
    pub fn in_memory(id: impl Into<String>, config: SessionConfig) -> Self {
        let id = id.into();
        Self {
            metadata: SessionMetadata::new(id.clone()),
            id,
            dir: None,
            config,
            store: Store::in_memory(),
            contracts: BTreeMap::new(),
        }
    }

    /// Open or create the session persisted in `dir`
    ///
    /// Every contract found in state is recompiled from its stored source,
    /// dependencies first.
    pub fn open(id: impl Into<String>, dir: impl Into<PathBuf>, config: SessionConfig) -> SessionResult<Self> {
        let id = id.into();
        let dir = dir.into();
        let metadata = if SessionMetadata::exists(&dir) {
            SessionMetadata::load(&dir)?
        } else {
            let metadata = SessionMetadata::new(id.clone());
            metadata.save(&dir)?;
            metadata
        };
        let store = Store::open(&dir)?;

        let mut session = Self {
            id,
            dir: Some(dir),
            config,
            metadata,
            store,
            contracts: BTreeMap::new(),
        };
        session.load_contracts()?;
        log::debug!(
            "opened session {} with {} contracts, root {}",
            session.id,
            session.contracts.len(),
            session.store.root()
        );
        Ok(session)
    }

    fn load_contracts(&mut self) -> SessionResult<()> {
        let mut pending: Vec<(String, String)> = self
            .store
            .entries()
            .filter(|(key, _)| key.variable == CODE_VARIABLE && key.subkey.is_none())
            .filter_map(|(key, value)| match value {
                Value::Str(source) => Some((key.contract.clone(), source.clone())),
                _ => None,
            })
            .collect();

        // Imports resolve only against contracts compiled in earlier rounds
        while !pending.is_empty() {
            let before = pending.len();
            let mut deferred = Vec::new();
            let mut last_error = None;
            for (name, source) in pending {
                match compile(&name, &source, &self.contracts) {
                    Ok(artifact) => {
                        self.contracts.insert(name, artifact);
                    }
                    Err(err) => {
                        last_error = Some(err);
                        deferred.push((name, source));
                    }
                }
            }
            match last_error {
                Some(err) if deferred.len() == before => return Err(err.into()),
                _ => pending = deferred,
            }
        }
        Ok(())
    }

    /// Session id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Session directory, if persisted
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Persisted metadata
    pub fn metadata(&self) -> &SessionMetadata {
        &self.metadata
    }

    /// Current state root
    pub fn root(&self) -> Digest {
        self.store.root()
    }

    /// The session store
    pub fn store(&self) -> &Store {
        &self.store
    }

    fn executor(&self) -> Executor<'_> {
        Executor::new(
            self.config.runtime(),
            &self.store,
            &self.contracts,
            self.metadata.environment.clone(),
        )
    }

    /// Compile and deploy a contract, running its constructor
    pub fn deploy(&mut self, name: &str, source: &str) -> SessionResult<Artifact> {
        self.deploy_with(name, source, Arguments::new(), None)
    }

    /// [`Session::deploy`] with constructor arguments and budget
    pub fn deploy_with(
        &mut self,
        name: &str,
        source: &str,
        arguments: Arguments,
        budget: Option<u64>,
    ) -> SessionResult<Artifact> {
        let name = name.trim();
        if name == RESERVED_CONTRACT_NAME || !valid_contract_name(name) {
            log::warn!("rejected deploy: invalid contract name '{name}'");
            return Err(SessionError::InvalidContractName(name.to_string()));
        }
        if source.trim().is_empty() {
            return Err(SessionError::EmptySource);
        }
        let code_key = StorageKey::new(name, CODE_VARIABLE);
        if self.contracts.contains_key(name) || self.store.lookup(&code_key).is_some() {
            return Err(SessionError::ContractExists(name.to_string()));
        }

        let mut lifecycle = CallLifecycle::new();
        let artifact = match compile(name, source, &self.contracts) {
            Ok(artifact) => artifact,
            Err(err) => {
                // Rejected before anything ran
                lifecycle.cancel()?;
                return Err(err.into());
            }
        };
        lifecycle.start()?;
        let mut delta = match self.executor().construct(&artifact, arguments, budget) {
            Ok(result) => result.delta,
            Err(err) => {
                lifecycle.abort()?;
                log::warn!("constructor of {name} failed: {err}");
                return Err(err.into());
            }
        };

        let developer_key = StorageKey::new(name, DEVELOPER_VARIABLE);
        delta.record(code_key, None, Some(Value::Str(source.to_string())));
        let developer = Value::Str(self.metadata.environment.signer.clone());
        delta.record(developer_key.clone(), self.store.lookup(&developer_key).cloned(), Some(developer));

        if let Err(err) = self.store.commit(&delta) {
            lifecycle.abort()?;
            return Err(err.into());
        }
        lifecycle.commit()?;

        log::debug!("deployed {name} ({} exports)", artifact.exports.len());
        self.contracts.insert(name.to_string(), artifact.clone());
        Ok(artifact)
    }

    /// Call an exported function and commit its writes
    pub fn call(
        &mut self,
        contract: &str,
        function: &str,
        arguments: Arguments,
        budget: Option<u64>,
    ) -> SessionResult<ExecutionResult> {
        let artifact = self
            .contracts
            .get(contract)
            .ok_or_else(|| SessionError::UnknownContract(contract.to_string()))?;

        let mut lifecycle = CallLifecycle::new();
        lifecycle.start()?;
        let result = match self.executor().execute(artifact, function, arguments, budget) {
            Ok(result) => result,
            Err(err) => {
                lifecycle.abort()?;
                log::warn!("{contract}.{function} aborted: {err}");
                return Err(err.into());
            }
        };

        if let Err(err) = self.store.commit(&result.delta) {
            lifecycle.abort()?;
            return Err(err.into());
        }
        lifecycle.commit()?;
        Ok(result)
    }

    /// Committed value of `key`
    pub fn read_state(&self, key: &StorageKey) -> SessionResult<Value> {
        Ok(self.store.get(key)?.clone())
    }

    /// Merkle proof of `key`'s value or absence under the current root
    pub fn prove_state(&self, key: &StorageKey) -> SessionResult<MerkleProof> {
        Ok(self.store.prove(key)?)
    }

    /// Sorted names of deployed contracts
    pub fn list_contracts(&self) -> Vec<String> {
        self.contracts
            .keys()
            .filter(|name| name.as_str() != RESERVED_CONTRACT_NAME)
            .cloned()
            .collect()
    }

    /// Sorted export names of `contract`; empty if it is not deployed
    pub fn list_functions(&self, contract: &str) -> Vec<String> {
        self.contracts
            .get(contract)
            .map(Artifact::export_names)
            .unwrap_or_default()
    }

    /// Artifact of a deployed contract
    pub fn artifact(&self, contract: &str) -> Option<&Artifact> {
        self.contracts.get(contract)
    }

    /// Source and exports of a deployed contract
    pub fn contract_details(&self, contract: &str) -> SessionResult<ContractDetails> {
        let name = contract.trim();
        let artifact = self
            .contracts
            .get(name)
            .ok_or_else(|| SessionError::UnknownContract(name.to_string()))?;
        let source = match self.store.lookup(&StorageKey::new(name, CODE_VARIABLE)) {
            Some(Value::Str(source)) => source.clone(),
            _ => String::new(),
        };
        Ok(ContractDetails {
            name: name.to_string(),
            source,
            exports: artifact.exports.clone(),
        })
    }

    /// Committed state as `{contract: {key: value}}`
    ///
    /// Keys starting with `__` are left out unless `show_internal` is set;
    /// decimals are rendered as strings.
    pub fn dump_state(&self, show_internal: bool) -> Json {
        let mut dump: BTreeMap<String, Map<String, Json>> = BTreeMap::new();
        for (key, value) in self.store.entries() {
            if key.is_internal() && !show_internal {
                continue;
            }
            dump.entry(key.contract.clone())
                .or_default()
                .insert(key.local_name(), value.to_display_json());
        }
        Json::Object(dump.into_iter().map(|(contract, entries)| (contract, Json::Object(entries))).collect())
    }

    /// Write keys directly from a `{contract: {key: value}}` document
    ///
    /// `null` deletes a key. The whole snapshot is validated before anything
    /// is committed.
    pub fn apply_state_snapshot(&mut self, snapshot: &Json) -> SessionResult<Digest> {
        let sections = snapshot
            .as_object()
            .ok_or_else(|| SessionError::InvalidSnapshot("state snapshot must be a JSON object".to_string()))?;

        let mut staging = StagingArea::new(&self.store);
        for (contract, entries) in sections {
            if contract == RUNTIME_SECTION {
                continue;
            }
            let entries = entries.as_object().ok_or_else(|| {
                SessionError::InvalidSnapshot(format!("state for '{contract}' must be an object mapping keys to values"))
            })?;
            for (local, value) in entries {
                let key = snapshot_key(contract, local)?;
                let value = match value {
                    Json::Null => None,
                    other => Some(Value::from_json(other)?),
                };
                staging.stage(key, value);
            }
        }
        let delta = staging.into_delta();
        let root = self.store.commit(&delta)?;
        log::debug!("applied state snapshot: {} changes", delta.changes().count());
        Ok(root)
    }

    /// Drop every contract and key and restore the default environment
    pub fn reset_state(&mut self) -> SessionResult<Digest> {
        let root = self.store.clear()?;
        self.contracts.clear();
        self.metadata.environment = ChainContext::default();
        self.save_metadata()?;
        log::info!("session {} reset", self.id);
        Ok(root)
    }

    /// Environment as editable text
    pub fn get_environment(&self) -> BTreeMap<String, String> {
        environment::environment_map(&self.metadata.environment)
    }

    /// The environment contracts see
    pub fn chain(&self) -> &ChainContext {
        &self.metadata.environment
    }

    /// Set one environment value; a blank value restores the default
    pub fn set_environment_var(&mut self, key: &str, value: &str) -> SessionResult<String> {
        let stored = environment::set_var(&mut self.metadata.environment, key, value)?;
        self.save_metadata()?;
        Ok(stored)
    }

    /// Restore the default of one environment value
    pub fn remove_environment_var(&mut self, key: &str) -> SessionResult<()> {
        environment::remove_var(&mut self.metadata.environment, key);
        self.save_metadata()
    }

    fn save_metadata(&mut self) -> SessionResult<()> {
        self.metadata.touch();
        match &self.dir {
            Some(dir) => self.metadata.save(dir),
            None => Ok(()),
        }
    }
}

/// Storage key named by a snapshot entry
fn snapshot_key(contract: &str, local: &str) -> SessionResult<StorageKey> {
    if !valid_contract_name(contract) {
        return Err(SessionError::InvalidSnapshot(format!("invalid contract name '{contract}'")));
    }
    let key = StorageKey::parse(&format!("{contract}.{local}"))
        .ok_or_else(|| SessionError::InvalidKey(format!("{contract}.{local}")))?;
    if key.is_internal() {
        return Err(SessionError::InvalidSnapshot(format!(
            "'{key}' is managed by the session and cannot be written"
        )));
    }
    Ok(key)
}

/// Parse a rendered `contract.variable[:subkey]` key
pub fn parse_key(text: &str) -> SessionResult<StorageKey> {
    StorageKey::parse(text.trim()).ok_or_else(|| SessionError::InvalidKey(text.to_string()))
}

/// Keyword arguments from a JSON object
pub fn arguments_from_json(json: &Json) -> SessionResult<Arguments> {
    match json {
        Json::Null => Ok(Arguments::new()),
        Json::Object(entries) => entries
            .iter()
            .map(|(name, value)| Ok((name.clone(), Value::from_json(value)?)))
            .collect(),
        other => Err(SessionError::InvalidArguments(format!("expected a JSON object, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_names() {
        let longest = "A".repeat(64);
        let too_long = "a".repeat(65);
        for name in ["demo", "Contract_1", "a1", longest.as_str()] {
            assert!(valid_contract_name(name), "{name}");
        }
        for name in ["", "with-dash", "folder/name", "..", too_long.as_str()] {
            assert!(!valid_contract_name(name), "{name}");
        }
    }

    #[test]
    fn test_snapshot_keys() {
        assert_eq!(
            snapshot_key("con_a", "balances:bob").unwrap(),
            StorageKey::with_subkey("con_a", "balances", ["bob"])
        );
        assert_eq!(snapshot_key("con_a", "owner").unwrap(), StorageKey::new("con_a", "owner"));
        assert!(matches!(snapshot_key("con_a", ""), Err(SessionError::InvalidKey(_))));
        assert!(matches!(snapshot_key("con_a", "__code__"), Err(SessionError::InvalidSnapshot(_))));
        assert!(matches!(snapshot_key("bad/name", "x"), Err(SessionError::InvalidSnapshot(_))));
    }

    #[test]
    fn test_arguments_from_json() {
        let args = arguments_from_json(&serde_json::json!({"to": "bob", "amount": 5})).unwrap();
        assert_eq!(args["to"], Value::from("bob"));
        assert_eq!(args["amount"], Value::Int(5));
        assert!(arguments_from_json(&Json::Null).unwrap().is_empty());
        assert!(matches!(
            arguments_from_json(&serde_json::json!([1, 2])),
            Err(SessionError::InvalidArguments(_))
        ));
    }
}
