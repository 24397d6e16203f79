//! Session registry
//!
//! Sessions are addressed by a 32-character lowercase uuid-v4 hex id. Each
//! open session sits behind its own `parking_lot::Mutex`, so requests for one
//! session run one at a time while different sessions proceed independently.
//!
//! Closing, deleting or evicting a session empties its slot while holding
//! that mutex. A request that resolved the entry earlier finds the slot
//! empty once it gets the lock and resolves the id again, so a persisted
//! session is never open twice.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sandlot_compiler::Artifact;
use sandlot_store::MerkleProof;
use sandlot_types::{StorageKey, Value};
use sandlot_vm::{Arguments, ExecutionResult};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::metadata::SessionMetadata;
use crate::session::Session;

/// Length of a session id
pub const SESSION_ID_LEN: usize = 32;

/// Canonical form of a session id, if it is a valid uuid-v4 hex string
pub fn normalize_session_id(id: &str) -> Option<String> {
    let id = id.trim().to_ascii_lowercase();
    if id.len() != SESSION_ID_LEN {
        return None;
    }
    let uuid = Uuid::try_parse(&id).ok()?;
    (uuid.get_version_num() == 4).then_some(id)
}

struct Entry {
    /// `None` once the session has been closed
    session: Mutex<Option<Session>>,
    last_used: Mutex<Instant>,
}

impl Entry {
    fn new(session: Session) -> Arc<Self> {
        Arc::new(Self {
            session: Mutex::new(Some(session)),
            last_used: Mutex::new(Instant::now()),
        })
    }
}

/// Owns every open session
pub struct SessionManager {
    config: SessionConfig,
    sessions: Mutex<HashMap<String, Arc<Entry>>>,
}

impl SessionManager {
    /// Manager storing sessions as configured
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Settings applied to new sessions
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn session_dir(&self, id: &str) -> Option<PathBuf> {
        self.config.root.as_ref().map(|root| root.join(id))
    }

    /// Create a session with a fresh id
    pub fn create_session(&self) -> SessionResult<String> {
        loop {
            let id = Uuid::new_v4().simple().to_string();
            if self.sessions.lock().contains_key(&id) {
                continue;
            }
            let session = match self.session_dir(&id) {
                Some(dir) if dir.exists() => continue,
                Some(dir) => Session::open(id.clone(), dir, self.config.clone())?,
                None => Session::in_memory(id.clone(), self.config.clone()),
            };
            self.sessions.lock().insert(id.clone(), Entry::new(session));
            log::info!("created session {id}");
            return Ok(id);
        }
    }

    /// Resolve `id` to an existing session, or create a new one
    ///
    /// Returns the session id and whether it was created.
    pub fn resolve_or_create(&self, id: Option<&str>) -> SessionResult<(String, bool)> {
        if let Some(id) = id.and_then(normalize_session_id) {
            if self.entry(&id).is_ok() {
                return Ok((id, false));
            }
        }
        Ok((self.create_session()?, true))
    }

    /// Whether `id` names an open or persisted session
    pub fn session_exists(&self, id: &str) -> bool {
        let Some(id) = normalize_session_id(id) else {
            return false;
        };
        if self.sessions.lock().contains_key(&id) {
            return true;
        }
        self.session_dir(&id).is_some_and(|dir| SessionMetadata::exists(&dir))
    }

    fn entry(&self, id: &str) -> SessionResult<Arc<Entry>> {
        let id = normalize_session_id(id).ok_or_else(|| SessionError::InvalidSessionId(id.to_string()))?;
        if let Some(entry) = self.sessions.lock().get(&id) {
            return Ok(entry.clone());
        }

        // Not resident: load it from disk, without creating it
        let dir = self
            .session_dir(&id)
            .filter(|dir| SessionMetadata::exists(dir))
            .ok_or_else(|| SessionError::UnknownSession(id.clone()))?;
        let session = Session::open(id.clone(), dir, self.config.clone())?;
        let mut sessions = self.sessions.lock();
        let entry = sessions.entry(id).or_insert_with(|| Entry::new(session));
        Ok(entry.clone())
    }

    /// Run `f` with exclusive access to session `id`
    pub fn with_session<R>(&self, id: &str, f: impl FnOnce(&mut Session) -> R) -> SessionResult<R> {
        loop {
            let entry = self.entry(id)?;
            let mut slot = entry.session.lock();
            let Some(session) = slot.as_mut() else {
                log::trace!("session {id} closed while waiting, resolving again");
                continue;
            };
            let result = f(session);
            *entry.last_used.lock() = Instant::now();
            return Ok(result);
        }
    }

    /// Empty the slot of resident session `id` and drop it from the
    /// registry, then run `then` before the registry is unlocked
    ///
    /// Returns whether a resident session was closed.
    fn retire<R>(&self, id: &str, then: impl FnOnce() -> R) -> (bool, R) {
        loop {
            let sessions = self.sessions.lock();
            let Some(entry) = sessions.get(id).cloned() else {
                return (false, then());
            };
            drop(sessions);

            // Session lock first: in-flight requests finish before the slot empties
            let mut slot = entry.session.lock();
            let mut sessions = self.sessions.lock();
            if !sessions.get(id).is_some_and(|current| Arc::ptr_eq(current, &entry)) {
                continue;
            }
            *slot = None;
            sessions.remove(id);
            return (true, then());
        }
    }

    /// Deploy `source` as `contract` in session `id`
    pub fn deploy(&self, id: &str, contract: &str, source: &str) -> SessionResult<Artifact> {
        self.with_session(id, |session| session.deploy(contract, source))?
    }

    /// Call `contract.function` in session `id`, committing on success
    pub fn call(
        &self,
        id: &str,
        contract: &str,
        function: &str,
        arguments: Arguments,
        budget: Option<u64>,
    ) -> SessionResult<ExecutionResult> {
        self.with_session(id, |session| session.call(contract, function, arguments, budget))?
    }

    /// Committed value of `key` in session `id`
    pub fn read_state(&self, id: &str, key: &StorageKey) -> SessionResult<Value> {
        self.with_session(id, |session| session.read_state(key))?
    }

    /// Merkle proof of `key` in session `id`
    pub fn prove_state(&self, id: &str, key: &StorageKey) -> SessionResult<MerkleProof> {
        self.with_session(id, |session| session.prove_state(key))?
    }

    /// Drop session `id` from memory; persisted state stays on disk
    pub fn close_session(&self, id: &str) -> bool {
        match normalize_session_id(id) {
            Some(id) => self.retire(&id, || ()).0,
            None => false,
        }
    }

    /// Close session `id` and remove its directory
    pub fn delete_session(&self, id: &str) -> SessionResult<()> {
        let normalized = normalize_session_id(id).ok_or_else(|| SessionError::InvalidSessionId(id.to_string()))?;
        let dir = self.session_dir(&normalized).filter(|dir| dir.exists());
        let (_, removed) = self.retire(&normalized, || match &dir {
            Some(dir) => fs::remove_dir_all(dir),
            None => Ok(()),
        });
        removed?;
        log::info!("deleted session {normalized}");
        Ok(())
    }

    /// Close sessions unused for at least `max_idle`
    ///
    /// Sessions busy with a request are skipped. Returns the closed ids.
    pub fn evict_idle(&self, max_idle: Duration) -> Vec<String> {
        let now = Instant::now();
        let mut idle = Vec::new();
        self.sessions.lock().retain(|id, entry| {
            let Some(mut slot) = entry.session.try_lock() else {
                return true;
            };
            if now.saturating_duration_since(*entry.last_used.lock()) < max_idle {
                return true;
            }
            *slot = None;
            log::debug!("evicted idle session {id}");
            idle.push(id.clone());
            false
        });
        idle
    }

    /// Ids of resident sessions, sorted
    pub fn open_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Ids of every session, resident or persisted under the root, sorted
    pub fn list_sessions(&self) -> SessionResult<Vec<String>> {
        let mut ids: BTreeSet<String> = self.sessions.lock().keys().cloned().collect();
        let Some(root) = &self.config.root else {
            return Ok(ids.into_iter().collect());
        };
        let listing = match fs::read_dir(root) {
            Ok(listing) => listing,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(ids.into_iter().collect()),
            Err(err) => return Err(err.into()),
        };
        for item in listing {
            let item = item?;
            let Some(name) = item.file_name().to_str().map(str::to_string) else {
                continue;
            };
            // Only canonical ids: other names are not reachable through the manager
            if normalize_session_id(&name).as_deref() == Some(name.as_str()) && SessionMetadata::exists(&item.path()) {
                ids.insert(name);
            }
        }
        Ok(ids.into_iter().collect())
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids() {
        let id = Uuid::new_v4().simple().to_string();
        assert_eq!(normalize_session_id(&id.to_uppercase()), Some(id.clone()));
        assert_eq!(normalize_session_id(&format!(" {id} ")), Some(id));
        assert_eq!(normalize_session_id("not-a-session"), None);
        // Right length, wrong version nibble
        assert_eq!(normalize_session_id("0123456789ab1def8123456789abcdef"), None);
        assert_eq!(normalize_session_id(&Uuid::new_v4().hyphenated().to_string()), None);
    }

    #[test]
    fn test_create_and_close() {
        let manager = SessionManager::default();
        let id = manager.create_session().unwrap();
        assert_eq!(id.len(), SESSION_ID_LEN);
        assert!(manager.session_exists(&id));

        let (resolved, created) = manager.resolve_or_create(Some(&id)).unwrap();
        assert_eq!(resolved, id);
        assert!(!created);

        assert!(manager.close_session(&id));
        assert!(!manager.session_exists(&id));
        let (other, created) = manager.resolve_or_create(Some(&id)).unwrap();
        assert_ne!(other, id);
        assert!(created);
    }

    #[test]
    fn test_unknown_sessions_are_not_created() {
        let manager = SessionManager::default();
        let id = Uuid::new_v4().simple().to_string();
        assert!(matches!(manager.with_session(&id, |_| ()), Err(SessionError::UnknownSession(_))));
        assert!(matches!(manager.with_session("bogus", |_| ()), Err(SessionError::InvalidSessionId(_))));
        assert!(manager.open_sessions().is_empty());
    }

    #[test]
    fn test_evict_idle() {
        let manager = SessionManager::default();
        let a = manager.create_session().unwrap();
        let b = manager.create_session().unwrap();

        assert!(manager.evict_idle(Duration::from_secs(3600)).is_empty());
        let mut evicted = manager.evict_idle(Duration::ZERO);
        evicted.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(evicted, expected);
        assert!(manager.open_sessions().is_empty());
    }

    #[test]
    fn test_stale_entry_is_not_reused_after_eviction() {
        let root = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(SessionConfig::default().with_root(root.path()));
        let id = manager.create_session().unwrap();
        manager
            .deploy(&id, "con_counter", "count = Variable()\n\n@export\ndef bump():\n    count.set(1)\n")
            .unwrap();

        // A request resolved the entry, then eviction won the race for the lock
        let stale = manager.entry(&id).unwrap();
        assert_eq!(manager.evict_idle(Duration::ZERO), vec![id.clone()]);
        assert!(stale.session.lock().is_none());

        // The request resolves again and gets a single, freshly loaded session
        let contracts = manager.with_session(&id, |session| session.list_contracts()).unwrap();
        assert_eq!(contracts, vec!["con_counter".to_string()]);
        assert_eq!(manager.open_sessions(), vec![id.clone()]);
        let fresh = manager.entry(&id).unwrap();
        assert!(!Arc::ptr_eq(&stale, &fresh));
    }

    #[test]
    fn test_close_waits_for_running_request() {
        let manager = Arc::new(SessionManager::default());
        let id = manager.create_session().unwrap();
        let (started_tx, started_rx) = std::sync::mpsc::channel();

        let worker = {
            let manager = Arc::clone(&manager);
            let id = id.clone();
            std::thread::spawn(move || {
                manager
                    .with_session(&id, |session| {
                        started_tx.send(()).unwrap();
                        std::thread::sleep(Duration::from_millis(50));
                        session.id().to_string()
                    })
                    .unwrap()
            })
        };
        started_rx.recv().unwrap();
        assert!(manager.close_session(&id));
        assert_eq!(worker.join().unwrap(), id);
        assert!(matches!(manager.with_session(&id, |_| ()), Err(SessionError::UnknownSession(_))));
    }

    #[test]
    fn test_list_sessions_includes_persisted() {
        let root = tempfile::tempdir().unwrap();
        let config = SessionConfig::default().with_root(root.path());
        let first = SessionManager::new(config.clone());
        let a = first.create_session().unwrap();
        let b = first.create_session().unwrap();
        fs::create_dir_all(root.path().join("not-a-session")).unwrap();

        let second = SessionManager::new(config);
        assert!(second.open_sessions().is_empty());
        let mut expected = vec![a.clone(), b];
        expected.sort();
        assert_eq!(second.list_sessions().unwrap(), expected);

        second.delete_session(&a).unwrap();
        assert_eq!(second.list_sessions().unwrap().len(), 1);
        assert!(SessionManager::default().list_sessions().unwrap().is_empty());
    }
}
