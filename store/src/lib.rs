//! Per-session contract state store
//!
//! The store keeps the persisted key set in memory, mirrored by a single
//! snapshot file, and commits to it with a merkle root recomputed over the
//! sorted entries on every commit. Executions never write here directly: they
//! stage writes in a [`StagingArea`] and hand the resulting [`StateDelta`] to
//! [`Store::commit`].

#![warn(missing_docs)]

mod delta;
mod error;
pub mod merkle;
mod proof;
mod snapshot;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sandlot_types::{StorageKey, Value};

pub use delta::{DeltaEntry, StagingArea, StateDelta};
pub use error::{StoreError, StoreResult};
pub use merkle::Digest;
pub use proof::{AbsenceProof, InclusionProof, MerkleProof};
pub use snapshot::{FORMAT_VERSION, SNAPSHOT_FILE};

/// Persisted state of one session
#[derive(Debug)]
pub struct Store {
    dir: Option<PathBuf>,
    entries: BTreeMap<StorageKey, Value>,
    root: Digest,
}

impl Store {
    /// Open (or create) the store kept in `dir`, recomputing its root
    pub fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        let entries = snapshot::read(&dir)?;
        let root = compute_root(&entries)?;
        log::debug!("opened store at {} with {} entries, root {root}", dir.display(), entries.len());
        Ok(Self {
            dir: Some(dir),
            entries,
            root,
        })
    }

    /// Store with no backing directory
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            entries: BTreeMap::new(),
            root: merkle::empty_root(),
        }
    }

    /// Backing directory, if any
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Persisted value of `key`
    pub fn get(&self, key: &StorageKey) -> StoreResult<&Value> {
        self.lookup(key).ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    /// Persisted value of `key`, if present
    pub fn lookup(&self, key: &StorageKey) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Current state root
    pub fn root(&self) -> Digest {
        self.root
    }

    /// Number of persisted keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is persisted
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Persisted entries in canonical order
    pub fn entries(&self) -> impl Iterator<Item = (&StorageKey, &Value)> {
        self.entries.iter()
    }

    /// Persisted entries of one contract
    pub fn contract_entries<'a>(&'a self, contract: &'a str) -> impl Iterator<Item = (&'a StorageKey, &'a Value)> {
        self.entries.iter().filter(move |(key, _)| key.contract == contract)
    }

    /// Apply `delta` atomically and return the new root
    ///
    /// On failure the store is left exactly as it was.
    pub fn commit(&mut self, delta: &StateDelta) -> StoreResult<Digest> {
        if delta.changes().next().is_none() {
            return Ok(self.root);
        }
        let mut next = self.entries.clone();
        for entry in delta.changes() {
            match &entry.new {
                Some(value) => next.insert(entry.key.clone(), value.clone()),
                None => next.remove(&entry.key),
            };
        }
        self.replace(next)
    }

    /// Drop every entry atomically
    pub fn clear(&mut self) -> StoreResult<Digest> {
        self.replace(BTreeMap::new())
    }

    fn replace(&mut self, next: BTreeMap<StorageKey, Value>) -> StoreResult<Digest> {
        let root = compute_root(&next)?;
        if let Some(dir) = &self.dir {
            snapshot::write(dir, &next)?;
        }
        let previous = std::mem::replace(&mut self.root, root);
        self.entries = next;
        log::info!("committed state: {} entries, root {previous} -> {root}", self.entries.len());
        Ok(root)
    }

    /// Inclusion or absence proof for `key` under the current root
    pub fn prove(&self, key: &StorageKey) -> StoreResult<MerkleProof> {
        let count = self.entries.len() as u64;
        let sorted: Vec<(&StorageKey, &Value)> = self.entries.iter().collect();
        let leaves = sorted
            .iter()
            .map(|(k, v)| merkle::leaf_hash(k, v))
            .collect::<StoreResult<Vec<_>>>()?;
        let levels = merkle::levels(leaves);

        let inclusion = |index: usize| -> InclusionProof {
            let (key, value) = sorted[index];
            InclusionProof {
                key: key.clone(),
                value: value.clone(),
                index: index as u64,
                count,
                path: merkle::path(&levels, index),
            }
        };

        let proof = match sorted.binary_search_by(|(k, _)| (*k).cmp(key)) {
            Ok(index) => MerkleProof::Inclusion(inclusion(index)),
            Err(insert_at) => MerkleProof::Absence(AbsenceProof {
                key: key.clone(),
                count,
                left: insert_at.checked_sub(1).map(inclusion),
                right: (insert_at < sorted.len()).then(|| inclusion(insert_at)),
            }),
        };
        Ok(proof)
    }
}

fn compute_root(entries: &BTreeMap<StorageKey, Value>) -> StoreResult<Digest> {
    let leaves = entries
        .iter()
        .map(|(key, value)| merkle::leaf_hash(key, value))
        .collect::<StoreResult<Vec<_>>>()?;
    Ok(merkle::root_of(leaves))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn key(contract: &str, sub: &str) -> StorageKey {
        StorageKey::with_subkey(contract, "balances", [sub])
    }

    fn delta_of(store: &Store, writes: &[(StorageKey, Option<Value>)]) -> StateDelta {
        let mut staging = StagingArea::new(store);
        for (key, value) in writes {
            staging.stage(key.clone(), value.clone());
        }
        staging.into_delta()
    }

    #[test]
    fn test_root_is_independent_of_write_order() {
        let a = (key("con_x", "a"), Some(Value::Int(1)));
        let b = (key("con_x", "b"), Some(Value::Int(2)));

        let mut first = Store::in_memory();
        let mut second = Store::in_memory();
        let r1 = first.commit(&delta_of(&first, &[a.clone(), b.clone()])).unwrap();
        let r2 = second.commit(&delta_of(&second, &[b, a])).unwrap();
        assert_eq!(r1, r2);
        assert_ne!(r1, merkle::empty_root());
    }

    #[test]
    fn test_commit_then_get() {
        let mut store = Store::in_memory();
        let k = key("con_x", "alice");
        assert!(matches!(store.get(&k), Err(StoreError::NotFound(_))));

        store.commit(&delta_of(&store, &[(k.clone(), Some(Value::Int(5)))])).unwrap();
        assert_eq!(store.get(&k).unwrap(), &Value::Int(5));

        store.commit(&delta_of(&store, &[(k.clone(), None)])).unwrap();
        assert!(store.lookup(&k).is_none());
        assert_eq!(store.root(), merkle::empty_root());
    }

    #[test]
    fn test_cold_load_recomputes_same_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = {
            let mut store = Store::open(dir.path()).unwrap();
            store.commit(&delta_of(&store, &[
                    (key("con_x", "a"), Some(Value::Int(1))),
                    (StorageKey::new("con_x", "owner"), Some(Value::Str("alice".into()))),
                ]))
                .unwrap()
        };
        let reopened = Store::open(dir.path()).unwrap();
        assert_eq!(reopened.root(), root);
        assert_eq!(reopened.len(), 2);
    }

    #[test]
    fn test_failed_write_keeps_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(dir.path().join("session")).unwrap();
        let before = store.commit(&delta_of(&store, &[(key("con_x", "a"), Some(Value::Int(1)))])).unwrap();

        // A directory in place of the temp file makes the write fail
        fs::create_dir_all(dir.path().join("session").join("state.bin.tmp").join("blocker")).unwrap();
        let err = store.commit(&delta_of(&store, &[(key("con_x", "b"), Some(Value::Int(2)))])).unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        assert_eq!(store.root(), before);
        assert!(store.lookup(&key("con_x", "b")).is_none());
    }

    #[test]
    fn test_proofs_verify() {
        let mut store = Store::in_memory();
        let writes: Vec<_> = ["b", "d", "f", "h", "j"]
            .iter()
            .enumerate()
            .map(|(i, s)| (key("con_x", s), Some(Value::Int(i as i128))))
            .collect();
        let root = store.commit(&delta_of(&store, &writes)).unwrap();

        for (k, v) in &writes {
            let proof = store.prove(k).unwrap();
            assert!(proof.verify(&root, k, v.as_ref()));
            assert!(!proof.verify(&root, k, Some(&Value::Int(99))));
            assert!(!proof.verify(&root, k, None));
        }

        for absent in ["a", "c", "g", "z"] {
            let k = key("con_x", absent);
            let proof = store.prove(&k).unwrap();
            assert!(matches!(proof, MerkleProof::Absence(_)));
            assert!(proof.verify(&root, &k, None));
            assert!(!proof.verify(&root, &key("con_x", "b"), None));
        }
    }

    #[test]
    fn test_absence_proof_rejects_non_adjacent_neighbours() {
        let mut store = Store::in_memory();
        let writes: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|s| (key("con_x", s), Some(Value::Int(1))))
            .collect();
        let root = store.commit(&delta_of(&store, &writes)).unwrap();

        // Claim "bb" is absent using a and c, skipping the real neighbour b
        let MerkleProof::Inclusion(left) = store.prove(&key("con_x", "a")).unwrap() else {
            panic!("expected inclusion");
        };
        let MerkleProof::Inclusion(right) = store.prove(&key("con_x", "c")).unwrap() else {
            panic!("expected inclusion");
        };
        let forged = MerkleProof::Absence(AbsenceProof {
            key: key("con_x", "b"),
            count: 3,
            left: Some(left),
            right: Some(right),
        });
        assert!(!forged.verify(&root, &key("con_x", "b"), None));
    }

    #[test]
    fn test_empty_store_absence_proof() {
        let store = Store::in_memory();
        let k = key("con_x", "a");
        let proof = store.prove(&k).unwrap();
        assert!(proof.verify(&merkle::empty_root(), &k, None));
    }

    #[test]
    fn test_clear_resets_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = Store::open(dir.path()).unwrap();
        store.commit(&delta_of(&store, &[(key("con_x", "a"), Some(Value::Int(1)))])).unwrap();
        assert_eq!(store.clear().unwrap(), merkle::empty_root());
        assert!(Store::open(dir.path()).unwrap().is_empty());
    }
}
