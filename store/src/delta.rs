//! Write buffering for one execution
//!
//! A [`StagingArea`] sits in front of a [`Store`]: writes are recorded in a
//! [`StateDelta`] and reads see them before the persisted state. Nothing
//! reaches the store until the delta is committed.

use std::collections::BTreeMap;

use sandlot_types::{StorageKey, Value};

use crate::Store;

/// One staged change; `new == None` deletes the key
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaEntry {
    /// Written key
    pub key: StorageKey,
    /// Persisted value before the first write
    pub old: Option<Value>,
    /// Value after the last write
    pub new: Option<Value>,
}

impl DeltaEntry {
    /// False when the writes ended where they started
    pub fn is_change(&self) -> bool {
        self.old != self.new
    }
}

/// Ordered set of staged writes, in first-write order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDelta {
    entries: Vec<DeltaEntry>,
    positions: BTreeMap<StorageKey, usize>,
}

impl StateDelta {
    /// Empty delta
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a write; `old` is kept only the first time a key is written
    pub fn record(&mut self, key: StorageKey, old: Option<Value>, new: Option<Value>) {
        match self.positions.get(&key) {
            Some(&position) => self.entries[position].new = new,
            None => {
                self.positions.insert(key.clone(), self.entries.len());
                self.entries.push(DeltaEntry { key, old, new });
            }
        }
    }

    /// Staged value of `key`: `Some(None)` is a staged deletion
    pub fn staged(&self, key: &StorageKey) -> Option<&Option<Value>> {
        self.positions.get(key).map(|&position| &self.entries[position].new)
    }

    /// All staged entries, in first-write order
    pub fn entries(&self) -> &[DeltaEntry] {
        &self.entries
    }

    /// Entries whose value actually changed
    pub fn changes(&self) -> impl Iterator<Item = &DeltaEntry> {
        self.entries.iter().filter(|e| e.is_change())
    }

    /// Number of staged keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Nothing staged
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Read-your-writes overlay over a store
#[derive(Debug)]
pub struct StagingArea<'s> {
    store: &'s Store,
    delta: StateDelta,
}

impl<'s> StagingArea<'s> {
    /// Fresh overlay with nothing staged
    pub fn new(store: &'s Store) -> Self {
        Self {
            store,
            delta: StateDelta::new(),
        }
    }

    /// Current value of `key`, staged writes first
    pub fn get(&self, key: &StorageKey) -> Option<Value> {
        match self.delta.staged(key) {
            Some(staged) => staged.clone(),
            None => self.store.lookup(key).cloned(),
        }
    }

    /// Stage a write, or a deletion with `None`
    pub fn stage(&mut self, key: StorageKey, value: Option<Value>) {
        let old = if self.delta.staged(&key).is_some() {
            None
        } else {
            self.store.lookup(&key).cloned()
        };
        self.delta.record(key, old, value);
    }

    /// Staged writes so far
    pub fn delta(&self) -> &StateDelta {
        &self.delta
    }

    /// Give up the overlay, keeping the staged writes
    pub fn into_delta(self) -> StateDelta {
        self.delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> StorageKey {
        StorageKey::with_subkey("con_a", "balances", [name])
    }

    #[test]
    fn test_first_old_value_is_kept() {
        let mut delta = StateDelta::new();
        delta.record(key("a"), Some(Value::Int(1)), Some(Value::Int(2)));
        delta.record(key("b"), None, Some(Value::Int(5)));
        delta.record(key("a"), Some(Value::Int(2)), Some(Value::Int(3)));

        assert_eq!(delta.len(), 2);
        assert_eq!(delta.entries()[0].key, key("a"));
        assert_eq!(delta.entries()[0].old, Some(Value::Int(1)));
        assert_eq!(delta.entries()[0].new, Some(Value::Int(3)));
        assert_eq!(delta.staged(&key("b")), Some(&Some(Value::Int(5))));
        assert_eq!(delta.staged(&key("c")), None);
    }

    #[test]
    fn test_overlay_reads_its_own_writes() {
        let mut store = Store::in_memory();
        let mut seed = StateDelta::new();
        seed.record(key("a"), None, Some(Value::Int(10)));
        store.commit(&seed).unwrap();

        let mut staging = StagingArea::new(&store);
        assert_eq!(staging.get(&key("a")), Some(Value::Int(10)));
        staging.stage(key("a"), Some(Value::Int(11)));
        staging.stage(key("a"), None);
        staging.stage(key("b"), Some(Value::Int(1)));

        assert_eq!(staging.get(&key("a")), None);
        assert_eq!(staging.get(&key("b")), Some(Value::Int(1)));
        assert_eq!(store.lookup(&key("a")), Some(&Value::Int(10)));

        let delta = staging.into_delta();
        assert_eq!(delta.entries()[0].old, Some(Value::Int(10)));
        assert_eq!(delta.entries()[0].new, None);
    }

    #[test]
    fn test_write_back_of_same_value_is_not_a_change() {
        let mut delta = StateDelta::new();
        delta.record(key("a"), Some(Value::Int(1)), Some(Value::Int(2)));
        delta.record(key("a"), None, Some(Value::Int(1)));
        assert_eq!(delta.changes().count(), 0);
    }
}
