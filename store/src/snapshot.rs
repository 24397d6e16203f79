//! On-disk snapshot of the persisted key set
//!
//! The whole state lives in one bincode file, replaced atomically: the new
//! contents go to a temporary file which is synced and renamed over the old
//! one, then the directory entry is synced. Once the rename has happened
//! the new snapshot is the state; a failed directory sync only loses
//! durability of the rename and is logged.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::Path;

use sandlot_types::{StorageKey, Value};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Snapshot file name inside a session directory
pub const SNAPSHOT_FILE: &str = "state.bin";
const TEMP_FILE: &str = "state.bin.tmp";

/// Version of the snapshot layout
pub const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    entries: Vec<(&'a StorageKey, &'a Value)>,
}

#[derive(Deserialize)]
struct Snapshot {
    version: u32,
    entries: Vec<(StorageKey, Value)>,
}

/// Atomically replace the snapshot in `dir` with `entries`
pub(crate) fn write(dir: &Path, entries: &BTreeMap<StorageKey, Value>) -> StoreResult<()> {
    write_with(dir, entries, sync_dir)
}

fn write_with(
    dir: &Path,
    entries: &BTreeMap<StorageKey, Value>,
    sync: impl FnOnce(&Path) -> StoreResult<()>,
) -> StoreResult<()> {
    let bytes = bincode::serialize(&SnapshotRef {
        version: FORMAT_VERSION,
        entries: entries.iter().collect(),
    })?;

    fs::create_dir_all(dir)?;
    let temp = dir.join(TEMP_FILE);
    let result = (|| -> StoreResult<()> {
        let mut file = File::create(&temp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&temp, dir.join(SNAPSHOT_FILE))?;
        Ok(())
    })();
    if result.is_err() {
        let _ = fs::remove_file(&temp);
        return result;
    }
    if let Err(err) = sync(dir) {
        log::warn!("snapshot replaced in {} but directory sync failed: {err}", dir.display());
    }
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> StoreResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> StoreResult<()> {
    Ok(())
}

/// Load the snapshot in `dir`; a missing file is an empty state
pub(crate) fn read(dir: &Path) -> StoreResult<BTreeMap<StorageKey, Value>> {
    let bytes = match fs::read(dir.join(SNAPSHOT_FILE)) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(err) => return Err(err.into()),
    };
    let snapshot: Snapshot =
        bincode::deserialize(&bytes).map_err(|err| StoreError::Corrupt(err.to_string()))?;
    if snapshot.version != FORMAT_VERSION {
        return Err(StoreError::Corrupt(format!(
            "unsupported snapshot version {} (expected {FORMAT_VERSION})",
            snapshot.version
        )));
    }

    let count = snapshot.entries.len();
    let entries: BTreeMap<_, _> = snapshot.entries.into_iter().collect();
    if entries.len() != count {
        return Err(StoreError::Corrupt("duplicate keys in snapshot".to_string()));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_snapshot_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let mut entries = BTreeMap::new();
        entries.insert(StorageKey::new("con_a", "owner"), Value::Str("alice".into()));
        entries.insert(StorageKey::with_subkey("con_a", "balances", ["bob"]), Value::Int(7));

        write(dir.path(), &entries).unwrap();
        assert!(!dir.path().join(TEMP_FILE).exists());
        assert_eq!(read(dir.path()).unwrap(), entries);
    }

    #[test]
    fn test_directory_sync_failure_keeps_the_new_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let mut entries = BTreeMap::new();
        entries.insert(StorageKey::new("con_a", "owner"), Value::Str("alice".into()));

        let failing = |_: &Path| -> StoreResult<()> { Err(std::io::Error::other("fsync refused").into()) };
        write_with(dir.path(), &entries, failing).unwrap();
        assert_eq!(read(dir.path()).unwrap(), entries);
        assert!(!dir.path().join(TEMP_FILE).exists());
    }

    #[test]
    fn test_garbage_and_future_versions_are_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(SNAPSHOT_FILE), b"\x01\x02").unwrap();
        assert!(matches!(read(dir.path()), Err(StoreError::Corrupt(_))));

        let future = bincode::serialize(&SnapshotRef {
            version: FORMAT_VERSION + 1,
            entries: Vec::new(),
        })
        .unwrap();
        fs::write(dir.path().join(SNAPSHOT_FILE), future).unwrap();
        let err = read(dir.path()).unwrap_err();
        assert!(err.to_string().contains("unsupported snapshot version"));
    }
}
