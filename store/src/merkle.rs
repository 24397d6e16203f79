//! Merkle commitment over the sorted key/value set
//!
//! Leaves are `blake3(0x00 || key || value)` in canonical key order. Inner
//! nodes are `blake3(0x01 || left || right)`; an odd node at the end of a
//! level is promoted unchanged. The published root binds the leaf count,
//! `blake3(0x02 || count_le || tree_root)`, which is what lets an absence
//! proof rely on two leaves being adjacent.

use std::fmt;

use sandlot_types::{StorageKey, Value};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;

const LEAF_TAG: u8 = 0x00;
const NODE_TAG: u8 = 0x01;
const ROOT_TAG: u8 = 0x02;
const EMPTY_STATE: &[u8] = b"sandlot:empty-state";

/// 32-byte blake3 digest
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    /// Lowercase hex rendering
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a hex rendering
    pub fn from_hex(text: &str) -> Option<Self> {
        let bytes = hex::decode(text).ok()?;
        Some(Self(bytes.try_into().ok()?))
    }
}

impl From<blake3::Hash> for Digest {
    fn from(hash: blake3::Hash) -> Self {
        Self(*hash.as_bytes())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

/// Canonical value bytes
pub fn encode_value(value: &Value) -> StoreResult<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Hash of one key/value leaf
pub fn leaf_hash(key: &StorageKey, value: &Value) -> StoreResult<Digest> {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[LEAF_TAG]);
    hasher.update(&key.encode());
    hasher.update(&encode_value(value)?);
    Ok(hasher.finalize().into())
}

fn node_hash(left: &Digest, right: &Digest) -> Digest {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[NODE_TAG]);
    hasher.update(&left.0);
    hasher.update(&right.0);
    hasher.finalize().into()
}

/// Root of a store with no entries
pub fn empty_root() -> Digest {
    blake3::hash(EMPTY_STATE).into()
}

fn bind_count(count: u64, tree_root: &Digest) -> Digest {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[ROOT_TAG]);
    hasher.update(&count.to_le_bytes());
    hasher.update(&tree_root.0);
    hasher.finalize().into()
}

fn next_level(level: &[Digest]) -> Vec<Digest> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [left, right] => node_hash(left, right),
            [single] => *single,
            _ => unreachable!("chunks(2) yields one or two items"),
        })
        .collect()
}

/// Every level of the tree, leaves first
pub(crate) fn levels(leaves: Vec<Digest>) -> Vec<Vec<Digest>> {
    let mut levels = vec![leaves];
    while levels.last().is_some_and(|l| l.len() > 1) {
        let next = next_level(levels.last().map(Vec::as_slice).unwrap_or_default());
        levels.push(next);
    }
    levels
}

/// Root over leaves already in canonical order
pub fn root_of(leaves: Vec<Digest>) -> Digest {
    let count = leaves.len() as u64;
    if count == 0 {
        return empty_root();
    }
    let levels = levels(leaves);
    let top = levels
        .last()
        .and_then(|l| l.first())
        .copied()
        .unwrap_or_else(empty_root);
    bind_count(count, &top)
}

/// Sibling path for the leaf at `index`
pub(crate) fn path(levels: &[Vec<Digest>], mut index: usize) -> Vec<Digest> {
    let mut path = Vec::new();
    for level in levels.iter().take(levels.len().saturating_sub(1)) {
        let sibling = index ^ 1;
        if sibling < level.len() {
            path.push(level[sibling]);
        }
        index /= 2;
    }
    path
}

/// Recompute the root from a leaf, its position and its sibling path
pub(crate) fn root_from_path(leaf: Digest, index: u64, count: u64, path: &[Digest]) -> Option<Digest> {
    if count == 0 || index >= count {
        return None;
    }
    let mut hash = leaf;
    let mut index = index;
    let mut width = count;
    let mut siblings = path.iter();
    while width > 1 {
        let sibling = index ^ 1;
        if sibling < width {
            let other = siblings.next()?;
            hash = if index % 2 == 0 {
                node_hash(&hash, other)
            } else {
                node_hash(other, &hash)
            };
        }
        index /= 2;
        width = width.div_ceil(2);
    }
    if siblings.next().is_some() {
        return None;
    }
    Some(bind_count(count, &hash))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaves(n: u8) -> Vec<Digest> {
        (0..n).map(|i| Digest(blake3::hash(&[i]).into())).collect()
    }

    #[test]
    fn test_empty_root_is_domain_separated() {
        assert_eq!(root_of(Vec::new()), empty_root());
        assert_ne!(empty_root(), Digest(blake3::hash(b"").into()));
    }

    #[test]
    fn test_paths_recompute_root_for_every_width() {
        for n in 1..=9u8 {
            let leaves = leaves(n);
            let root = root_of(leaves.clone());
            let levels = levels(leaves.clone());
            for (i, leaf) in leaves.iter().enumerate() {
                let path = path(&levels, i);
                assert_eq!(
                    root_from_path(*leaf, i as u64, n as u64, &path),
                    Some(root),
                    "width {n} index {i}"
                );
            }
        }
    }

    #[test]
    fn test_count_is_bound_into_root() {
        let leaves = leaves(3);
        let levels = levels(leaves.clone());
        let path = path(&levels, 2);
        // The same path must not verify under a different leaf count
        assert_ne!(
            root_from_path(leaves[2], 2, 4, &path),
            Some(root_of(leaves.clone()))
        );
        assert_eq!(root_from_path(leaves[0], 5, 3, &path), None);
    }

    #[test]
    fn test_digest_hex_round_trip() {
        let digest = empty_root();
        assert_eq!(Digest::from_hex(&digest.to_hex()), Some(digest));
        assert_eq!(Digest::from_hex("abcd"), None);
    }
}
