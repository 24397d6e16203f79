//! Inclusion and absence proofs against a state root

use sandlot_types::{StorageKey, Value};
use serde::{Deserialize, Serialize};

use crate::merkle::{empty_root, leaf_hash, root_from_path, Digest};

/// Proof that `key` holds `value` under a root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InclusionProof {
    /// Proven key
    pub key: StorageKey,
    /// Value stored under the key
    pub value: Value,
    /// Position of the leaf in canonical order
    pub index: u64,
    /// Number of leaves in the tree
    pub count: u64,
    /// Sibling hashes from the leaf upwards
    pub path: Vec<Digest>,
}

impl InclusionProof {
    /// Check the proof against `root`
    pub fn verify(&self, root: &Digest) -> bool {
        let Ok(leaf) = leaf_hash(&self.key, &self.value) else {
            return false;
        };
        root_from_path(leaf, self.index, self.count, &self.path).as_ref() == Some(root)
    }
}

/// Proof that `key` is not present: the leaves on either side are adjacent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbsenceProof {
    /// Key shown to be absent
    pub key: StorageKey,
    /// Number of leaves in the tree
    pub count: u64,
    /// Greatest leaf below the key, if any
    pub left: Option<InclusionProof>,
    /// Smallest leaf above the key, if any
    pub right: Option<InclusionProof>,
}

impl AbsenceProof {
    /// Check the proof against `root`
    pub fn verify(&self, root: &Digest) -> bool {
        if self.count == 0 {
            return self.left.is_none() && self.right.is_none() && *root == empty_root();
        }
        let neighbour_ok = |proof: &InclusionProof| proof.count == self.count && proof.verify(root);

        match (&self.left, &self.right) {
            (Some(left), Some(right)) => {
                neighbour_ok(left)
                    && neighbour_ok(right)
                    && left.key < self.key
                    && self.key < right.key
                    && left.index.checked_add(1) == Some(right.index)
            }
            (Some(left), None) => {
                neighbour_ok(left) && left.key < self.key && left.index.checked_add(1) == Some(self.count)
            }
            (None, Some(right)) => neighbour_ok(right) && self.key < right.key && right.index == 0,
            (None, None) => false,
        }
    }
}

/// Either kind of state proof
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MerkleProof {
    /// Key is present
    Inclusion(InclusionProof),
    /// Key is absent
    Absence(AbsenceProof),
}

impl MerkleProof {
    /// Key this proof is about
    pub fn key(&self) -> &StorageKey {
        match self {
            MerkleProof::Inclusion(p) => &p.key,
            MerkleProof::Absence(p) => &p.key,
        }
    }

    /// Value proven present, `None` for an absence proof
    pub fn value(&self) -> Option<&Value> {
        match self {
            MerkleProof::Inclusion(p) => Some(&p.value),
            MerkleProof::Absence(_) => None,
        }
    }

    /// Check that under `root`, `key` holds `claimed` (`None` meaning absent)
    pub fn verify(&self, root: &Digest, key: &StorageKey, claimed: Option<&Value>) -> bool {
        if self.key() != key {
            return false;
        }
        match (self, claimed) {
            (MerkleProof::Inclusion(p), Some(value)) => &p.value == value && p.verify(root),
            (MerkleProof::Absence(p), None) => p.verify(root),
            _ => false,
        }
    }
}
