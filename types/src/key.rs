//! Storage keys
//!
//! A storage key names one unit of persisted contract state:
//! `(contract, variable, optional sub-key)`. The derived ordering compares the
//! tuple field by field, which is the canonical order used for merkle leaves.

use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// Separator between the contract and variable parts of a rendered key
pub const VARIABLE_SEPARATOR: char = '.';

/// Separator between sub-key fragments
pub const SUBKEY_SEPARATOR: char = ':';

/// Address of one persisted value
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StorageKey {
    /// Owning contract
    pub contract: String,
    /// Declared storage variable
    pub variable: String,
    /// Sub-key for `Hash` entries
    pub subkey: Option<String>,
}

impl StorageKey {
    /// Key of a `Variable` slot (or of a contract-level internal value)
    pub fn new(contract: impl Into<String>, variable: impl Into<String>) -> Self {
        Self {
            contract: contract.into(),
            variable: variable.into(),
            subkey: None,
        }
    }

    /// Key of a `Hash` entry; multi-part sub-keys are joined with `:`
    pub fn with_subkey<I, S>(contract: impl Into<String>, variable: impl Into<String>, parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = parts.into_iter().map(|p| p.as_ref().to_string()).join(&SUBKEY_SEPARATOR.to_string());
        Self {
            contract: contract.into(),
            variable: variable.into(),
            subkey: Some(joined),
        }
    }

    /// Parse the rendered form `contract.variable[:subkey]`
    pub fn parse(text: &str) -> Option<Self> {
        let (contract, rest) = text.split_once(VARIABLE_SEPARATOR)?;
        let (variable, subkey) = match rest.split_once(SUBKEY_SEPARATOR) {
            Some((v, s)) => (v, Some(s.to_string())),
            None => (rest, None),
        };
        if contract.is_empty() || variable.is_empty() {
            return None;
        }
        Some(Self {
            contract: contract.to_string(),
            variable: variable.to_string(),
            subkey,
        })
    }

    /// True for bookkeeping keys such as `__code__`
    pub fn is_internal(&self) -> bool {
        self.variable.starts_with("__")
    }

    /// Key as shown to users, without the contract prefix
    pub fn local_name(&self) -> String {
        match &self.subkey {
            Some(sub) => format!("{}{SUBKEY_SEPARATOR}{sub}", self.variable),
            None => self.variable.clone(),
        }
    }

    /// Unambiguous byte encoding: every part is length-prefixed and the
    /// optional sub-key is tagged, so distinct tuples never collide
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            self.contract.len() + self.variable.len() + self.subkey.as_ref().map_or(0, String::len) + 13,
        );
        for part in [&self.contract, &self.variable] {
            out.extend_from_slice(&(part.len() as u32).to_le_bytes());
            out.extend_from_slice(part.as_bytes());
        }
        match &self.subkey {
            Some(sub) => {
                out.push(1);
                out.extend_from_slice(&(sub.len() as u32).to_le_bytes());
                out.extend_from_slice(sub.as_bytes());
            }
            None => out.push(0),
        }
        out
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{VARIABLE_SEPARATOR}{}", self.contract, self.local_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_and_parse() {
        let key = StorageKey::with_subkey("con_token", "balances", ["alice", "bob"]);
        assert_eq!(key.to_string(), "con_token.balances:alice:bob");
        assert_eq!(StorageKey::parse("con_token.balances:alice:bob"), Some(key));
        assert_eq!(StorageKey::parse("con_token.owner"), Some(StorageKey::new("con_token", "owner")));
        assert_eq!(StorageKey::parse("nodot"), None);
    }

    #[test]
    fn test_canonical_order() {
        let plain = StorageKey::new("a", "v");
        let sub = StorageKey::with_subkey("a", "v", ["x"]);
        let other = StorageKey::new("b", "a");
        let mut keys = vec![other.clone(), sub.clone(), plain.clone()];
        keys.sort();
        assert_eq!(keys, vec![plain, sub, other]);
    }

    #[test]
    fn test_encoding_is_unambiguous() {
        let a = StorageKey::new("ab", "c");
        let b = StorageKey::new("a", "bc");
        assert_ne!(a.encode(), b.encode());
        let c = StorageKey::with_subkey("a", "b", [""]);
        assert_ne!(StorageKey::new("a", "b").encode(), c.encode());
    }

    #[test]
    fn test_internal_keys() {
        assert!(StorageKey::new("c", "__code__").is_internal());
        assert!(!StorageKey::new("c", "balances").is_internal());
    }
}
