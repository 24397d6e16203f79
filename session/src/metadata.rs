//! `session.json`: identity and environment of a persisted session

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use sandlot_program_runtime::ChainContext;
use serde::{Deserialize, Serialize};

use crate::error::SessionResult;

/// Metadata file inside a session directory
pub const METADATA_FILE: &str = "session.json";

/// Persisted description of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// 32-character lowercase hex id
    pub session_id: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last metadata change
    pub updated_at: DateTime<Utc>,
    /// Runtime environment
    #[serde(default)]
    pub environment: ChainContext,
}

impl SessionMetadata {
    /// Fresh metadata with the default environment
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            created_at: now,
            updated_at: now,
            environment: ChainContext::default(),
        }
    }

    /// Whether `dir` holds a session
    pub fn exists(dir: &Path) -> bool {
        dir.join(METADATA_FILE).is_file()
    }

    /// Read `dir/session.json`
    pub fn load(dir: &Path) -> SessionResult<Self> {
        let bytes = fs::read(dir.join(METADATA_FILE))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Write `dir/session.json` through a temporary file
    pub fn save(&self, dir: &Path) -> SessionResult<()> {
        fs::create_dir_all(dir)?;
        let tmp = dir.join(format!("{METADATA_FILE}.tmp"));
        fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        fs::rename(&tmp, dir.join(METADATA_FILE))?;
        Ok(())
    }

    /// Bump `updated_at`
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut metadata = SessionMetadata::new("0123456789abcdef0123456789abcdef");
        metadata.environment.signer = "tester".to_string();

        assert!(!SessionMetadata::exists(dir.path()));
        metadata.save(dir.path()).unwrap();
        assert!(SessionMetadata::exists(dir.path()));

        let loaded = SessionMetadata::load(dir.path()).unwrap();
        assert_eq!(loaded, metadata);
        assert_eq!(loaded.environment.signer, "tester");
    }
}
