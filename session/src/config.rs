//! Session configuration

use std::path::PathBuf;

use sandlot_program_runtime::{Config, DEFAULT_COMPUTE_BUDGET};

/// Directory holding one sub-directory per session
pub const ENV_SESSION_ROOT: &str = "SANDLOT_SESSION_ROOT";
/// Budget for calls that do not request one
pub const ENV_DEFAULT_BUDGET: &str = "SANDLOT_DEFAULT_BUDGET";
/// Forward contract `print` output to the log
pub const ENV_DEBUG: &str = "SANDLOT_DEBUG";

/// Settings shared by every session of a manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Storage root; `None` keeps sessions in memory
    pub root: Option<PathBuf>,
    /// Budget for calls that do not request one
    pub default_budget: u64,
    /// Debug mode for the executor
    pub debug: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            root: None,
            default_budget: DEFAULT_COMPUTE_BUDGET,
            debug: false,
        }
    }
}

impl SessionConfig {
    /// Configuration from `SANDLOT_*` environment variables
    ///
    /// Unset or malformed variables fall back to the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(root) = std::env::var(ENV_SESSION_ROOT) {
            if !root.trim().is_empty() {
                config.root = Some(PathBuf::from(root.trim()));
            }
        }
        if let Ok(budget) = std::env::var(ENV_DEFAULT_BUDGET) {
            match budget.trim().parse::<u64>() {
                Ok(budget) => config.default_budget = budget,
                Err(_) => log::warn!("ignoring {ENV_DEFAULT_BUDGET}={budget}: not an integer"),
            }
        }
        if let Ok(debug) = std::env::var(ENV_DEBUG) {
            config.debug = parse_flag(&debug);
        }
        config
    }

    /// Same settings with sessions stored under `root`
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Executor limits derived from these settings
    pub fn runtime(&self) -> Config {
        Config {
            default_budget: self.default_budget,
            debug_mode: self.debug,
            ..Config::default()
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_config() {
        let config = SessionConfig {
            default_budget: 5_000,
            debug: true,
            ..SessionConfig::default()
        };
        let runtime = config.runtime();
        assert_eq!(runtime.default_budget, 5_000);
        assert!(runtime.debug_mode);
        assert_eq!(runtime.max_call_depth, Config::default().max_call_depth);
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("1"));
        assert!(parse_flag(" TRUE "));
        assert!(!parse_flag("0"));
        assert!(!parse_flag(""));
    }
}
