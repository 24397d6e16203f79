//! Per-session runtime environment
//!
//! Only `signer`, `now`, `block_num` and `block_hash` are configurable.
//! Values arrive as text, are validated, and are stored in their canonical
//! form; a blank value restores the default.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use sandlot_program_runtime::{ChainContext, DEFAULT_BLOCK_HASH, DEFAULT_BLOCK_NUM, DEFAULT_NOW, DEFAULT_SIGNER};

use crate::error::{SessionError, SessionResult};

/// Configurable environment keys
pub const ENVIRONMENT_KEYS: [&str; 4] = ["signer", "now", "block_num", "block_hash"];

/// Environment as editable text, keyed by name
pub fn environment_map(chain: &ChainContext) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    map.insert("signer".to_string(), chain.signer.clone());
    map.insert("now".to_string(), chain.now.clone());
    map.insert("block_num".to_string(), chain.block_num.to_string());
    map.insert("block_hash".to_string(), chain.block_hash.clone());
    map
}

/// Set `key` from its text form and return the stored text
pub fn set_var(chain: &mut ChainContext, key: &str, value: &str) -> SessionResult<String> {
    let key = checked_key(key)?;
    let value = value.trim();
    if value.is_empty() {
        reset_var(chain, key);
        return Ok(current(chain, key));
    }

    match key {
        "signer" => chain.signer = value.to_string(),
        "now" => chain.now = normalize_timestamp(value)?,
        "block_num" => {
            chain.block_num = parse_int(value)
                .ok_or_else(|| SessionError::InvalidEnvironment("block_num must be an integer".to_string()))?
        }
        _ => chain.block_hash = value.to_string(),
    }
    Ok(current(chain, key))
}

/// Restore the default of `key`; unknown keys are ignored
pub fn remove_var(chain: &mut ChainContext, key: &str) {
    if let Ok(key) = checked_key(key) {
        reset_var(chain, key);
    }
}

fn checked_key(key: &str) -> SessionResult<&'static str> {
    let key = key.trim();
    if key.is_empty() {
        return Err(SessionError::InvalidEnvironment("environment key cannot be empty".to_string()));
    }
    ENVIRONMENT_KEYS
        .iter()
        .copied()
        .find(|known| *known == key)
        .ok_or_else(|| SessionError::InvalidEnvironment(format!("environment key '{key}' is not configurable")))
}

fn reset_var(chain: &mut ChainContext, key: &str) {
    match key {
        "signer" => chain.signer = DEFAULT_SIGNER.to_string(),
        "now" => chain.now = DEFAULT_NOW.to_string(),
        "block_num" => chain.block_num = DEFAULT_BLOCK_NUM,
        _ => chain.block_hash = DEFAULT_BLOCK_HASH.to_string(),
    }
}

fn current(chain: &ChainContext, key: &str) -> String {
    environment_map(chain).remove(key).unwrap_or_default()
}

/// Canonical ISO-8601 form of a timestamp
///
/// Accepts an offset-qualified timestamp, a naive date-time with `T` or a
/// space separator, or a bare date (midnight).
fn normalize_timestamp(text: &str) -> SessionResult<String> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Ok(parsed.format("%Y-%m-%dT%H:%M:%S%.f%:z").to_string());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(parsed.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
        }
    }
    if let Some(midnight) = NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Ok(midnight.format("%Y-%m-%dT%H:%M:%S").to_string());
    }
    Err(SessionError::InvalidEnvironment(format!("invalid ISO format for 'now': '{text}'")))
}

/// Integer literal with an optional sign, `0x`/`0o`/`0b` prefix and `_`
/// digit separators
fn parse_int(text: &str) -> Option<i128> {
    let (negative, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let lower = body.to_ascii_lowercase();
    let (radix, digits) = if let Some(rest) = lower.strip_prefix("0x") {
        (16, rest)
    } else if let Some(rest) = lower.strip_prefix("0o") {
        (8, rest)
    } else if let Some(rest) = lower.strip_prefix("0b") {
        (2, rest)
    } else {
        (10, lower.as_str())
    };

    let digits = digits.strip_prefix('_').filter(|_| radix != 10).unwrap_or(digits);
    if digits.is_empty() || digits.starts_with('_') || digits.ends_with('_') || digits.contains("__") {
        return None;
    }
    let cleaned: String = digits.chars().filter(|c| *c != '_').collect();
    // Decimal literals other than zero cannot have leading zeros
    if radix == 10 && cleaned.len() > 1 && cleaned.starts_with('0') && cleaned.chars().any(|c| c != '0') {
        return None;
    }
    let magnitude = i128::from_str_radix(&cleaned, radix).ok()?;
    if negative {
        magnitude.checked_neg()
    } else {
        Some(magnitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let map = environment_map(&ChainContext::default());
        assert_eq!(map["signer"], "demo");
        assert_eq!(map["now"], "2024-02-01T12:30:00");
        assert_eq!(map["block_num"], "100");
        assert_eq!(map.len(), ENVIRONMENT_KEYS.len());
    }

    #[test]
    fn test_set_and_reset() {
        let mut chain = ChainContext::default();

        assert_eq!(set_var(&mut chain, " signer ", " alice ").unwrap(), "alice");
        assert_eq!(chain.signer, "alice");
        assert_eq!(set_var(&mut chain, "signer", "  ").unwrap(), "demo");

        assert_eq!(set_var(&mut chain, "block_num", "0x10").unwrap(), "16");
        assert_eq!(chain.block_num, 16);
        assert_eq!(set_var(&mut chain, "block_num", "").unwrap(), "100");

        set_var(&mut chain, "block_hash", "0xfeed").unwrap();
        remove_var(&mut chain, "block_hash");
        assert_eq!(chain.block_hash, DEFAULT_BLOCK_HASH);
        remove_var(&mut chain, "unknown");
    }

    #[test]
    fn test_rejects_unknown_and_malformed() {
        let mut chain = ChainContext::default();
        assert!(matches!(set_var(&mut chain, "", "x"), Err(SessionError::InvalidEnvironment(_))));
        assert!(matches!(set_var(&mut chain, "chain_id", "x"), Err(SessionError::InvalidEnvironment(_))));
        assert!(set_var(&mut chain, "block_num", "twelve").is_err());
        assert!(set_var(&mut chain, "now", "yesterday").is_err());
        assert_eq!(chain, ChainContext::default());
    }

    #[test]
    fn test_timestamps() {
        assert_eq!(normalize_timestamp("2024-05-01T10:00:00").unwrap(), "2024-05-01T10:00:00");
        assert_eq!(normalize_timestamp("2024-05-01 10:00:00.5").unwrap(), "2024-05-01T10:00:00.500");
        assert_eq!(normalize_timestamp("2024-05-01").unwrap(), "2024-05-01T00:00:00");
        assert_eq!(
            normalize_timestamp("2024-05-01T10:00:00+02:00").unwrap(),
            "2024-05-01T10:00:00+02:00"
        );
    }

    #[test]
    fn test_integer_literals() {
        assert_eq!(parse_int("42"), Some(42));
        assert_eq!(parse_int("-7"), Some(-7));
        assert_eq!(parse_int("0"), Some(0));
        assert_eq!(parse_int("000"), Some(0));
        assert_eq!(parse_int("1_000"), Some(1000));
        assert_eq!(parse_int("0XfF"), Some(255));
        assert_eq!(parse_int("0b101"), Some(5));
        assert_eq!(parse_int("0o17"), Some(15));
        assert_eq!(parse_int("012"), None);
        assert_eq!(parse_int("1__0"), None);
        assert_eq!(parse_int("0x"), None);
        assert_eq!(parse_int("abc"), None);
    }
}
