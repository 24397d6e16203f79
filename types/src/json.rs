//! Conversion between contract values and JSON
//!
//! Arguments and results cross the session boundary as JSON. Decimals are
//! written as `{"__fixed__": "1.5"}` so they survive a round trip without
//! passing through floating point; plain JSON floats are read as decimals.

use std::collections::BTreeMap;

use serde_json::{Map, Number, Value as Json};
use thiserror::Error;

use crate::{
    decimal::Decimal,
    error::ValueError,
    value::{Value, MAX_VALUE_DEPTH},
};

/// Marker key for decimals encoded as JSON objects
pub const FIXED_MARKER: &str = "__fixed__";

/// JSON conversion failures
#[derive(Debug, Error)]
pub enum JsonError {
    /// Number outside the supported integer range
    #[error("number {0} is out of range")]
    NumberOutOfRange(String),
    /// Malformed decimal payload
    #[error("invalid decimal '{0}'")]
    InvalidDecimal(String),
    /// Document breaks a value limit (size, length or nesting)
    #[error(transparent)]
    Limit(#[from] ValueError),
}

impl Value {
    /// Decode a JSON document into a contract value
    pub fn from_json(json: &Json) -> Result<Value, JsonError> {
        decode(json, 0)
    }

    /// Encode a value as JSON
    pub fn to_json(&self) -> Json {
        match self {
            Value::None => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => match i64::try_from(*i) {
                Ok(small) => Json::Number(Number::from(small)),
                // serde_json numbers are 64-bit without arbitrary precision
                Err(_) => Json::String(i.to_string()),
            },
            Value::Decimal(d) => {
                let mut obj = Map::new();
                obj.insert(FIXED_MARKER.to_string(), Json::String(d.to_string()));
                Json::Object(obj)
            }
            Value::Str(s) => Json::String(s.clone()),
            Value::List(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(entries) => Json::Object(
                entries.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Display-oriented JSON: decimals as plain strings, as in state dumps
    pub fn to_display_json(&self) -> Json {
        match self {
            Value::Decimal(d) => Json::String(d.to_string()),
            Value::List(items) => Json::Array(items.iter().map(Value::to_display_json).collect()),
            Value::Map(entries) => Json::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_display_json()))
                    .collect(),
            ),
            other => other.to_json(),
        }
    }
}

// Depth is checked on the way down so hostile documents never recurse far
fn decode(json: &Json, depth: usize) -> Result<Value, JsonError> {
    let nested = match json {
        Json::Array(_) | Json::Object(_) => depth.saturating_add(1),
        _ => depth,
    };
    if nested > MAX_VALUE_DEPTH {
        return Err(ValueError::NestingTooDeep(MAX_VALUE_DEPTH).into());
    }
    Ok(match json {
        Json::Null => Value::None,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => number_to_value(n)?,
        Json::String(s) => Value::string(s.clone())?,
        Json::Array(items) => {
            let items = items
                .iter()
                .map(|item| decode(item, nested))
                .collect::<Result<Vec<_>, _>>()?;
            Value::list(items)?
        }
        Json::Object(entries) => {
            if entries.len() == 1 {
                if let Some(Json::String(text)) = entries.get(FIXED_MARKER) {
                    let d = Decimal::parse(text).map_err(|_| JsonError::InvalidDecimal(text.clone()))?;
                    return Ok(Value::Decimal(d));
                }
            }
            let mut map = BTreeMap::new();
            for (k, v) in entries {
                map.insert(k.clone(), decode(v, nested)?);
            }
            Value::map(map)?
        }
    })
}

fn number_to_value(n: &Number) -> Result<Value, JsonError> {
    if let Some(i) = n.as_i64() {
        return Ok(Value::Int(i128::from(i)));
    }
    if let Some(u) = n.as_u64() {
        return Ok(Value::Int(i128::from(u)));
    }
    // floats go through their shortest textual form, never through f64 math
    let text = n.to_string();
    Decimal::parse(&text)
        .map(Value::Decimal)
        .map_err(|_| JsonError::NumberOutOfRange(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scalars() {
        assert_eq!(Value::from_json(&json!(5)).unwrap(), Value::Int(5));
        assert_eq!(Value::from_json(&json!("x")).unwrap(), Value::Str("x".into()));
        assert_eq!(Value::from_json(&json!(null)).unwrap(), Value::None);
        assert_eq!(
            Value::from_json(&json!(1.25)).unwrap(),
            Value::Decimal(Decimal::parse("1.25").unwrap())
        );
    }

    #[test]
    fn test_fixed_marker() {
        let value = Value::from_json(&json!({"__fixed__": "0.1"})).unwrap();
        assert_eq!(value, Value::Decimal(Decimal::parse("0.1").unwrap()));
        assert_eq!(value.to_json(), json!({"__fixed__": "0.1"}));
        assert_eq!(value.to_display_json(), json!("0.1"));
        assert!(Value::from_json(&json!({"__fixed__": "zz"})).is_err());
    }

    #[test]
    fn test_nested() {
        let doc = json!({"to": "bob", "amounts": [1, 2, {"__fixed__": "3.5"}]});
        let value = Value::from_json(&doc).unwrap();
        assert_eq!(value.to_json(), doc);
    }

    #[test]
    fn test_nesting_limit() {
        let mut doc = json!(1);
        for _ in 0..MAX_VALUE_DEPTH {
            doc = json!([doc]);
        }
        assert_eq!(Value::from_json(&doc).unwrap().depth(), MAX_VALUE_DEPTH);

        let deeper = json!({ "inner": doc });
        assert!(matches!(
            Value::from_json(&deeper),
            Err(JsonError::Limit(ValueError::NestingTooDeep(_)))
        ));
    }

    #[test]
    fn test_long_string_rejected() {
        let doc = json!("x".repeat(crate::value::MAX_STRING_LEN + 1));
        assert!(matches!(
            Value::from_json(&doc),
            Err(JsonError::Limit(ValueError::StringTooLong(_)))
        ));
    }
}
