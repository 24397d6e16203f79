//! Runtime values
//!
//! Everything a contract can hold in a local, pass across a call boundary or
//! persist in storage is a [`Value`]. Maps are keyed by strings and kept in a
//! `BTreeMap` so that two logically equal maps always encode to the same bytes.

use std::{cmp::Ordering, collections::BTreeMap, fmt, mem};

use serde::{Deserialize, Serialize};

use crate::{
    decimal::{Decimal, RoundingMode},
    error::ValueError,
};

/// Maximum number of elements a list or map may hold
pub const MAX_COLLECTION_LEN: usize = 4096;

/// Maximum length of a string, in bytes
pub const MAX_STRING_LEN: usize = 65_536;

/// Maximum nesting of lists and maps; a scalar has depth 0
pub const MAX_VALUE_DEPTH: usize = 32;

const MAX_DECIMAL_EXPONENT: i128 = 1024;

/// Dynamically typed contract value
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    /// `None`
    #[default]
    None,
    /// `True` / `False`
    Bool(bool),
    /// Signed integer
    Int(i128),
    /// Fixed-precision decimal
    Decimal(Decimal),
    /// UTF-8 string
    Str(String),
    /// Ordered list
    List(Vec<Value>),
    /// String-keyed map
    Map(BTreeMap<String, Value>),
}

/// Binary arithmetic operators understood by [`Value::binary`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArithOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/` (always produces a decimal)
    Div,
    /// `//`
    FloorDiv,
    /// `%`
    Mod,
    /// `**`
    Pow,
}

impl ArithOp {
    /// Source-level symbol
    pub fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
            ArithOp::FloorDiv => "//",
            ArithOp::Mod => "%",
            ArithOp::Pow => "**",
        }
    }
}

impl Value {
    /// Type name as reported in runtime faults
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Decimal(_) => "decimal",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Map(_) => "dict",
        }
    }

    /// Python-style truthiness
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Decimal(d) => *d != Decimal::ZERO,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::Map(m) => !m.is_empty(),
        }
    }

    /// Render a value as one fragment of a storage sub-key
    pub fn key_fragment(&self) -> Result<String, ValueError> {
        match self {
            Value::Str(s) => Ok(s.clone()),
            Value::Int(i) => Ok(i.to_string()),
            Value::Decimal(d) => Ok(d.to_string()),
            Value::Bool(true) => Ok("True".to_string()),
            Value::Bool(false) => Ok("False".to_string()),
            other => Err(ValueError::InvalidKey(other.type_name())),
        }
    }

    /// Length of strings and collections
    pub fn len(&self) -> Result<usize, ValueError> {
        match self {
            Value::Str(s) => Ok(s.chars().count()),
            Value::List(l) => Ok(l.len()),
            Value::Map(m) => Ok(m.len()),
            other => Err(ValueError::Unsupported {
                op: "len",
                ty: other.type_name(),
            }),
        }
    }

    /// Numeric view as a decimal
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Int(i) => Decimal::from_int(*i).ok(),
            Value::Decimal(d) => Some(*d),
            Value::Bool(b) => Some(if *b { Decimal::ONE } else { Decimal::ZERO }),
            _ => None,
        }
    }

    /// Build a string, enforcing the length cap
    pub fn string(text: String) -> Result<Value, ValueError> {
        if text.len() > MAX_STRING_LEN {
            return Err(ValueError::StringTooLong(text.len()));
        }
        Ok(Value::Str(text))
    }

    /// Build a list, enforcing the collection and nesting caps
    pub fn list(items: Vec<Value>) -> Result<Value, ValueError> {
        if items.len() > MAX_COLLECTION_LEN {
            return Err(ValueError::CollectionTooLarge(items.len()));
        }
        check_nesting(items.iter())?;
        Ok(Value::List(items))
    }

    /// Build a map, enforcing the collection and nesting caps
    pub fn map(entries: BTreeMap<String, Value>) -> Result<Value, ValueError> {
        if entries.len() > MAX_COLLECTION_LEN {
            return Err(ValueError::CollectionTooLarge(entries.len()));
        }
        check_nesting(entries.values())?;
        Ok(Value::Map(entries))
    }

    /// Levels of list and map nesting
    pub fn depth(&self) -> usize {
        let children = match self {
            Value::List(items) => items.iter().map(Value::depth).max(),
            Value::Map(entries) => entries.values().map(Value::depth).max(),
            _ => return 0,
        };
        children.unwrap_or(0).saturating_add(1)
    }

    /// Approximate heap and inline bytes held by the value
    pub fn footprint(&self) -> usize {
        let own = mem::size_of::<Value>();
        match self {
            Value::Str(s) => own.saturating_add(s.len()),
            Value::List(items) => items.iter().map(Value::footprint).fold(own, usize::saturating_add),
            Value::Map(entries) => entries
                .iter()
                .map(|(k, v)| k.len().saturating_add(v.footprint()))
                .fold(own, usize::saturating_add),
            _ => own,
        }
    }

    /// Display form, failing instead of producing more than
    /// [`MAX_STRING_LEN`] bytes
    pub fn render(&self) -> Result<String, ValueError> {
        let mut out = BoundedText::default();
        match fmt::write(&mut out, format_args!("{self}")) {
            Ok(()) => Ok(out.text),
            Err(_) => Err(ValueError::StringTooLong(out.attempted)),
        }
    }

    /// Apply an arithmetic operator
    pub fn binary(&self, op: ArithOp, rhs: &Value) -> Result<Value, ValueError> {
        let mismatch = || ValueError::TypeMismatch {
            op: op.symbol(),
            left: self.type_name(),
            right: rhs.type_name(),
        };

        match (self, rhs) {
            (Value::Int(a), Value::Int(b)) => int_binary(*a, op, *b),
            (Value::Str(a), Value::Str(b)) if op == ArithOp::Add => {
                let len = a.len().saturating_add(b.len());
                if len > MAX_STRING_LEN {
                    return Err(ValueError::StringTooLong(len));
                }
                Ok(Value::Str(format!("{a}{b}")))
            }
            (Value::List(a), Value::List(b)) if op == ArithOp::Add => {
                Value::list(a.iter().chain(b.iter()).cloned().collect())
            }
            (Value::Int(_) | Value::Decimal(_), Value::Int(_) | Value::Decimal(_)) => {
                let (a, b) = (
                    self.as_decimal().ok_or(ValueError::Overflow)?,
                    rhs.as_decimal().ok_or(ValueError::Overflow)?,
                );
                decimal_binary(a, op, b)
            }
            _ => Err(mismatch()),
        }
    }

    /// Unary minus
    pub fn negate(&self) -> Result<Value, ValueError> {
        match self {
            Value::Int(i) => i.checked_neg().map(Value::Int).ok_or(ValueError::Overflow),
            Value::Decimal(d) => Ok(Value::Decimal(d.checked_neg()?)),
            other => Err(ValueError::Unsupported {
                op: "unary -",
                ty: other.type_name(),
            }),
        }
    }

    /// Ordering used by `<`, `<=`, `>`, `>=`, `min`, `max` and `sorted`
    pub fn compare(&self, rhs: &Value) -> Result<Ordering, ValueError> {
        match (self, rhs) {
            (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
            (Value::Decimal(a), Value::Decimal(b)) => Ok(a.cmp(b)),
            (Value::Decimal(a), Value::Int(b)) => Ok(a.cmp_int(*b)),
            (Value::Int(a), Value::Decimal(b)) => Ok(b.cmp_int(*a).reverse()),
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Ok(a.cmp(b)),
            _ => Err(ValueError::TypeMismatch {
                op: "comparison",
                left: self.type_name(),
                right: rhs.type_name(),
            }),
        }
    }

    /// Equality with numeric cross-type comparison (`1 == 1.0`)
    pub fn loose_eq(&self, rhs: &Value) -> bool {
        match (self, rhs) {
            (Value::Int(_), Value::Decimal(_)) | (Value::Decimal(_), Value::Int(_)) => {
                matches!(self.compare(rhs), Ok(Ordering::Equal))
            }
            _ => self == rhs,
        }
    }

    /// Membership test for `in` / `not in`
    pub fn contains(&self, needle: &Value) -> Result<bool, ValueError> {
        match self {
            Value::List(items) => Ok(items.iter().any(|item| item.loose_eq(needle))),
            Value::Map(entries) => match needle {
                Value::Str(key) => Ok(entries.contains_key(key)),
                _ => Ok(false),
            },
            Value::Str(haystack) => match needle {
                Value::Str(s) => Ok(haystack.contains(s.as_str())),
                other => Err(ValueError::TypeMismatch {
                    op: "in",
                    left: other.type_name(),
                    right: "str",
                }),
            },
            other => Err(ValueError::Unsupported {
                op: "in",
                ty: other.type_name(),
            }),
        }
    }

    /// Subscript a list, map or string held in a local
    pub fn index(&self, index: &Value) -> Result<Value, ValueError> {
        match (self, index) {
            (Value::List(items), Value::Int(i)) => {
                resolve_index(*i, items.len()).map(|idx| items[idx].clone())
            }
            (Value::Str(s), Value::Int(i)) => {
                let chars: Vec<char> = s.chars().collect();
                resolve_index(*i, chars.len()).map(|idx| Value::Str(chars[idx].to_string()))
            }
            (Value::Map(entries), Value::Str(key)) => entries
                .get(key)
                .cloned()
                .ok_or_else(|| ValueError::KeyNotFound(key.clone())),
            (container, idx) => Err(ValueError::TypeMismatch {
                op: "[]",
                left: container.type_name(),
                right: idx.type_name(),
            }),
        }
    }
}

fn check_nesting<'v>(children: impl Iterator<Item = &'v Value>) -> Result<(), ValueError> {
    for child in children {
        if child.depth() >= MAX_VALUE_DEPTH {
            return Err(ValueError::NestingTooDeep(MAX_VALUE_DEPTH));
        }
    }
    Ok(())
}

/// `fmt::Write` sink that refuses to grow past [`MAX_STRING_LEN`]
#[derive(Default)]
struct BoundedText {
    text: String,
    attempted: usize,
}

impl fmt::Write for BoundedText {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.attempted = self.text.len().saturating_add(s.len());
        if self.attempted > MAX_STRING_LEN {
            return Err(fmt::Error);
        }
        self.text.push_str(s);
        Ok(())
    }
}

fn resolve_index(index: i128, len: usize) -> Result<usize, ValueError> {
    let len_i = i128::try_from(len).map_err(|_| ValueError::Overflow)?;
    let resolved = if index < 0 { index + len_i } else { index };
    if resolved < 0 || resolved >= len_i {
        return Err(ValueError::IndexOutOfRange { index, len });
    }
    usize::try_from(resolved).map_err(|_| ValueError::Overflow)
}

fn int_binary(a: i128, op: ArithOp, b: i128) -> Result<Value, ValueError> {
    let result = match op {
        ArithOp::Add => a.checked_add(b),
        ArithOp::Sub => a.checked_sub(b),
        ArithOp::Mul => a.checked_mul(b),
        ArithOp::Div => {
            let a = Decimal::from_int(a)?;
            let b = Decimal::from_int(b)?;
            return decimal_binary(a, ArithOp::Div, b);
        }
        ArithOp::FloorDiv | ArithOp::Mod => {
            if b == 0 {
                return Err(ValueError::DivisionByZero);
            }
            let q = a.checked_div_euclid(b).ok_or(ValueError::Overflow)?;
            let r = a.checked_rem_euclid(b).ok_or(ValueError::Overflow)?;
            // Python floors toward negative infinity; euclid differs when b < 0
            let (q, r) = if b < 0 && r != 0 { (q - 1, r + b) } else { (q, r) };
            Some(if op == ArithOp::FloorDiv { q } else { r })
        }
        ArithOp::Pow => {
            let exp = u32::try_from(b).map_err(|_| ValueError::NegativeExponent)?;
            a.checked_pow(exp)
        }
    };
    result.map(Value::Int).ok_or(ValueError::Overflow)
}

fn decimal_binary(a: Decimal, op: ArithOp, b: Decimal) -> Result<Value, ValueError> {
    let mode = RoundingMode::HalfEven;
    let result = match op {
        ArithOp::Add => a.checked_add(b)?,
        ArithOp::Sub => a.checked_sub(b)?,
        ArithOp::Mul => a.checked_mul(b, mode)?,
        ArithOp::Div => a.checked_div(b, mode)?,
        ArithOp::FloorDiv => a.checked_div(b, RoundingMode::Floor)?.round(0, RoundingMode::Floor)?,
        ArithOp::Mod => {
            let q = a.checked_div(b, RoundingMode::Floor)?.round(0, RoundingMode::Floor)?;
            a.checked_sub(q.checked_mul(b, mode)?)?
        }
        ArithOp::Pow => {
            if !b.is_integer() || b.is_negative() {
                return Err(ValueError::NegativeExponent);
            }
            if b.trunc() > MAX_DECIMAL_EXPONENT {
                return Err(ValueError::Overflow);
            }
            let mut acc = Decimal::ONE;
            for _ in 0..b.trunc() {
                acc = acc.checked_mul(a, mode)?;
            }
            acc
        }
    };
    Ok(Value::Decimal(result))
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write_repr(f, item)?;
                }
                f.write_str("]")
            }
            Value::Map(entries) => {
                f.write_str("{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "'{key}': ")?;
                    write_repr(f, value)?;
                }
                f.write_str("}")
            }
        }
    }
}

// Written straight into the formatter so a bounded sink can stop early
fn write_repr(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value {
        Value::Str(s) => write!(f, "'{s}'"),
        other => write!(f, "{other}"),
    }
}

impl From<i128> for Value {
    fn from(value: i128) -> Self {
        Value::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Value::Decimal(value)
    }
}
