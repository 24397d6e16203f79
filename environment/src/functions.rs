//! Native implementations behind the capability table

use std::{cmp::Ordering, collections::BTreeMap};

use sandlot_types::{ArithOp, Decimal, RoundingMode, Value, ValueError, DECIMAL_PLACES};
use sha2::{Digest, Sha256};
use sha3::Sha3_256;

use crate::StdlibError;

type NativeResult = Result<Value, StdlibError>;

fn arg<'a>(args: &'a [Value], index: usize, function: &'static str) -> Result<&'a Value, StdlibError> {
    args.get(index)
        .ok_or_else(|| StdlibError::invalid(function, format!("missing argument {}", index + 1)))
}

fn string_arg<'a>(args: &'a [Value], index: usize, function: &'static str) -> Result<&'a str, StdlibError> {
    match arg(args, index, function)? {
        Value::Str(s) => Ok(s),
        other => Err(StdlibError::invalid(
            function,
            format!("expected str, got {}", other.type_name()),
        )),
    }
}

fn places_arg(args: &[Value], index: usize, function: &'static str) -> Result<u32, StdlibError> {
    match args.get(index) {
        None => Ok(0),
        Some(Value::Int(places)) => u32::try_from(*places)
            .ok()
            .filter(|p| *p <= DECIMAL_PLACES)
            .ok_or_else(|| StdlibError::invalid(function, format!("places must be between 0 and {DECIMAL_PLACES}"))),
        Some(other) => Err(StdlibError::invalid(
            function,
            format!("places must be int, got {}", other.type_name()),
        )),
    }
}

// Conversions

pub(crate) fn to_str(args: &[Value]) -> NativeResult {
    Ok(Value::Str(arg(args, 0, "str")?.render()?))
}

pub(crate) fn to_int(args: &[Value]) -> NativeResult {
    match arg(args, 0, "int")? {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Bool(b) => Ok(Value::Int(i128::from(*b))),
        Value::Decimal(d) => Ok(Value::Int(d.trunc())),
        Value::Str(s) => {
            let digits: String = s.trim().chars().filter(|c| *c != '_').collect();
            digits
                .parse::<i128>()
                .map(Value::Int)
                .map_err(|_| StdlibError::invalid("int", format!("invalid literal '{s}'")))
        }
        other => Err(StdlibError::invalid(
            "int",
            format!("cannot convert {}", other.type_name()),
        )),
    }
}

pub(crate) fn to_bool(args: &[Value]) -> NativeResult {
    Ok(Value::Bool(arg(args, 0, "bool")?.is_truthy()))
}

pub(crate) fn to_decimal(args: &[Value]) -> NativeResult {
    match arg(args, 0, "decimal")? {
        Value::Str(s) => Ok(Value::Decimal(Decimal::parse(s.trim())?)),
        other => other
            .as_decimal()
            .map(Value::Decimal)
            .ok_or_else(|| StdlibError::invalid("decimal", format!("cannot convert {}", other.type_name()))),
    }
}

pub(crate) fn len(args: &[Value]) -> NativeResult {
    let n = arg(args, 0, "len")?.len()?;
    Ok(Value::Int(i128::try_from(n).map_err(|_| ValueError::Overflow)?))
}

pub(crate) fn abs(args: &[Value]) -> NativeResult {
    match arg(args, 0, "abs")? {
        Value::Int(i) => i
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| StdlibError::from(ValueError::Overflow)),
        Value::Decimal(d) => Ok(Value::Decimal(d.abs()?)),
        other => Err(StdlibError::invalid("abs", format!("bad operand type {}", other.type_name()))),
    }
}

fn extreme(args: &[Value], function: &'static str, wanted: Ordering) -> NativeResult {
    let candidates: &[Value] = match args {
        [Value::List(items)] => items,
        [single] => {
            return Err(StdlibError::invalid(
                function,
                format!("expected a list, got {}", single.type_name()),
            ))
        }
        many => many,
    };
    let mut best = candidates
        .first()
        .ok_or_else(|| StdlibError::invalid(function, "arg is an empty sequence"))?;
    for candidate in &candidates[1..] {
        if candidate.compare(best)? == wanted {
            best = candidate;
        }
    }
    Ok(best.clone())
}

pub(crate) fn min(args: &[Value]) -> NativeResult {
    extreme(args, "min", Ordering::Less)
}

pub(crate) fn max(args: &[Value]) -> NativeResult {
    extreme(args, "max", Ordering::Greater)
}

pub(crate) fn sum(args: &[Value]) -> NativeResult {
    let Value::List(items) = arg(args, 0, "sum")? else {
        return Err(StdlibError::invalid("sum", "expected a list"));
    };
    let mut total = args.get(1).cloned().unwrap_or(Value::Int(0));
    for item in items {
        total = total.binary(ArithOp::Add, item)?;
    }
    Ok(total)
}

pub(crate) fn sorted(args: &[Value]) -> NativeResult {
    let mut items = match arg(args, 0, "sorted")? {
        Value::List(items) => items.clone(),
        Value::Map(entries) => entries.keys().cloned().map(Value::Str).collect(),
        other => return Err(StdlibError::invalid("sorted", format!("cannot sort {}", other.type_name()))),
    };
    let reverse = args.get(1).is_some_and(Value::is_truthy);

    let mut failure = None;
    items.sort_by(|a, b| {
        a.compare(b).unwrap_or_else(|e| {
            failure.get_or_insert(e);
            Ordering::Equal
        })
    });
    if let Some(e) = failure {
        return Err(e.into());
    }
    if reverse {
        items.reverse();
    }
    Ok(Value::List(items))
}

pub(crate) fn to_list(args: &[Value]) -> NativeResult {
    match args.first() {
        None => Ok(Value::List(Vec::new())),
        Some(Value::List(items)) => Ok(Value::List(items.clone())),
        Some(Value::Str(s)) => Ok(Value::list(s.chars().map(|c| Value::Str(c.to_string())).collect())?),
        Some(Value::Map(entries)) => Ok(Value::list(entries.keys().cloned().map(Value::Str).collect())?),
        Some(other) => Err(StdlibError::invalid("list", format!("cannot convert {}", other.type_name()))),
    }
}

pub(crate) fn to_dict(args: &[Value]) -> NativeResult {
    match args.first() {
        None => Ok(Value::Map(BTreeMap::new())),
        Some(Value::Map(entries)) => Ok(Value::Map(entries.clone())),
        Some(Value::List(pairs)) => {
            let mut entries = BTreeMap::new();
            for pair in pairs {
                match pair {
                    Value::List(kv) if kv.len() == 2 => {
                        entries.insert(kv[0].key_fragment()?, kv[1].clone());
                    }
                    _ => return Err(StdlibError::invalid("dict", "expected a list of [key, value] pairs")),
                }
            }
            Ok(Value::map(entries)?)
        }
        Some(other) => Err(StdlibError::invalid("dict", format!("cannot convert {}", other.type_name()))),
    }
}

// Decimals

pub(crate) fn round(args: &[Value]) -> NativeResult {
    let places = places_arg(args, 1, "round")?;
    match arg(args, 0, "round")? {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Decimal(d) => {
            let rounded = d.round(places, RoundingMode::HalfEven)?;
            if args.len() == 1 {
                Ok(Value::Int(rounded.trunc()))
            } else {
                Ok(Value::Decimal(rounded))
            }
        }
        other => Err(StdlibError::invalid("round", format!("cannot round {}", other.type_name()))),
    }
}

pub(crate) fn decimal_round(args: &[Value]) -> NativeResult {
    let value = arg(args, 0, "decimal_round")?
        .as_decimal()
        .ok_or_else(|| StdlibError::invalid("decimal_round", "expected a number"))?;
    let places = places_arg(args, 1, "decimal_round")?;
    let mode: RoundingMode = string_arg(args, 2, "decimal_round")?.parse()?;
    Ok(Value::Decimal(value.round(places, mode)?))
}

// Hashing

pub(crate) fn sha256(args: &[Value]) -> NativeResult {
    let data = string_arg(args, 0, "hashlib.sha256")?;
    Ok(Value::Str(hex::encode(Sha256::digest(data.as_bytes()))))
}

pub(crate) fn sha3(args: &[Value]) -> NativeResult {
    let data = string_arg(args, 0, "hashlib.sha3")?;
    Ok(Value::Str(hex::encode(Sha3_256::digest(data.as_bytes()))))
}

// Collections

fn map_arg<'a>(args: &'a [Value], function: &'static str) -> Result<&'a BTreeMap<String, Value>, StdlibError> {
    match arg(args, 0, function)? {
        Value::Map(entries) => Ok(entries),
        other => Err(StdlibError::invalid(function, format!("expected dict, got {}", other.type_name()))),
    }
}

pub(crate) fn dict_keys(args: &[Value]) -> NativeResult {
    let entries = map_arg(args, "dict_keys")?;
    Ok(Value::list(entries.keys().cloned().map(Value::Str).collect())?)
}

pub(crate) fn dict_values(args: &[Value]) -> NativeResult {
    let entries = map_arg(args, "dict_values")?;
    Ok(Value::list(entries.values().cloned().collect())?)
}

pub(crate) fn list_append(args: &[Value]) -> NativeResult {
    let Value::List(items) = arg(args, 0, "list_append")? else {
        return Err(StdlibError::invalid("list_append", "expected a list"));
    };
    let mut items = items.clone();
    items.push(arg(args, 1, "list_append")?.clone());
    Ok(Value::list(items)?)
}
