//! Standard library for sandlot contracts
//!
//! The library is a closed table of capabilities, built once and shared
//! immutably by the compiler (name resolution, arity checks) and the executor
//! (dispatch, cost accounting). Artifacts record [`STDLIB_VERSION`]; an
//! executor refuses artifacts compiled against a different table.

#![warn(missing_docs)]

mod capability;
mod error;
mod functions;

pub use capability::{Arity, Capability, CapabilityKind, NativeFn};
pub use error::StdlibError;

use indexmap::IndexMap;
use lazy_static::lazy_static;

/// Version of the capability table. Bump on any change to names, arity or
/// semantics.
pub const STDLIB_VERSION: u32 = 1;

/// Cost of a conversion or other constant-time builtin
pub const SIMPLE_CALL_COST: u64 = 20;

/// Cost of a hash call before per-byte charges
pub const HASH_BASE_COST: u64 = 100;

/// Cost of `print` before per-byte charges (matches the log host call)
pub const PRINT_BASE_COST: u64 = 100;

/// Cost of setting up a `range` loop
pub const RANGE_SETUP_COST: u64 = 10;

/// The capability table
#[derive(Debug)]
pub struct Environment {
    version: u32,
    functions: IndexMap<&'static str, Capability>,
    namespaces: IndexMap<&'static str, IndexMap<&'static str, Capability>>,
}

impl Environment {
    fn new(version: u32) -> Self {
        Self {
            version,
            functions: IndexMap::new(),
            namespaces: IndexMap::new(),
        }
    }

    fn register(&mut self, capability: Capability) {
        self.functions.insert(capability.name, capability);
    }

    fn register_member(&mut self, namespace: &'static str, member: &'static str, capability: Capability) {
        self.namespaces
            .entry(namespace)
            .or_default()
            .insert(member, capability);
    }

    /// Table version recorded in artifacts
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Global function by name
    pub fn function(&self, name: &str) -> Option<&Capability> {
        self.functions.get(name)
    }

    /// Whether `name` is a library namespace such as `hashlib`
    pub fn is_namespace(&self, name: &str) -> bool {
        self.namespaces.contains_key(name)
    }

    /// Namespaced function (`hashlib.sha256`)
    pub fn member(&self, namespace: &str, member: &str) -> Option<&Capability> {
        self.namespaces.get(namespace)?.get(member)
    }

    /// All global function names in registration order
    pub fn function_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.functions.keys().copied()
    }
}

fn build_stdlib() -> Environment {
    use functions::*;

    let mut env = Environment::new(STDLIB_VERSION);

    // Conversions
    env.register(Capability::native("str", Arity::Exact(1), SIMPLE_CALL_COST, 1, to_str));
    env.register(Capability::native("int", Arity::Exact(1), SIMPLE_CALL_COST, 0, to_int));
    env.register(Capability::native("bool", Arity::Exact(1), SIMPLE_CALL_COST, 0, to_bool));
    env.register(Capability::native("decimal", Arity::Exact(1), SIMPLE_CALL_COST, 0, to_decimal));
    env.register(Capability::native("len", Arity::Exact(1), SIMPLE_CALL_COST, 0, len));
    env.register(Capability::native("abs", Arity::Exact(1), SIMPLE_CALL_COST, 0, abs));
    env.register(Capability::native("min", Arity::AtLeast(1), SIMPLE_CALL_COST, 2, min));
    env.register(Capability::native("max", Arity::AtLeast(1), SIMPLE_CALL_COST, 2, max));
    env.register(Capability::native("sum", Arity::Range(1, 2), SIMPLE_CALL_COST, 2, sum));
    env.register(Capability::native("sorted", Arity::Range(1, 2), SIMPLE_CALL_COST, 5, sorted));
    env.register(Capability::native("list", Arity::Range(0, 1), SIMPLE_CALL_COST, 1, to_list));
    env.register(Capability::native("dict", Arity::Range(0, 1), SIMPLE_CALL_COST, 1, to_dict));

    // Decimals
    env.register(Capability::native("round", Arity::Range(1, 2), SIMPLE_CALL_COST, 0, round));
    env.register(Capability::native("decimal_round", Arity::Exact(3), SIMPLE_CALL_COST, 0, decimal_round));

    // Collections
    env.register(Capability::native("dict_keys", Arity::Exact(1), SIMPLE_CALL_COST, 1, dict_keys));
    env.register(Capability::native("dict_values", Arity::Exact(1), SIMPLE_CALL_COST, 1, dict_values));
    env.register(Capability::native("list_append", Arity::Exact(2), SIMPLE_CALL_COST, 1, list_append));

    // Host capabilities
    env.register(Capability {
        name: "print",
        arity: Arity::AtLeast(0),
        base_cost: PRINT_BASE_COST,
        per_item_cost: 1,
        kind: CapabilityKind::Print,
    });
    env.register(Capability {
        name: "range",
        arity: Arity::Range(1, 3),
        base_cost: RANGE_SETUP_COST,
        per_item_cost: 0,
        kind: CapabilityKind::Range,
    });

    // Hashing
    env.register_member(
        "hashlib",
        "sha256",
        Capability::native("hashlib.sha256", Arity::Exact(1), HASH_BASE_COST, 1, sha256),
    );
    env.register_member(
        "hashlib",
        "sha3",
        Capability::native("hashlib.sha3", Arity::Exact(1), HASH_BASE_COST, 1, sha3),
    );

    env
}

lazy_static! {
    static ref STDLIB: Environment = build_stdlib();
}

/// The shared capability table
pub fn stdlib() -> &'static Environment {
    &STDLIB
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use sandlot_types::{Decimal, Value};

    use super::*;

    fn call(name: &str, args: &[Value]) -> Result<Value, StdlibError> {
        stdlib().function(name).unwrap().invoke(args)
    }

    fn dec(text: &str) -> Value {
        Value::Decimal(Decimal::parse(text).unwrap())
    }

    #[test]
    fn test_table_is_versioned_and_closed() {
        let env = stdlib();
        assert_eq!(env.version(), STDLIB_VERSION);
        assert!(env.function("open").is_none());
        assert!(env.function("eval").is_none());
        assert!(env.is_namespace("hashlib"));
        assert!(env.member("hashlib", "md5").is_none());
        assert_eq!(env.function_names().next(), Some("str"));
    }

    #[test]
    fn test_conversions() {
        assert_eq!(call("str", &[Value::Int(5)]).unwrap(), Value::from("5"));
        assert_eq!(call("int", &[dec("-2.9")]).unwrap(), Value::Int(-2));
        assert_eq!(call("int", &[Value::from("1_000")]).unwrap(), Value::Int(1000));
        assert_eq!(call("decimal", &[Value::from("1.25")]).unwrap(), dec("1.25"));
        assert_eq!(call("bool", &[Value::from("")]).unwrap(), Value::Bool(false));
        assert!(call("int", &[Value::from("abc")]).is_err());
    }

    #[test]
    fn test_str_of_large_list_is_refused() {
        let chunk = Value::Str("x".repeat(sandlot_types::MAX_STRING_LEN / 2));
        let list = Value::list(vec![chunk.clone(), chunk]).unwrap();
        assert!(matches!(
            call("str", &[list]),
            Err(StdlibError::Value(sandlot_types::ValueError::StringTooLong(_)))
        ));
    }

    #[test]
    fn test_rounding() {
        assert_eq!(call("round", &[dec("2.5")]).unwrap(), Value::Int(2));
        assert_eq!(call("round", &[dec("1.005"), Value::Int(2)]).unwrap(), dec("1.00"));
        assert_eq!(
            call("decimal_round", &[dec("1.005"), Value::Int(2), Value::from("half_up")]).unwrap(),
            dec("1.01")
        );
        assert!(call("decimal_round", &[dec("1"), Value::Int(2), Value::from("sideways")]).is_err());
    }

    #[test]
    fn test_aggregates() {
        let list = Value::List(vec![Value::Int(3), Value::Int(1), Value::Int(2)]);
        assert_eq!(call("min", &[list.clone()]).unwrap(), Value::Int(1));
        assert_eq!(call("max", &[Value::Int(4), Value::Int(9)]).unwrap(), Value::Int(9));
        assert_eq!(call("sum", &[list.clone()]).unwrap(), Value::Int(6));
        assert_eq!(
            call("sorted", &[list.clone(), Value::Bool(true)]).unwrap(),
            Value::List(vec![Value::Int(3), Value::Int(2), Value::Int(1)])
        );
        assert!(call("min", &[Value::List(vec![])]).is_err());
        assert!(call("sorted", &[Value::List(vec![Value::Int(1), Value::from("a")])]).is_err());
    }

    #[test]
    fn test_collections() {
        let mut entries = BTreeMap::new();
        entries.insert("b".to_string(), Value::Int(2));
        entries.insert("a".to_string(), Value::Int(1));
        let map = Value::Map(entries);
        assert_eq!(
            call("dict_keys", &[map.clone()]).unwrap(),
            Value::List(vec![Value::from("a"), Value::from("b")])
        );
        assert_eq!(
            call("dict_values", &[map]).unwrap(),
            Value::List(vec![Value::Int(1), Value::Int(2)])
        );
        assert_eq!(
            call("list_append", &[Value::List(vec![]), Value::Int(7)]).unwrap(),
            Value::List(vec![Value::Int(7)])
        );
    }

    #[test]
    fn test_hashing() {
        let sha256 = stdlib().member("hashlib", "sha256").unwrap();
        assert_eq!(
            sha256.invoke(&[Value::from("abc")]).unwrap(),
            Value::from("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
        let sha3 = stdlib().member("hashlib", "sha3").unwrap();
        assert_eq!(
            sha3.invoke(&[Value::from("abc")]).unwrap(),
            Value::from("3a985da74fe225b2045c172d6bd390bd855f086e3e9d525b46bfe24511431532")
        );
    }

    #[test]
    fn test_arity_and_cost() {
        let len = stdlib().function("len").unwrap();
        assert!(matches!(len.invoke(&[]), Err(StdlibError::Arity { given: 0, .. })));

        let sha = stdlib().member("hashlib", "sha256").unwrap();
        assert_eq!(sha.cost(&[Value::from("abcd")]), HASH_BASE_COST + 4);

        let print = stdlib().function("print").unwrap();
        assert!(matches!(print.kind, CapabilityKind::Print));
        assert!(print.invoke(&[]).is_err());
    }
}
