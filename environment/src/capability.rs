use std::fmt;

use sandlot_types::Value;

use crate::StdlibError;

/// Signature of a pure library function
pub type NativeFn = fn(&[Value]) -> Result<Value, StdlibError>;

/// Accepted number of positional arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly `n`
    Exact(usize),
    /// Between `min` and `max` inclusive
    Range(usize, usize),
    /// At least `n`
    AtLeast(usize),
}

impl Arity {
    /// Whether `count` arguments are accepted
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exact(n) => count == n,
            Arity::Range(min, max) => (min..=max).contains(&count),
            Arity::AtLeast(n) => count >= n,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{n}"),
            Arity::Range(min, max) => write!(f, "{min} to {max}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
        }
    }
}

/// How the executor dispatches a capability
#[derive(Clone, Copy)]
pub enum CapabilityKind {
    /// Pure function over values
    Native(NativeFn),
    /// `print`, routed to the host log call
    Print,
    /// `range`, only valid as a `for` iterable
    Range,
}

impl fmt::Debug for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityKind::Native(_) => f.write_str("Native"),
            CapabilityKind::Print => f.write_str("Print"),
            CapabilityKind::Range => f.write_str("Range"),
        }
    }
}

/// One entry of the capability table
#[derive(Debug, Clone)]
pub struct Capability {
    /// Qualified name (`len`, `hashlib.sha256`)
    pub name: &'static str,
    /// Accepted positional arguments
    pub arity: Arity,
    /// Fixed compute cost of a call
    pub base_cost: u64,
    /// Additional cost per element or byte of input
    pub per_item_cost: u64,
    /// Dispatch
    pub kind: CapabilityKind,
}

impl Capability {
    pub(crate) const fn native(name: &'static str, arity: Arity, base_cost: u64, per_item_cost: u64, f: NativeFn) -> Self {
        Self {
            name,
            arity,
            base_cost,
            per_item_cost,
            kind: CapabilityKind::Native(f),
        }
    }

    /// Compute units charged for a call with these arguments
    pub fn cost(&self, args: &[Value]) -> u64 {
        let items: u64 = args.iter().map(input_size).fold(0u64, u64::saturating_add);
        self.base_cost
            .saturating_add(self.per_item_cost.saturating_mul(items))
    }

    /// Check the argument count, then run a native capability
    pub fn invoke(&self, args: &[Value]) -> Result<Value, StdlibError> {
        self.check_arity(args.len())?;
        match self.kind {
            CapabilityKind::Native(f) => f(args),
            CapabilityKind::Print | CapabilityKind::Range => Err(StdlibError::invalid(
                self.name,
                "is handled by the executor",
            )),
        }
    }

    /// Reject a call with the wrong number of arguments
    pub fn check_arity(&self, given: usize) -> Result<(), StdlibError> {
        if self.arity.accepts(given) {
            return Ok(());
        }
        Err(StdlibError::Arity {
            function: self.name,
            expected: self.arity.to_string(),
            given,
        })
    }
}

fn input_size(value: &Value) -> u64 {
    let size = match value {
        Value::Str(s) => s.len(),
        Value::List(items) => items.len(),
        Value::Map(entries) => entries.len(),
        _ => 1,
    };
    u64::try_from(size).unwrap_or(u64::MAX)
}
