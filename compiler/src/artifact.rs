//! Compiled contract representation

use sandlot_types::{Value, MAX_COLLECTION_LEN};
use serde::{Deserialize, Serialize};

use crate::ir::Function;

/// Index into [`Manifest::slots`]
pub type SlotId = usize;

/// Index into [`Artifact::imports`]
pub type ImportId = usize;

/// Index into [`Artifact::functions`]
pub type FunctionId = usize;

/// Shape of a storage variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotKind {
    /// Keyed map, accessed by subscript
    Hash,
    /// Single value, accessed by `.get()` / `.set()`
    Variable,
}

/// A declared storage variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    /// Name bound in the declaring contract
    pub name: String,
    /// Contract owning the underlying keys
    pub contract: String,
    /// Variable name inside the owning contract
    pub variable: String,
    /// Hash or Variable
    pub kind: SlotKind,
    /// Value read for missing keys
    pub default: Value,
    /// Declared with `ForeignHash` / `ForeignVariable`
    pub foreign: bool,
}

/// Storage slot table of one artifact
///
/// Host calls authorize every storage access against this table: reads need
/// the key's contract to appear here, writes need it to be the owner.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Manifest {
    owner: String,
    slots: Vec<Slot>,
}

impl Manifest {
    pub(crate) fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            slots: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, slot: Slot) -> SlotId {
        self.slots.push(slot);
        self.slots.len() - 1
    }

    /// Contract the manifest belongs to
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Slot by id
    pub fn slot(&self, id: SlotId) -> Option<&Slot> {
        self.slots.get(id)
    }

    /// Slot id by declared name
    pub fn find(&self, name: &str) -> Option<SlotId> {
        self.slots.iter().position(|s| s.name == name)
    }

    /// All slots in declaration order
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Whether keys of `contract` may be read through this manifest
    pub fn declares_contract(&self, contract: &str) -> bool {
        contract == self.owner || self.slots.iter().any(|s| s.contract == contract)
    }
}

/// Runtime-checked parameter annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Annotation {
    /// `str`
    Str,
    /// `int`
    Int,
    /// `float`: decimals, and integers promoted to decimals
    Float,
    /// `bool`
    Bool,
    /// `dict`
    Dict,
    /// `list`
    List,
    /// `Any`
    Any,
}

impl Annotation {
    /// Parse an annotation name
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "str" => Annotation::Str,
            "int" => Annotation::Int,
            "float" => Annotation::Float,
            "bool" => Annotation::Bool,
            "dict" => Annotation::Dict,
            "list" => Annotation::List,
            "Any" => Annotation::Any,
            _ => return None,
        })
    }

    /// Source spelling
    pub fn name(self) -> &'static str {
        match self {
            Annotation::Str => "str",
            Annotation::Int => "int",
            Annotation::Float => "float",
            Annotation::Bool => "bool",
            Annotation::Dict => "dict",
            Annotation::List => "list",
            Annotation::Any => "Any",
        }
    }

    /// Check a value, returning it coerced where the annotation allows
    pub fn coerce(self, value: Value) -> Result<Value, Value> {
        match (self, value) {
            (Annotation::Any, v) => Ok(v),
            (Annotation::Str, v @ Value::Str(_)) => Ok(v),
            (Annotation::Int, v @ Value::Int(_)) => Ok(v),
            (Annotation::Bool, v @ Value::Bool(_)) => Ok(v),
            (Annotation::Float, v @ Value::Decimal(_)) => Ok(v),
            (Annotation::Float, Value::Int(i)) => sandlot_types::Decimal::from_int(i)
                .map(Value::Decimal)
                .map_err(|_| Value::Int(i)),
            (Annotation::Dict, Value::Map(m)) if m.len() <= MAX_COLLECTION_LEN => Ok(Value::Map(m)),
            (Annotation::List, Value::List(l)) if l.len() <= MAX_COLLECTION_LEN => Ok(Value::List(l)),
            (_, other) => Err(other),
        }
    }
}

/// Declared parameter of a function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Parameter name
    pub name: String,
    /// Annotation, checked at call time
    pub annotation: Option<Annotation>,
    /// Constant default value
    pub default: Option<Value>,
}

/// Externally visible description of an exported function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    /// Function name
    pub name: String,
    /// Parameters in declaration order
    pub params: Vec<Parameter>,
    /// Docstring, if present
    pub docstring: Option<String>,
}

/// What the compiler needs to know about an imported contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractInterface {
    /// Contract name
    pub name: String,
    /// Exported signatures
    pub exports: Vec<Signature>,
}

impl ContractInterface {
    /// Exported signature by name
    pub fn export(&self, name: &str) -> Option<&Signature> {
        self.exports.iter().find(|s| s.name == name)
    }
}

/// Output of a successful compilation
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    /// Contract name
    pub name: String,
    /// Standard library table version the artifact was built against
    pub stdlib_version: u32,
    /// Hex blake3 digest of the source text
    pub source_hash: String,
    /// Storage slot table
    pub manifest: Manifest,
    /// Import call table: contracts this artifact may call, by index
    pub imports: Vec<String>,
    /// Module constants in declaration order
    pub constants: Vec<(String, Value)>,
    /// Exported signatures in declaration order
    pub exports: Vec<Signature>,
    /// Rewritten function bodies
    pub functions: Vec<Function>,
    /// The `@construct` function, if any
    pub constructor: Option<FunctionId>,
}

impl Artifact {
    /// Function id by name
    pub fn function_id(&self, name: &str) -> Option<FunctionId> {
        self.functions.iter().position(|f| f.name == name)
    }

    /// Exported function id by name
    pub fn export_id(&self, name: &str) -> Option<FunctionId> {
        self.function_id(name)
            .filter(|id| self.functions[*id].visibility == crate::ir::Visibility::Export)
    }

    /// Signature of an exported function
    pub fn signature(&self, name: &str) -> Option<&Signature> {
        self.exports.iter().find(|s| s.name == name)
    }

    /// Interface other contracts compile against
    pub fn interface(&self) -> ContractInterface {
        ContractInterface {
            name: self.name.clone(),
            exports: self.exports.clone(),
        }
    }

    /// Sorted names of exported functions
    pub fn export_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.exports.iter().map(|s| s.name.clone()).collect();
        names.sort();
        names
    }
}
