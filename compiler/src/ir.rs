//! Executable representation of contract functions
//!
//! Names are resolved: locals are indices into a frame, storage is addressed
//! through manifest slots, calls name their target by id or import index.
//! Every block starts with a [`Stmt::Checkpoint`] carrying the static cost of
//! its straight-line statements.

pub use sandlot_ast::{CmpOp, Span};
use sandlot_types::{ArithOp, Value};

use crate::artifact::{FunctionId, ImportId, Parameter, SlotId};

/// Index into a frame's locals
pub type LocalId = usize;

/// How a function may be invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// `@export`: callable by users and other contracts
    Export,
    /// `@construct`: run once at deploy time
    Construct,
    /// Undecorated: callable only from inside the contract
    Private,
}

/// A compiled function
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    /// Function name
    pub name: String,
    /// Invocation rights
    pub visibility: Visibility,
    /// Parameters, occupying the first locals
    pub params: Vec<Parameter>,
    /// Names of all locals, parameters first
    pub locals: Vec<String>,
    /// Body
    pub body: Vec<Stmt>,
    /// Location of the definition
    pub span: Span,
}

/// Fields readable through `ctx` and the environment names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextField {
    /// `ctx.caller`: the invoking account or contract
    Caller,
    /// `ctx.signer`: the account that signed the outermost call
    Signer,
    /// `ctx.this`: the executing contract
    This,
    /// `now`
    Now,
    /// `block_num`
    BlockNum,
    /// `block_hash`
    BlockHash,
}

/// Statements
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Charge compute units before running the rest of the block
    Checkpoint(u64),
    /// `local = value`
    Assign {
        /// Target local
        local: LocalId,
        /// Value
        value: Expr,
    },
    /// `local[index] = value` on a list or dict held in a local
    SetIndex {
        /// Container local
        local: LocalId,
        /// Index
        index: Expr,
        /// Value
        value: Expr,
    },
    /// `slot[subkey] = value` / `slot.set(value)`
    StorageWrite {
        /// Manifest slot
        slot: SlotId,
        /// Sub-key parts
        subkey: Vec<Expr>,
        /// Value
        value: Expr,
        /// Location
        span: Span,
    },
    /// `slot[subkey] op= value`
    StorageUpdate {
        /// Manifest slot
        slot: SlotId,
        /// Sub-key parts
        subkey: Vec<Expr>,
        /// Arithmetic operator
        op: ArithOp,
        /// Right operand
        value: Expr,
        /// Location
        span: Span,
    },
    /// Expression evaluated for effect
    Expr(Expr),
    /// Conditional
    If {
        /// Condition
        cond: Expr,
        /// Taken branch
        then: Vec<Stmt>,
        /// Other branch
        orelse: Vec<Stmt>,
    },
    /// `for local in range(start, stop, step)`
    ForRange {
        /// Loop variable
        local: LocalId,
        /// First value
        start: Expr,
        /// Exclusive bound
        stop: Expr,
        /// Increment, never zero at run time
        step: Expr,
        /// Body, re-entered (and re-charged) per iteration
        body: Vec<Stmt>,
    },
    /// `for local in iterable`
    ForEach {
        /// Loop variable
        local: LocalId,
        /// List, dict (keys) or string (characters)
        iter: Expr,
        /// Body
        body: Vec<Stmt>,
    },
    /// `return`
    Return(Option<Expr>),
    /// `assert cond, message`
    Assert {
        /// Condition
        cond: Expr,
        /// Failure message
        message: Option<Expr>,
        /// Location
        span: Span,
    },
    /// `break`
    Break,
    /// `continue`
    Continue,
}

/// Expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Literal or folded constant
    Const(Value),
    /// Read a local
    Local(LocalId),
    /// `[a, b]`
    List(Vec<Expr>),
    /// `{k: v}`
    Dict(Vec<(Expr, Expr)>),
    /// Arithmetic
    Binary {
        /// Operator
        op: ArithOp,
        /// Left operand
        lhs: Box<Expr>,
        /// Right operand
        rhs: Box<Expr>,
    },
    /// `-x`
    Neg(Box<Expr>),
    /// `+x`
    Plus(Box<Expr>),
    /// `not x`
    Not(Box<Expr>),
    /// Comparison
    Compare {
        /// Operator
        op: CmpOp,
        /// Left operand
        lhs: Box<Expr>,
        /// Right operand
        rhs: Box<Expr>,
    },
    /// Short-circuit `and`
    And(Box<Expr>, Box<Expr>),
    /// Short-circuit `or`
    Or(Box<Expr>, Box<Expr>),
    /// `then if cond else orelse`
    IfExp {
        /// Condition
        cond: Box<Expr>,
        /// Value when true
        then: Box<Expr>,
        /// Value when false
        orelse: Box<Expr>,
    },
    /// Subscript of a value held in a local or produced by an expression
    Index {
        /// Container
        value: Box<Expr>,
        /// Index
        index: Box<Expr>,
    },
    /// `slot[subkey]` / `slot.get()`
    StorageRead {
        /// Manifest slot
        slot: SlotId,
        /// Sub-key parts
        subkey: Vec<Expr>,
    },
    /// `ctx.*` and environment names
    Context(ContextField),
    /// Call a function of the same contract; arguments in parameter order
    CallLocal {
        /// Callee
        function: FunctionId,
        /// Arguments, defaults filled in
        args: Vec<Expr>,
    },
    /// Call an exported function of an imported contract
    CallContract {
        /// Index into the import table
        import: ImportId,
        /// Exported function name
        function: String,
        /// Arguments in parameter order, defaults filled in
        args: Vec<Expr>,
        /// Location
        span: Span,
    },
    /// Call a standard library capability
    Builtin {
        /// Qualified capability name
        name: String,
        /// Positional arguments
        args: Vec<Expr>,
    },
    /// `print(...)`
    Print(Vec<Expr>),
}
