//! Syntax tree for the contract language
//!
//! The parser produces this tree verbatim; the compiler lints it and lowers
//! it into the executable IR. Constructs the language refuses (classes,
//! `try`, lambdas, ...) are still represented, as [`StmtKind::Forbidden`] and
//! [`ExprKind::Forbidden`], so the linter can name them with a location.

mod span;

pub use span::Span;

use sandlot_types::ArithOp;

/// A parsed contract
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    /// Top-level items in source order
    pub items: Vec<Item>,
}

/// A top-level item
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    /// `import name`
    Import {
        /// Imported contract name
        name: String,
        /// Location
        span: Span,
    },
    /// `name = expr`: storage declarations and module constants
    Assign {
        /// Bound name
        target: String,
        /// Right-hand side
        value: Expr,
        /// Location
        span: Span,
    },
    /// `def ...`
    Function(FunctionDef),
    /// Any other statement at module level
    Stmt(Stmt),
}

/// Function definition
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    /// Function name
    pub name: String,
    /// Parameters in declaration order
    pub params: Vec<Param>,
    /// `@decorator` names
    pub decorators: Vec<Decorator>,
    /// Leading string literal, if any
    pub docstring: Option<String>,
    /// Body statements (docstring removed)
    pub body: Vec<Stmt>,
    /// Location of the `def` keyword
    pub span: Span,
}

/// Function parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    /// Parameter name
    pub name: String,
    /// Annotation text (`str`, `int`, ...)
    pub annotation: Option<String>,
    /// Default value expression
    pub default: Option<Expr>,
    /// Location
    pub span: Span,
}

/// Function decorator
#[derive(Debug, Clone, PartialEq)]
pub struct Decorator {
    /// Decorator name
    pub name: String,
    /// Location
    pub span: Span,
}

/// Statement with its location
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    /// Statement kind
    pub kind: StmtKind,
    /// Location of the first token
    pub span: Span,
}

/// Statement kinds
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `target = value`
    Assign {
        /// Assignment target
        target: Target,
        /// Assigned value
        value: Expr,
    },
    /// `target op= value`
    AugAssign {
        /// Assignment target
        target: Target,
        /// Arithmetic operator
        op: ArithOp,
        /// Right operand
        value: Expr,
    },
    /// Bare expression
    Expr(Expr),
    /// `if` / `elif` / `else`
    If {
        /// Condition
        cond: Expr,
        /// Taken branch
        body: Vec<Stmt>,
        /// `else` branch (an `elif` is a nested `If`)
        orelse: Vec<Stmt>,
    },
    /// `for var in iter:`
    For {
        /// Loop variable
        var: String,
        /// Iterated expression
        iter: Expr,
        /// Loop body
        body: Vec<Stmt>,
    },
    /// `while cond:`
    While {
        /// Loop condition
        cond: Expr,
        /// Loop body
        body: Vec<Stmt>,
    },
    /// `return [value]`
    Return(Option<Expr>),
    /// `assert cond[, message]`
    Assert {
        /// Asserted condition
        cond: Expr,
        /// Failure message
        message: Option<Expr>,
    },
    /// `pass`
    Pass,
    /// `break`
    Break,
    /// `continue`
    Continue,
    /// `import name` inside a function body
    Import(String),
    /// Nested `def`
    FunctionDef(Box<FunctionDef>),
    /// A construct outside the language (`class`, `try`, ...)
    Forbidden(&'static str),
}

/// Assignment target
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// Local name
    Name(String),
    /// `value[index]`
    Subscript {
        /// Subscripted expression
        value: Box<Expr>,
        /// Index expression (a tuple for multi-part keys)
        index: Box<Expr>,
    },
    /// `value.attr`
    Attribute {
        /// Base expression
        value: Box<Expr>,
        /// Attribute name
        attr: String,
    },
}

/// Expression with its location
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    /// Expression kind
    pub kind: ExprKind,
    /// Location of the first token
    pub span: Span,
}

impl Expr {
    /// Wrap a kind with a location
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `+x`
    Plus,
    /// `not x`
    Not,
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// `==`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `in`
    In,
    /// `not in`
    NotIn,
    /// `is`
    Is,
    /// `is not`
    IsNot,
}

/// Short-circuit boolean operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    /// `and`
    And,
    /// `or`
    Or,
}

/// Expression kinds
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Integer literal
    Int(i128),
    /// Decimal literal, kept as source text
    Decimal(String),
    /// String literal
    Str(String),
    /// `True` / `False`
    Bool(bool),
    /// `None`
    None,
    /// Identifier
    Name(String),
    /// `[a, b]`
    List(Vec<Expr>),
    /// `a, b` (only as a subscript index)
    Tuple(Vec<Expr>),
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
    /// Unary operator
    Unary {
        /// Operator
        op: UnaryOp,
        /// Operand
        operand: Box<Expr>,
    },
    /// Comparison
    Compare {
        /// Operator
        op: CmpOp,
        /// Left operand
        lhs: Box<Expr>,
        /// Right operand
        rhs: Box<Expr>,
    },
    /// `and` / `or`
    BoolOp {
        /// Operator
        op: BoolOp,
        /// Left operand
        lhs: Box<Expr>,
        /// Right operand
        rhs: Box<Expr>,
    },
    /// `then if cond else orelse`
    IfExp {
        /// Condition
        cond: Box<Expr>,
        /// Value when true
        then: Box<Expr>,
        /// Value when false
        orelse: Box<Expr>,
    },
    /// Call with positional and keyword arguments
    Call {
        /// Callee
        func: Box<Expr>,
        /// Positional arguments
        args: Vec<Expr>,
        /// Keyword arguments
        kwargs: Vec<(String, Expr)>,
    },
    /// `value.attr`
    Attribute {
        /// Base expression
        value: Box<Expr>,
        /// Attribute name
        attr: String,
    },
    /// `value[index]`
    Subscript {
        /// Subscripted expression
        value: Box<Expr>,
        /// Index expression
        index: Box<Expr>,
    },
    /// A construct outside the language (`lambda`, `yield`, ...)
    Forbidden(&'static str),
}
