//! Name resolution and lowering from the syntax tree to the IR
//!
//! Lowering resolves every name, turns storage subscripts into slot
//! accesses, binds call arguments against known signatures and inserts the
//! metering checkpoints.

use std::collections::{BTreeMap, HashSet};

use indexmap::{IndexMap, IndexSet};
use sandlot_ast::{self as ast, ExprKind, Item, Module, Span, StmtKind, Target, UnaryOp};
use sandlot_environment::{CapabilityKind, Environment};
use sandlot_types::{ArithOp, Decimal, Value};

use crate::{
    artifact::{Annotation, ContractInterface, FunctionId, Manifest, Parameter, Signature, Slot, SlotKind},
    error::Diagnostic,
    ir::{ContextField, Expr, Function, LocalId, Stmt, Visibility},
    lint::{is_storage_declaration, BANNED_BUILTINS, BANNED_MODULES, STORAGE_TYPES},
    ContractResolver,
};

/// Compute units charged for every straight-line statement
pub const STMT_COST: u64 = 1;
/// Compute units added for every call expression
pub const CALL_COST: u64 = 50;
/// Compute units charged once before a loop starts
pub const LOOP_SETUP_COST: u64 = 20;
/// Compute units charged on every loop iteration
pub const ITERATION_COST: u64 = 5;

/// Names the language provides without declaration
const RESERVED_NAMES: &[&str] = &["ctx", "now", "block_num", "block_hash"];

/// Everything lowering produces, minus what `compile` fills in
pub(crate) struct Lowered {
    pub manifest: Manifest,
    pub imports: Vec<String>,
    pub constants: Vec<(String, Value)>,
    pub exports: Vec<Signature>,
    pub functions: Vec<Function>,
    pub constructor: Option<FunctionId>,
}

struct Declared {
    id: FunctionId,
    visibility: Visibility,
    params: Vec<Parameter>,
}

pub(crate) fn lower(
    name: &str,
    module: &Module,
    resolver: &dyn ContractResolver,
    env: &Environment,
) -> (Lowered, Vec<Diagnostic>) {
    let mut lowering = Lowering {
        contract: name,
        resolver,
        env,
        diagnostics: Vec::new(),
        manifest: Manifest::new(name),
        imports: IndexMap::new(),
        constants: IndexMap::new(),
        functions: IndexMap::new(),
    };
    lowering.declarations(module);
    let functions = lowering.bodies(module);

    let exports = functions
        .iter()
        .filter(|f| f.visibility == Visibility::Export)
        .map(|f| Signature {
            name: f.name.clone(),
            params: f.params.clone(),
            docstring: module.items.iter().find_map(|item| match item {
                Item::Function(def) if def.name == f.name => def.docstring.clone(),
                _ => None,
            }),
        })
        .collect();
    let constructor = functions.iter().position(|f| f.visibility == Visibility::Construct);

    let lowered = Lowered {
        manifest: lowering.manifest,
        imports: lowering.imports.into_keys().collect(),
        constants: lowering.constants.into_iter().collect(),
        exports,
        functions,
        constructor,
    };
    (lowered, lowering.diagnostics)
}

struct Lowering<'a> {
    contract: &'a str,
    resolver: &'a dyn ContractResolver,
    env: &'a Environment,
    diagnostics: Vec<Diagnostic>,
    manifest: Manifest,
    imports: IndexMap<String, ContractInterface>,
    constants: IndexMap<String, Value>,
    functions: IndexMap<String, Declared>,
}

/// Per-function name scope
struct Scope {
    locals: IndexSet<String>,
}

impl Scope {
    fn local(&self, name: &str) -> Option<LocalId> {
        self.locals.get_index_of(name)
    }
}

impl<'a> Lowering<'a> {
    fn report(&mut self, construct: &str, message: impl Into<String>, span: Span) {
        self.diagnostics.push(Diagnostic::new(construct, message, span));
    }

    fn is_builtin_name(&self, name: &str) -> bool {
        RESERVED_NAMES.contains(&name)
            || STORAGE_TYPES.contains(&name)
            || self.env.function(name).is_some()
            || self.env.is_namespace(name)
    }

    // Module-level declarations

    fn declarations(&mut self, module: &Module) {
        let mut declared = HashSet::new();
        let mut check_unique = |this: &mut Self, name: &str, span: Span| {
            if !declared.insert(name.to_string()) {
                this.report("declaration", format!("'{name}' is declared more than once"), span);
                return false;
            }
            if this.is_builtin_name(name) {
                this.report("declaration", format!("'{name}' shadows a built-in name"), span);
                return false;
            }
            true
        };

        for item in &module.items {
            match item {
                Item::Import { name, span } => {
                    if !check_unique(self, name, *span) || BANNED_MODULES.contains(&name.as_str()) {
                        continue;
                    }
                    if name == self.contract {
                        self.report("import", "a contract cannot import itself", *span);
                        continue;
                    }
                    match self.resolver.resolve(name) {
                        Some(interface) => {
                            self.imports.insert(name.clone(), interface);
                        }
                        None => self.report("import", format!("contract '{name}' is not deployed"), *span),
                    }
                }
                Item::Assign { target, value, span } => {
                    if !check_unique(self, target, *span) {
                        continue;
                    }
                    if is_storage_declaration(value) {
                        self.storage_declaration(target, value);
                    } else {
                        match self.fold_const(value) {
                            Some(constant) => {
                                self.constants.insert(target.clone(), constant);
                            }
                            None => self.report(
                                "constant",
                                format!("module-level value '{target}' must be a constant expression"),
                                value.span,
                            ),
                        }
                    }
                }
                Item::Function(def) => {
                    if !check_unique(self, &def.name, def.span) {
                        continue;
                    }
                    let visibility = if def.decorators.iter().any(|d| d.name == "export") {
                        Visibility::Export
                    } else if def.decorators.iter().any(|d| d.name == "construct") {
                        Visibility::Construct
                    } else {
                        Visibility::Private
                    };
                    let params = self.parameters(def);
                    let id = self.functions.len();
                    self.functions.insert(
                        def.name.clone(),
                        Declared {
                            id,
                            visibility,
                            params,
                        },
                    );
                }
                Item::Stmt(_) => {}
            }
        }
    }

    fn storage_declaration(&mut self, name: &str, value: &ast::Expr) {
        let ExprKind::Call { func, args, kwargs } = &value.kind else {
            return;
        };
        let ExprKind::Name(constructor) = &func.kind else {
            return;
        };
        if !args.is_empty() {
            self.report(
                "storage",
                format!("{constructor}() takes keyword arguments only"),
                value.span,
            );
        }

        let foreign = constructor.starts_with("Foreign");
        let kind = if constructor.ends_with("Hash") {
            SlotKind::Hash
        } else {
            SlotKind::Variable
        };

        let mut default = Value::None;
        let mut foreign_contract = None;
        let mut foreign_name = None;
        for (key, arg) in kwargs {
            match key.as_str() {
                "default_value" => match self.fold_const(arg) {
                    Some(v) => default = v,
                    None => self.report("storage", "default_value must be a constant", arg.span),
                },
                "foreign_contract" | "foreign_name" if foreign => match &arg.kind {
                    ExprKind::Str(s) if key == "foreign_contract" => foreign_contract = Some(s.clone()),
                    ExprKind::Str(s) => foreign_name = Some(s.clone()),
                    _ => self.report("storage", format!("{key} must be a string literal"), arg.span),
                },
                other => self.report(
                    "storage",
                    format!("{constructor}() got an unexpected keyword argument '{other}'"),
                    arg.span,
                ),
            }
        }

        let (contract, variable) = if foreign {
            match (foreign_contract, foreign_name) {
                (Some(c), Some(v)) => (c, v),
                _ => {
                    self.report(
                        "storage",
                        format!("{constructor}() requires foreign_contract and foreign_name"),
                        value.span,
                    );
                    return;
                }
            }
        } else {
            (self.contract.to_string(), name.to_string())
        };

        self.manifest.push(Slot {
            name: name.to_string(),
            contract,
            variable,
            kind,
            default,
            foreign,
        });
    }

    fn parameters(&mut self, def: &ast::FunctionDef) -> Vec<Parameter> {
        let mut params = Vec::with_capacity(def.params.len());
        for param in &def.params {
            let annotation = match &param.annotation {
                None => None,
                Some(name) => match Annotation::from_name(name) {
                    Some(a) => Some(a),
                    None => {
                        self.report(
                            "annotation",
                            format!("unsupported annotation '{name}' on parameter '{}'", param.name),
                            param.span,
                        );
                        None
                    }
                },
            };
            let default = param.default.as_ref().and_then(|d| {
                let folded = self.fold_const(d);
                if folded.is_none() {
                    self.report(
                        "parameter",
                        format!("default of '{}' must be a constant", param.name),
                        d.span,
                    );
                }
                folded
            });
            params.push(Parameter {
                name: param.name.clone(),
                annotation,
                default,
            });
        }
        params
    }

    /// Evaluate a constant expression, if it is one
    fn fold_const(&self, expr: &ast::Expr) -> Option<Value> {
        match &expr.kind {
            ExprKind::Int(i) => Some(Value::Int(*i)),
            ExprKind::Decimal(text) => Decimal::parse(text).ok().map(Value::Decimal),
            ExprKind::Str(s) => Some(Value::Str(s.clone())),
            ExprKind::Bool(b) => Some(Value::Bool(*b)),
            ExprKind::None => Some(Value::None),
            ExprKind::Name(name) => self.constants.get(name).cloned(),
            ExprKind::List(items) => {
                let items = items.iter().map(|i| self.fold_const(i)).collect::<Option<Vec<_>>>()?;
                Value::list(items).ok()
            }
            ExprKind::Dict(entries) => {
                let mut map = BTreeMap::new();
                for (k, v) in entries {
                    let key = self.fold_const(k)?.key_fragment().ok()?;
                    map.insert(key, self.fold_const(v)?);
                }
                Value::map(map).ok()
            }
            ExprKind::Unary {
                op: UnaryOp::Neg,
                operand,
            } => self.fold_const(operand)?.negate().ok(),
            ExprKind::Unary {
                op: UnaryOp::Plus,
                operand,
            } => self.fold_const(operand),
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs = self.fold_const(lhs)?;
                let rhs = self.fold_const(rhs)?;
                lhs.binary(*op, &rhs).ok()
            }
            _ => None,
        }
    }

    // Function bodies

    fn bodies(&mut self, module: &Module) -> Vec<Function> {
        let mut functions = Vec::with_capacity(self.functions.len());
        for item in &module.items {
            let Item::Function(def) = item else {
                continue;
            };
            let Some(declared) = self.functions.get(&def.name) else {
                continue;
            };
            // Duplicate definitions were reported; only the first is lowered
            if declared.id != functions.len() {
                continue;
            }
            let visibility = declared.visibility;
            let params = declared.params.clone();

            let mut locals: IndexSet<String> = def.params.iter().map(|p| p.name.clone()).collect();
            collect_assigned(&def.body, &mut locals);
            for name in locals.iter().skip(def.params.len()) {
                if self.is_module_name(name) {
                    self.report(
                        "name",
                        format!("cannot rebind module-level name '{name}' inside '{}'", def.name),
                        def.span,
                    );
                }
            }
            let scope = Scope { locals };

            let body = self.block(&def.body, &scope, 0);
            functions.push(Function {
                name: def.name.clone(),
                visibility,
                params,
                locals: scope.locals.into_iter().collect(),
                body,
                span: def.span,
            });
        }
        functions
    }

    fn is_module_name(&self, name: &str) -> bool {
        self.constants.contains_key(name)
            || self.manifest.find(name).is_some()
            || self.functions.contains_key(name)
            || self.imports.contains_key(name)
            || self.is_builtin_name(name)
    }

    /// Lower a block and prefix it with its checkpoint
    fn block(&mut self, body: &[ast::Stmt], scope: &Scope, extra_cost: u64) -> Vec<Stmt> {
        let mut out = Vec::with_capacity(body.len() + 1);
        out.push(Stmt::Checkpoint(0));
        for stmt in body {
            self.stmt(stmt, scope, &mut out);
        }
        let cost = out.iter().map(stmt_weight).fold(extra_cost, u64::saturating_add);
        out[0] = Stmt::Checkpoint(cost);
        out
    }

    fn stmt(&mut self, stmt: &ast::Stmt, scope: &Scope, out: &mut Vec<Stmt>) {
        let span = stmt.span;
        match &stmt.kind {
            StmtKind::Assign { target, value } => {
                let value = self.expr(value, scope);
                if let Some(lowered) = self.assign(target, None, value, scope, span) {
                    out.push(lowered);
                }
            }
            StmtKind::AugAssign { target, op, value } => {
                let value = self.expr(value, scope);
                if let Some(lowered) = self.assign(target, Some(*op), value, scope, span) {
                    out.push(lowered);
                }
            }
            StmtKind::Expr(expr) => {
                if let Some(write) = self.variable_set(expr, scope) {
                    out.push(write);
                } else {
                    out.push(Stmt::Expr(self.expr(expr, scope)));
                }
            }
            StmtKind::If { cond, body, orelse } => {
                let cond = self.expr(cond, scope);
                let then = self.block(body, scope, 0);
                let orelse = if orelse.is_empty() {
                    Vec::new()
                } else {
                    self.block(orelse, scope, 0)
                };
                out.push(Stmt::If { cond, then, orelse });
            }
            StmtKind::For { var, iter, body } => {
                let Some(local) = scope.local(var) else {
                    return;
                };
                let loop_stmt = match self.range_args(iter, scope) {
                    Some((start, stop, step)) => {
                        let setup = [&start, &stop, &step].into_iter().map(expr_weight).sum::<u64>();
                        out.push(Stmt::Checkpoint(LOOP_SETUP_COST.saturating_add(setup)));
                        Stmt::ForRange {
                            local,
                            start,
                            stop,
                            step,
                            body: self.block(body, scope, ITERATION_COST),
                        }
                    }
                    None => {
                        let iter = self.expr(iter, scope);
                        out.push(Stmt::Checkpoint(LOOP_SETUP_COST.saturating_add(expr_weight(&iter))));
                        Stmt::ForEach {
                            local,
                            iter,
                            body: self.block(body, scope, ITERATION_COST),
                        }
                    }
                };
                out.push(loop_stmt);
            }
            StmtKind::Return(value) => {
                let value = value.as_ref().map(|v| self.expr(v, scope));
                out.push(Stmt::Return(value));
            }
            StmtKind::Assert { cond, message } => {
                let cond = self.expr(cond, scope);
                let message = message.as_ref().map(|m| self.expr(m, scope));
                out.push(Stmt::Assert { cond, message, span });
            }
            StmtKind::Break => out.push(Stmt::Break),
            StmtKind::Continue => out.push(Stmt::Continue),
            // Rejected by the linter
            StmtKind::Pass
            | StmtKind::While { .. }
            | StmtKind::Import(_)
            | StmtKind::FunctionDef(_)
            | StmtKind::Forbidden(_) => {}
        }
    }

    /// `for x in range(...)` arguments as (start, stop, step)
    fn range_args(&mut self, iter: &ast::Expr, scope: &Scope) -> Option<(Expr, Expr, Expr)> {
        let ExprKind::Call { func, args, kwargs } = &iter.kind else {
            return None;
        };
        if !matches!(&func.kind, ExprKind::Name(n) if n == "range") {
            return None;
        }
        if !kwargs.is_empty() || args.is_empty() || args.len() > 3 {
            self.report("range", "range() takes 1 to 3 positional arguments", iter.span);
            return Some((Expr::Const(Value::Int(0)), Expr::Const(Value::Int(0)), Expr::Const(Value::Int(1))));
        }
        let mut lowered: Vec<Expr> = args.iter().map(|a| self.expr(a, scope)).collect();
        Some(match lowered.len() {
            1 => (Expr::Const(Value::Int(0)), lowered.remove(0), Expr::Const(Value::Int(1))),
            2 => {
                let stop = lowered.remove(1);
                (lowered.remove(0), stop, Expr::Const(Value::Int(1)))
            }
            _ => {
                let step = lowered.remove(2);
                let stop = lowered.remove(1);
                (lowered.remove(0), stop, step)
            }
        })
    }

    /// `var.set(value)` as a statement
    fn variable_set(&mut self, expr: &ast::Expr, scope: &Scope) -> Option<Stmt> {
        let ExprKind::Call { func, args, kwargs } = &expr.kind else {
            return None;
        };
        let ExprKind::Attribute { value, attr } = &func.kind else {
            return None;
        };
        let ExprKind::Name(base) = &value.kind else {
            return None;
        };
        if attr != "set" || scope.local(base).is_some() {
            return None;
        }
        let slot = self.manifest.find(base)?;
        if self.manifest.slot(slot).map(|s| s.kind) != Some(SlotKind::Variable) {
            return None;
        }
        if args.len() != 1 || !kwargs.is_empty() {
            self.report("storage", format!("{base}.set() takes exactly one argument"), expr.span);
            return Some(Stmt::Expr(Expr::Const(Value::None)));
        }
        Some(Stmt::StorageWrite {
            slot,
            subkey: Vec::new(),
            value: self.expr(&args[0], scope),
            span: expr.span,
        })
    }

    fn assign(
        &mut self,
        target: &Target,
        op: Option<ArithOp>,
        value: Expr,
        scope: &Scope,
        span: Span,
    ) -> Option<Stmt> {
        match target {
            Target::Name(name) => {
                let local = scope.local(name)?;
                let value = match op {
                    None => value,
                    Some(op) => Expr::Binary {
                        op,
                        lhs: Box::new(Expr::Local(local)),
                        rhs: Box::new(value),
                    },
                };
                Some(Stmt::Assign { local, value })
            }
            Target::Subscript { value: container, index } => {
                let ExprKind::Name(base) = &container.kind else {
                    self.report("assignment", "nested subscript assignment is not supported", span);
                    return None;
                };
                if let Some(local) = scope.local(base) {
                    let index = self.expr(index, scope);
                    let value = match op {
                        None => value,
                        Some(op) => Expr::Binary {
                            op,
                            lhs: Box::new(Expr::Index {
                                value: Box::new(Expr::Local(local)),
                                index: Box::new(index.clone()),
                            }),
                            rhs: Box::new(value),
                        },
                    };
                    return Some(Stmt::SetIndex { local, index, value });
                }
                let Some(slot) = self.manifest.find(base) else {
                    self.report("name", format!("name '{base}' is not defined"), container.span);
                    return None;
                };
                if self.manifest.slot(slot).map(|s| s.kind) == Some(SlotKind::Variable) {
                    self.report(
                        "storage",
                        format!("Variable '{base}' is written with {base}.set(value)"),
                        span,
                    );
                    return None;
                }
                let subkey = self.subkey(index, scope);
                Some(match op {
                    None => Stmt::StorageWrite {
                        slot,
                        subkey,
                        value,
                        span,
                    },
                    Some(op) => Stmt::StorageUpdate {
                        slot,
                        subkey,
                        op,
                        value,
                        span,
                    },
                })
            }
            Target::Attribute { .. } => {
                self.report("assignment", "cannot assign to an attribute", span);
                None
            }
        }
    }

    fn subkey(&mut self, index: &ast::Expr, scope: &Scope) -> Vec<Expr> {
        match &index.kind {
            ExprKind::Tuple(parts) => parts.iter().map(|p| self.expr(p, scope)).collect(),
            _ => vec![self.expr(index, scope)],
        }
    }

    // Expressions

    fn expr(&mut self, expr: &ast::Expr, scope: &Scope) -> Expr {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Int(i) => Expr::Const(Value::Int(*i)),
            ExprKind::Decimal(text) => match Decimal::parse(text) {
                Ok(d) => Expr::Const(Value::Decimal(d)),
                Err(e) => {
                    self.report("literal", e.to_string(), span);
                    Expr::Const(Value::None)
                }
            },
            ExprKind::Str(s) => Expr::Const(Value::Str(s.clone())),
            ExprKind::Bool(b) => Expr::Const(Value::Bool(*b)),
            ExprKind::None => Expr::Const(Value::None),
            ExprKind::Name(name) => self.name(name, scope, span),
            ExprKind::List(items) | ExprKind::Tuple(items) => {
                Expr::List(items.iter().map(|i| self.expr(i, scope)).collect())
            }
            ExprKind::Dict(entries) => Expr::Dict(
                entries
                    .iter()
                    .map(|(k, v)| (self.expr(k, scope), self.expr(v, scope)))
                    .collect(),
            ),
            ExprKind::Binary { op, lhs, rhs } => Expr::Binary {
                op: *op,
                lhs: Box::new(self.expr(lhs, scope)),
                rhs: Box::new(self.expr(rhs, scope)),
            },
            ExprKind::Unary { op, operand } => {
                let operand = Box::new(self.expr(operand, scope));
                match op {
                    UnaryOp::Neg => Expr::Neg(operand),
                    UnaryOp::Plus => Expr::Plus(operand),
                    UnaryOp::Not => Expr::Not(operand),
                }
            }
            ExprKind::Compare { op, lhs, rhs } => Expr::Compare {
                op: *op,
                lhs: Box::new(self.expr(lhs, scope)),
                rhs: Box::new(self.expr(rhs, scope)),
            },
            ExprKind::BoolOp { op, lhs, rhs } => {
                let lhs = Box::new(self.expr(lhs, scope));
                let rhs = Box::new(self.expr(rhs, scope));
                match op {
                    ast::BoolOp::And => Expr::And(lhs, rhs),
                    ast::BoolOp::Or => Expr::Or(lhs, rhs),
                }
            }
            ExprKind::IfExp { cond, then, orelse } => Expr::IfExp {
                cond: Box::new(self.expr(cond, scope)),
                then: Box::new(self.expr(then, scope)),
                orelse: Box::new(self.expr(orelse, scope)),
            },
            ExprKind::Attribute { value, attr } => match &value.kind {
                ExprKind::Name(base) if base == "ctx" && scope.local(base).is_none() => match attr.as_str() {
                    "caller" => Expr::Context(ContextField::Caller),
                    "signer" => Expr::Context(ContextField::Signer),
                    "this" => Expr::Context(ContextField::This),
                    other => {
                        self.report("ctx", format!("unknown context field 'ctx.{other}'"), span);
                        Expr::Const(Value::None)
                    }
                },
                _ => {
                    self.report(
                        "attribute",
                        format!("attribute '{attr}' can only be used in a call or on ctx"),
                        span,
                    );
                    Expr::Const(Value::None)
                }
            },
            ExprKind::Subscript { value, index } => {
                if let ExprKind::Name(base) = &value.kind {
                    if scope.local(base).is_none() {
                        if let Some(slot) = self.manifest.find(base) {
                            if self.manifest.slot(slot).map(|s| s.kind) == Some(SlotKind::Variable) {
                                self.report(
                                    "storage",
                                    format!("Variable '{base}' is read with {base}.get()"),
                                    span,
                                );
                                return Expr::Const(Value::None);
                            }
                            return Expr::StorageRead {
                                slot,
                                subkey: self.subkey(index, scope),
                            };
                        }
                    }
                }
                Expr::Index {
                    value: Box::new(self.expr(value, scope)),
                    index: Box::new(self.expr(index, scope)),
                }
            }
            ExprKind::Call { func, args, kwargs } => self.call(func, args, kwargs, scope, span),
            // Rejected by the linter
            ExprKind::Forbidden(_) => Expr::Const(Value::None),
        }
    }

    fn name(&mut self, name: &str, scope: &Scope, span: Span) -> Expr {
        if let Some(local) = scope.local(name) {
            return Expr::Local(local);
        }
        if let Some(constant) = self.constants.get(name) {
            return Expr::Const(constant.clone());
        }
        match name {
            "now" => return Expr::Context(ContextField::Now),
            "block_num" => return Expr::Context(ContextField::BlockNum),
            "block_hash" => return Expr::Context(ContextField::BlockHash),
            _ => {}
        }

        let message = if self.manifest.find(name).is_some() {
            format!("storage variable '{name}' must be subscripted or accessed with .get()")
        } else if self.functions.contains_key(name) || self.env.function(name).is_some() {
            format!("function '{name}' can only be called")
        } else if self.imports.contains_key(name) || self.env.is_namespace(name) || name == "ctx" {
            format!("'{name}' can only be used through its attributes")
        } else if BANNED_BUILTINS.contains(&name) || name.starts_with('_') {
            // Already reported by the linter
            return Expr::Const(Value::None);
        } else {
            format!("name '{name}' is not defined")
        };
        self.report("name", message, span);
        Expr::Const(Value::None)
    }

    fn call(
        &mut self,
        func: &ast::Expr,
        args: &[ast::Expr],
        kwargs: &[(String, ast::Expr)],
        scope: &Scope,
        span: Span,
    ) -> Expr {
        match &func.kind {
            ExprKind::Name(name) if scope.local(name).is_none() => self.call_name(name, args, kwargs, scope, span),
            ExprKind::Attribute { value, attr } => match &value.kind {
                ExprKind::Name(base) if scope.local(base).is_none() => {
                    self.call_attribute(base, attr, args, kwargs, scope, span)
                }
                _ => {
                    self.report("call", format!("method '{attr}' cannot be called on this value"), span);
                    Expr::Const(Value::None)
                }
            },
            _ => {
                self.report("call", "only named functions can be called", span);
                Expr::Const(Value::None)
            }
        }
    }

    fn call_name(
        &mut self,
        name: &str,
        args: &[ast::Expr],
        kwargs: &[(String, ast::Expr)],
        scope: &Scope,
        span: Span,
    ) -> Expr {
        if let Some(declared) = self.functions.get(name) {
            if declared.visibility == Visibility::Construct {
                self.report("call", format!("constructor '{name}' cannot be called"), span);
                return Expr::Const(Value::None);
            }
            let function = declared.id;
            let params = declared.params.clone();
            return match self.bind(name, &params, args, kwargs, scope, span) {
                Some(args) => Expr::CallLocal { function, args },
                None => Expr::Const(Value::None),
            };
        }

        if let Some(capability) = self.env.function(name) {
            let kind = capability.kind;
            let arity = capability.arity;
            if matches!(kind, CapabilityKind::Range) {
                self.report("range", "range() is only allowed as a for-loop iterable", span);
                return Expr::Const(Value::None);
            }
            if !kwargs.is_empty() {
                self.report("call", format!("{name}() takes no keyword arguments"), span);
            }
            if !arity.accepts(args.len()) {
                self.report(
                    "call",
                    format!("{name}() takes {arity} arguments ({} given)", args.len()),
                    span,
                );
            }
            let args = args.iter().map(|a| self.expr(a, scope)).collect();
            return match kind {
                CapabilityKind::Print => Expr::Print(args),
                _ => Expr::Builtin {
                    name: name.to_string(),
                    args,
                },
            };
        }

        if STORAGE_TYPES.contains(&name) {
            self.report("storage", "storage declarations are only allowed at module level", span);
        } else if !BANNED_BUILTINS.contains(&name) && !name.starts_with('_') {
            let message = if self.constants.contains_key(name) || self.manifest.find(name).is_some() {
                format!("'{name}' is not callable")
            } else {
                format!("name '{name}' is not defined")
            };
            self.report("name", message, span);
        }
        Expr::Const(Value::None)
    }

    fn call_attribute(
        &mut self,
        base: &str,
        attr: &str,
        args: &[ast::Expr],
        kwargs: &[(String, ast::Expr)],
        scope: &Scope,
        span: Span,
    ) -> Expr {
        if let Some(slot) = self.manifest.find(base) {
            let kind = self.manifest.slot(slot).map(|s| s.kind);
            return match (kind, attr) {
                (Some(SlotKind::Variable), "get") if args.is_empty() && kwargs.is_empty() => Expr::StorageRead {
                    slot,
                    subkey: Vec::new(),
                },
                (Some(SlotKind::Variable), "set") => {
                    self.report("storage", format!("{base}.set() does not produce a value"), span);
                    Expr::Const(Value::None)
                }
                _ => {
                    self.report("storage", format!("unsupported storage operation '{base}.{attr}'"), span);
                    Expr::Const(Value::None)
                }
            };
        }

        if let Some((import, _, interface)) = self.imports.get_full(base) {
            let Some(signature) = interface.export(attr) else {
                self.report(
                    "import",
                    format!("contract '{base}' has no exported function '{attr}'"),
                    span,
                );
                return Expr::Const(Value::None);
            };
            let params = signature.params.clone();
            let qualified = format!("{base}.{attr}");
            return match self.bind(&qualified, &params, args, kwargs, scope, span) {
                Some(args) => Expr::CallContract {
                    import,
                    function: attr.to_string(),
                    args,
                    span,
                },
                None => Expr::Const(Value::None),
            };
        }

        if self.env.is_namespace(base) {
            let Some(capability) = self.env.member(base, attr) else {
                self.report("name", format!("'{base}' has no function '{attr}'"), span);
                return Expr::Const(Value::None);
            };
            let arity = capability.arity;
            let name = capability.name;
            if !kwargs.is_empty() || !arity.accepts(args.len()) {
                self.report(
                    "call",
                    format!("{name}() takes {arity} positional arguments"),
                    span,
                );
            }
            return Expr::Builtin {
                name: name.to_string(),
                args: args.iter().map(|a| self.expr(a, scope)).collect(),
            };
        }

        if BANNED_MODULES.contains(&base) {
            return Expr::Const(Value::None);
        }
        self.report(
            "attribute",
            format!("'{base}.{attr}' is not a known function"),
            span,
        );
        Expr::Const(Value::None)
    }

    /// Bind call arguments to parameters, filling defaults
    fn bind(
        &mut self,
        callee: &str,
        params: &[Parameter],
        args: &[ast::Expr],
        kwargs: &[(String, ast::Expr)],
        scope: &Scope,
        span: Span,
    ) -> Option<Vec<Expr>> {
        if args.len() > params.len() {
            self.report(
                "call",
                format!(
                    "{callee}() takes {} positional arguments but {} were given",
                    params.len(),
                    args.len()
                ),
                span,
            );
            return None;
        }

        let mut bound: Vec<Option<Expr>> = vec![None; params.len()];
        for (slot, arg) in bound.iter_mut().zip(args) {
            *slot = Some(self.expr(arg, scope));
        }

        let mut ok = true;
        for (name, value) in kwargs {
            match params.iter().position(|p| &p.name == name) {
                Some(i) if bound[i].is_some() => {
                    self.report("call", format!("{callee}() got multiple values for '{name}'"), span);
                    ok = false;
                }
                Some(i) => bound[i] = Some(self.expr(value, scope)),
                None => {
                    self.report(
                        "call",
                        format!("{callee}() got an unexpected keyword argument '{name}'"),
                        span,
                    );
                    ok = false;
                }
            }
        }

        let mut out = Vec::with_capacity(params.len());
        for (param, arg) in params.iter().zip(bound) {
            match (arg, &param.default) {
                (Some(expr), _) => out.push(expr),
                (None, Some(default)) => out.push(Expr::Const(default.clone())),
                (None, None) => {
                    self.report(
                        "call",
                        format!("{callee}() missing required argument '{}'", param.name),
                        span,
                    );
                    ok = false;
                }
            }
        }
        ok.then_some(out)
    }
}

/// Names bound anywhere in a function body
fn collect_assigned(body: &[ast::Stmt], names: &mut IndexSet<String>) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::Assign {
                target: Target::Name(name),
                ..
            }
            | StmtKind::AugAssign {
                target: Target::Name(name),
                ..
            } => {
                names.insert(name.clone());
            }
            StmtKind::If { body, orelse, .. } => {
                collect_assigned(body, names);
                collect_assigned(orelse, names);
            }
            StmtKind::For { var, body, .. } => {
                names.insert(var.clone());
                collect_assigned(body, names);
            }
            StmtKind::While { body, .. } => collect_assigned(body, names),
            _ => {}
        }
    }
}

/// Static cost of evaluating an expression
pub(crate) fn expr_weight(expr: &Expr) -> u64 {
    let children: u64 = match expr {
        Expr::Const(_) | Expr::Local(_) | Expr::Context(_) => 0,
        Expr::List(items) => items.iter().map(expr_weight).sum(),
        Expr::Dict(entries) => entries.iter().map(|(k, v)| expr_weight(k) + expr_weight(v)).sum(),
        Expr::Binary { lhs, rhs, .. } | Expr::Compare { lhs, rhs, .. } | Expr::And(lhs, rhs) | Expr::Or(lhs, rhs) => {
            expr_weight(lhs) + expr_weight(rhs)
        }
        Expr::Neg(e) | Expr::Plus(e) | Expr::Not(e) => expr_weight(e),
        Expr::IfExp { cond, then, orelse } => expr_weight(cond) + expr_weight(then) + expr_weight(orelse),
        Expr::Index { value, index } => expr_weight(value) + expr_weight(index),
        Expr::StorageRead { subkey, .. } => subkey.iter().map(expr_weight).sum(),
        Expr::CallLocal { args, .. } | Expr::CallContract { args, .. } | Expr::Builtin { args, .. } | Expr::Print(args) => {
            CALL_COST + args.iter().map(expr_weight).sum::<u64>()
        }
    };
    1 + children
}

/// Static cost of a statement inside its enclosing block
fn stmt_weight(stmt: &Stmt) -> u64 {
    match stmt {
        Stmt::Checkpoint(_) => 0,
        // Loops are paid by their setup checkpoint and per-iteration body
        Stmt::ForRange { .. } | Stmt::ForEach { .. } => STMT_COST,
        Stmt::Assign { value, .. } | Stmt::Expr(value) => STMT_COST + expr_weight(value),
        Stmt::SetIndex { index, value, .. } => STMT_COST + expr_weight(index) + expr_weight(value),
        Stmt::StorageWrite { subkey, value, .. } | Stmt::StorageUpdate { subkey, value, .. } => {
            STMT_COST + subkey.iter().map(expr_weight).sum::<u64>() + expr_weight(value)
        }
        Stmt::If { cond, .. } => STMT_COST + expr_weight(cond),
        Stmt::Return(value) => STMT_COST + value.as_ref().map_or(0, expr_weight),
        Stmt::Assert { cond, message, .. } => {
            STMT_COST + expr_weight(cond) + message.as_ref().map_or(0, expr_weight)
        }
        Stmt::Break | Stmt::Continue => STMT_COST,
    }
}
