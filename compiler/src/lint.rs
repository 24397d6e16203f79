//! Syntactic checks over the parsed tree
//!
//! Everything that can be decided without name resolution lives here:
//! forbidden constructs, banned imports and builtins, reserved identifiers,
//! decorator usage and loop placement. Diagnostics are collected, never
//! short-circuited.

use sandlot_ast::{Expr, ExprKind, FunctionDef, Item, Module, Span, Stmt, StmtKind, Target};

use crate::error::Diagnostic;

/// Modules that can never be imported
pub const BANNED_MODULES: &[&str] = &[
    "os",
    "sys",
    "subprocess",
    "socket",
    "io",
    "pathlib",
    "importlib",
    "builtins",
    "shutil",
    "threading",
    "multiprocessing",
    "asyncio",
    "ctypes",
    "pickle",
    "marshal",
    "inspect",
    "gc",
    "signal",
    "time",
    "random",
    "datetime",
    "urllib",
    "http",
    "requests",
];

/// Builtins providing file, network or system access, or reflection
pub const BANNED_BUILTINS: &[&str] = &[
    "open",
    "exec",
    "eval",
    "compile",
    "globals",
    "locals",
    "vars",
    "getattr",
    "setattr",
    "delattr",
    "hasattr",
    "input",
    "dir",
    "type",
    "isinstance",
    "issubclass",
    "super",
    "object",
    "id",
    "hash",
    "callable",
    "memoryview",
    "bytearray",
    "breakpoint",
    "help",
    "exit",
    "quit",
    "classmethod",
    "staticmethod",
    "property",
    "iter",
    "next",
];

/// Decorators the language understands
pub const DECORATORS: &[&str] = &["export", "construct"];

/// Storage declaration constructors
pub const STORAGE_TYPES: &[&str] = &["Hash", "Variable", "ForeignHash", "ForeignVariable"];

pub(crate) fn is_storage_declaration(expr: &Expr) -> bool {
    matches!(
        &expr.kind,
        ExprKind::Call { func, .. } if matches!(&func.kind, ExprKind::Name(n) if STORAGE_TYPES.contains(&n.as_str()))
    )
}

pub(crate) fn lint(module: &Module) -> Vec<Diagnostic> {
    let mut linter = Linter::default();
    linter.module(module);
    linter.diagnostics
}

#[derive(Default)]
struct Linter {
    diagnostics: Vec<Diagnostic>,
    loop_depth: usize,
}

impl Linter {
    fn report(&mut self, construct: &str, message: impl Into<String>, span: Span) {
        self.diagnostics.push(Diagnostic::new(construct, message, span));
    }

    fn check_identifier(&mut self, construct: &str, name: &str, span: Span) {
        if name.starts_with('_') {
            self.report(
                construct,
                format!("name '{name}' is not allowed: identifiers may not start with '_'"),
                span,
            );
        }
    }

    fn module(&mut self, module: &Module) {
        let mut constructors = 0usize;
        let mut exports = 0usize;

        for item in &module.items {
            match item {
                Item::Import { name, span } => {
                    self.check_identifier("import", name, *span);
                    if BANNED_MODULES.contains(&name.as_str()) {
                        self.report("import", format!("import of banned module '{name}'"), *span);
                    }
                }
                Item::Assign { target, value, span } => {
                    self.check_identifier("name", target, *span);
                    if is_storage_declaration(value) {
                        if let ExprKind::Call { args, kwargs, .. } = &value.kind {
                            args.iter().for_each(|a| self.expr(a));
                            kwargs.iter().for_each(|(_, v)| self.expr(v));
                        }
                    } else {
                        self.expr(value);
                    }
                }
                Item::Function(function) => {
                    if function.decorators.iter().any(|d| d.name == "construct") {
                        constructors += 1;
                        if constructors > 1 {
                            self.report(
                                "construct",
                                "only one @construct function is allowed",
                                function.span,
                            );
                        }
                    }
                    if function.decorators.iter().any(|d| d.name == "export") {
                        exports += 1;
                    }
                    self.function(function);
                }
                Item::Stmt(stmt) => {
                    let reported = self.diagnostics.len();
                    self.stmt(stmt);
                    if self.diagnostics.len() == reported {
                        self.report(
                            "statement",
                            "only imports, declarations and function definitions are allowed at module level",
                            stmt.span,
                        );
                    }
                }
            }
        }

        if exports == 0 {
            let span = module
                .items
                .first()
                .map(item_span)
                .unwrap_or_else(|| Span::new(1, 1));
            self.report("export", "contract must define at least one @export function", span);
        }
    }

    fn function(&mut self, function: &FunctionDef) {
        self.check_identifier("def", &function.name, function.span);

        for decorator in &function.decorators {
            if !DECORATORS.contains(&decorator.name.as_str()) {
                self.report(
                    "decorator",
                    format!("unknown decorator '@{}'", decorator.name),
                    decorator.span,
                );
            }
        }
        if function.decorators.len() > 1 {
            self.report(
                "decorator",
                format!("function '{}' has more than one decorator", function.name),
                function.span,
            );
        }

        for param in &function.params {
            self.check_identifier("parameter", &param.name, param.span);
            if let Some(default) = &param.default {
                self.expr(default);
            }
        }

        let outer_loops = std::mem::take(&mut self.loop_depth);
        self.block(&function.body);
        self.loop_depth = outer_loops;
    }

    fn block(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        let span = stmt.span;
        match &stmt.kind {
            StmtKind::Assign { target, value } => {
                self.target(target, span);
                if is_storage_declaration(value) {
                    self.report(
                        "storage",
                        "storage declarations are only allowed at module level",
                        value.span,
                    );
                }
                self.expr(value);
            }
            StmtKind::AugAssign { target, value, .. } => {
                self.target(target, span);
                self.expr(value);
            }
            StmtKind::Expr(expr) => self.expr(expr),
            StmtKind::If { cond, body, orelse } => {
                self.expr(cond);
                self.block(body);
                self.block(orelse);
            }
            StmtKind::For { var, iter, body } => {
                self.check_identifier("name", var, span);
                self.expr(iter);
                self.loop_depth += 1;
                self.block(body);
                self.loop_depth -= 1;
            }
            StmtKind::While { cond, body } => {
                self.report(
                    "while",
                    "unbounded `while` loop is not allowed; iterate over a bounded `range` instead",
                    span,
                );
                self.expr(cond);
                self.loop_depth += 1;
                self.block(body);
                self.loop_depth -= 1;
            }
            StmtKind::Return(value) => {
                if let Some(value) = value {
                    self.expr(value);
                }
            }
            StmtKind::Assert { cond, message } => {
                self.expr(cond);
                if let Some(message) = message {
                    self.expr(message);
                }
            }
            StmtKind::Pass => {}
            StmtKind::Break | StmtKind::Continue => {
                if self.loop_depth == 0 {
                    let keyword = if matches!(stmt.kind, StmtKind::Break) { "break" } else { "continue" };
                    self.report(keyword, format!("'{keyword}' outside loop"), span);
                }
            }
            StmtKind::Import(name) => {
                self.report(
                    "import",
                    format!("import of '{name}' must be at module level"),
                    span,
                );
            }
            StmtKind::FunctionDef(function) => {
                self.report(
                    "def",
                    format!("nested function '{}' is not allowed", function.name),
                    span,
                );
            }
            StmtKind::Forbidden(construct) => {
                self.report(construct, format!("`{construct}` is not allowed"), span);
            }
        }
    }

    fn target(&mut self, target: &Target, span: Span) {
        match target {
            Target::Name(name) => self.check_identifier("name", name, span),
            Target::Subscript { value, index } => {
                self.expr(value);
                self.index(index);
            }
            Target::Attribute { value, attr } => {
                self.expr(value);
                self.check_identifier("attribute", attr, span);
            }
        }
    }

    fn index(&mut self, index: &Expr) {
        match &index.kind {
            ExprKind::Tuple(parts) => parts.iter().for_each(|p| self.expr(p)),
            _ => self.expr(index),
        }
    }

    fn expr(&mut self, expr: &Expr) {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Int(_)
            | ExprKind::Decimal(_)
            | ExprKind::Str(_)
            | ExprKind::Bool(_)
            | ExprKind::None => {}
            ExprKind::Name(name) => {
                self.check_identifier("name", name, span);
                if BANNED_BUILTINS.contains(&name.as_str()) {
                    self.report("builtin", format!("use of banned builtin '{name}'"), span);
                }
            }
            ExprKind::List(items) => items.iter().for_each(|i| self.expr(i)),
            ExprKind::Tuple(items) => {
                self.report(
                    "tuple",
                    "tuples are only allowed as multi-part storage keys",
                    span,
                );
                items.iter().for_each(|i| self.expr(i));
            }
            ExprKind::Dict(entries) => {
                for (k, v) in entries {
                    self.expr(k);
                    self.expr(v);
                }
            }
            ExprKind::Binary { lhs, rhs, .. }
            | ExprKind::Compare { lhs, rhs, .. }
            | ExprKind::BoolOp { lhs, rhs, .. } => {
                self.expr(lhs);
                self.expr(rhs);
            }
            ExprKind::Unary { operand, .. } => self.expr(operand),
            ExprKind::IfExp { cond, then, orelse } => {
                self.expr(cond);
                self.expr(then);
                self.expr(orelse);
            }
            ExprKind::Call { func, args, kwargs } => {
                self.expr(func);
                args.iter().for_each(|a| self.expr(a));
                for (name, value) in kwargs {
                    self.check_identifier("keyword", name, value.span);
                    self.expr(value);
                }
            }
            ExprKind::Attribute { value, attr } => {
                self.expr(value);
                self.check_identifier("attribute", attr, span);
            }
            ExprKind::Subscript { value, index } => {
                self.expr(value);
                self.index(index);
            }
            ExprKind::Forbidden(construct) => {
                self.report(construct, format!("`{construct}` is not allowed"), span);
            }
        }
    }
}

fn item_span(item: &Item) -> Span {
    match item {
        Item::Import { span, .. } | Item::Assign { span, .. } => *span,
        Item::Function(function) => function.span,
        Item::Stmt(stmt) => stmt.span,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lint_source(source: &str) -> Vec<Diagnostic> {
        lint(&sandlot_parser::parse(source).unwrap())
    }

    fn constructs(source: &str) -> Vec<String> {
        lint_source(source).into_iter().map(|d| d.construct).collect()
    }

    #[test]
    fn test_clean_contract_has_no_diagnostics() {
        let source = "x = Hash()\n\n@export\ndef f(a: int):\n    for i in range(a):\n        x[i] = i\n";
        assert!(lint_source(source).is_empty());
    }

    #[test]
    fn test_while_is_reported_with_location() {
        let diags = lint_source("@export\ndef f():\n    while True:\n        pass\n");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].construct, "while");
        assert_eq!(diags[0].span, Span::new(3, 5));
        assert!(diags[0].to_string().starts_with("Line 3, Col 5: unbounded `while` loop"));
    }

    #[test]
    fn test_all_violations_are_collected() {
        let source = "import os\n\nclass A:\n    pass\n\n@export\ndef f():\n    import token\n    _x = eval('1')\n    y = Hash()\n    break\n";
        let found = constructs(source);
        for expected in ["import", "class", "name", "builtin", "storage", "break"] {
            assert!(found.iter().any(|c| c == expected), "missing {expected} in {found:?}");
        }
        assert_eq!(found.iter().filter(|c| *c == "import").count(), 2);
    }

    #[test]
    fn test_decorators_and_exports() {
        assert_eq!(constructs("def f():\n    pass\n"), vec!["export"]);

        let source = "@construct\ndef a():\n    pass\n\n@construct\ndef b():\n    pass\n\n@public\ndef c():\n    pass\n\n@export\ndef d():\n    pass\n";
        let found = constructs(source);
        assert!(found.contains(&"construct".to_string()));
        assert!(found.contains(&"decorator".to_string()));
    }

    #[test]
    fn test_module_level_statements_are_rejected() {
        let found = constructs("@export\ndef f():\n    pass\n\nf()\n");
        assert_eq!(found, vec!["statement"]);
    }
}
