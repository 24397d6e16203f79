use std::fmt;

use itertools::Itertools;
use sandlot_ast::Span;
use sandlot_parser::ParseError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single rejection, located in the source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Short name of the offending construct (`while`, `import`, `name`, ...)
    pub construct: String,
    /// Human-readable explanation
    pub message: String,
    /// Location
    pub span: Span,
}

impl Diagnostic {
    pub(crate) fn new(construct: impl Into<String>, message: impl Into<String>, span: Span) -> Self {
        Self {
            construct: construct.into(),
            message: message.into(),
            span,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.span, self.message)
    }
}

/// Compilation failed; every collected diagnostic is attached
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{}", .diagnostics.iter().join("\n"))]
pub struct CompileError {
    /// Diagnostics in source order
    pub diagnostics: Vec<Diagnostic>,
}

impl CompileError {
    pub(crate) fn new(mut diagnostics: Vec<Diagnostic>) -> Self {
        diagnostics.sort_by_key(|d| d.span);
        diagnostics.dedup();
        Self { diagnostics }
    }

    /// Whether any diagnostic concerns `construct`
    pub fn mentions(&self, construct: &str) -> bool {
        self.diagnostics.iter().any(|d| d.construct == construct)
    }
}

impl From<ParseError> for CompileError {
    fn from(err: ParseError) -> Self {
        let span = err.span();
        let message = match &err {
            ParseError::Lex(e) => e.to_string(),
            other => other.to_string(),
        };
        // The parser prefixes its own location; keep only the message
        let message = message
            .strip_prefix(&format!("{span}: "))
            .map(str::to_string)
            .unwrap_or(message);
        Self::new(vec![Diagnostic::new("syntax", message, span)])
    }
}
