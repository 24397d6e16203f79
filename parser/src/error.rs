use sandlot_ast::Span;
use sandlot_lexer::LexError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error("{span}: expected {expected}, found {found}")]
    Unexpected {
        expected: &'static str,
        found: String,
        span: Span,
    },

    #[error("{span}: {message}")]
    Invalid { message: String, span: Span },
}

impl ParseError {
    pub fn span(&self) -> Span {
        match self {
            ParseError::Lex(e) => e.span(),
            ParseError::Unexpected { span, .. } | ParseError::Invalid { span, .. } => *span,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>, span: Span) -> Self {
        ParseError::Invalid {
            message: message.into(),
            span,
        }
    }
}
