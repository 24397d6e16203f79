//! Tokenizer for the contract language
//!
//! The language is indentation-delimited, so besides ordinary tokens the
//! lexer emits `Newline` at the end of each logical line and `Indent` /
//! `Dedent` when the indentation level changes. Newlines inside brackets are
//! insignificant, as are blank and comment-only lines.

mod token;

pub use token::{Keyword, SpannedToken, Token};

use sandlot_ast::Span;
use thiserror::Error;

/// Tokenization failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LexError {
    /// Character that starts no token
    #[error("{span}: unexpected character '{ch}'")]
    UnexpectedChar {
        /// Offending character
        ch: char,
        /// Location
        span: Span,
    },
    /// String literal without closing quote
    #[error("{span}: unterminated string literal")]
    UnterminatedString {
        /// Location of the opening quote
        span: Span,
    },
    /// Dedent to a column no enclosing block uses
    #[error("{span}: unindent does not match any outer indentation level")]
    InconsistentDedent {
        /// Location
        span: Span,
    },
    /// Integer literal outside the 128-bit range
    #[error("{span}: integer literal out of range")]
    IntegerOverflow {
        /// Location
        span: Span,
    },
    /// Number literal with no digits after its prefix
    #[error("{span}: invalid {kind} literal")]
    InvalidLiteral {
        /// Literal kind, e.g. "hexadecimal"
        kind: &'static str,
        /// Location
        span: Span,
    },
    /// Closing bracket without an opener
    #[error("{span}: unmatched '{ch}'")]
    UnmatchedBracket {
        /// Bracket character
        ch: char,
        /// Location
        span: Span,
    },
}

impl LexError {
    /// Location of the error
    pub fn span(&self) -> Span {
        match self {
            LexError::UnexpectedChar { span, .. }
            | LexError::UnterminatedString { span }
            | LexError::InconsistentDedent { span }
            | LexError::IntegerOverflow { span }
            | LexError::InvalidLiteral { span, .. }
            | LexError::UnmatchedBracket { span, .. } => *span,
        }
    }
}

/// Tokenize a whole source file
pub fn tokenize(source: &str) -> Result<Vec<SpannedToken>, LexError> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    indents: Vec<u32>,
    depth: usize,
    at_line_start: bool,
    tokens: Vec<SpannedToken>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            indents: vec![0],
            depth: 0,
            at_line_start: true,
            tokens: Vec::new(),
        }
    }

    fn span(&self) -> Span {
        Span::new(self.line, self.column)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn push(&mut self, token: Token, span: Span) {
        self.tokens.push(SpannedToken { token, span });
    }

    fn run(mut self) -> Result<Vec<SpannedToken>, LexError> {
        loop {
            if self.at_line_start && self.depth == 0 {
                if !self.handle_indentation()? {
                    break;
                }
                continue;
            }

            match self.peek() {
                None => break,
                Some(' ' | '\t' | '\r') => {
                    self.bump();
                }
                Some('\\') if self.peek_at(1) == Some('\n') => {
                    self.bump();
                    self.bump();
                }
                Some('#') => self.skip_comment(),
                Some('\n') => {
                    let span = self.span();
                    self.bump();
                    if self.depth == 0 {
                        self.push(Token::Newline, span);
                        self.at_line_start = true;
                    }
                }
                Some(ch) if ch.is_ascii_digit() => self.number()?,
                Some('.') if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => self.number()?,
                Some(ch) if ch.is_alphabetic() || ch == '_' => self.identifier(),
                Some('"' | '\'') => self.string()?,
                Some(_) => self.operator()?,
            }
        }

        let end = self.span();
        if self
            .tokens
            .last()
            .is_some_and(|t| !matches!(t.token, Token::Newline | Token::Dedent | Token::Indent))
        {
            self.push(Token::Newline, end);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Token::Dedent, end);
        }
        self.push(Token::Eof, end);
        log::trace!("tokenized {} tokens", self.tokens.len());
        Ok(self.tokens)
    }

    /// Measure the indentation of a new line. Returns `false` at end of input.
    fn handle_indentation(&mut self) -> Result<bool, LexError> {
        let mut width = 0u32;
        loop {
            match self.peek() {
                Some(' ') => width += 1,
                Some('\t') => width += 8 - width % 8,
                Some('\r') => {}
                _ => break,
            }
            self.bump();
        }

        match self.peek() {
            None => return Ok(false),
            Some('\n') => {
                self.bump();
                return Ok(true);
            }
            Some('#') => {
                self.skip_comment();
                return Ok(true);
            }
            _ => {}
        }

        let span = self.span();
        let current = self.indents.last().copied().unwrap_or(0);
        if width > current {
            self.indents.push(width);
            self.push(Token::Indent, span);
        } else {
            while width < self.indents.last().copied().unwrap_or(0) {
                self.indents.pop();
                self.push(Token::Dedent, span);
            }
            if width != self.indents.last().copied().unwrap_or(0) {
                return Err(LexError::InconsistentDedent { span });
            }
        }
        self.at_line_start = false;
        Ok(true)
    }

    fn skip_comment(&mut self) {
        while let Some(ch) = self.peek() {
            if ch == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn number(&mut self) -> Result<(), LexError> {
        let span = self.span();

        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x' | 'X')) {
            self.bump();
            self.bump();
            let mut digits = String::new();
            while let Some(ch) = self.peek() {
                if ch.is_ascii_hexdigit() {
                    digits.push(ch);
                } else if ch != '_' {
                    break;
                }
                self.bump();
            }
            if digits.is_empty() {
                return Err(LexError::InvalidLiteral { kind: "hexadecimal", span });
            }
            let value = u128::from_str_radix(&digits, 16).map_err(|_| LexError::IntegerOverflow { span })?;
            self.push(Token::Int(value), span);
            return Ok(());
        }

        let mut text = String::new();
        let mut is_decimal = false;
        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() || ch == '_' {
                text.push(ch);
            } else if ch == '.'
                && !is_decimal
                && !self.peek_at(1).is_some_and(|c| c.is_alphabetic() || c == '_')
            {
                is_decimal = true;
                text.push(ch);
            } else {
                break;
            }
            self.bump();
        }

        if is_decimal {
            self.push(Token::Decimal(text), span);
        } else {
            let digits: String = text.chars().filter(|c| *c != '_').collect();
            let value: u128 = digits.parse().map_err(|_| LexError::IntegerOverflow { span })?;
            self.push(Token::Int(value), span);
        }
        Ok(())
    }

    fn identifier(&mut self) {
        let span = self.span();
        let mut ident = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_alphanumeric() || ch == '_' {
                ident.push(ch);
                self.bump();
            } else {
                break;
            }
        }
        let token = match Keyword::from_ident(&ident) {
            Some(keyword) => Token::Keyword(keyword),
            None => Token::Name(ident),
        };
        self.push(token, span);
    }

    fn string(&mut self) -> Result<(), LexError> {
        let span = self.span();
        let quote = self.bump().ok_or(LexError::UnterminatedString { span })?;
        let triple = self.peek() == Some(quote) && self.peek_at(1) == Some(quote);
        if triple {
            self.bump();
            self.bump();
        }

        let mut value = String::new();
        loop {
            let ch = self.bump().ok_or(LexError::UnterminatedString { span })?;
            if ch == quote {
                if !triple {
                    break;
                }
                if self.peek() == Some(quote) && self.peek_at(1) == Some(quote) {
                    self.bump();
                    self.bump();
                    break;
                }
                value.push(ch);
                continue;
            }
            match ch {
                '\n' if !triple => return Err(LexError::UnterminatedString { span }),
                '\\' => {
                    let escaped = self.bump().ok_or(LexError::UnterminatedString { span })?;
                    match escaped {
                        'n' => value.push('\n'),
                        't' => value.push('\t'),
                        'r' => value.push('\r'),
                        '0' => value.push('\0'),
                        '\\' | '\'' | '"' => value.push(escaped),
                        '\n' => {}
                        other => {
                            value.push('\\');
                            value.push(other);
                        }
                    }
                }
                other => value.push(other),
            }
        }
        self.push(Token::Str(value), span);
        Ok(())
    }

    fn operator(&mut self) -> Result<(), LexError> {
        let span = self.span();
        let ch = self.peek().ok_or(LexError::UnterminatedString { span })?;
        let next = self.peek_at(1);
        let next2 = self.peek_at(2);

        let (token, width) = match (ch, next, next2) {
            ('/', Some('/'), Some('=')) => (Token::DoubleSlashAssign, 3),
            ('/', Some('/'), _) => (Token::DoubleSlash, 2),
            ('*', Some('*'), _) => (Token::DoubleStar, 2),
            ('+', Some('='), _) => (Token::PlusAssign, 2),
            ('-', Some('='), _) => (Token::MinusAssign, 2),
            ('*', Some('='), _) => (Token::StarAssign, 2),
            ('/', Some('='), _) => (Token::SlashAssign, 2),
            ('%', Some('='), _) => (Token::PercentAssign, 2),
            ('=', Some('='), _) => (Token::EqEq, 2),
            ('!', Some('='), _) => (Token::NotEq, 2),
            ('<', Some('='), _) => (Token::Le, 2),
            ('>', Some('='), _) => (Token::Ge, 2),
            ('-', Some('>'), _) => (Token::Arrow, 2),
            ('(', _, _) => (Token::LParen, 1),
            (')', _, _) => (Token::RParen, 1),
            ('[', _, _) => (Token::LBracket, 1),
            (']', _, _) => (Token::RBracket, 1),
            ('{', _, _) => (Token::LBrace, 1),
            ('}', _, _) => (Token::RBrace, 1),
            (':', _, _) => (Token::Colon, 1),
            (',', _, _) => (Token::Comma, 1),
            ('.', _, _) => (Token::Dot, 1),
            ('@', _, _) => (Token::At, 1),
            ('=', _, _) => (Token::Assign, 1),
            ('+', _, _) => (Token::Plus, 1),
            ('-', _, _) => (Token::Minus, 1),
            ('*', _, _) => (Token::Star, 1),
            ('/', _, _) => (Token::Slash, 1),
            ('%', _, _) => (Token::Percent, 1),
            ('<', _, _) => (Token::Lt, 1),
            ('>', _, _) => (Token::Gt, 1),
            (other, _, _) => return Err(LexError::UnexpectedChar { ch: other, span }),
        };

        match token {
            Token::LParen | Token::LBracket | Token::LBrace => self.depth += 1,
            Token::RParen | Token::RBracket | Token::RBrace => {
                self.depth = self
                    .depth
                    .checked_sub(1)
                    .ok_or(LexError::UnmatchedBracket { ch, span })?;
            }
            _ => {}
        }

        for _ in 0..width {
            self.bump();
        }
        self.push(token, span);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source).unwrap().into_iter().map(|t| t.token).collect()
    }

    #[test]
    fn test_simple_assignment() {
        assert_eq!(
            kinds("x = 1_000\n"),
            vec![
                Token::Name("x".into()),
                Token::Assign,
                Token::Int(1000),
                Token::Newline,
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_indent_and_dedent() {
        let tokens = kinds("def f():\n    return 1\n\n# comment\nx = 2");
        assert_eq!(
            tokens,
            vec![
                Token::Keyword(Keyword::Def),
                Token::Name("f".into()),
                Token::LParen,
                Token::RParen,
                Token::Colon,
                Token::Newline,
                Token::Indent,
                Token::Keyword(Keyword::Return),
                Token::Int(1),
                Token::Newline,
                Token::Dedent,
                Token::Name("x".into()),
                Token::Assign,
                Token::Int(2),
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_newlines_inside_brackets_are_ignored() {
        let tokens = kinds("f(a,\n  b)\n");
        assert!(!tokens[..tokens.len() - 2].contains(&Token::Newline));
        assert!(!tokens.contains(&Token::Indent));
    }

    #[test]
    fn test_strings_and_escapes() {
        assert_eq!(
            kinds(r#"'it\'s' "a\nb""#)[..2],
            [Token::Str("it's".into()), Token::Str("a\nb".into())]
        );
        let doc = kinds("\"\"\"line one\nline two\"\"\"\n");
        assert_eq!(doc[0], Token::Str("line one\nline two".into()));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("1.5")[0], Token::Decimal("1.5".into()));
        assert_eq!(kinds("0x1f")[0], Token::Int(31));
        assert!(matches!(
            tokenize("999999999999999999999999999999999999999999"),
            Err(LexError::IntegerOverflow { .. })
        ));
        // 2**127 only fits once negated; the parser decides
        assert_eq!(
            kinds("170141183460469231731687303715884105728")[0],
            Token::Int(1 << 127)
        );
    }

    #[test]
    fn test_hex_prefix_without_digits() {
        let err = tokenize("x = 0x
").unwrap_err();
        assert_eq!(err, LexError::InvalidLiteral { kind: "hexadecimal", span: Span::new(1, 5) });
        assert!(err.to_string().contains("invalid hexadecimal literal"));
        assert!(matches!(tokenize("0x_"), Err(LexError::InvalidLiteral { .. })));
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            kinds("a //= b ** 2 != c")[..6],
            [
                Token::Name("a".into()),
                Token::DoubleSlashAssign,
                Token::Name("b".into()),
                Token::DoubleStar,
                Token::Int(2),
                Token::NotEq
            ]
        );
    }

    #[test]
    fn test_errors_carry_location() {
        let err = tokenize("x = 1\ny = $").unwrap_err();
        assert_eq!(err, LexError::UnexpectedChar { ch: '$', span: Span::new(2, 5) });

        let err = tokenize("if x:\n        a = 1\n    b = 2\n").unwrap_err();
        assert!(matches!(err, LexError::InconsistentDedent { .. }));

        assert!(matches!(tokenize("'open"), Err(LexError::UnterminatedString { .. })));
        assert!(matches!(tokenize(")"), Err(LexError::UnmatchedBracket { .. })));
    }
}
