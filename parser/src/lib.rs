//! Recursive-descent parser producing [`sandlot_ast::Module`]
//!
//! The parser is deliberately permissive about *which* constructs appear:
//! anything outside the language that it can still delimit (a `class` block,
//! a `lambda`, a comprehension) is kept as a `Forbidden` node so that the
//! linter can report every violation at once. Only malformed input is a
//! parse error, and so is nesting deeper than [`MAX_NESTING`]: every later
//! pass walks the tree recursively.

mod error;

pub use error::ParseError;

use sandlot_ast::{
    BoolOp, CmpOp, Decorator, Expr, ExprKind, FunctionDef, Item, Module, Param, Span, Stmt, StmtKind, Target,
    UnaryOp,
};
use sandlot_lexer::{Keyword, LexError, SpannedToken, Token};
use sandlot_types::ArithOp;

pub type ParseResult<T> = Result<T, ParseError>;

/// Deepest nesting of blocks and expressions accepted, counting each link
/// of an operator or call chain as one level
pub const MAX_NESTING: usize = 64;

/// Lex and parse a contract source
pub fn parse(source: &str) -> ParseResult<Module> {
    let tokens = sandlot_lexer::tokenize(source)?;
    let module = Parser::new(tokens).module()?;
    log::debug!("parsed module with {} items", module.items.len());
    Ok(module)
}

struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<SpannedToken>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn enter(&mut self, construct: &'static str) -> ParseResult<()> {
        if self.depth >= MAX_NESTING {
            return Err(ParseError::invalid(
                format!("{construct} nested too deeply (limit {MAX_NESTING})"),
                self.span(),
            ));
        }
        self.depth += 1;
        Ok(())
    }

    /// Run `parse` one nesting level down
    fn nested<T>(&mut self, construct: &'static str, parse: impl FnOnce(&mut Self) -> ParseResult<T>) -> ParseResult<T> {
        self.enter(construct)?;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn peek(&self) -> &Token {
        self.peek_nth(0)
    }

    fn peek_nth(&self, n: usize) -> &Token {
        self.tokens
            .get(self.pos + n)
            .or_else(|| self.tokens.last())
            .map(|t| &t.token)
            .unwrap_or(&Token::Eof)
    }

    fn span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.span)
            .unwrap_or_default()
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == token
    }

    fn check_keyword(&self, keyword: Keyword) -> bool {
        matches!(self.peek(), Token::Keyword(k) if *k == keyword)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: Keyword) -> bool {
        if self.check_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn unexpected(&self, expected: &'static str) -> ParseError {
        ParseError::Unexpected {
            expected,
            found: self.peek().to_string(),
            span: self.span(),
        }
    }

    fn expect(&mut self, token: &Token, expected: &'static str) -> ParseResult<Span> {
        let span = self.span();
        if self.eat(token) {
            Ok(span)
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword, expected: &'static str) -> ParseResult<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn expect_name(&mut self) -> ParseResult<String> {
        match self.peek().clone() {
            Token::Name(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("a name")),
        }
    }

    fn expect_line_end(&mut self) -> ParseResult<()> {
        match self.peek() {
            Token::Newline => {
                self.advance();
                Ok(())
            }
            Token::Eof | Token::Dedent => Ok(()),
            _ => Err(self.unexpected("end of line")),
        }
    }

    fn skip_newlines(&mut self) {
        while self.eat(&Token::Newline) {}
    }

    // Skipping, for constructs kept only as `Forbidden`

    fn skip_line(&mut self) {
        loop {
            match self.advance() {
                Token::Newline | Token::Eof => break,
                _ => {}
            }
        }
    }

    fn skip_block(&mut self) {
        if !self.check(&Token::Indent) {
            return;
        }
        let mut depth = 0usize;
        loop {
            match self.advance() {
                Token::Indent => depth += 1,
                Token::Dedent => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        break;
                    }
                }
                Token::Eof => break,
                _ => {}
            }
        }
    }

    /// Skip to the closing bracket of the enclosing group, leaving it unconsumed
    fn skip_to_close(&mut self) {
        let mut depth = 0usize;
        loop {
            match self.peek() {
                Token::LParen | Token::LBracket | Token::LBrace => depth += 1,
                Token::RParen | Token::RBracket | Token::RBrace => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                }
                Token::Eof => break,
                _ => {}
            }
            self.advance();
        }
    }

    /// Skip the rest of an expression (a lambda body)
    fn skip_expression(&mut self) {
        let mut depth = 0usize;
        loop {
            match self.peek() {
                Token::LParen | Token::LBracket | Token::LBrace => depth += 1,
                Token::RParen | Token::RBracket | Token::RBrace => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                }
                Token::Comma if depth == 0 => break,
                Token::Newline | Token::Eof => break,
                _ => {}
            }
            self.advance();
        }
    }

    // Items and statements

    fn module(&mut self) -> ParseResult<Module> {
        let mut items = Vec::new();
        loop {
            self.skip_newlines();
            match self.peek() {
                Token::Eof => break,
                Token::Indent => return Err(ParseError::invalid("unexpected indent", self.span())),
                Token::At | Token::Keyword(Keyword::Def) => items.push(Item::Function(self.function_def()?)),
                Token::Keyword(Keyword::Import) => {
                    let span = self.span();
                    let name = self.import()?;
                    items.push(Item::Import { name, span });
                }
                _ => {
                    let stmt = self.statement()?;
                    match stmt.kind {
                        StmtKind::Assign {
                            target: Target::Name(target),
                            value,
                        } => items.push(Item::Assign {
                            target,
                            value,
                            span: stmt.span,
                        }),
                        kind => items.push(Item::Stmt(Stmt { kind, span: stmt.span })),
                    }
                }
            }
        }
        Ok(Module { items })
    }

    fn import(&mut self) -> ParseResult<String> {
        self.expect_keyword(Keyword::Import, "'import'")?;
        let name = self.expect_name()?;
        if self.check(&Token::Dot) {
            return Err(ParseError::invalid("dotted imports are not supported", self.span()));
        }
        if self.check(&Token::Comma) {
            return Err(ParseError::invalid("import one contract per statement", self.span()));
        }
        if self.check_keyword(Keyword::As) {
            return Err(ParseError::invalid("import aliases are not supported", self.span()));
        }
        self.expect_line_end()?;
        Ok(name)
    }

    fn function_def(&mut self) -> ParseResult<FunctionDef> {
        let mut decorators = Vec::new();
        while self.check(&Token::At) {
            let span = self.span();
            self.advance();
            let name = self.expect_name()?;
            if !self.check(&Token::Newline) {
                return Err(ParseError::invalid(
                    format!("decorator '@{name}' takes no arguments"),
                    self.span(),
                ));
            }
            self.skip_newlines();
            decorators.push(Decorator { name, span });
        }

        let span = self.span();
        self.expect_keyword(Keyword::Def, "'def'")?;
        let name = self.expect_name()?;
        self.expect(&Token::LParen, "'('")?;
        let params = self.params()?;
        self.expect(&Token::RParen, "')'")?;
        if self.eat(&Token::Arrow) {
            // Return annotations carry no meaning at run time
            self.expression()?;
        }
        self.expect(&Token::Colon, "':'")?;

        let mut body = self.block()?;
        let docstring = match body.first() {
            Some(Stmt {
                kind:
                    StmtKind::Expr(Expr {
                        kind: ExprKind::Str(doc),
                        ..
                    }),
                ..
            }) => Some(doc.trim().to_string()),
            _ => None,
        };
        if docstring.is_some() {
            body.remove(0);
        }

        Ok(FunctionDef {
            name,
            params,
            decorators,
            docstring,
            body,
            span,
        })
    }

    fn params(&mut self) -> ParseResult<Vec<Param>> {
        let mut params = Vec::new();
        while !self.check(&Token::RParen) {
            let span = self.span();
            if matches!(self.peek(), Token::Star | Token::DoubleStar) {
                return Err(ParseError::invalid("variadic parameters are not supported", span));
            }
            let name = self.expect_name()?;
            let annotation = if self.eat(&Token::Colon) {
                match self.advance() {
                    Token::Name(ty) => Some(ty),
                    Token::Keyword(Keyword::None) => Some("None".to_string()),
                    _ => return Err(ParseError::invalid("expected a type name", self.span())),
                }
            } else {
                None
            };
            let default = if self.eat(&Token::Assign) {
                Some(self.expression()?)
            } else {
                None
            };
            if params.iter().any(|p: &Param| p.name == name) {
                return Err(ParseError::invalid(format!("duplicate parameter '{name}'"), span));
            }
            if default.is_none() && params.iter().any(|p: &Param| p.default.is_some()) {
                return Err(ParseError::invalid(
                    format!("non-default parameter '{name}' follows default parameter"),
                    span,
                ));
            }
            params.push(Param {
                name,
                annotation,
                default,
                span,
            });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(params)
    }

    /// Body after a `:`, either an indented block or a single line
    fn block(&mut self) -> ParseResult<Vec<Stmt>> {
        self.nested("block", Self::block_body)
    }

    fn block_body(&mut self) -> ParseResult<Vec<Stmt>> {
        if !self.eat(&Token::Newline) {
            return Ok(vec![self.simple_statement()?]);
        }
        self.skip_newlines();
        if !self.eat(&Token::Indent) {
            return Err(self.unexpected("an indented block"));
        }
        let mut body = Vec::new();
        loop {
            self.skip_newlines();
            match self.peek() {
                Token::Dedent => {
                    self.advance();
                    break;
                }
                Token::Eof => break,
                _ => body.push(self.statement()?),
            }
        }
        Ok(body)
    }

    fn statement(&mut self) -> ParseResult<Stmt> {
        let span = self.span();
        let kind = match self.peek() {
            Token::Keyword(Keyword::If) => {
                self.advance();
                self.if_statement()?
            }
            Token::Keyword(Keyword::For) => {
                self.advance();
                let var = self.expect_name()?;
                if self.check(&Token::Comma) {
                    return Err(ParseError::invalid("tuple unpacking is not supported", self.span()));
                }
                self.expect_keyword(Keyword::In, "'in'")?;
                let iter = self.expression()?;
                self.expect(&Token::Colon, "':'")?;
                let body = self.block()?;
                if self.check_keyword(Keyword::Else) {
                    return Err(ParseError::invalid("'for ... else' is not supported", self.span()));
                }
                StmtKind::For { var, iter, body }
            }
            Token::Keyword(Keyword::While) => {
                self.advance();
                let cond = self.expression()?;
                self.expect(&Token::Colon, "':'")?;
                let body = self.block()?;
                StmtKind::While { cond, body }
            }
            Token::At | Token::Keyword(Keyword::Def) => StmtKind::FunctionDef(Box::new(self.function_def()?)),
            Token::Keyword(Keyword::Class) => self.forbidden_block("class")?,
            Token::Keyword(Keyword::With) => self.forbidden_block("with")?,
            Token::Keyword(Keyword::Async) => self.forbidden_block("async")?,
            Token::Keyword(Keyword::Try) => {
                let kind = self.forbidden_block("try")?;
                while matches!(
                    self.peek(),
                    Token::Keyword(Keyword::Except | Keyword::Finally | Keyword::Else)
                ) {
                    self.skip_line();
                    self.skip_block();
                }
                kind
            }
            _ => return self.simple_statement(),
        };
        Ok(Stmt { kind, span })
    }

    fn forbidden_block(&mut self, construct: &'static str) -> ParseResult<StmtKind> {
        self.skip_line();
        self.skip_block();
        Ok(StmtKind::Forbidden(construct))
    }

    fn if_statement(&mut self) -> ParseResult<StmtKind> {
        let cond = self.expression()?;
        self.expect(&Token::Colon, "':'")?;
        let body = self.block()?;

        let orelse = if self.check_keyword(Keyword::Elif) {
            let span = self.span();
            self.advance();
            vec![Stmt {
                kind: self.nested("if statement", Self::if_statement)?,
                span,
            }]
        } else if self.eat_keyword(Keyword::Else) {
            self.expect(&Token::Colon, "':'")?;
            self.block()?
        } else {
            Vec::new()
        };

        Ok(StmtKind::If { cond, body, orelse })
    }

    fn simple_statement(&mut self) -> ParseResult<Stmt> {
        let span = self.span();
        let kind = match self.peek().clone() {
            Token::Keyword(Keyword::Return) => {
                self.advance();
                if matches!(self.peek(), Token::Newline | Token::Eof | Token::Dedent) {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.expression()?))
                }
            }
            Token::Keyword(Keyword::Assert) => {
                self.advance();
                let cond = self.expression()?;
                let message = if self.eat(&Token::Comma) {
                    Some(self.expression()?)
                } else {
                    None
                };
                StmtKind::Assert { cond, message }
            }
            Token::Keyword(Keyword::Pass) => {
                self.advance();
                StmtKind::Pass
            }
            Token::Keyword(Keyword::Break) => {
                self.advance();
                StmtKind::Break
            }
            Token::Keyword(Keyword::Continue) => {
                self.advance();
                StmtKind::Continue
            }
            Token::Keyword(Keyword::Import) => {
                let name = self.import()?;
                return Ok(Stmt {
                    kind: StmtKind::Import(name),
                    span,
                });
            }
            Token::Keyword(keyword @ (Keyword::Global
            | Keyword::Nonlocal
            | Keyword::Del
            | Keyword::Raise
            | Keyword::From
            | Keyword::Yield
            | Keyword::Await)) => {
                let construct = match keyword {
                    Keyword::Global => "global",
                    Keyword::Nonlocal => "nonlocal",
                    Keyword::Del => "del",
                    Keyword::Raise => "raise",
                    Keyword::From => "from ... import",
                    Keyword::Yield => "yield",
                    _ => "await",
                };
                self.skip_line();
                return Ok(Stmt {
                    kind: StmtKind::Forbidden(construct),
                    span,
                });
            }
            _ => self.expression_statement()?,
        };
        self.expect_line_end()?;
        Ok(Stmt { kind, span })
    }

    fn expression_statement(&mut self) -> ParseResult<StmtKind> {
        let expr = self.expression()?;
        if self.check(&Token::Comma) {
            return Err(ParseError::invalid("tuple assignment is not supported", self.span()));
        }

        let op = match self.peek() {
            Token::Assign => None,
            Token::PlusAssign => Some(ArithOp::Add),
            Token::MinusAssign => Some(ArithOp::Sub),
            Token::StarAssign => Some(ArithOp::Mul),
            Token::SlashAssign => Some(ArithOp::Div),
            Token::DoubleSlashAssign => Some(ArithOp::FloorDiv),
            Token::PercentAssign => Some(ArithOp::Mod),
            _ => return Ok(StmtKind::Expr(expr)),
        };
        self.advance();

        let target = into_target(expr)?;
        let value = self.expression()?;
        if self.check(&Token::Assign) {
            return Err(ParseError::invalid("chained assignment is not supported", self.span()));
        }
        Ok(match op {
            None => StmtKind::Assign { target, value },
            Some(op) => StmtKind::AugAssign { target, op, value },
        })
    }

    // Expressions, lowest precedence first

    fn expression(&mut self) -> ParseResult<Expr> {
        self.nested("expression", Self::conditional)
    }

    fn conditional(&mut self) -> ParseResult<Expr> {
        if self.check_keyword(Keyword::Lambda) {
            let span = self.span();
            self.advance();
            self.skip_expression();
            return Ok(Expr::new(ExprKind::Forbidden("lambda"), span));
        }

        let then = self.or_expr()?;
        if !self.check_keyword(Keyword::If) {
            return Ok(then);
        }
        self.advance();
        let cond = self.or_expr()?;
        self.expect_keyword(Keyword::Else, "'else'")?;
        let orelse = self.expression()?;
        let span = then.span;
        Ok(Expr::new(
            ExprKind::IfExp {
                cond: Box::new(cond),
                then: Box::new(then),
                orelse: Box::new(orelse),
            },
            span,
        ))
    }

    fn or_expr(&mut self) -> ParseResult<Expr> {
        let base = self.depth;
        let mut lhs = self.and_expr()?;
        while self.eat_keyword(Keyword::Or) {
            self.enter("expression")?;
            let rhs = self.and_expr()?;
            lhs = bool_op(BoolOp::Or, lhs, rhs);
        }
        self.depth = base;
        Ok(lhs)
    }

    fn and_expr(&mut self) -> ParseResult<Expr> {
        let base = self.depth;
        let mut lhs = self.not_expr()?;
        while self.eat_keyword(Keyword::And) {
            self.enter("expression")?;
            let rhs = self.not_expr()?;
            lhs = bool_op(BoolOp::And, lhs, rhs);
        }
        self.depth = base;
        Ok(lhs)
    }

    fn not_expr(&mut self) -> ParseResult<Expr> {
        if self.check_keyword(Keyword::Not) {
            let span = self.span();
            self.advance();
            let operand = self.nested("expression", Self::not_expr)?;
            return Ok(Expr::new(
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                span,
            ));
        }
        self.comparison()
    }

    fn compare_op(&mut self) -> Option<CmpOp> {
        let op = match self.peek() {
            Token::EqEq => CmpOp::Eq,
            Token::NotEq => CmpOp::NotEq,
            Token::Lt => CmpOp::Lt,
            Token::Le => CmpOp::Le,
            Token::Gt => CmpOp::Gt,
            Token::Ge => CmpOp::Ge,
            Token::Keyword(Keyword::In) => CmpOp::In,
            Token::Keyword(Keyword::Not) if matches!(self.peek_nth(1), Token::Keyword(Keyword::In)) => {
                self.advance();
                CmpOp::NotIn
            }
            Token::Keyword(Keyword::Is) => {
                if matches!(self.peek_nth(1), Token::Keyword(Keyword::Not)) {
                    self.advance();
                    CmpOp::IsNot
                } else {
                    CmpOp::Is
                }
            }
            _ => return None,
        };
        self.advance();
        Some(op)
    }

    fn comparison(&mut self) -> ParseResult<Expr> {
        let lhs = self.arith()?;
        let Some(op) = self.compare_op() else {
            return Ok(lhs);
        };
        let rhs = self.arith()?;
        let span = self.span();
        if self.compare_op().is_some() {
            return Err(ParseError::invalid("chained comparisons are not supported", span));
        }
        let span = lhs.span;
        Ok(Expr::new(
            ExprKind::Compare {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            span,
        ))
    }

    fn arith(&mut self) -> ParseResult<Expr> {
        let base = self.depth;
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Token::Plus => ArithOp::Add,
                Token::Minus => ArithOp::Sub,
                _ => break,
            };
            self.enter("expression")?;
            self.advance();
            let rhs = self.term()?;
            lhs = binary(op, lhs, rhs);
        }
        self.depth = base;
        Ok(lhs)
    }

    fn term(&mut self) -> ParseResult<Expr> {
        let base = self.depth;
        let mut lhs = self.factor()?;
        loop {
            let op = match self.peek() {
                Token::Star => ArithOp::Mul,
                Token::Slash => ArithOp::Div,
                Token::DoubleSlash => ArithOp::FloorDiv,
                Token::Percent => ArithOp::Mod,
                _ => break,
            };
            self.enter("expression")?;
            self.advance();
            let rhs = self.factor()?;
            lhs = binary(op, lhs, rhs);
        }
        self.depth = base;
        Ok(lhs)
    }

    fn factor(&mut self) -> ParseResult<Expr> {
        let op = match self.peek() {
            Token::Minus => UnaryOp::Neg,
            Token::Plus => UnaryOp::Plus,
            _ => return self.power(),
        };
        let span = self.span();
        self.advance();
        if let (UnaryOp::Neg, Token::Int(magnitude)) = (op, self.peek().clone()) {
            // -2**127 is representable although 2**127 is not
            let binds_tighter = matches!(
                self.peek_nth(1),
                Token::DoubleStar | Token::LParen | Token::LBracket | Token::Dot
            );
            if !binds_tighter && i128::try_from(magnitude).is_err() {
                if let Some(value) = 0i128.checked_sub_unsigned(magnitude) {
                    self.advance();
                    return Ok(Expr::new(ExprKind::Int(value), span));
                }
            }
        }
        let operand = self.nested("expression", Self::factor)?;
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span,
        ))
    }

    fn power(&mut self) -> ParseResult<Expr> {
        let base = self.postfix()?;
        if self.eat(&Token::DoubleStar) {
            // Right-associative, binds tighter than unary minus on the left
            let exponent = self.nested("expression", Self::factor)?;
            return Ok(binary(ArithOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> ParseResult<Expr> {
        let base = self.depth;
        let mut expr = self.atom()?;
        loop {
            if matches!(self.peek(), Token::LParen | Token::Dot | Token::LBracket) {
                self.enter("expression")?;
            }
            match self.peek() {
                Token::LParen => {
                    self.advance();
                    let (args, kwargs) = self.call_args()?;
                    self.expect(&Token::RParen, "')'")?;
                    let span = expr.span;
                    expr = Expr::new(
                        ExprKind::Call {
                            func: Box::new(expr),
                            args,
                            kwargs,
                        },
                        span,
                    );
                }
                Token::Dot => {
                    self.advance();
                    let attr = self.expect_name()?;
                    let span = expr.span;
                    expr = Expr::new(
                        ExprKind::Attribute {
                            value: Box::new(expr),
                            attr,
                        },
                        span,
                    );
                }
                Token::LBracket => {
                    self.advance();
                    let index = self.subscript_index()?;
                    self.expect(&Token::RBracket, "']'")?;
                    let span = expr.span;
                    expr = Expr::new(
                        ExprKind::Subscript {
                            value: Box::new(expr),
                            index: Box::new(index),
                        },
                        span,
                    );
                }
                _ => break,
            }
        }
        self.depth = base;
        Ok(expr)
    }

    fn subscript_index(&mut self) -> ParseResult<Expr> {
        let span = self.span();
        let mut parts = vec![self.expression()?];
        if self.check(&Token::Colon) {
            return Err(ParseError::invalid("slices are not supported", self.span()));
        }
        while self.eat(&Token::Comma) {
            if self.check(&Token::RBracket) {
                break;
            }
            parts.push(self.expression()?);
        }
        if parts.len() == 1 {
            return Ok(parts.remove(0));
        }
        Ok(Expr::new(ExprKind::Tuple(parts), span))
    }

    fn call_args(&mut self) -> ParseResult<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        while !self.check(&Token::RParen) {
            let span = self.span();
            if matches!(self.peek(), Token::Star | Token::DoubleStar) {
                return Err(ParseError::invalid("argument unpacking is not supported", span));
            }

            if let (Token::Name(name), Token::Assign) = (self.peek().clone(), self.peek_nth(1)) {
                self.advance();
                self.advance();
                let value = self.expression()?;
                if kwargs.iter().any(|(k, _)| *k == name) {
                    return Err(ParseError::invalid(format!("keyword argument '{name}' repeated"), span));
                }
                kwargs.push((name, value));
            } else {
                if !kwargs.is_empty() {
                    return Err(ParseError::invalid(
                        "positional argument follows keyword argument",
                        span,
                    ));
                }
                let arg = self.expression()?;
                if self.check_keyword(Keyword::For) {
                    self.skip_to_close();
                    args.push(Expr::new(ExprKind::Forbidden("generator expression"), span));
                    break;
                }
                args.push(arg);
            }

            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok((args, kwargs))
    }

    fn atom(&mut self) -> ParseResult<Expr> {
        let span = self.span();
        let kind = match self.peek().clone() {
            Token::Name(name) => {
                self.advance();
                ExprKind::Name(name)
            }
            Token::Int(magnitude) => {
                let value = i128::try_from(magnitude).map_err(|_| LexError::IntegerOverflow { span })?;
                self.advance();
                ExprKind::Int(value)
            }
            Token::Decimal(text) => {
                self.advance();
                ExprKind::Decimal(text)
            }
            Token::Str(mut text) => {
                self.advance();
                while let Token::Str(more) = self.peek() {
                    text.push_str(more);
                    self.advance();
                }
                ExprKind::Str(text)
            }
            Token::Keyword(Keyword::True) => {
                self.advance();
                ExprKind::Bool(true)
            }
            Token::Keyword(Keyword::False) => {
                self.advance();
                ExprKind::Bool(false)
            }
            Token::Keyword(Keyword::None) => {
                self.advance();
                ExprKind::None
            }
            Token::Keyword(keyword @ (Keyword::Yield | Keyword::Await)) => {
                self.advance();
                self.skip_expression();
                ExprKind::Forbidden(if keyword == Keyword::Yield { "yield" } else { "await" })
            }
            Token::LParen => {
                self.advance();
                if self.eat(&Token::RParen) {
                    return Ok(Expr::new(ExprKind::Tuple(Vec::new()), span));
                }
                let first = self.expression()?;
                if self.check_keyword(Keyword::For) {
                    self.skip_to_close();
                    self.expect(&Token::RParen, "')'")?;
                    return Ok(Expr::new(ExprKind::Forbidden("generator expression"), span));
                }
                if !self.check(&Token::Comma) {
                    self.expect(&Token::RParen, "')'")?;
                    return Ok(first);
                }
                let mut items = vec![first];
                while self.eat(&Token::Comma) {
                    if self.check(&Token::RParen) {
                        break;
                    }
                    items.push(self.expression()?);
                }
                self.expect(&Token::RParen, "')'")?;
                ExprKind::Tuple(items)
            }
            Token::LBracket => {
                self.advance();
                let mut items = Vec::new();
                while !self.check(&Token::RBracket) {
                    items.push(self.expression()?);
                    if items.len() == 1 && self.check_keyword(Keyword::For) {
                        self.skip_to_close();
                        self.expect(&Token::RBracket, "']'")?;
                        return Ok(Expr::new(ExprKind::Forbidden("list comprehension"), span));
                    }
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(&Token::RBracket, "']'")?;
                ExprKind::List(items)
            }
            Token::LBrace => {
                self.advance();
                let mut entries = Vec::new();
                while !self.check(&Token::RBrace) {
                    let key = self.expression()?;
                    if !self.eat(&Token::Colon) {
                        if entries.is_empty() {
                            self.skip_to_close();
                            self.expect(&Token::RBrace, "'}'")?;
                            return Ok(Expr::new(ExprKind::Forbidden("set"), span));
                        }
                        return Err(self.unexpected("':'"));
                    }
                    let value = self.expression()?;
                    if entries.is_empty() && self.check_keyword(Keyword::For) {
                        self.skip_to_close();
                        self.expect(&Token::RBrace, "'}'")?;
                        return Ok(Expr::new(ExprKind::Forbidden("dict comprehension"), span));
                    }
                    entries.push((key, value));
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(&Token::RBrace, "'}'")?;
                ExprKind::Dict(entries)
            }
            _ => return Err(self.unexpected("an expression")),
        };
        Ok(Expr::new(kind, span))
    }
}

fn binary(op: ArithOp, lhs: Expr, rhs: Expr) -> Expr {
    let span = lhs.span;
    Expr::new(
        ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        span,
    )
}

fn bool_op(op: BoolOp, lhs: Expr, rhs: Expr) -> Expr {
    let span = lhs.span;
    Expr::new(
        ExprKind::BoolOp {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        span,
    )
}

fn into_target(expr: Expr) -> ParseResult<Target> {
    match expr.kind {
        ExprKind::Name(name) => Ok(Target::Name(name)),
        ExprKind::Subscript { value, index } => Ok(Target::Subscript { value, index }),
        ExprKind::Attribute { value, attr } => Ok(Target::Attribute { value, attr }),
        _ => Err(ParseError::invalid("cannot assign to this expression", expr.span)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = r#"
balances = Hash(default_value=0)

@construct
def seed():
    balances['treasury'] = 1_000

@export
def transfer(to: str, amount: int):
    """Move funds."""
    assert amount > 0, 'Amount must be positive.'
    balances[ctx.caller] -= amount
    balances[to] += amount
"#;

    fn function(module: &Module, name: &str) -> FunctionDef {
        module
            .items
            .iter()
            .find_map(|item| match item {
                Item::Function(f) if f.name == name => Some(f.clone()),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_parse_token_contract() {
        let module = parse(TOKEN).unwrap();
        assert_eq!(module.items.len(), 3);
        assert!(matches!(&module.items[0], Item::Assign { target, .. } if target == "balances"));

        let transfer = function(&module, "transfer");
        assert_eq!(transfer.decorators[0].name, "export");
        assert_eq!(transfer.docstring.as_deref(), Some("Move funds."));
        assert_eq!(transfer.params[0].annotation.as_deref(), Some("str"));
        assert_eq!(transfer.body.len(), 3);
        assert!(matches!(
            transfer.body[1].kind,
            StmtKind::AugAssign { op: ArithOp::Sub, target: Target::Subscript { .. }, .. }
        ));
        assert_eq!(transfer.span, Span::new(9, 1));
    }

    #[test]
    fn test_forbidden_constructs_are_kept() {
        let source = "class A:\n    x = 1\ntry:\n    pass\nexcept:\n    pass\nf = lambda x: x\nglobal y\n";
        let module = parse(source).unwrap();
        let kinds: Vec<_> = module
            .items
            .iter()
            .map(|item| match item {
                Item::Stmt(Stmt {
                    kind: StmtKind::Forbidden(c),
                    ..
                }) => *c,
                Item::Assign { value, .. } => match value.kind {
                    ExprKind::Forbidden(c) => c,
                    _ => "other",
                },
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["class", "try", "lambda", "global"]);
    }

    #[test]
    fn test_while_is_parsed_for_the_linter() {
        let module = parse("def f():\n    while True:\n        pass\n").unwrap();
        let f = function(&module, "f");
        assert!(matches!(f.body[0].kind, StmtKind::While { .. }));
        assert_eq!(f.body[0].span, Span::new(2, 5));
    }

    #[test]
    fn test_elif_chain_and_conditional_expression() {
        let source = "def f(x):\n    if x < 1:\n        return 'a'\n    elif x < 2:\n        return 'b'\n    else:\n        return 'c' if x else 'd'\n";
        let f = function(&parse(source).unwrap(), "f");
        let StmtKind::If { orelse, .. } = &f.body[0].kind else {
            panic!("expected if");
        };
        let StmtKind::If { orelse: inner, .. } = &orelse[0].kind else {
            panic!("expected elif");
        };
        assert!(matches!(
            inner[0].kind,
            StmtKind::Return(Some(Expr { kind: ExprKind::IfExp { .. }, .. }))
        ));
    }

    #[test]
    fn test_multi_part_subscript_and_kwargs() {
        let module = parse("x = approvals[owner, spender]\ny = Hash(default_value=0)\n").unwrap();
        let Item::Assign { value, .. } = &module.items[0] else {
            panic!("expected assignment");
        };
        let ExprKind::Subscript { index, .. } = &value.kind else {
            panic!("expected subscript");
        };
        assert!(matches!(&index.kind, ExprKind::Tuple(parts) if parts.len() == 2));

        let Item::Assign { value, .. } = &module.items[1] else {
            panic!("expected assignment");
        };
        assert!(matches!(&value.kind, ExprKind::Call { kwargs, .. } if kwargs[0].0 == "default_value"));
    }

    #[test]
    fn test_precedence() {
        let module = parse("x = -2 ** 2 + 3 * 4\n").unwrap();
        let Item::Assign { value, .. } = &module.items[0] else {
            panic!("expected assignment");
        };
        let ExprKind::Binary { op: ArithOp::Add, lhs, rhs } = &value.kind else {
            panic!("expected addition at the root");
        };
        assert!(matches!(lhs.kind, ExprKind::Unary { op: UnaryOp::Neg, .. }));
        assert!(matches!(rhs.kind, ExprKind::Binary { op: ArithOp::Mul, .. }));
    }

    #[test]
    fn test_errors() {
        let err = parse("x = 1 < 2 < 3\n").unwrap_err();
        assert!(err.to_string().contains("chained comparisons"));

        let err = parse("def f(:\n    pass\n").unwrap_err();
        assert_eq!(err.span(), Span::new(1, 7));

        assert!(parse("a, b = 1, 2\n").is_err());
        assert!(parse("x = y[1:2]\n").is_err());
        assert!(matches!(parse("x = 'open"), Err(ParseError::Lex(_))));
    }

    fn nesting_error(source: &str) -> ParseError {
        let err = parse(source).unwrap_err();
        assert!(err.to_string().contains("nested too deeply"), "unexpected error {err}");
        err
    }

    #[test]
    fn test_nesting_limit() {
        let shallow = format!("x = {}1{}\n", "(".repeat(20), ")".repeat(20));
        assert!(parse(&shallow).is_ok());

        let err = nesting_error(&format!("x = {}1{}\n", "(".repeat(100), ")".repeat(100)));
        assert_eq!(err.span().line, 1);
        nesting_error(&format!("x = {}1{}\n", "[".repeat(100), "]".repeat(100)));
        nesting_error(&format!("x = {}1\n", "not ".repeat(100)));
        nesting_error(&format!("x = {}1\n", "-".repeat(100)));
        nesting_error(&format!("x = 2{}\n", " ** 2".repeat(100)));
    }

    #[test]
    fn test_long_chains_count_as_nesting() {
        assert!(parse(&format!("x = 1{}\n", " + 1".repeat(30))).is_ok());
        nesting_error(&format!("x = 1{}\n", " + 1".repeat(200)));
        nesting_error(&format!("x = a{}\n", ".b".repeat(200)));
        nesting_error(&format!("x = f{}\n", "()".repeat(200)));
        nesting_error(&format!("x = a{}\n", " or b".repeat(200)));
    }

    #[test]
    fn test_deep_blocks() {
        let mut source = String::from("def f():\n");
        for level in 1..100 {
            source.push_str(&"    ".repeat(level));
            source.push_str("if True:\n");
        }
        source.push_str(&"    ".repeat(100));
        source.push_str("pass\n");
        nesting_error(&source);
    }

    #[test]
    fn test_default_parameter_order() {
        assert!(parse("def f(a, b=1):\n    pass\n").is_ok());
        let err = parse("def f(a=1, b):\n    pass\n").unwrap_err();
        assert!(err.to_string().contains("non-default parameter 'b' follows default parameter"));
        assert_eq!(err.span(), Span::new(1, 12));
    }

    #[test]
    fn test_integer_literal_bounds() {
        let module = parse("x = -170141183460469231731687303715884105728\n").unwrap();
        let Item::Assign { value, .. } = &module.items[0] else {
            panic!("expected assignment");
        };
        assert_eq!(value.kind, ExprKind::Int(i128::MIN));

        let err = parse("x = 170141183460469231731687303715884105728\n").unwrap_err();
        assert!(matches!(err, ParseError::Lex(LexError::IntegerOverflow { .. })));
        assert!(parse("x = -170141183460469231731687303715884105729\n").is_err());

        let err = parse("x = 0x\n").unwrap_err();
        assert!(err.to_string().contains("invalid hexadecimal literal"));
    }
}
