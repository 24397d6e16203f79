use std::fmt;

use sandlot_ast::Span;

/// Reserved words
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    Def,
    If,
    Elif,
    Else,
    For,
    In,
    While,
    Return,
    Assert,
    Pass,
    Break,
    Continue,
    Import,
    From,
    And,
    Or,
    Not,
    Is,
    True,
    False,
    None,
    Class,
    Try,
    Except,
    Finally,
    With,
    Lambda,
    Global,
    Nonlocal,
    Yield,
    Async,
    Await,
    Del,
    Raise,
    As,
}

impl Keyword {
    pub fn from_ident(ident: &str) -> Option<Self> {
        Some(match ident {
            "def" => Keyword::Def,
            "if" => Keyword::If,
            "elif" => Keyword::Elif,
            "else" => Keyword::Else,
            "for" => Keyword::For,
            "in" => Keyword::In,
            "while" => Keyword::While,
            "return" => Keyword::Return,
            "assert" => Keyword::Assert,
            "pass" => Keyword::Pass,
            "break" => Keyword::Break,
            "continue" => Keyword::Continue,
            "import" => Keyword::Import,
            "from" => Keyword::From,
            "and" => Keyword::And,
            "or" => Keyword::Or,
            "not" => Keyword::Not,
            "is" => Keyword::Is,
            "True" => Keyword::True,
            "False" => Keyword::False,
            "None" => Keyword::None,
            "class" => Keyword::Class,
            "try" => Keyword::Try,
            "except" => Keyword::Except,
            "finally" => Keyword::Finally,
            "with" => Keyword::With,
            "lambda" => Keyword::Lambda,
            "global" => Keyword::Global,
            "nonlocal" => Keyword::Nonlocal,
            "yield" => Keyword::Yield,
            "async" => Keyword::Async,
            "await" => Keyword::Await,
            "del" => Keyword::Del,
            "raise" => Keyword::Raise,
            "as" => Keyword::As,
            _ => return None,
        })
    }
}

/// Lexical token
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Name(String),
    /// Magnitude only; a leading `-` is a separate token
    Int(u128),
    Decimal(String),
    Str(String),
    Keyword(Keyword),

    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Colon,
    Comma,
    Dot,
    At,
    Arrow,

    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    DoubleSlashAssign,
    PercentAssign,

    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,

    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,

    Newline,
    Indent,
    Dedent,
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Token::Name(n) => return write!(f, "name '{n}'"),
            Token::Int(i) => return write!(f, "integer {i}"),
            Token::Decimal(d) => return write!(f, "number {d}"),
            Token::Str(_) => "string literal",
            Token::Keyword(k) => return write!(f, "keyword '{}'", format!("{k:?}").to_lowercase()),
            Token::LParen => "'('",
            Token::RParen => "')'",
            Token::LBracket => "'['",
            Token::RBracket => "']'",
            Token::LBrace => "'{'",
            Token::RBrace => "'}'",
            Token::Colon => "':'",
            Token::Comma => "','",
            Token::Dot => "'.'",
            Token::At => "'@'",
            Token::Arrow => "'->'",
            Token::Assign => "'='",
            Token::PlusAssign => "'+='",
            Token::MinusAssign => "'-='",
            Token::StarAssign => "'*='",
            Token::SlashAssign => "'/='",
            Token::DoubleSlashAssign => "'//='",
            Token::PercentAssign => "'%='",
            Token::Plus => "'+'",
            Token::Minus => "'-'",
            Token::Star => "'*'",
            Token::DoubleStar => "'**'",
            Token::Slash => "'/'",
            Token::DoubleSlash => "'//'",
            Token::Percent => "'%'",
            Token::EqEq => "'=='",
            Token::NotEq => "'!='",
            Token::Lt => "'<'",
            Token::Le => "'<='",
            Token::Gt => "'>'",
            Token::Ge => "'>='",
            Token::Newline => "end of line",
            Token::Indent => "indent",
            Token::Dedent => "dedent",
            Token::Eof => "end of input",
        };
        f.write_str(text)
    }
}

/// Token with the location of its first character
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}
