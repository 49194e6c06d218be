use std::fmt;

use miette::SourceSpan;

use crate::ast::Factor;

/// Source location information for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceLocation {
    /// Line number (1-indexed)
    pub line: usize,
    /// Column number (1-indexed)
    pub column: usize,
    /// Byte offset from start of input
    pub offset: usize,
    /// Length in bytes
    pub length: usize,
}

impl SourceLocation {
    pub fn new(line: usize, column: usize, offset: usize, length: usize) -> Self {
        Self {
            line,
            column,
            offset,
            length,
        }
    }

    /// Create a span from this location to another
    pub fn span_to(&self, other: &SourceLocation) -> SourceLocation {
        SourceLocation {
            line: self.line,
            column: self.column,
            offset: self.offset,
            length: (other.offset + other.length).saturating_sub(self.offset),
        }
    }

    pub fn span(&self) -> SourceSpan {
        (self.offset, self.length).into()
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<input>:{}:{}", self.line, self.column)
    }
}

/// Every token of the ClassAd expression syntax
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Keywords (case-insensitive)
    True,
    False,
    Undefined,
    Error,
    Is,
    Isnt,

    // Literals
    Integer(i64, Option<Factor>),
    Real(f64, Option<Factor>),
    String(String),
    Ident(String),

    // Delimiters
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,
    LeftParen,
    RightParen,
    Semicolon,
    Comma,
    Dot,
    Question,
    Colon,
    Assign,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Lt,
    LtEq,
    Gt,
    GtEq,
    EqEq,
    NotEq,
    MetaEq,
    MetaNotEq,
    And,
    Or,
    Not,
    Tilde,
    Ampersand,
    Pipe,
    Caret,
    Shl,
    Shr,
    UShr,

    Eof,
}

impl TokenKind {
    /// Get the keyword from a word, if it is one. Keywords ignore case.
    pub fn keyword_from_str(s: &str) -> Option<TokenKind> {
        match s.to_ascii_lowercase().as_str() {
            "true" => Some(TokenKind::True),
            "false" => Some(TokenKind::False),
            "undefined" => Some(TokenKind::Undefined),
            "error" => Some(TokenKind::Error),
            "is" => Some(TokenKind::Is),
            "isnt" => Some(TokenKind::Isnt),
            _ => None,
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::True => write!(f, "true"),
            TokenKind::False => write!(f, "false"),
            TokenKind::Undefined => write!(f, "undefined"),
            TokenKind::Error => write!(f, "error"),
            TokenKind::Is => write!(f, "is"),
            TokenKind::Isnt => write!(f, "isnt"),
            TokenKind::Integer(n, factor) => match factor {
                Some(factor) => write!(f, "{}{}", n, factor),
                None => write!(f, "{}", n),
            },
            TokenKind::Real(n, factor) => match factor {
                Some(factor) => write!(f, "{:?}{}", n, factor),
                None => write!(f, "{:?}", n),
            },
            TokenKind::String(s) => write!(f, "\"{}\"", s),
            TokenKind::Ident(s) => write!(f, "{}", s),
            TokenKind::LeftBracket => write!(f, "["),
            TokenKind::RightBracket => write!(f, "]"),
            TokenKind::LeftBrace => write!(f, "{{"),
            TokenKind::RightBrace => write!(f, "}}"),
            TokenKind::LeftParen => write!(f, "("),
            TokenKind::RightParen => write!(f, ")"),
            TokenKind::Semicolon => write!(f, ";"),
            TokenKind::Comma => write!(f, ","),
            TokenKind::Dot => write!(f, "."),
            TokenKind::Question => write!(f, "?"),
            TokenKind::Colon => write!(f, ":"),
            TokenKind::Assign => write!(f, "="),
            TokenKind::Plus => write!(f, "+"),
            TokenKind::Minus => write!(f, "-"),
            TokenKind::Star => write!(f, "*"),
            TokenKind::Slash => write!(f, "/"),
            TokenKind::Percent => write!(f, "%"),
            TokenKind::Lt => write!(f, "<"),
            TokenKind::LtEq => write!(f, "<="),
            TokenKind::Gt => write!(f, ">"),
            TokenKind::GtEq => write!(f, ">="),
            TokenKind::EqEq => write!(f, "=="),
            TokenKind::NotEq => write!(f, "!="),
            TokenKind::MetaEq => write!(f, "=?="),
            TokenKind::MetaNotEq => write!(f, "=!="),
            TokenKind::And => write!(f, "&&"),
            TokenKind::Or => write!(f, "||"),
            TokenKind::Not => write!(f, "!"),
            TokenKind::Tilde => write!(f, "~"),
            TokenKind::Ampersand => write!(f, "&"),
            TokenKind::Pipe => write!(f, "|"),
            TokenKind::Caret => write!(f, "^"),
            TokenKind::Shl => write!(f, "<<"),
            TokenKind::Shr => write!(f, ">>"),
            TokenKind::UShr => write!(f, ">>>"),
            TokenKind::Eof => write!(f, "<eof>"),
        }
    }
}

/// A token with its location and kind
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub location: SourceLocation,
}

impl Token {
    pub fn new(kind: TokenKind, location: SourceLocation) -> Self {
        Self { kind, location }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.kind, self.location)
    }
}
