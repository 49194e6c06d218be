//! Parser for ClassAd source text
//!
//! A recursive descent parser over the token stream that builds nodes
//! directly in an [`Arena`]. One token of lookahead is enough for the whole
//! grammar; `ident (` is the only place that peeks one further.

use tracing::debug;

use crate::ast::{Arena, ExprId, OpKind};
use crate::errors::{ClassAdError, ClassAdResult};
use crate::evaluator::Value;
use crate::lexer::token::{SourceLocation, Token, TokenKind};
use crate::lexer::Lexer;

/// Maximum parse recursion depth before the parser bails out.
/// Each nesting level expands to ~12 intermediate stack frames in the
/// recursive descent parser, so this must be conservative to avoid
/// stack overflow in debug builds.
pub const MAX_PARSE_DEPTH: usize = 128;

/// Binary operator levels from loosest to tightest, below the ternary
const BINARY_LEVELS: &[&[(TokenKind, OpKind)]] = &[
    &[(TokenKind::Or, OpKind::Or)],
    &[(TokenKind::And, OpKind::And)],
    &[(TokenKind::Pipe, OpKind::BitOr)],
    &[(TokenKind::Caret, OpKind::BitXor)],
    &[(TokenKind::Ampersand, OpKind::BitAnd)],
    &[
        (TokenKind::EqEq, OpKind::Eq),
        (TokenKind::NotEq, OpKind::Ne),
        (TokenKind::MetaEq, OpKind::MetaEq),
        (TokenKind::MetaNotEq, OpKind::MetaNe),
        (TokenKind::Is, OpKind::MetaEq),
        (TokenKind::Isnt, OpKind::MetaNe),
    ],
    &[
        (TokenKind::Lt, OpKind::Lt),
        (TokenKind::LtEq, OpKind::Le),
        (TokenKind::Gt, OpKind::Gt),
        (TokenKind::GtEq, OpKind::Ge),
    ],
    &[
        (TokenKind::Shl, OpKind::Shl),
        (TokenKind::Shr, OpKind::Shr),
        (TokenKind::UShr, OpKind::UShr),
    ],
    &[(TokenKind::Plus, OpKind::Add), (TokenKind::Minus, OpKind::Sub)],
    &[
        (TokenKind::Star, OpKind::Mul),
        (TokenKind::Slash, OpKind::Div),
        (TokenKind::Percent, OpKind::Mod),
    ],
];

/// Parser for ClassAd source text
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    source: String,
    /// Current recursion depth
    depth: usize,
    /// Every node allocated so far, freed again if the parse fails
    allocated: Vec<ExprId>,
}

impl Parser {
    /// Tokenize `source` and prepare to parse it
    pub fn new(source: &str) -> ClassAdResult<Self> {
        let tokens = Lexer::new(source).tokenize()?;
        Ok(Self {
            tokens,
            pos: 0,
            source: source.to_string(),
            depth: 0,
            allocated: Vec::new(),
        })
    }

    /// Parse a single expression spanning the whole input. The result is
    /// detached and owned by the caller.
    pub fn parse_expression(&mut self, arena: &mut Arena) -> ClassAdResult<ExprId> {
        self.parse_all(arena, |parser, arena| parser.parse_expr(arena))
    }

    /// Parse a record literal `[ ... ]` spanning the whole input
    pub fn parse_classad(&mut self, arena: &mut Arena) -> ClassAdResult<ExprId> {
        self.parse_all(arena, |parser, arena| parser.parse_record(arena))
    }

    /// Parse a list literal `{ ... }` spanning the whole input
    pub fn parse_list(&mut self, arena: &mut Arena) -> ClassAdResult<ExprId> {
        self.parse_all(arena, |parser, arena| parser.parse_list_literal(arena))
    }

    fn parse_all(
        &mut self,
        arena: &mut Arena,
        rule: impl FnOnce(&mut Self, &mut Arena) -> ClassAdResult<ExprId>,
    ) -> ClassAdResult<ExprId> {
        self.allocated.clear();
        let result = rule(self, arena).and_then(|root| {
            if self.is_at_end() {
                Ok(root)
            } else {
                Err(self.error_unexpected("end of input"))
            }
        });
        if result.is_err() {
            // Owned nodes go with their detached ancestors; ids already
            // freed are skipped by `free`.
            for id in std::mem::take(&mut self.allocated) {
                arena.free(id);
            }
        }
        self.allocated.clear();
        result
    }

    fn track(&mut self, id: ExprId) -> ExprId {
        self.allocated.push(id);
        id
    }

    /// Parse an expression (entry point with depth tracking)
    fn parse_expr(&mut self, arena: &mut Arena) -> ClassAdResult<ExprId> {
        self.depth += 1;
        if self.depth > MAX_PARSE_DEPTH {
            let loc = self.current_location();
            self.depth -= 1;
            debug!(limit = MAX_PARSE_DEPTH, "parse nesting limit reached");
            return Err(ClassAdError::nesting_too_deep(
                self.source.clone(),
                &loc,
                MAX_PARSE_DEPTH,
            ));
        }
        let result = self.parse_conditional(arena);
        self.depth -= 1;
        result
    }

    /// `c ? a : b`, right associative
    fn parse_conditional(&mut self, arena: &mut Arena) -> ClassAdResult<ExprId> {
        let condition = self.parse_binary(arena, 0)?;
        if !self.check(&TokenKind::Question) {
            return Ok(condition);
        }
        self.advance();
        let then = self.parse_expr(arena)?;
        self.expect(&TokenKind::Colon)?;
        let otherwise = self.parse_expr(arena)?;
        Ok(self.track(arena.ternary(condition, then, otherwise)))
    }

    /// Left-associative binary operators, one precedence level at a time
    fn parse_binary(&mut self, arena: &mut Arena, level: usize) -> ClassAdResult<ExprId> {
        let Some(operators) = BINARY_LEVELS.get(level) else {
            return self.parse_unary(arena);
        };
        let mut left = self.parse_binary(arena, level + 1)?;
        while let Some(op) = self.match_operator(operators) {
            self.advance();
            let right = self.parse_binary(arena, level + 1)?;
            left = self.track(arena.binary(op, left, right));
        }
        Ok(left)
    }

    fn match_operator(&self, operators: &[(TokenKind, OpKind)]) -> Option<OpKind> {
        let current = &self.current().kind;
        operators
            .iter()
            .find(|(token, _)| token == current)
            .map(|(_, op)| *op)
    }

    fn parse_unary(&mut self, arena: &mut Arena) -> ClassAdResult<ExprId> {
        let op = match self.current().kind {
            TokenKind::Minus => OpKind::UnaryMinus,
            TokenKind::Plus => OpKind::UnaryPlus,
            TokenKind::Not => OpKind::LogicalNot,
            TokenKind::Tilde => OpKind::BitwiseNot,
            _ => return self.parse_postfix(arena),
        };
        self.advance();
        // Unary chains recurse without passing through parse_expr
        self.depth += 1;
        if self.depth > MAX_PARSE_DEPTH {
            let loc = self.current_location();
            self.depth -= 1;
            return Err(ClassAdError::nesting_too_deep(
                self.source.clone(),
                &loc,
                MAX_PARSE_DEPTH,
            ));
        }
        let operand = self.parse_unary(arena);
        self.depth -= 1;
        let operand = operand?;
        Ok(self.track(arena.unary(op, operand)))
    }

    /// Selection `e.name` and subscripts `e[i]`
    fn parse_postfix(&mut self, arena: &mut Arena) -> ClassAdResult<ExprId> {
        let mut expr = self.parse_primary(arena)?;
        loop {
            match self.current().kind {
                TokenKind::Dot => {
                    self.advance();
                    let name = self.expect_ident("attribute name")?;
                    expr = self.track(arena.select(expr, name));
                }
                TokenKind::LeftBracket => {
                    self.advance();
                    let index = self.parse_expr(arena)?;
                    self.expect(&TokenKind::RightBracket)?;
                    expr = self.track(arena.subscript(expr, index));
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_primary(&mut self, arena: &mut Arena) -> ClassAdResult<ExprId> {
        let kind = self.current().kind.clone();
        let id = match kind {
            TokenKind::True => self.literal(arena, Value::Boolean(true)),
            TokenKind::False => self.literal(arena, Value::Boolean(false)),
            TokenKind::Undefined => self.literal(arena, Value::Undefined),
            TokenKind::Error => self.literal(arena, Value::Error),
            TokenKind::String(s) => self.literal(arena, Value::String(s)),
            TokenKind::Integer(n, factor) => {
                self.advance();
                match factor {
                    Some(factor) => arena.literal_with_factor(Value::Integer(n), factor),
                    None => arena.literal(Value::Integer(n)),
                }
            }
            TokenKind::Real(n, factor) => {
                self.advance();
                match factor {
                    Some(factor) => arena.literal_with_factor(Value::Real(n), factor),
                    None => arena.literal(Value::Real(n)),
                }
            }
            TokenKind::Ident(name) => {
                self.advance();
                if self.check(&TokenKind::LeftParen) {
                    return self.parse_call(arena, name);
                }
                arena.attr(name)
            }
            TokenKind::Dot => {
                self.advance();
                let name = self.expect_ident("attribute name after '.'")?;
                arena.absolute_attr(name)
            }
            TokenKind::LeftParen => {
                self.advance();
                let inner = self.parse_expr(arena)?;
                self.expect(&TokenKind::RightParen)?;
                arena.paren(inner)
            }
            TokenKind::LeftBracket => return self.parse_record(arena),
            TokenKind::LeftBrace => return self.parse_list_literal(arena),
            _ => return Err(self.error_unexpected("expression")),
        };
        Ok(self.track(id))
    }

    fn literal(&mut self, arena: &mut Arena, value: Value) -> ExprId {
        self.advance();
        arena.literal(value)
    }

    /// `name(arg, ...)`, the name already consumed
    fn parse_call(&mut self, arena: &mut Arena, name: String) -> ClassAdResult<ExprId> {
        self.expect(&TokenKind::LeftParen)?;
        let mut args = Vec::new();
        if !self.check(&TokenKind::RightParen) {
            loop {
                args.push(self.parse_expr(arena)?);
                if !self.check(&TokenKind::Comma) {
                    break;
                }
                self.advance();
            }
        }
        self.expect(&TokenKind::RightParen)?;
        Ok(self.track(arena.call(name, args)))
    }

    /// `{ e, e, ... }`
    fn parse_list_literal(&mut self, arena: &mut Arena) -> ClassAdResult<ExprId> {
        self.expect(&TokenKind::LeftBrace)?;
        let mut items = Vec::new();
        while !self.check(&TokenKind::RightBrace) {
            items.push(self.parse_expr(arena)?);
            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        self.expect(&TokenKind::RightBrace)?;
        Ok(self.track(arena.list(items)))
    }

    /// `[ name = e; name = e; ... ]`, the last `;` optional
    fn parse_record(&mut self, arena: &mut Arena) -> ClassAdResult<ExprId> {
        self.expect(&TokenKind::LeftBracket)?;
        let ad = self.track(arena.classad());
        while !self.check(&TokenKind::RightBracket) {
            let location = self.current_location();
            let name = self.expect_ident("attribute name")?;
            self.expect(&TokenKind::Assign)?;
            let expr = self.parse_expr(arena)?;
            arena.insert(ad, &name, expr).map_err(|_| {
                ClassAdError::unexpected_token(
                    self.source.clone(),
                    &location,
                    "attribute name",
                    name.clone(),
                    "attribute names are identifiers",
                )
            })?;
            if !self.check(&TokenKind::Semicolon) {
                break;
            }
            self.advance();
        }
        self.expect(&TokenKind::RightBracket)?;
        Ok(ad)
    }

    // Helper methods

    fn current(&self) -> &Token {
        // The lexer always ends the stream with Eof and `advance` never
        // moves past it.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn current_location(&self) -> SourceLocation {
        self.current().location
    }

    fn is_at_end(&self) -> bool {
        matches!(self.current().kind, TokenKind::Eof)
    }

    /// Check if current token matches expected kind
    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.current().kind) == std::mem::discriminant(kind)
    }

    fn advance(&mut self) {
        if !self.is_at_end() {
            self.pos += 1;
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> ClassAdResult<()> {
        if self.check(kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.error_unexpected(&format!("'{}'", kind)))
        }
    }

    fn expect_ident(&mut self, context: &str) -> ClassAdResult<String> {
        if let TokenKind::Ident(name) = &self.current().kind {
            let name = name.clone();
            self.advance();
            Ok(name)
        } else {
            Err(self.error_unexpected(context))
        }
    }

    fn error_unexpected(&self, expected: &str) -> ClassAdError {
        let found = &self.current().kind;
        let help = match found {
            TokenKind::Eof => "the input ended early; check for unclosed brackets".to_string(),
            TokenKind::Assign => "use '==' to compare values".to_string(),
            TokenKind::Is | TokenKind::Isnt | TokenKind::True | TokenKind::False
                if expected.contains("attribute") =>
            {
                format!("'{}' is a reserved word", found)
            }
            _ => "check syntax".to_string(),
        };
        ClassAdError::unexpected_token(
            self.source.clone(),
            &self.current_location(),
            expected,
            format!("{}", found),
            help,
        )
    }
}
