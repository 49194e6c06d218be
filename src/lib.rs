// Rust 1.93+ triggers false positives on thiserror/miette derive macro fields
#![allow(unused_assignments)]

//! ClassAd expression language
//!
//! Records ("ClassAds") map attribute names to expressions and double as
//! lexical scopes. Expressions evaluate to values under a three-valued
//! logic with `undefined` and `error`, can be partially evaluated against
//! what a record already knows, and drive bilateral matchmaking between
//! two records.
//!
//! # Example
//!
//! ```
//! use classad::{Arena, MatchClassAd, Value};
//!
//! let mut arena = Arena::new();
//! let job = classad::parse_classad(&mut arena, "[requirements = other.mem >= 4]").unwrap();
//! let machine = classad::parse_classad(&mut arena, "[mem = 8]").unwrap();
//!
//! let memory = arena.evaluate_attr(machine, "mem").unwrap();
//! assert_eq!(memory, Value::Integer(8));
//!
//! let ctx = MatchClassAd::new(&mut arena, Some(job), Some(machine)).unwrap();
//! assert!(ctx.right_matches_left(&arena));
//! ```

pub mod ast;
pub mod errors;
pub mod evaluator;
pub mod lexer;
pub mod matcher;
pub mod parser;
pub mod unparser;

pub use ast::{Arena, ExprId, ExprKind, Factor, Node, OpKind};
pub use errors::{ClassAdError, ClassAdResult, ErrorCode, EvalFailure, EvalResult};
pub use evaluator::{AbsTime, EvalConfig, EvalState, Evaluator, Flattened, Value};
pub use lexer::token::{SourceLocation, Token, TokenKind};
pub use lexer::Lexer;
pub use matcher::MatchClassAd;
pub use parser::Parser;
pub use unparser::Unparser;

/// Parse one expression into `arena`. The result is detached and owned by
/// the caller.
pub fn parse_expr(arena: &mut Arena, source: &str) -> ClassAdResult<ExprId> {
    Parser::new(source)?.parse_expression(arena)
}

/// Parse a record literal `[ ... ]` into `arena`
pub fn parse_classad(arena: &mut Arena, source: &str) -> ClassAdResult<ExprId> {
    Parser::new(source)?.parse_classad(arena)
}
