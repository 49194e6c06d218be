//! Attribute lookup through nested records.
//!
//! A lookup checks the record's own bindings, then moves to the next scope:
//! the record's `super` attribute when it has one, otherwise the record that
//! lexically encloses it. The pseudo-attributes `super`, `root`/`toplevel`,
//! `self` and `parent` name records relative to the one being searched.

use std::collections::HashSet;

use tracing::debug;

use crate::ast::ExprId;
use crate::errors::{EvalFailure, EvalResult};

use super::value::Value;
use super::Evaluator;

/// Outcome of a scope walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// `expr` is bound in (or, for pseudo-attributes, denotes) a record;
    /// `scope` is the record to evaluate it in
    Found { expr: ExprId, scope: ExprId },
    /// The walk ended, or came back to a record it had already searched
    NotFound,
    /// A `super` attribute evaluated to `undefined`
    Undefined,
    /// A `super` attribute evaluated to something other than a record
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pseudo {
    Super,
    Root,
    SelfRef,
    Parent,
}

impl Pseudo {
    fn parse(name: &str) -> Option<Pseudo> {
        match name.to_ascii_lowercase().as_str() {
            "super" => Some(Pseudo::Super),
            "root" | "toplevel" => Some(Pseudo::Root),
            "self" => Some(Pseudo::SelfRef),
            "parent" => Some(Pseudo::Parent),
            _ => None,
        }
    }
}

impl Evaluator<'_> {
    /// The scope after `ad`: its evaluated `super`, else its lexical parent.
    /// `super` itself is evaluated from the lexical parent, so its own
    /// references never search `ad`.
    fn next_scope(&mut self, ad: ExprId) -> EvalResult<Result<Option<ExprId>, Lookup>> {
        let arena = self.arena;
        let parent = lexical_parent(self, ad);
        match arena.lookup(ad, "super") {
            Some(expr) => Ok(match self.evaluate_in(expr, parent.unwrap_or(ad))? {
                Value::ClassAd(next) => Ok(Some(next)),
                Value::Undefined => Err(Lookup::Undefined),
                _ => Err(Lookup::Error),
            }),
            None => Ok(Ok(parent)),
        }
    }

    /// Find what `name` is bound to, starting at record `start`
    pub fn lookup_in_scope(&mut self, start: ExprId, name: &str) -> EvalResult<Lookup> {
        let arena = self.arena;
        let pseudo = Pseudo::parse(name);
        let mut visited = HashSet::new();
        let mut current = start;

        loop {
            if !visited.insert(current) {
                debug!(name, record = %current, "scope cycle; attribute not found");
                return Ok(Lookup::NotFound);
            }
            let record = arena
                .record(current)
                .ok_or(EvalFailure::NotARecord { id: current })?;
            if let Some(expr) = record.get(name) {
                return Ok(Lookup::Found {
                    expr,
                    scope: current,
                });
            }

            let next = match self.next_scope(current)? {
                Ok(next) => next,
                Err(outcome) => {
                    debug!(name, record = %current, ?outcome, "super did not yield a record");
                    return Ok(outcome);
                }
            };

            if let Some(pseudo) = pseudo {
                let target = match pseudo {
                    Pseudo::Super => next,
                    Pseudo::Root => self.state.root,
                    Pseudo::SelfRef => Some(current),
                    Pseudo::Parent => lexical_parent(self, current),
                };
                return Ok(match target {
                    Some(ad) => Lookup::Found {
                        expr: ad,
                        scope: lexical_parent(self, ad).unwrap_or(ad),
                    },
                    None => Lookup::NotFound,
                });
            }

            match next {
                Some(ad) => current = ad,
                None => {
                    debug!(name, "attribute not found in any enclosing scope");
                    return Ok(Lookup::NotFound);
                }
            }
        }
    }
}

/// The record lexically enclosing `ad`, if it is still a live record
fn lexical_parent(evaluator: &Evaluator<'_>, ad: ExprId) -> Option<ExprId> {
    let arena = evaluator.arena;
    arena
        .get(ad)
        .and_then(|node| node.scope())
        .filter(|parent| arena.is_record(*parent))
}
