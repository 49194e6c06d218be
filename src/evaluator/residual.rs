//! Expression plans built while the arena is borrowed for evaluation and
//! allocated afterwards.

use crate::ast::{Arena, ExprId, OpKind};

use super::builtins::Builtin;
use super::value::Value;

#[derive(Debug, Clone)]
pub(crate) enum Residual {
    /// Deep copy of an existing node
    Copy(ExprId),
    Literal(Value),
    Operation {
        op: OpKind,
        operands: Vec<Residual>,
    },
    Call {
        name: String,
        args: Vec<Residual>,
        builtin: Option<&'static Builtin>,
    },
    List(Vec<Residual>),
}

impl Residual {
    /// Lists and records are aliases, so they become copies of the node
    pub(crate) fn from_value(value: Value) -> Residual {
        match value {
            Value::List(id) | Value::ClassAd(id) => Residual::Copy(id),
            other => Residual::Literal(other),
        }
    }

    /// The literal value, when this plan is one
    pub(crate) fn as_literal(&self) -> Option<&Value> {
        match self {
            Residual::Literal(value) => Some(value),
            _ => None,
        }
    }

    /// Allocate the planned tree. The result is detached.
    pub(crate) fn build(self, arena: &mut Arena) -> ExprId {
        match self {
            Residual::Copy(id) => {
                let copy = arena.copy(id);
                arena.set_scope(copy, None);
                copy
            }
            Residual::Literal(value) => arena.literal(value),
            Residual::Operation { op, operands } => {
                let operands = operands.into_iter().map(|o| o.build(arena)).collect();
                arena.operation(op, operands)
            }
            Residual::Call {
                name,
                args,
                builtin,
            } => {
                let args = args.into_iter().map(|a| a.build(arena)).collect();
                arena.resolved_call(name, args, builtin)
            }
            Residual::List(items) => {
                let items = items.into_iter().map(|i| i.build(arena)).collect();
                arena.list(items)
            }
        }
    }
}
