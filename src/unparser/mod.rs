//! Source text and JSON output for expressions and values
//!
//! Text output is canonical:
//! - single spaces around binary operators
//! - parentheses only where precedence needs them, plus the explicit ones
//!   kept in the tree
//! - records as `[ a = 1; b = 2 ]`, lists as `{ 1, 2 }`
//!
//! Parsing the output and unparsing again yields the same text.

use serde_json::{json, Map, Number};

use crate::ast::{Arena, ExprId, ExprKind, OpKind};
use crate::evaluator::value::format_rel_time;
use crate::evaluator::Value;

/// Tighter than every operator
const ATOM: u8 = 13;

/// Read-only serializer over an arena
pub struct Unparser<'a> {
    arena: &'a Arena,
}

impl<'a> Unparser<'a> {
    pub fn new(arena: &'a Arena) -> Self {
        Self { arena }
    }

    /// Source text of the tree rooted at `id`
    pub fn expr(&self, id: ExprId) -> String {
        let mut out = String::new();
        self.write_expr(&mut out, id);
        out
    }

    /// Source text of a value; lists and records print their contents
    pub fn value(&self, value: &Value) -> String {
        let mut out = String::new();
        self.write_value(&mut out, value);
        out
    }

    fn write_expr(&self, out: &mut String, id: ExprId) {
        let Some(kind) = self.arena.kind(id) else {
            // A dangling id has no text; `error` keeps the output parseable
            out.push_str("error");
            return;
        };
        match kind {
            ExprKind::Literal { value, factor } => {
                self.write_value(out, value);
                if let Some(factor) = factor {
                    out.push_str(&factor.to_string());
                }
            }
            ExprKind::AttributeRef {
                base,
                name,
                absolute,
            } => {
                if let Some(base) = base {
                    self.write_operand(out, *base, OpKind::Subscript.precedence());
                    out.push('.');
                } else if *absolute {
                    out.push('.');
                }
                out.push_str(name);
            }
            ExprKind::Operation { op, operands } => self.write_operation(out, *op, operands),
            ExprKind::FunctionCall { name, args, .. } => {
                out.push_str(name);
                out.push('(');
                self.write_separated(out, args, ", ");
                out.push(')');
            }
            ExprKind::List(items) => {
                if items.is_empty() {
                    out.push_str("{}");
                } else {
                    out.push_str("{ ");
                    self.write_separated(out, items, ", ");
                    out.push_str(" }");
                }
            }
            ExprKind::ClassAd(record) => {
                if record.is_empty() {
                    out.push_str("[]");
                    return;
                }
                out.push_str("[ ");
                for (i, binding) in record.bindings().enumerate() {
                    if i > 0 {
                        out.push_str("; ");
                    }
                    out.push_str(&binding.name);
                    out.push_str(" = ");
                    self.write_expr(out, binding.expr);
                }
                out.push_str(" ]");
            }
        }
    }

    fn write_separated(&self, out: &mut String, ids: &[ExprId], separator: &str) {
        for (i, id) in ids.iter().enumerate() {
            if i > 0 {
                out.push_str(separator);
            }
            self.write_expr(out, *id);
        }
    }

    fn write_operation(&self, out: &mut String, op: OpKind, operands: &[ExprId]) {
        match op {
            OpKind::Parentheses => {
                out.push('(');
                self.write_expr(out, operands[0]);
                out.push(')');
            }
            OpKind::Subscript => {
                self.write_operand(out, operands[0], op.precedence());
                out.push('[');
                self.write_expr(out, operands[1]);
                out.push(']');
            }
            OpKind::Ternary => {
                self.write_operand(out, operands[0], 1);
                out.push_str(" ? ");
                self.write_expr(out, operands[1]);
                out.push_str(" : ");
                self.write_expr(out, operands[2]);
            }
            _ if op.arity() == 1 => {
                out.push_str(op.symbol());
                self.write_operand(out, operands[0], op.precedence());
            }
            _ => {
                let precedence = op.precedence();
                self.write_operand(out, operands[0], precedence);
                out.push(' ');
                out.push_str(op.symbol());
                out.push(' ');
                // Left associative: an equal-precedence right operand needs
                // parentheses
                self.write_operand(out, operands[1], precedence + 1);
            }
        }
    }

    /// Write `id`, parenthesized when it binds looser than `min`
    fn write_operand(&self, out: &mut String, id: ExprId, min: u8) {
        if self.precedence(id) < min {
            out.push('(');
            self.write_expr(out, id);
            out.push(')');
        } else {
            self.write_expr(out, id);
        }
    }

    fn precedence(&self, id: ExprId) -> u8 {
        match self.arena.kind(id) {
            Some(ExprKind::Operation { op, .. }) => op.precedence(),
            // Printed with a leading '-', which reads back as a unary minus
            Some(ExprKind::Literal { value, .. }) if is_negative(value) => {
                OpKind::UnaryMinus.precedence()
            }
            _ => ATOM,
        }
    }

    fn write_value(&self, out: &mut String, value: &Value) {
        match value {
            Value::Real(n) if n.is_nan() => out.push_str("real(\"NaN\")"),
            Value::Real(n) if n.is_infinite() => {
                out.push_str(if *n > 0.0 { "real(\"INF\")" } else { "real(\"-INF\")" })
            }
            Value::List(id) | Value::ClassAd(id) => self.write_expr(out, *id),
            scalar => out.push_str(&scalar.to_string()),
        }
    }

    /// JSON rendering of a value.
    ///
    /// `undefined` is `null`, `error` is `{"error": true}`, times are their
    /// text forms. Inside lists and records, literal members become JSON
    /// values and anything else becomes its source text.
    pub fn to_json(&self, value: &Value) -> serde_json::Value {
        match value {
            Value::Undefined => serde_json::Value::Null,
            Value::Error => json!({ "error": true }),
            Value::Boolean(b) => json!(b),
            Value::Integer(n) => json!(n),
            Value::Real(n) => Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => json!(s),
            Value::AbsTime(t) => json!(t.to_string()),
            Value::RelTime(secs) => json!(format_rel_time(*secs)),
            Value::List(id) => match self.arena.get(*id).and_then(|n| n.as_list()) {
                Some(items) => items.iter().map(|item| self.member_json(*item)).collect(),
                None => serde_json::Value::Null,
            },
            Value::ClassAd(id) => match self.arena.record(*id) {
                Some(record) => {
                    let map: Map<String, serde_json::Value> = record
                        .bindings()
                        .map(|b| (b.name.clone(), self.member_json(b.expr)))
                        .collect();
                    serde_json::Value::Object(map)
                }
                None => serde_json::Value::Null,
            },
        }
    }

    fn member_json(&self, id: ExprId) -> serde_json::Value {
        match self.arena.kind(id) {
            Some(ExprKind::Literal {
                value,
                factor: None,
            }) => self.to_json(value),
            Some(ExprKind::List(_)) => self.to_json(&Value::List(id)),
            Some(ExprKind::ClassAd(_)) => self.to_json(&Value::ClassAd(id)),
            _ => json!(self.expr(id)),
        }
    }
}

fn is_negative(value: &Value) -> bool {
    match value {
        Value::Integer(n) => *n < 0,
        Value::Real(n) => n.is_sign_negative() && !n.is_nan(),
        _ => false,
    }
}
