//! Operator semantics over already-evaluated operands.
//!
//! Short-circuiting (`&&`, `||`, `?:`) and subscripting need lazy operand
//! evaluation and live in the evaluator; they call back into the helpers
//! here once operand values exist.

use std::cmp::Ordering;

use crate::ast::OpKind;
use crate::errors::invariant_violated;

use super::value::{AbsTime, Value};

/// A numeric operand after promotion
#[derive(Debug, Clone, Copy, PartialEq)]
enum Number {
    Int(i64),
    Real(f64),
}

impl Number {
    fn of(value: &Value) -> Option<Number> {
        match value {
            Value::Integer(n) => Some(Number::Int(*n)),
            Value::Real(r) => Some(Number::Real(*r)),
            _ => None,
        }
    }

    /// Comparisons also accept booleans, as 0 and 1
    fn comparable(value: &Value) -> Option<Number> {
        match value {
            Value::Boolean(b) => Some(Number::Int(i64::from(*b))),
            other => Number::of(other),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Number::Int(n) => n as f64,
            Number::Real(r) => r,
        }
    }
}

/// A logical operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Truth {
    Bool(bool),
    Undefined,
    Error,
}

/// Read a value as a logical operand. Numbers count as true when non-zero;
/// anything else that is not a boolean behaves like `error`.
pub(crate) fn truth(value: &Value) -> Truth {
    match value {
        Value::Boolean(b) => Truth::Bool(*b),
        Value::Integer(n) => Truth::Bool(*n != 0),
        Value::Real(r) => Truth::Bool(*r != 0.0),
        Value::Undefined => Truth::Undefined,
        _ => Truth::Error,
    }
}

/// The operand value that decides `op` on its own: true for `||`, false for `&&`
pub(crate) fn determining(op: OpKind) -> bool {
    match op {
        OpKind::Or => true,
        OpKind::And => false,
        _ => invariant_violated("determining value asked of a non-logical operator"),
    }
}

/// Combine two logical operands. A determining operand wins on either side,
/// then error beats undefined, which beats the boolean result.
pub(crate) fn logical(op: OpKind, left: Truth, right: Truth) -> Value {
    let det = determining(op);
    if left == Truth::Bool(det) || right == Truth::Bool(det) {
        return Value::Boolean(det);
    }
    if left == Truth::Error || right == Truth::Error {
        return Value::Error;
    }
    if left == Truth::Undefined || right == Truth::Undefined {
        return Value::Undefined;
    }
    Value::Boolean(!det)
}

/// Read a ternary selector: `Ok(branch)` or the value the whole
/// expression takes (undefined for an undefined selector, error otherwise).
pub(crate) fn selector(value: &Value) -> Result<bool, Value> {
    match value {
        Value::Boolean(b) => Ok(*b),
        Value::Integer(n) => Ok(*n != 0),
        Value::Real(r) => Ok(*r != 0.0),
        Value::Undefined => Err(Value::Undefined),
        _ => Err(Value::Error),
    }
}

/// Strict propagation: error first, then undefined
pub(crate) fn propagate(left: &Value, right: &Value) -> Option<Value> {
    if left.is_error() || right.is_error() {
        Some(Value::Error)
    } else if left.is_undefined() || right.is_undefined() {
        Some(Value::Undefined)
    } else {
        None
    }
}

/// Apply a unary operator
pub(crate) fn unary(op: OpKind, value: Value) -> Value {
    if value.is_exceptional() {
        return value;
    }
    match op {
        OpKind::Parentheses => value,
        OpKind::UnaryPlus => match value {
            Value::Integer(_) | Value::Real(_) | Value::RelTime(_) => value,
            _ => Value::Error,
        },
        OpKind::UnaryMinus => match value {
            Value::Integer(n) => n.checked_neg().map_or(Value::Error, Value::Integer),
            Value::Real(r) => Value::Real(-r),
            Value::RelTime(secs) => secs.checked_neg().map_or(Value::Error, Value::RelTime),
            _ => Value::Error,
        },
        OpKind::LogicalNot => match value {
            Value::Boolean(b) => Value::Boolean(!b),
            Value::Integer(n) => Value::Boolean(n == 0),
            Value::Real(r) => Value::Boolean(r == 0.0),
            _ => Value::Error,
        },
        OpKind::BitwiseNot => match value {
            Value::Integer(n) => Value::Integer(!n),
            _ => Value::Error,
        },
        _ => invariant_violated("unary evaluation of a non-unary operator"),
    }
}

/// Apply a binary operator that needs no lazy operand evaluation
pub(crate) fn binary(op: OpKind, left: Value, right: Value) -> Value {
    match op {
        OpKind::MetaEq => return Value::Boolean(left.is_identical(&right)),
        OpKind::MetaNe => return Value::Boolean(!left.is_identical(&right)),
        _ => {}
    }
    if let Some(value) = propagate(&left, &right) {
        return value;
    }
    match op {
        OpKind::Add | OpKind::Sub | OpKind::Mul | OpKind::Div | OpKind::Mod => {
            arithmetic(op, &left, &right)
        }
        OpKind::Lt | OpKind::Le | OpKind::Gt | OpKind::Ge | OpKind::Eq | OpKind::Ne => {
            compare(op, &left, &right)
        }
        OpKind::BitAnd
        | OpKind::BitOr
        | OpKind::BitXor
        | OpKind::Shl
        | OpKind::Shr
        | OpKind::UShr => bitwise(op, &left, &right),
        _ => invariant_violated("binary evaluation of a non-binary operator"),
    }
}

fn ordering_holds(op: OpKind, ordering: Ordering) -> bool {
    match op {
        OpKind::Lt => ordering == Ordering::Less,
        OpKind::Le => ordering != Ordering::Greater,
        OpKind::Gt => ordering == Ordering::Greater,
        OpKind::Ge => ordering != Ordering::Less,
        OpKind::Eq => ordering == Ordering::Equal,
        OpKind::Ne => ordering != Ordering::Equal,
        _ => invariant_violated("ordering applied to a non-comparison operator"),
    }
}

fn compare(op: OpKind, left: &Value, right: &Value) -> Value {
    let ordering = match (left, right) {
        (Value::List(_) | Value::ClassAd(_), _) | (_, Value::List(_) | Value::ClassAd(_)) => {
            return Value::Error
        }
        (Value::String(a), Value::String(b)) => a
            .bytes()
            .map(|c| c.to_ascii_lowercase())
            .cmp(b.bytes().map(|c| c.to_ascii_lowercase())),
        (Value::String(_), _) | (_, Value::String(_)) => return Value::Undefined,
        (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
        (Value::AbsTime(a), Value::AbsTime(b)) => a.secs.cmp(&b.secs),
        (Value::RelTime(a), Value::RelTime(b)) => a.cmp(b),
        (Value::AbsTime(_) | Value::RelTime(_), _) | (_, Value::AbsTime(_) | Value::RelTime(_)) => {
            return Value::Error
        }
        _ => match (Number::comparable(left), Number::comparable(right)) {
            (Some(Number::Int(a)), Some(Number::Int(b))) => a.cmp(&b),
            (Some(a), Some(b)) => match a.as_f64().partial_cmp(&b.as_f64()) {
                Some(ordering) => ordering,
                None => return Value::Error,
            },
            _ => return Value::Error,
        },
    };
    Value::Boolean(ordering_holds(op, ordering))
}

/// A finite real, or error
fn real(r: f64) -> Value {
    if r.is_finite() {
        Value::Real(r)
    } else {
        Value::Error
    }
}

fn arithmetic(op: OpKind, left: &Value, right: &Value) -> Value {
    if let Some(value) = time_arithmetic(op, left, right) {
        return value;
    }
    match (Number::of(left), Number::of(right)) {
        (Some(Number::Int(a)), Some(Number::Int(b))) => {
            let result = match op {
                OpKind::Add => a.checked_add(b),
                OpKind::Sub => a.checked_sub(b),
                OpKind::Mul => a.checked_mul(b),
                OpKind::Div => a.checked_div(b),
                OpKind::Mod => a.checked_rem(b),
                _ => None,
            };
            result.map_or(Value::Error, Value::Integer)
        }
        (Some(a), Some(b)) => {
            let (a, b) = (a.as_f64(), b.as_f64());
            match op {
                OpKind::Add => real(a + b),
                OpKind::Sub => real(a - b),
                OpKind::Mul => real(a * b),
                OpKind::Div => real(a / b),
                OpKind::Mod => real(a % b),
                _ => Value::Error,
            }
        }
        _ => Value::Error,
    }
}

/// Scale a duration by a number, truncating toward zero
fn scale_rel_time(secs: i64, factor: Number, divide: bool) -> Value {
    match factor {
        Number::Int(n) => {
            let scaled = if divide {
                secs.checked_div(n)
            } else {
                secs.checked_mul(n)
            };
            scaled.map_or(Value::Error, Value::RelTime)
        }
        Number::Real(r) => {
            let scaled = if divide {
                secs as f64 / r
            } else {
                secs as f64 * r
            };
            if scaled.is_finite() && scaled.abs() < i64::MAX as f64 {
                Value::RelTime(scaled.trunc() as i64)
            } else {
                Value::Error
            }
        }
    }
}

/// `None` when neither operand is a time
fn time_arithmetic(op: OpKind, left: &Value, right: &Value) -> Option<Value> {
    let shifted = |t: &AbsTime, delta: Option<i64>| {
        delta.map_or(Value::Error, |secs| Value::AbsTime(AbsTime::new(secs, t.offset)))
    };
    let value = match (op, left, right) {
        (OpKind::Add, Value::AbsTime(t), Value::RelTime(d))
        | (OpKind::Add, Value::RelTime(d), Value::AbsTime(t)) => shifted(t, t.secs.checked_add(*d)),
        (OpKind::Sub, Value::AbsTime(t), Value::RelTime(d)) => shifted(t, t.secs.checked_sub(*d)),
        (OpKind::Sub, Value::AbsTime(a), Value::AbsTime(b)) => {
            a.secs.checked_sub(b.secs).map_or(Value::Error, Value::RelTime)
        }
        (OpKind::Add, Value::RelTime(a), Value::RelTime(b)) => {
            a.checked_add(*b).map_or(Value::Error, Value::RelTime)
        }
        (OpKind::Sub, Value::RelTime(a), Value::RelTime(b)) => {
            a.checked_sub(*b).map_or(Value::Error, Value::RelTime)
        }
        (OpKind::Mul, Value::RelTime(d), n) | (OpKind::Mul, n, Value::RelTime(d)) => {
            match Number::of(n) {
                Some(factor) => scale_rel_time(*d, factor, false),
                None => Value::Error,
            }
        }
        (OpKind::Div, Value::RelTime(d), n) => match Number::of(n) {
            Some(divisor) => scale_rel_time(*d, divisor, true),
            None => Value::Error,
        },
        (_, Value::AbsTime(_) | Value::RelTime(_), _) | (_, _, Value::AbsTime(_) | Value::RelTime(_)) => {
            Value::Error
        }
        _ => return None,
    };
    Some(value)
}

fn bitwise(op: OpKind, left: &Value, right: &Value) -> Value {
    let (Value::Integer(a), Value::Integer(b)) = (left, right) else {
        return Value::Error;
    };
    let (a, b) = (*a, *b);
    let shift = (b & 63) as u32;
    Value::Integer(match op {
        OpKind::BitAnd => a & b,
        OpKind::BitOr => a | b,
        OpKind::BitXor => a ^ b,
        OpKind::Shl => a.wrapping_shl(shift),
        OpKind::Shr => a >> shift,
        OpKind::UShr => ((a as u64) >> shift) as i64,
        _ => invariant_violated("bitwise evaluation of a non-bitwise operator"),
    })
}
