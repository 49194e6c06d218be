//! Significant sub-expressions: evaluation that also reports the smallest
//! expression accounting for the result.

use crate::ast::{ExprId, ExprKind, OpKind};
use crate::errors::{EvalFailure, EvalResult};

use super::operators::{self, Truth};
use super::residual::Residual;
use super::value::Value;
use super::Evaluator;

impl Evaluator<'_> {
    pub(crate) fn witness(&mut self, id: ExprId) -> EvalResult<(Value, Residual)> {
        let arena = self.arena;
        let node = arena
            .get(id)
            .ok_or(EvalFailure::DanglingExpression { id })?;
        match node.kind() {
            ExprKind::Literal { .. }
            | ExprKind::AttributeRef { .. }
            | ExprKind::List(_)
            | ExprKind::ClassAd(_) => Ok((self.evaluate(id)?, Residual::Copy(id))),
            ExprKind::Operation { op, operands } => {
                self.enter()?;
                let result = self.witness_operation(*op, operands);
                self.leave();
                result
            }
            ExprKind::FunctionCall {
                name,
                args,
                builtin,
            } => {
                self.enter()?;
                let witnesses = args
                    .iter()
                    .map(|arg| self.witness(*arg).map(|(_, w)| w))
                    .collect::<EvalResult<Vec<_>>>();
                self.leave();
                let value = self.evaluate(id)?;
                let call = Residual::Call {
                    name: name.clone(),
                    args: witnesses?,
                    builtin: *builtin,
                };
                Ok((value, call))
            }
        }
    }

    fn witness_operation(&mut self, op: OpKind, operands: &[ExprId]) -> EvalResult<(Value, Residual)> {
        match op {
            OpKind::Parentheses => {
                let (value, inner) = self.witness(operands[0])?;
                Ok((value, rebuilt(op, vec![inner])))
            }
            OpKind::Ternary => {
                let (selector, cond) = self.witness(operands[0])?;
                match operators::selector(&selector) {
                    Ok(true) => self.witness(operands[1]),
                    Ok(false) => self.witness(operands[2]),
                    Err(value) => Ok((value, cond)),
                }
            }
            OpKind::And | OpKind::Or => {
                let det = operators::determining(op);
                let (lv, lw) = self.witness(operands[0])?;
                let left = operators::truth(&lv);
                if left == Truth::Bool(det) {
                    return Ok((Value::Boolean(det), lw));
                }
                let (rv, rw) = self.witness(operands[1])?;
                let right = operators::truth(&rv);
                if right == Truth::Bool(det) {
                    return Ok((Value::Boolean(det), rw));
                }
                Ok((operators::logical(op, left, right), rebuilt(op, vec![lw, rw])))
            }
            OpKind::MetaEq | OpKind::MetaNe => {
                let (lv, lw) = self.witness(operands[0])?;
                let (rv, rw) = self.witness(operands[1])?;
                Ok((operators::binary(op, lv, rv), rebuilt(op, vec![lw, rw])))
            }
            _ if op.arity() == 1 => {
                let (value, inner) = self.witness(operands[0])?;
                if value.is_exceptional() {
                    return Ok((value, inner));
                }
                Ok((operators::unary(op, value), rebuilt(op, vec![inner])))
            }
            _ => {
                let (lv, lw) = self.witness(operands[0])?;
                let (rv, rw) = self.witness(operands[1])?;
                // Only the operand that forces an exceptional result matters
                if lv.is_error() {
                    return Ok((Value::Error, lw));
                }
                if rv.is_error() {
                    return Ok((Value::Error, rw));
                }
                if lv.is_undefined() {
                    return Ok((Value::Undefined, lw));
                }
                if rv.is_undefined() {
                    return Ok((Value::Undefined, rw));
                }
                let value = if op == OpKind::Subscript {
                    self.subscript(lv, rv)?
                } else {
                    operators::binary(op, lv, rv)
                };
                Ok((value, rebuilt(op, vec![lw, rw])))
            }
        }
    }
}

fn rebuilt(op: OpKind, operands: Vec<Residual>) -> Residual {
    Residual::Operation { op, operands }
}
