//! Partial evaluation.
//!
//! Flattening reduces an expression as far as the known scope allows. What
//! cannot be reduced comes back as a residual expression, typically the
//! parts of a requirement that depend on the not-yet-known match partner.

use tracing::trace;

use crate::ast::{ExprId, ExprKind, OpKind};
use crate::errors::{EvalFailure, EvalResult};

use super::operators::{self, Truth};
use super::residual::Residual;
use super::value::Value;
use super::{apply_factor, Evaluator};

/// Result of [`Arena::flatten`](crate::ast::Arena::flatten)
#[derive(Debug, Clone, PartialEq)]
pub enum Flattened {
    /// Fully reduced
    Value(Value),
    /// A new detached expression owned by the caller
    Residual(ExprId),
}

impl Flattened {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Flattened::Value(value) => Some(value),
            Flattened::Residual(_) => None,
        }
    }

    pub fn residual(&self) -> Option<ExprId> {
        match self {
            Flattened::Value(_) => None,
            Flattened::Residual(id) => Some(*id),
        }
    }
}

/// A flattened node, before any allocation
#[derive(Debug, Clone)]
pub(crate) enum Flat {
    Value(Value),
    Residual(Residual),
}

impl Flat {
    fn into_residual(self) -> Residual {
        match self {
            Flat::Value(value) => Residual::from_value(value),
            Flat::Residual(residual) => residual,
        }
    }
}

impl Evaluator<'_> {
    pub(crate) fn flatten(&mut self, id: ExprId) -> EvalResult<Flat> {
        let arena = self.arena;
        let node = arena
            .get(id)
            .ok_or(EvalFailure::DanglingExpression { id })?;
        self.enter()?;
        let result = match node.kind() {
            ExprKind::Literal { value, factor } => Ok(Flat::Value(apply_factor(value, *factor))),
            ExprKind::AttributeRef { absolute: true, .. } => Ok(Flat::Residual(Residual::Copy(id))),
            ExprKind::AttributeRef { .. } => self.flatten_attribute_ref(id),
            ExprKind::Operation { op, operands } => self.flatten_operation(*op, operands),
            ExprKind::FunctionCall {
                name,
                args,
                builtin,
            } => self.flatten_call(id, name, args, *builtin),
            ExprKind::List(items) => self.flatten_list(id, items),
            ExprKind::ClassAd(_) => Ok(Flat::Value(Value::ClassAd(id))),
        };
        self.leave();
        result
    }

    /// Records and undefined results keep the reference itself
    fn flatten_attribute_ref(&mut self, id: ExprId) -> EvalResult<Flat> {
        Ok(match self.evaluate(id)? {
            Value::ClassAd(_) | Value::Undefined => Flat::Residual(Residual::Copy(id)),
            value => Flat::Value(value),
        })
    }

    /// A list whose items all reduce is a value; otherwise it is rebuilt
    /// from the reduced items
    fn flatten_list(&mut self, id: ExprId, items: &[ExprId]) -> EvalResult<Flat> {
        let items = items
            .iter()
            .map(|item| self.flatten(*item))
            .collect::<EvalResult<Vec<_>>>()?;
        if items.iter().all(|item| matches!(item, Flat::Value(_))) {
            return Ok(Flat::Value(Value::List(id)));
        }
        Ok(Flat::Residual(Residual::List(
            items.into_iter().map(Flat::into_residual).collect(),
        )))
    }

    fn flatten_call(
        &mut self,
        id: ExprId,
        name: &str,
        args: &[ExprId],
        builtin: Option<&'static super::builtins::Builtin>,
    ) -> EvalResult<Flat> {
        let flat_args = args
            .iter()
            .map(|arg| self.flatten(*arg))
            .collect::<EvalResult<Vec<_>>>()?;
        let concrete = flat_args.iter().all(|arg| matches!(arg, Flat::Value(_)));
        if builtin.is_some() && concrete {
            return self.evaluate(id).map(Flat::Value);
        }
        Ok(Flat::Residual(Residual::Call {
            name: name.to_string(),
            args: flat_args.into_iter().map(Flat::into_residual).collect(),
            builtin,
        }))
    }

    fn flatten_operation(&mut self, op: OpKind, operands: &[ExprId]) -> EvalResult<Flat> {
        match op {
            OpKind::Ternary => {
                match self.flatten(operands[0])? {
                    Flat::Value(selector) => match operators::selector(&selector) {
                        Ok(true) => self.flatten(operands[1]),
                        Ok(false) => self.flatten(operands[2]),
                        Err(value) => Ok(Flat::Value(value)),
                    },
                    Flat::Residual(selector) => {
                        let then = self.flatten(operands[1])?.into_residual();
                        let otherwise = self.flatten(operands[2])?.into_residual();
                        Ok(rebuilt(op, vec![selector, then, otherwise]))
                    }
                }
            }
            OpKind::And | OpKind::Or => {
                let det = operators::determining(op);
                let left = self.flatten(operands[0])?;
                if let Flat::Value(value) = &left {
                    if operators::truth(value) == Truth::Bool(det) {
                        return Ok(Flat::Value(Value::Boolean(det)));
                    }
                }
                let right = self.flatten(operands[1])?;
                if let Flat::Value(value) = &right {
                    if operators::truth(value) == Truth::Bool(det) {
                        return Ok(Flat::Value(Value::Boolean(det)));
                    }
                }
                Ok(match (left, right) {
                    (Flat::Value(l), Flat::Value(r)) => Flat::Value(operators::logical(
                        op,
                        operators::truth(&l),
                        operators::truth(&r),
                    )),
                    (left, right) => rebuilt(op, vec![left.into_residual(), right.into_residual()]),
                })
            }
            _ if op.arity() == 1 => Ok(match self.flatten(operands[0])? {
                Flat::Value(value) => Flat::Value(operators::unary(op, value)),
                Flat::Residual(residual) => rebuilt(op, vec![residual]),
            }),
            _ => {
                let left = self.flatten(operands[0])?;
                let right = self.flatten(operands[1])?;
                self.flatten_binary(op, left, right)
            }
        }
    }

    fn flatten_binary(&mut self, op: OpKind, left: Flat, right: Flat) -> EvalResult<Flat> {
        match (left, right) {
            (Flat::Value(l), Flat::Value(r)) => Ok(Flat::Value(if op == OpKind::Subscript {
                self.subscript(l, r)?
            } else {
                operators::binary(op, l, r)
            })),
            // A strict operator with an error operand is an error whatever
            // the other side turns out to be
            (Flat::Value(Value::Error), _) | (_, Flat::Value(Value::Error)) if op.is_strict() => {
                Ok(Flat::Value(Value::Error))
            }
            (left, right) => {
                if op.is_regroupable() {
                    let merged = match (&left, &right) {
                        (Flat::Residual(residual), Flat::Value(value))
                        | (Flat::Value(value), Flat::Residual(residual)) => {
                            regroup(op, residual, value)
                        }
                        _ => None,
                    };
                    if let Some(merged) = merged {
                        trace!(%op, "regrouped constant operands");
                        return Ok(Flat::Residual(merged));
                    }
                }
                Ok(rebuilt(op, vec![left.into_residual(), right.into_residual()]))
            }
        }
    }
}

fn rebuilt(op: OpKind, operands: Vec<Residual>) -> Flat {
    Flat::Residual(Residual::Operation { op, operands })
}

/// `(x op c1) op c2` becomes `x op (c1 op c2)` for associative,
/// commutative operators, when the combined constant is not exceptional
fn regroup(op: OpKind, mut residual: &Residual, value: &Value) -> Option<Residual> {
    while let Residual::Operation {
        op: OpKind::Parentheses,
        operands,
    } = residual
    {
        residual = &operands[0];
    }
    let Residual::Operation {
        op: inner,
        operands,
    } = residual
    else {
        return None;
    };
    if *inner != op || value.is_exceptional() {
        return None;
    }
    let (constant, rest) = match (operands[0].as_literal(), operands[1].as_literal()) {
        (Some(c), None) => (c, &operands[1]),
        (None, Some(c)) => (c, &operands[0]),
        _ => return None,
    };
    let combined = operators::binary(op, constant.clone(), value.clone());
    if combined.is_exceptional() {
        return None;
    }
    Some(Residual::Operation {
        op,
        operands: vec![rest.clone(), Residual::Literal(combined)],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Arena;
    use crate::unparser::Unparser;
    use pretty_assertions::assert_eq;

    fn flatten_in(source_ad: &str, expr: &str) -> (Arena, Flattened) {
        let mut arena = Arena::new();
        let ad = crate::parse_classad(&mut arena, source_ad).unwrap();
        let expr = crate::parse_expr(&mut arena, expr).unwrap();
        let flat = arena.flatten(ad, expr).unwrap();
        (arena, flat)
    }

    fn residual_text(arena: &Arena, flat: &Flattened) -> String {
        Unparser::new(arena).expr(flat.residual().expect("residual"))
    }

    #[test]
    fn test_concrete_expression_folds() {
        let (_, flat) = flatten_in("[x = 3]", "x * 2 + 1");
        assert_eq!(flat, Flattened::Value(Value::Integer(7)));
        let (_, again) = flatten_in("[x = 3]", "7");
        assert_eq!(again, Flattened::Value(Value::Integer(7)));
    }

    #[test]
    fn test_unknown_side_stays_residual() {
        let (arena, flat) = flatten_in("[mem = 8]", "other.mem >= mem / 2");
        assert_eq!(residual_text(&arena, &flat), "other.mem >= 4");
    }

    #[test]
    fn test_regrouping() {
        let (arena, flat) = flatten_in("[a = 1; b = 2]", "(x + a) + b");
        assert_eq!(residual_text(&arena, &flat), "x + 3");
        let (arena, flat) = flatten_in("[k = 4]", "k * (y * 2)");
        assert_eq!(residual_text(&arena, &flat), "y * 8");
    }

    #[test]
    fn test_non_associative_keeps_shape() {
        let (arena, flat) = flatten_in("[a = 10]", "a - x - 1");
        assert_eq!(residual_text(&arena, &flat), "10 - x - 1");
    }

    #[test]
    fn test_logic_folds_on_determining_side() {
        let (_, flat) = flatten_in("[ok = true]", "unknown || ok");
        assert_eq!(flat, Flattened::Value(Value::Boolean(true)));
        let (arena, flat) = flatten_in("[ok = true]", "unknown && ok");
        assert_eq!(residual_text(&arena, &flat), "unknown && true");
    }

    #[test]
    fn test_error_operand_folds() {
        let (_, flat) = flatten_in("[]", "unknown + (1 / 0)");
        assert_eq!(flat, Flattened::Value(Value::Error));
    }

    #[test]
    fn test_absolute_reference_is_kept() {
        let (arena, flat) = flatten_in("[x = 1]", ".x + 1");
        assert_eq!(residual_text(&arena, &flat), ".x + 1");
    }

    #[test]
    fn test_calls() {
        let (_, flat) = flatten_in("[s = \"ab\"]", "strcat(s, \"c\")");
        assert_eq!(flat, Flattened::Value(Value::from("abc")));
        let (arena, flat) = flatten_in("[s = \"ab\"]", "strcat(s, t)");
        assert_eq!(residual_text(&arena, &flat), "strcat(\"ab\", t)");
    }

    #[test]
    fn test_concrete_lists_fold() {
        let (_, flat) = flatten_in("[]", "{1, 2, 3}[1]");
        assert_eq!(flat, Flattened::Value(Value::Integer(2)));
        let (_, flat) = flatten_in("[]", "size({1, 2})");
        assert_eq!(flat, Flattened::Value(Value::Integer(2)));
        let (_, flat) = flatten_in("[n = 3]", "member(n, {1, 2, n})");
        assert_eq!(flat, Flattened::Value(Value::Boolean(true)));
        let (_, flat) = flatten_in("[l = {4, 5}]", "sum(l)");
        assert_eq!(flat, Flattened::Value(Value::Integer(9)));
        let (arena, flat) = flatten_in("[]", "{1, 2}");
        assert!(matches!(flat, Flattened::Value(Value::List(id)) if arena.get(id).is_some()));
    }

    #[test]
    fn test_list_with_unknown_item_stays_residual() {
        let (arena, flat) = flatten_in("[a = 1]", "{a + 1, other.x}");
        assert_eq!(residual_text(&arena, &flat), "{ 2, other.x }");
        let (arena, flat) = flatten_in("[a = 1]", "member(a, {other.x})");
        assert_eq!(residual_text(&arena, &flat), "member(1, { other.x })");
    }

    #[test]
    fn test_residual_is_scoped_to_the_record() {
        let mut arena = Arena::new();
        let ad = crate::parse_classad(&mut arena, "[y = 2]").unwrap();
        let expr = crate::parse_expr(&mut arena, "x + y").unwrap();
        let residual = arena.flatten(ad, expr).unwrap().residual().unwrap();
        assert_eq!(arena.get(residual).unwrap().scope(), Some(ad));
        arena.insert_value(ad, "x", Value::Integer(1)).unwrap();
        assert_eq!(arena.evaluate(residual), Ok(Value::Integer(3)));
        assert!(arena.free(residual));
    }
}
