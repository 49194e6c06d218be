//! Evaluator for ClassAd expressions
//!
//! Evaluation walks the arena read-only. Every top-level call creates a
//! fresh [`EvalState`] holding:
//! - the current record attribute references are resolved against
//! - the root record (`.attr`, `root`, `toplevel`)
//! - a memo cache keyed by node id, which also breaks reference cycles
//! - the depth counter guarding against runaway recursion

pub mod builtins;
mod flatten;
pub mod operators;
mod references;
pub(crate) mod residual;
pub mod scope;
pub mod value;
mod witness;

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, instrument, trace, warn};

use crate::ast::{Arena, ExprId, ExprKind, Factor, OpKind};
use crate::errors::{invariant_violated, EvalFailure, EvalResult};

use builtins::{Builtin, Call};
use operators::Truth;
use scope::Lookup;

pub use flatten::Flattened;
pub use value::{AbsTime, Value};

/// Default limit on nested evaluation
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// Evaluation settings carried by every [`EvalState`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalConfig {
    /// Nested evaluations allowed before the call fails with
    /// [`EvalFailure::DepthExceeded`]
    pub max_depth: usize,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// State of a single top-level evaluation
#[derive(Debug)]
pub struct EvalState {
    current: Option<ExprId>,
    root: Option<ExprId>,
    cache: HashMap<ExprId, Value>,
    depth: usize,
    max_depth: usize,
}

impl EvalState {
    fn new(arena: &Arena, current: Option<ExprId>) -> Self {
        Self {
            current,
            root: current.map(|ad| root_of(arena, ad)),
            cache: HashMap::new(),
            depth: 0,
            max_depth: arena.eval_config().max_depth,
        }
    }

    /// Record attribute references are currently resolved against
    pub fn current(&self) -> Option<ExprId> {
        self.current
    }

    /// Outermost record enclosing the starting scope
    pub fn root(&self) -> Option<ExprId> {
        self.root
    }
}

/// Follow enclosing-scope links to the top. Bounded by the arena size in
/// case a stale scope link points at a recycled slot.
fn root_of(arena: &Arena, ad: ExprId) -> ExprId {
    let mut root = ad;
    for _ in 0..arena.live_nodes() {
        match arena.get(root).and_then(|node| node.scope()) {
            Some(parent) if arena.is_record(parent) => root = parent,
            _ => break,
        }
    }
    root
}

/// Evaluator over a borrowed arena
pub struct Evaluator<'a> {
    arena: &'a Arena,
    state: EvalState,
}

impl<'a> Evaluator<'a> {
    /// Start an evaluation whose current record is `scope`
    pub fn new(arena: &'a Arena, scope: Option<ExprId>) -> Self {
        Self {
            arena,
            state: EvalState::new(arena, scope),
        }
    }

    pub fn arena(&self) -> &'a Arena {
        self.arena
    }

    pub fn state(&self) -> &EvalState {
        &self.state
    }

    /// Track one level of nesting; fails once the configured limit is passed
    fn enter(&mut self) -> EvalResult<()> {
        self.state.depth += 1;
        if self.state.depth > self.state.max_depth {
            self.state.depth -= 1;
            warn!(limit = self.state.max_depth, "evaluation depth limit reached");
            return Err(EvalFailure::DepthExceeded {
                limit: self.state.max_depth,
            });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.state.depth -= 1;
    }

    /// Evaluate a node in the current state
    pub fn evaluate(&mut self, id: ExprId) -> EvalResult<Value> {
        let arena = self.arena;
        let node = arena
            .get(id)
            .ok_or(EvalFailure::DanglingExpression { id })?;

        match node.kind() {
            ExprKind::Literal { value, factor } => return Ok(apply_factor(value, *factor)),
            ExprKind::List(_) => return Ok(Value::List(id)),
            ExprKind::ClassAd(_) => return Ok(Value::ClassAd(id)),
            _ => {}
        }

        if let Some(value) = self.state.cache.get(&id) {
            trace!(%id, %value, "memoized");
            return Ok(value.clone());
        }
        // A node reached again while its own evaluation is in progress sees
        // this placeholder.
        self.state.cache.insert(id, Value::Undefined);

        self.enter()?;
        let result = match node.kind() {
            ExprKind::AttributeRef {
                base,
                name,
                absolute,
            } => self.eval_attribute_ref(*base, name, *absolute),
            ExprKind::Operation { op, operands } => self.eval_operation(*op, operands),
            ExprKind::FunctionCall { args, builtin, .. } => self.eval_call(*builtin, args),
            ExprKind::Literal { .. } | ExprKind::List(_) | ExprKind::ClassAd(_) => {
                invariant_violated("self-denoting node reached the memoized path")
            }
        };
        self.leave();

        let value = result?;
        trace!(%id, %value, "evaluated");
        self.state.cache.insert(id, value.clone());
        Ok(value)
    }

    /// Evaluate `id` with `scope` as the current record, restoring the
    /// caller's current record afterwards
    pub fn evaluate_in(&mut self, id: ExprId, scope: ExprId) -> EvalResult<Value> {
        let saved = self.state.current.replace(scope);
        let result = self.evaluate(id);
        self.state.current = saved;
        result
    }

    /// Evaluate a list element in the record enclosing it
    pub(crate) fn evaluate_element(&mut self, id: ExprId) -> EvalResult<Value> {
        match self.arena.get(id).and_then(|node| node.scope()) {
            Some(scope) => self.evaluate_in(id, scope),
            None => self.evaluate(id),
        }
    }

    /// Resolve `name` from `start` and evaluate what it is bound to
    pub fn resolve_and_evaluate(&mut self, start: ExprId, name: &str) -> EvalResult<Value> {
        match self.lookup_in_scope(start, name)? {
            Lookup::Found { expr, scope } => self.evaluate_in(expr, scope),
            Lookup::NotFound | Lookup::Undefined => Ok(Value::Undefined),
            Lookup::Error => Ok(Value::Error),
        }
    }

    /// The record an attribute reference searches first, or the value the
    /// reference takes when there is none
    pub(crate) fn reference_start(
        &mut self,
        base: Option<ExprId>,
        absolute: bool,
    ) -> EvalResult<Result<ExprId, Value>> {
        Ok(match base {
            Some(base) => match self.evaluate(base)? {
                Value::ClassAd(ad) => Ok(ad),
                Value::Undefined => Err(Value::Undefined),
                _ => Err(Value::Error),
            },
            None if absolute => self.state.root.ok_or(Value::Undefined),
            None => self.state.current.ok_or(Value::Undefined),
        })
    }

    fn eval_attribute_ref(
        &mut self,
        base: Option<ExprId>,
        name: &str,
        absolute: bool,
    ) -> EvalResult<Value> {
        match self.reference_start(base, absolute)? {
            Ok(start) => self.resolve_and_evaluate(start, name),
            Err(value) => Ok(value),
        }
    }

    fn eval_operation(&mut self, op: OpKind, operands: &[ExprId]) -> EvalResult<Value> {
        match op {
            OpKind::Parentheses => self.evaluate(operands[0]),
            OpKind::Ternary => {
                let selector = self.evaluate(operands[0])?;
                match operators::selector(&selector) {
                    Ok(true) => self.evaluate(operands[1]),
                    Ok(false) => self.evaluate(operands[2]),
                    Err(value) => Ok(value),
                }
            }
            OpKind::And | OpKind::Or => {
                let left = operators::truth(&self.evaluate(operands[0])?);
                let det = operators::determining(op);
                if left == Truth::Bool(det) {
                    return Ok(Value::Boolean(det));
                }
                let right = operators::truth(&self.evaluate(operands[1])?);
                Ok(operators::logical(op, left, right))
            }
            OpKind::Subscript => {
                let target = self.evaluate(operands[0])?;
                let index = self.evaluate(operands[1])?;
                self.subscript(target, index)
            }
            _ if op.arity() == 1 => {
                let operand = self.evaluate(operands[0])?;
                Ok(operators::unary(op, operand))
            }
            _ => {
                let left = self.evaluate(operands[0])?;
                let right = self.evaluate(operands[1])?;
                Ok(operators::binary(op, left, right))
            }
        }
    }

    /// `list[i]` or `record["name"]`
    pub(crate) fn subscript(&mut self, target: Value, index: Value) -> EvalResult<Value> {
        if let Some(value) = operators::propagate(&target, &index) {
            return Ok(value);
        }
        let arena = self.arena;
        match (target, index) {
            (Value::List(list), Value::Integer(i)) => {
                let items = arena.node(list).as_list().unwrap_or_default();
                match usize::try_from(i).ok().and_then(|i| items.get(i)) {
                    Some(item) => self.evaluate_element(*item),
                    None => Ok(Value::Undefined),
                }
            }
            (Value::ClassAd(ad), Value::String(name)) => match arena.lookup(ad, &name) {
                Some(expr) => self.evaluate_in(expr, ad),
                None => Ok(Value::Undefined),
            },
            _ => Ok(Value::Error),
        }
    }

    fn eval_call(
        &mut self,
        builtin: Option<&'static Builtin>,
        args: &[ExprId],
    ) -> EvalResult<Value> {
        let Some(builtin) = builtin else {
            return Ok(Value::Error);
        };
        if !builtin.arity.accepts(args.len()) {
            debug!(function = builtin.name, count = args.len(), "wrong argument count");
            return Ok(Value::Error);
        }
        match builtin.call {
            Call::Lazy(call) => call(self, args),
            Call::Eager(call) => {
                let values = args
                    .iter()
                    .map(|arg| self.evaluate(*arg))
                    .collect::<EvalResult<Vec<_>>>()?;
                call(self, &values)
            }
        }
    }
}

/// Apply a `K`/`M`/`G` factor to a numeric literal
fn apply_factor(value: &Value, factor: Option<Factor>) -> Value {
    match (value, factor) {
        (Value::Integer(n), Some(factor)) => n
            .checked_mul(factor.multiplier())
            .map_or(Value::Error, Value::Integer),
        (Value::Real(r), Some(factor)) => Value::Real(r * factor.multiplier() as f64),
        _ => value.clone(),
    }
}

impl Arena {
    fn ensure_record(&self, ad: ExprId) -> EvalResult<()> {
        match self.get(ad) {
            None => Err(EvalFailure::DanglingExpression { id: ad }),
            Some(node) if node.as_record().is_none() => Err(EvalFailure::NotARecord { id: ad }),
            Some(_) => Ok(()),
        }
    }

    fn ensure_alive(&self, id: ExprId) -> EvalResult<()> {
        if self.contains(id) {
            Ok(())
        } else {
            Err(EvalFailure::DanglingExpression { id })
        }
    }

    /// Evaluate attribute `name` of `ad`, resolving through enclosing scopes.
    /// A name bound nowhere evaluates to `undefined`.
    #[instrument(level = "debug", skip(self))]
    pub fn evaluate_attr(&self, ad: ExprId, name: &str) -> EvalResult<Value> {
        self.ensure_record(ad)?;
        Evaluator::new(self, Some(ad)).resolve_and_evaluate(ad, name)
    }

    /// Evaluate `expr` with `ad` as the current record
    #[instrument(level = "debug", skip(self))]
    pub fn evaluate_expr(&self, ad: ExprId, expr: ExprId) -> EvalResult<Value> {
        self.ensure_record(ad)?;
        self.ensure_alive(expr)?;
        Evaluator::new(self, Some(ad)).evaluate(expr)
    }

    /// Evaluate `expr` in its own enclosing scope
    #[instrument(level = "debug", skip(self))]
    pub fn evaluate(&self, expr: ExprId) -> EvalResult<Value> {
        let scope = self
            .get(expr)
            .ok_or(EvalFailure::DanglingExpression { id: expr })?
            .scope();
        Evaluator::new(self, scope).evaluate(expr)
    }

    pub fn evaluate_attr_int(&self, ad: ExprId, name: &str) -> Option<i64> {
        self.evaluate_attr(ad, name).ok()?.as_int()
    }

    pub fn evaluate_attr_real(&self, ad: ExprId, name: &str) -> Option<f64> {
        self.evaluate_attr(ad, name).ok()?.as_real()
    }

    /// Integer or real attribute, widened to `f64`
    pub fn evaluate_attr_number(&self, ad: ExprId, name: &str) -> Option<f64> {
        self.evaluate_attr(ad, name).ok()?.as_number()
    }

    pub fn evaluate_attr_string(&self, ad: ExprId, name: &str) -> Option<String> {
        match self.evaluate_attr(ad, name).ok()? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn evaluate_attr_bool(&self, ad: ExprId, name: &str) -> Option<bool> {
        self.evaluate_attr(ad, name).ok()?.as_bool()
    }

    pub fn evaluate_attr_classad(&self, ad: ExprId, name: &str) -> Option<ExprId> {
        self.evaluate_attr(ad, name).ok()?.as_classad()
    }

    pub fn evaluate_attr_list(&self, ad: ExprId, name: &str) -> Option<ExprId> {
        self.evaluate_attr(ad, name).ok()?.as_list()
    }

    /// Evaluate `expr` in `ad` and also build the significant
    /// sub-expression explaining the outcome.
    ///
    /// The witness is a new detached tree whose enclosing scope is `ad`;
    /// the caller frees it.
    #[instrument(level = "debug", skip(self))]
    pub fn evaluate_with_witness(&mut self, ad: ExprId, expr: ExprId) -> EvalResult<(Value, ExprId)> {
        self.ensure_record(ad)?;
        self.ensure_alive(expr)?;
        let (value, plan) = Evaluator::new(self, Some(ad)).witness(expr)?;
        let witness = plan.build(self);
        self.set_scope(witness, Some(ad));
        Ok((value, witness))
    }

    /// Reduce `expr` as far as `ad` allows.
    ///
    /// A residual tree is detached, scoped to `ad`, and owned by the caller.
    #[instrument(level = "debug", skip(self))]
    pub fn flatten(&mut self, ad: ExprId, expr: ExprId) -> EvalResult<Flattened> {
        self.ensure_record(ad)?;
        self.ensure_alive(expr)?;
        let flat = Evaluator::new(self, Some(ad)).flatten(expr)?;
        Ok(match flat {
            flatten::Flat::Value(value) => Flattened::Value(value),
            flatten::Flat::Residual(plan) => {
                let residual = plan.build(self);
                self.set_scope(residual, Some(ad));
                debug!(%residual, "flattened to a residual expression");
                Flattened::Residual(residual)
            }
        })
    }

    /// Run scope resolution for `name` starting at `ad`. Returns the bound
    /// expression and the record holding it.
    pub fn lookup_in_scope(&self, ad: ExprId, name: &str) -> Option<(ExprId, ExprId)> {
        self.ensure_record(ad).ok()?;
        match Evaluator::new(self, Some(ad)).lookup_in_scope(ad, name) {
            Ok(Lookup::Found { expr, scope }) => Some((expr, scope)),
            _ => None,
        }
    }

    /// Attribute names `expr` reads that do not resolve from `ad`
    pub fn external_references(&self, ad: ExprId, expr: ExprId) -> EvalResult<BTreeSet<String>> {
        self.ensure_record(ad)?;
        self.ensure_alive(expr)?;
        Evaluator::new(self, Some(ad)).references(expr, true)
    }

    /// Attribute names `expr` reads that resolve from `ad`
    pub fn internal_references(&self, ad: ExprId, expr: ExprId) -> EvalResult<BTreeSet<String>> {
        self.ensure_record(ad)?;
        self.ensure_alive(expr)?;
        Evaluator::new(self, Some(ad)).references(expr, false)
    }
}
