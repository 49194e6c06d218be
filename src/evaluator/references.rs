//! Which attributes an expression reads, split by whether they resolve.

use std::collections::{BTreeSet, HashSet};

use crate::ast::{Arena, ExprId, ExprKind};
use crate::errors::{EvalFailure, EvalResult};

use super::scope::Lookup;
use super::value::Value;
use super::Evaluator;

struct Collector {
    external: bool,
    names: BTreeSet<String>,
    visited: HashSet<ExprId>,
}

impl Collector {
    fn record(&mut self, resolved: bool, name: String) {
        if resolved != self.external {
            self.names.insert(name);
        }
    }
}

/// `a.b.c` for a chain of plain references, `None` otherwise
fn dotted_path(arena: &Arena, id: ExprId) -> Option<String> {
    match arena.kind(id)? {
        ExprKind::AttributeRef {
            base: None, name, ..
        } => Some(name.clone()),
        ExprKind::AttributeRef {
            base: Some(base),
            name,
            ..
        } => dotted_path(arena, *base).map(|path| format!("{}.{}", path, name)),
        _ => None,
    }
}

impl Evaluator<'_> {
    /// Attribute names read by `expr`. With `external`, the names that do
    /// not resolve; otherwise the ones that do.
    pub(crate) fn references(&mut self, expr: ExprId, external: bool) -> EvalResult<BTreeSet<String>> {
        let mut collector = Collector {
            external,
            names: BTreeSet::new(),
            visited: HashSet::new(),
        };
        let scope = self.state.current;
        self.collect(expr, scope, &mut collector)?;
        Ok(collector.names)
    }

    fn collect(&mut self, id: ExprId, scope: Option<ExprId>, collector: &mut Collector) -> EvalResult<()> {
        let arena = self.arena;
        let node = arena
            .get(id)
            .ok_or(EvalFailure::DanglingExpression { id })?;
        self.enter()?;
        let result = match node.kind() {
            ExprKind::AttributeRef {
                base,
                name,
                absolute,
            } => self.collect_reference(id, *base, name, *absolute, scope, collector),
            ExprKind::ClassAd(record) => record
                .bindings()
                .try_for_each(|binding| self.collect(binding.expr, Some(id), collector)),
            _ => arena
                .children(id)
                .into_iter()
                .try_for_each(|child| self.collect(child, scope, collector)),
        };
        self.leave();
        result
    }

    fn collect_reference(
        &mut self,
        id: ExprId,
        base: Option<ExprId>,
        name: &str,
        absolute: bool,
        scope: Option<ExprId>,
        collector: &mut Collector,
    ) -> EvalResult<()> {
        let arena = self.arena;
        let start = match base {
            None if absolute => self.state.root,
            None => scope,
            Some(base) => {
                let saved = std::mem::replace(&mut self.state.current, scope);
                let value = self.evaluate(base);
                self.state.current = saved;
                match value? {
                    Value::ClassAd(ad) => {
                        self.collect(base, scope, collector)?;
                        Some(ad)
                    }
                    _ => match dotted_path(arena, id) {
                        // An unresolvable path such as `other.mem` is
                        // reported whole
                        Some(path) => {
                            collector.record(false, path);
                            return Ok(());
                        }
                        None => return self.collect(base, scope, collector),
                    },
                }
            }
        };
        let label = dotted_path(arena, id).unwrap_or_else(|| name.to_string());
        let Some(start) = start else {
            collector.record(false, label);
            return Ok(());
        };
        match self.lookup_in_scope(start, name)? {
            Lookup::Found { expr, scope } => {
                collector.record(true, label);
                if collector.visited.insert(expr) {
                    self.collect(expr, Some(scope), collector)?;
                }
            }
            Lookup::NotFound | Lookup::Undefined | Lookup::Error => collector.record(false, label),
        }
        Ok(())
    }
}
