//! Records: case-insensitive attribute maps that also act as scopes.

use indexmap::IndexMap;

use super::{Arena, ExprId, ExprKind};
use crate::errors::{ClassAdError, ClassAdResult};
use crate::evaluator::value::Value;

/// An attribute binding; `name` keeps the spelling it was inserted with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub name: String,
    pub expr: ExprId,
}

/// Attribute map of a record, keyed case-insensitively, in insertion order
#[derive(Debug, Clone, Default)]
pub struct Record {
    attrs: IndexMap<String, Binding>,
}

impl Record {
    pub fn get(&self, name: &str) -> Option<ExprId> {
        self.attrs.get(&name.to_ascii_lowercase()).map(|b| b.expr)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.attrs.contains_key(&name.to_ascii_lowercase())
    }

    pub fn bindings(&self) -> impl Iterator<Item = &Binding> {
        self.attrs.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.attrs.values().map(|b| b.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

impl Arena {
    pub fn record(&self, ad: ExprId) -> Option<&Record> {
        self.get(ad).and_then(|n| n.as_record())
    }

    pub fn is_record(&self, id: ExprId) -> bool {
        self.record(id).is_some()
    }

    fn record_mut(&mut self, ad: ExprId) -> Option<&mut Record> {
        match self.nodes.get_mut(ad.index()).and_then(Option::as_mut) {
            Some(node) => match &mut node.kind {
                ExprKind::ClassAd(record) => Some(record),
                _ => None,
            },
            None => None,
        }
    }

    /// Bind `name` to `expr` in `ad`, taking ownership of `expr`.
    ///
    /// A previous binding of the same name (in any case) is destroyed.
    pub fn insert(&mut self, ad: ExprId, name: &str, expr: ExprId) -> ClassAdResult<()> {
        if name.is_empty() {
            return Err(ClassAdError::MissingAttributeName);
        }
        if !is_valid_identifier(name) {
            return Err(ClassAdError::InvalidAttributeName {
                name: name.to_string(),
            });
        }
        if !self.is_record(ad) {
            return Err(ClassAdError::NotARecord { id: ad });
        }
        match self.get(expr) {
            Some(node) if node.owner().is_none() && !self.owns_transitively(expr, ad) => {}
            _ => return Err(ClassAdError::BadExpression { id: expr }),
        }
        self.bind(ad, name.to_string(), expr);
        Ok(())
    }

    /// Convenience: bind `name` to a literal holding `value`
    pub fn insert_value(&mut self, ad: ExprId, name: &str, value: Value) -> ClassAdResult<()> {
        let literal = self.literal(value);
        self.insert(ad, name, literal).inspect_err(|_| {
            self.free(literal);
        })
    }

    /// Whether `ancestor` is `id` or one of its owners
    fn owns_transitively(&self, ancestor: ExprId, id: ExprId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            current = self.get(node).and_then(|n| n.owner());
        }
        false
    }

    /// Unchecked insertion used by construction paths that already
    /// validated `ad` and `expr`.
    pub(crate) fn bind(&mut self, ad: ExprId, name: String, expr: ExprId) {
        let key = name.to_ascii_lowercase();
        let previous = self
            .record_mut(ad)
            .and_then(|record| record.attrs.insert(key, Binding { name, expr }));
        if let Some(old) = previous {
            self.free_subtree(old.expr);
        }
        self.node_mut(expr).owner = Some(ad);
        self.set_scope(expr, Some(ad));
    }

    /// Local, case-insensitive lookup; no scope walk
    pub fn lookup(&self, ad: ExprId, name: &str) -> Option<ExprId> {
        self.record(ad).and_then(|record| record.get(name))
    }

    /// Attribute names of `ad`, in insertion order
    pub fn attributes(&self, ad: ExprId) -> Vec<&str> {
        self.record(ad)
            .map(|record| record.names().collect())
            .unwrap_or_default()
    }

    /// Unbind and destroy an attribute. Returns whether it existed.
    pub fn delete(&mut self, ad: ExprId, name: &str) -> bool {
        match self.unbind(ad, name) {
            Some(expr) => {
                self.free_subtree(expr);
                true
            }
            None => false,
        }
    }

    /// Unbind an attribute and hand the detached expression to the caller
    pub fn remove(&mut self, ad: ExprId, name: &str) -> Option<ExprId> {
        let expr = self.unbind(ad, name)?;
        self.detach(expr);
        Some(expr)
    }

    fn unbind(&mut self, ad: ExprId, name: &str) -> Option<ExprId> {
        self.record_mut(ad)?
            .attrs
            .shift_remove(&name.to_ascii_lowercase())
            .map(|b| b.expr)
    }

    /// Copy every binding of `other` into `ad`, replacing same-named ones
    pub fn update(&mut self, ad: ExprId, other: ExprId) -> ClassAdResult<()> {
        if !self.is_record(ad) {
            return Err(ClassAdError::NotARecord { id: ad });
        }
        let bindings: Vec<Binding> = match self.record(other) {
            Some(record) => record.bindings().cloned().collect(),
            None => return Err(ClassAdError::NotARecord { id: other }),
        };
        // Copy everything before binding: `other` may live inside `ad` and
        // be destroyed by the first replacement.
        let copies: Vec<(String, ExprId)> = bindings
            .into_iter()
            .map(|binding| (binding.name, self.copy(binding.expr)))
            .collect();
        for (name, copy) in copies {
            self.bind(ad, name, copy);
        }
        Ok(())
    }

    /// Destroy every binding of `ad`
    pub fn clear(&mut self, ad: ExprId) {
        let exprs: Vec<ExprId> = match self.record_mut(ad) {
            Some(record) => record.attrs.drain(..).map(|(_, b)| b.expr).collect(),
            None => return,
        };
        for expr in exprs {
            self.free_subtree(expr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::OpKind;

    #[test]
    fn test_identifier_rule() {
        assert!(is_valid_identifier("Memory"));
        assert!(is_valid_identifier("_x1"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("1x"));
        assert!(!is_valid_identifier("a-b"));
    }

    #[test]
    fn test_insert_and_lookup_case_insensitive() {
        let mut arena = Arena::new();
        let ad = arena.classad();
        arena.insert_value(ad, "Memory", Value::Integer(8)).unwrap();
        let expr = arena.lookup(ad, "MEMORY").unwrap();
        assert_eq!(arena.get(expr).unwrap().scope(), Some(ad));
        assert_eq!(arena.record(ad).unwrap().names().collect::<Vec<_>>(), ["Memory"]);
    }

    #[test]
    fn test_insert_rejects_bad_input() {
        let mut arena = Arena::new();
        let ad = arena.classad();
        let expr = arena.literal(Value::Integer(1));
        assert!(matches!(
            arena.insert(ad, "", expr),
            Err(ClassAdError::MissingAttributeName)
        ));
        assert!(matches!(
            arena.insert(ad, "2fast", expr),
            Err(ClassAdError::InvalidAttributeName { .. })
        ));
        assert!(matches!(
            arena.insert(expr, "x", ad),
            Err(ClassAdError::NotARecord { .. })
        ));
        assert!(arena.free(expr));
        assert!(matches!(
            arena.insert(ad, "x", expr),
            Err(ClassAdError::BadExpression { .. })
        ));
    }

    #[test]
    fn test_insert_rejects_owning_cycle() {
        let mut arena = Arena::new();
        let outer = arena.classad();
        let inner = arena.classad();
        arena.insert(outer, "inner", inner).unwrap();
        assert!(matches!(
            arena.insert(inner, "loop", outer),
            Err(ClassAdError::BadExpression { .. })
        ));
        assert!(matches!(
            arena.insert(outer, "me", outer),
            Err(ClassAdError::BadExpression { .. })
        ));
    }

    #[test]
    fn test_replace_destroys_previous() {
        let mut arena = Arena::new();
        let ad = arena.classad();
        let a = arena.attr("y");
        let b = arena.literal(Value::Integer(2));
        let sum = arena.binary(OpKind::Add, a, b);
        arena.insert(ad, "x", sum).unwrap();
        assert_eq!(arena.live_nodes(), 4);
        arena.insert_value(ad, "X", Value::Integer(1)).unwrap();
        assert_eq!(arena.live_nodes(), 2);
        assert!(!arena.contains(sum));
    }

    #[test]
    fn test_delete_and_remove() {
        let mut arena = Arena::new();
        let ad = arena.classad();
        arena.insert_value(ad, "a", Value::Integer(1)).unwrap();
        arena.insert_value(ad, "b", Value::Integer(2)).unwrap();

        assert!(arena.delete(ad, "A"));
        assert!(!arena.delete(ad, "a"));

        let detached = arena.remove(ad, "b").unwrap();
        let node = arena.get(detached).unwrap();
        assert_eq!(node.scope(), None);
        assert_eq!(node.owner(), None);
        assert!(arena.record(ad).unwrap().is_empty());
        assert!(arena.free(detached));
    }

    #[test]
    fn test_update_copies_bindings() {
        let mut arena = Arena::new();
        let target = arena.classad();
        let source = arena.classad();
        arena.insert_value(target, "a", Value::Integer(1)).unwrap();
        arena.insert_value(source, "a", Value::Integer(10)).unwrap();
        arena.insert_value(source, "b", Value::Integer(20)).unwrap();

        arena.update(target, source).unwrap();

        let a = arena.lookup(target, "a").unwrap();
        assert_ne!(Some(a), arena.lookup(source, "a"));
        assert!(arena.same_as(a, arena.lookup(source, "a").unwrap()));
        assert_eq!(arena.attributes(target), ["a", "b"]);
        assert_eq!(arena.get(a).unwrap().scope(), Some(target));
    }

    #[test]
    fn test_update_from_a_record_nested_in_the_target() {
        let mut arena = Arena::new();
        let ad = crate::parse_classad(&mut arena, "[x = [x = 1; y = 2]]").unwrap();
        let inner = arena.lookup(ad, "x").unwrap();

        arena.update(ad, inner).unwrap();

        assert!(!arena.contains(inner));
        assert_eq!(arena.attributes(ad), ["x", "y"]);
        assert_eq!(arena.evaluate_attr(ad, "x"), Ok(Value::Integer(1)));
        assert_eq!(arena.evaluate_attr(ad, "y"), Ok(Value::Integer(2)));
        assert_eq!(arena.live_nodes(), 3);
    }

    #[test]
    fn test_update_from_itself() {
        let mut arena = Arena::new();
        let ad = crate::parse_classad(&mut arena, "[a = 1; b = a + 1]").unwrap();
        arena.update(ad, ad).unwrap();
        assert_eq!(arena.evaluate_attr(ad, "b"), Ok(Value::Integer(2)));
        assert_eq!(arena.live_nodes(), 5);
    }

    #[test]
    fn test_copy_reparents_nested_record() {
        let mut arena = Arena::new();
        let outer = arena.classad();
        let inner = arena.classad();
        arena.insert_value(inner, "v", Value::Integer(1)).unwrap();
        arena.insert(outer, "inner", inner).unwrap();

        let copy = arena.copy(outer);
        let inner_copy = arena.lookup(copy, "inner").unwrap();
        let v_copy = arena.lookup(inner_copy, "v").unwrap();
        assert_eq!(arena.get(inner_copy).unwrap().scope(), Some(copy));
        assert_eq!(arena.get(v_copy).unwrap().scope(), Some(inner_copy));
        assert!(arena.same_as(outer, copy));
    }

    #[test]
    fn test_clear() {
        let mut arena = Arena::new();
        let ad = arena.classad();
        arena.insert_value(ad, "a", Value::Integer(1)).unwrap();
        arena.clear(ad);
        assert!(arena.record(ad).unwrap().is_empty());
        assert_eq!(arena.live_nodes(), 1);
    }
}
