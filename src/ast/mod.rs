//! Expression trees and records.
//!
//! Every node lives in an [`Arena`] and is addressed by an [`ExprId`].
//! A node owns the ids stored in its [`ExprKind`]; each id has at most one
//! owner. Besides that ownership edge a node carries its *enclosing scope*:
//! the id of the record that lexically contains it. The scope is a plain
//! back-reference and never owns anything.

mod classad;
pub mod operator;

use std::fmt;

use tracing::warn;

use crate::errors::{find_similar, invariant_violated};
use crate::evaluator::builtins::{self, Builtin};
use crate::evaluator::value::Value;

pub use classad::{is_valid_identifier, Binding, Record};
pub use operator::OpKind;

/// Stable handle to a node in an [`Arena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(u32);

impl ExprId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Multiplier suffix of a numeric literal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Factor {
    /// `K`, 1024
    Kilo,
    /// `M`, 1024²
    Mega,
    /// `G`, 1024³
    Giga,
}

impl Factor {
    pub fn multiplier(self) -> i64 {
        match self {
            Factor::Kilo => 1 << 10,
            Factor::Mega => 1 << 20,
            Factor::Giga => 1 << 30,
        }
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Factor::Kilo => "K",
            Factor::Mega => "M",
            Factor::Giga => "G",
        })
    }
}

/// The six node variants
#[derive(Debug, Clone)]
pub enum ExprKind {
    Literal {
        value: Value,
        factor: Option<Factor>,
    },
    /// `name`, `.name` (absolute) or `base.name`
    AttributeRef {
        base: Option<ExprId>,
        name: String,
        absolute: bool,
    },
    Operation {
        op: OpKind,
        operands: Vec<ExprId>,
    },
    /// `builtin` is resolved once, when the node is built
    FunctionCall {
        name: String,
        args: Vec<ExprId>,
        builtin: Option<&'static Builtin>,
    },
    List(Vec<ExprId>),
    ClassAd(Record),
}

/// An arena slot
#[derive(Debug, Clone)]
pub struct Node {
    kind: ExprKind,
    /// Enclosing record (non-owning)
    scope: Option<ExprId>,
    /// Node that owns this one, if attached
    owner: Option<ExprId>,
}

impl Node {
    pub fn kind(&self) -> &ExprKind {
        &self.kind
    }

    pub fn scope(&self) -> Option<ExprId> {
        self.scope
    }

    pub fn owner(&self) -> Option<ExprId> {
        self.owner
    }

    pub fn as_record(&self) -> Option<&Record> {
        match &self.kind {
            ExprKind::ClassAd(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ExprId]> {
        match &self.kind {
            ExprKind::List(items) => Some(items),
            _ => None,
        }
    }
}

/// Storage for every expression node.
///
/// Freed slots are recycled, so a `Value::List` or `Value::ClassAd` obtained
/// from an evaluation stays meaningful only while the node it aliases is
/// alive.
#[derive(Debug, Default)]
pub struct Arena {
    nodes: Vec<Option<Node>>,
    free: Vec<u32>,
    config: crate::evaluator::EvalConfig,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: crate::evaluator::EvalConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn eval_config(&self) -> &crate::evaluator::EvalConfig {
        &self.config
    }

    pub fn set_eval_config(&mut self, config: crate::evaluator::EvalConfig) {
        self.config = config;
    }

    /// Number of live nodes
    pub fn live_nodes(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    pub fn get(&self, id: ExprId) -> Option<&Node> {
        self.nodes.get(id.index()).and_then(Option::as_ref)
    }

    pub fn contains(&self, id: ExprId) -> bool {
        self.get(id).is_some()
    }

    /// Access a node reached through an ownership edge or checked earlier.
    pub(crate) fn node(&self, id: ExprId) -> &Node {
        match self.get(id) {
            Some(node) => node,
            None => invariant_violated("owned expression id is not allocated"),
        }
    }

    pub(crate) fn node_mut(&mut self, id: ExprId) -> &mut Node {
        match self.nodes.get_mut(id.index()).and_then(Option::as_mut) {
            Some(node) => node,
            None => invariant_violated("owned expression id is not allocated"),
        }
    }

    pub fn kind(&self, id: ExprId) -> Option<&ExprKind> {
        self.get(id).map(Node::kind)
    }

    fn alloc(&mut self, kind: ExprKind) -> ExprId {
        let children = children_of(&kind);
        let node = Node {
            kind,
            scope: None,
            owner: None,
        };
        let id = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot as usize] = Some(node);
                ExprId(slot)
            }
            None => {
                let slot = u32::try_from(self.nodes.len())
                    .unwrap_or_else(|_| invariant_violated("arena exhausted the id space"));
                self.nodes.push(Some(node));
                ExprId(slot)
            }
        };
        for child in children {
            self.adopt(id, child);
        }
        id
    }

    /// Record `owner` as the single owner of `child`.
    ///
    /// # Panics
    ///
    /// When `child` is not allocated or already belongs to another node.
    fn adopt(&mut self, owner: ExprId, child: ExprId) {
        let node = self.node_mut(child);
        if node.owner.is_some() {
            invariant_violated("expression already has an owner");
        }
        node.owner = Some(owner);
    }

    // --- constructors ---

    pub fn literal(&mut self, value: Value) -> ExprId {
        self.alloc(ExprKind::Literal {
            value,
            factor: None,
        })
    }

    pub fn literal_with_factor(&mut self, value: Value, factor: Factor) -> ExprId {
        self.alloc(ExprKind::Literal {
            value,
            factor: Some(factor),
        })
    }

    /// `name`
    pub fn attr(&mut self, name: impl Into<String>) -> ExprId {
        self.alloc(ExprKind::AttributeRef {
            base: None,
            name: name.into(),
            absolute: false,
        })
    }

    /// `.name`, resolved from the root record
    pub fn absolute_attr(&mut self, name: impl Into<String>) -> ExprId {
        self.alloc(ExprKind::AttributeRef {
            base: None,
            name: name.into(),
            absolute: true,
        })
    }

    /// `base.name`
    pub fn select(&mut self, base: ExprId, name: impl Into<String>) -> ExprId {
        self.alloc(ExprKind::AttributeRef {
            base: Some(base),
            name: name.into(),
            absolute: false,
        })
    }

    /// Build an operation node.
    ///
    /// # Panics
    ///
    /// When the operand count does not match the operator's arity.
    pub fn operation(&mut self, op: OpKind, operands: Vec<ExprId>) -> ExprId {
        if operands.len() != op.arity() {
            invariant_violated("operand count does not match operator arity");
        }
        self.alloc(ExprKind::Operation { op, operands })
    }

    pub fn unary(&mut self, op: OpKind, operand: ExprId) -> ExprId {
        self.operation(op, vec![operand])
    }

    pub fn binary(&mut self, op: OpKind, left: ExprId, right: ExprId) -> ExprId {
        self.operation(op, vec![left, right])
    }

    pub fn ternary(&mut self, cond: ExprId, then: ExprId, otherwise: ExprId) -> ExprId {
        self.operation(OpKind::Ternary, vec![cond, then, otherwise])
    }

    pub fn paren(&mut self, inner: ExprId) -> ExprId {
        self.operation(OpKind::Parentheses, vec![inner])
    }

    pub fn subscript(&mut self, target: ExprId, index: ExprId) -> ExprId {
        self.operation(OpKind::Subscript, vec![target, index])
    }

    /// Build a call, resolving `name` against the built-in table.
    ///
    /// An unknown name is not an error here; the call evaluates to `error`.
    pub fn call(&mut self, name: impl Into<String>, args: Vec<ExprId>) -> ExprId {
        let name = name.into();
        let builtin = builtins::lookup(&name);
        if builtin.is_none() {
            match find_similar(&name, builtins::names(), 2) {
                Some(suggestion) => warn!(function = %name, "unknown function; did you mean '{}'?", suggestion),
                None => warn!(function = %name, "unknown function"),
            }
        }
        self.alloc(ExprKind::FunctionCall {
            name,
            args,
            builtin,
        })
    }

    /// Rebuild a call whose name was resolved earlier
    pub(crate) fn resolved_call(
        &mut self,
        name: String,
        args: Vec<ExprId>,
        builtin: Option<&'static Builtin>,
    ) -> ExprId {
        self.alloc(ExprKind::FunctionCall {
            name,
            args,
            builtin,
        })
    }

    pub fn list(&mut self, items: Vec<ExprId>) -> ExprId {
        self.alloc(ExprKind::List(items))
    }

    /// An empty record
    pub fn classad(&mut self) -> ExprId {
        self.alloc(ExprKind::ClassAd(Record::default()))
    }

    // --- structure ---

    /// Owned children of a node, in order
    pub fn children(&self, id: ExprId) -> Vec<ExprId> {
        self.get(id).map(|n| children_of(&n.kind)).unwrap_or_default()
    }

    /// Set the enclosing scope of `id` and of every node below it, stopping at
    /// nested records (their contents keep the nested record as scope).
    pub(crate) fn set_scope(&mut self, id: ExprId, scope: Option<ExprId>) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = self.node_mut(current);
            node.scope = scope;
            if !matches!(node.kind, ExprKind::ClassAd(_)) {
                stack.extend(children_of(&node.kind));
            }
        }
    }

    /// Detach `id` from its owner bookkeeping and scope. The caller owns it.
    pub(crate) fn detach(&mut self, id: ExprId) {
        self.set_scope(id, None);
        self.node_mut(id).owner = None;
    }

    /// Destroy a detached tree. Returns false (and frees nothing) when `id`
    /// is not allocated or is still owned by another node.
    pub fn free(&mut self, id: ExprId) -> bool {
        match self.get(id) {
            Some(node) if node.owner.is_none() => {
                self.free_subtree(id);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn free_subtree(&mut self, id: ExprId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get_mut(current.index()).and_then(Option::take) {
                stack.extend(children_of(&node.kind));
                self.free.push(current.0);
            }
        }
    }

    /// Deep-copy a tree. The copy is detached, keeps the source's enclosing
    /// scope, and nested records re-parent their copied contents.
    pub fn copy(&mut self, id: ExprId) -> ExprId {
        let scope = self.node(id).scope;
        let copy = self.copy_node(id);
        self.set_scope(copy, scope);
        copy
    }

    fn copy_node(&mut self, id: ExprId) -> ExprId {
        let kind = self.node(id).kind.clone();
        match kind {
            ExprKind::Literal { value, factor } => self.alloc(ExprKind::Literal { value, factor }),
            ExprKind::AttributeRef {
                base,
                name,
                absolute,
            } => {
                let base = base.map(|b| self.copy_node(b));
                self.alloc(ExprKind::AttributeRef {
                    base,
                    name,
                    absolute,
                })
            }
            ExprKind::Operation { op, operands } => {
                let operands = operands.into_iter().map(|o| self.copy_node(o)).collect();
                self.alloc(ExprKind::Operation { op, operands })
            }
            ExprKind::FunctionCall {
                name,
                args,
                builtin,
            } => {
                let args = args.into_iter().map(|a| self.copy_node(a)).collect();
                self.alloc(ExprKind::FunctionCall {
                    name,
                    args,
                    builtin,
                })
            }
            ExprKind::List(items) => {
                let items = items.into_iter().map(|i| self.copy_node(i)).collect();
                self.alloc(ExprKind::List(items))
            }
            ExprKind::ClassAd(record) => {
                let ad = self.classad();
                for binding in record.bindings() {
                    let expr = self.copy_node(binding.expr);
                    self.bind(ad, binding.name.clone(), expr);
                }
                ad
            }
        }
    }

    /// Structural equality of two trees
    pub fn same_as(&self, a: ExprId, b: ExprId) -> bool {
        if a == b {
            return true;
        }
        let (Some(left), Some(right)) = (self.get(a), self.get(b)) else {
            return false;
        };
        match (&left.kind, &right.kind) {
            (
                ExprKind::Literal {
                    value: v1,
                    factor: f1,
                },
                ExprKind::Literal {
                    value: v2,
                    factor: f2,
                },
            ) => f1 == f2 && v1.is_identical(v2),
            (
                ExprKind::AttributeRef {
                    base: b1,
                    name: n1,
                    absolute: a1,
                },
                ExprKind::AttributeRef {
                    base: b2,
                    name: n2,
                    absolute: a2,
                },
            ) => {
                a1 == a2
                    && n1.eq_ignore_ascii_case(n2)
                    && match (b1, b2) {
                        (None, None) => true,
                        (Some(x), Some(y)) => self.same_as(*x, *y),
                        _ => false,
                    }
            }
            (
                ExprKind::Operation {
                    op: o1,
                    operands: c1,
                },
                ExprKind::Operation {
                    op: o2,
                    operands: c2,
                },
            ) => o1 == o2 && self.all_same(c1, c2),
            (
                ExprKind::FunctionCall {
                    name: n1, args: c1, ..
                },
                ExprKind::FunctionCall {
                    name: n2, args: c2, ..
                },
            ) => n1.eq_ignore_ascii_case(n2) && self.all_same(c1, c2),
            (ExprKind::List(c1), ExprKind::List(c2)) => self.all_same(c1, c2),
            (ExprKind::ClassAd(r1), ExprKind::ClassAd(r2)) => {
                r1.len() == r2.len()
                    && r1.bindings().all(|binding| {
                        r2.get(&binding.name)
                            .is_some_and(|other| self.same_as(binding.expr, other))
                    })
            }
            _ => false,
        }
    }

    fn all_same(&self, a: &[ExprId], b: &[ExprId]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| self.same_as(*x, *y))
    }
}

fn children_of(kind: &ExprKind) -> Vec<ExprId> {
    match kind {
        ExprKind::Literal { .. } => Vec::new(),
        ExprKind::AttributeRef { base, .. } => base.iter().copied().collect(),
        ExprKind::Operation { operands, .. } => operands.clone(),
        ExprKind::FunctionCall { args, .. } => args.clone(),
        ExprKind::List(items) => items.clone(),
        ExprKind::ClassAd(record) => record.bindings().map(|b| b.expr).collect(),
    }
}
