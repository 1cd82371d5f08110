//! A small in-memory IR for driving the solver end to end.
//!
//! Methods are lists of statements with explicit control flow edges; nodes
//! are `(method, statement index)` pairs, unique across the program.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};

use percolator::{
    graph::FlowGraph,
    lattice::MeetSemiLattice,
    program::{CallTargets, Program},
};

/// A variable name.
pub type Var = &'static str;

/// The variable a method's returned value is bound to.
pub const RETURN: Var = "@return";

/// A right-hand side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Const(i64),
    Var(Var),
    Neg(Var),
    Mul(Var, Var),
}

impl Expr {
    /// The variables this expression reads.
    pub fn vars(&self) -> Vec<Var> {
        match *self {
            Self::Const(_) => Vec::new(),
            Self::Var(var) | Self::Neg(var) => vec![var],
            Self::Mul(lhs, rhs) => vec![lhs, rhs],
        }
    }
}

/// A statement; one CFG node each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
    /// `lhs = rhs`
    Assign { lhs: Var, rhs: Expr },
    /// An opaque branch; the edges decide where control may go.
    Branch,
    /// `result = callee(args)`
    Call {
        result: Var,
        callee: &'static str,
        args: Vec<Expr>,
    },
    /// `return value`
    Return { value: Option<Expr> },
}

/// A CFG node: a statement within its method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub method: &'static str,
    pub index: usize,
}

/// Shorthand for naming a node in assertions.
pub fn node(method: &'static str, index: usize) -> NodeId {
    NodeId { method, index }
}

#[derive(Debug)]
pub struct MethodBody {
    pub params: Vec<Var>,
    pub stmts: Vec<Stmt>,
    pub edges: Vec<(usize, usize)>,
}

/// A whole test program, built method by method.
#[derive(Debug, Default)]
pub struct TestProgram {
    methods: HashMap<&'static str, MethodBody>,
    entry_points: Vec<&'static str>,
    unresolved: HashSet<&'static str>,
    phantoms: HashSet<&'static str>,
}

impl TestProgram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(
        mut self,
        name: &'static str,
        params: &[Var],
        stmts: Vec<Stmt>,
        edges: &[(usize, usize)],
    ) -> Self {
        self.methods.insert(
            name,
            MethodBody {
                params: params.to_vec(),
                stmts,
                edges: edges.to_vec(),
            },
        );
        self
    }

    pub fn entry(mut self, name: &'static str) -> Self {
        self.entry_points.push(name);
        self
    }

    /// Calls to `name` resolve to nothing the analysis can see.
    pub fn unresolved(mut self, name: &'static str) -> Self {
        self.unresolved.insert(name);
        self
    }

    /// `name` resolves as a target but has no analysable body.
    pub fn phantom(mut self, name: &'static str) -> Self {
        self.phantoms.insert(name);
        self
    }

    pub fn body(&self, method: &str) -> &MethodBody {
        &self.methods[method]
    }

    pub fn stmt(&self, node: NodeId) -> &Stmt {
        &self.methods[node.method].stmts[node.index]
    }
}

impl Program for TestProgram {
    type Method = &'static str;
    type Node = NodeId;

    fn entry_points(&self) -> Vec<&'static str> {
        self.entry_points.clone()
    }

    fn flow_graph(&self, method: &&'static str) -> FlowGraph<NodeId> {
        let method = *method;
        let body = self.body(method);
        let nodes = (0..body.stmts.len()).map(|index| node(method, index));
        let edges = body
            .edges
            .iter()
            .map(|&(source, target)| (node(method, source), node(method, target)));
        FlowGraph::new(nodes, edges).unwrap()
    }

    fn is_call(&self, at: &NodeId) -> bool {
        matches!(self.stmt(*at), Stmt::Call { .. })
    }

    fn call_targets(&self, _caller: &&'static str, at: &NodeId) -> CallTargets<&'static str> {
        let Stmt::Call { callee, .. } = self.stmt(*at) else {
            return CallTargets::Resolved(Vec::new());
        };
        if self.unresolved.contains(callee) {
            CallTargets::Unknown
        } else if self.methods.contains_key(callee) || self.phantoms.contains(callee) {
            CallTargets::Resolved(vec![*callee])
        } else {
            CallTargets::Resolved(Vec::new())
        }
    }

    fn is_phantom(&self, method: &&'static str) -> bool {
        self.phantoms.contains(method)
    }
}

/// A per-variable environment over any pointwise lattice.
///
/// Unbound variables are at top; bindings at top are never stored, so the
/// derived equality is the lattice equality.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Env<V>(BTreeMap<Var, V>);

impl<V> Env<V>
where
    V: MeetSemiLattice + Copy,
{
    pub fn get(&self, var: &str) -> V {
        self.0.get(var).copied().unwrap_or_else(V::top)
    }

    pub fn set(&mut self, var: Var, value: V) {
        if value == V::top() {
            self.0.remove(var);
        } else {
            self.0.insert(var, value);
        }
    }

    pub fn remove(&mut self, var: &str) {
        self.0.remove(var);
    }

    pub fn bind(bindings: impl IntoIterator<Item = (Var, V)>) -> Self {
        let mut env = Self(BTreeMap::new());
        for (var, value) in bindings {
            env.set(var, value);
        }
        env
    }
}

impl<V> MeetSemiLattice for Env<V>
where
    V: MeetSemiLattice + Copy,
{
    fn top() -> Self {
        Self(BTreeMap::new())
    }

    fn meet(mut self, other: Self) -> Self {
        for (var, value) in other.0 {
            let merged = self.get(var).meet(value);
            self.set(var, merged);
        }
        self
    }
}
