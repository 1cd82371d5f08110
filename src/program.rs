//! The program representation consumed by the solver.

use std::{fmt::Debug, hash::Hash};

use crate::graph::FlowGraph;

/// The analysable targets of a call node, as reported by the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTargets<M> {
    /// A (possibly empty) set of target methods. An empty set means the
    /// call has no analysable target; the caller keeps only its local
    /// state across it.
    Resolved(Vec<M>),
    /// The resolver cannot say where the call goes (e.g. a native target).
    /// The solver records such call sites as *default* sites.
    Unknown,
}

/// A whole program: entry points, per-method control flow graphs, and a
/// call resolver.
///
/// The engine is generic over the intermediate representation; anything
/// that can answer these queries can be analysed. Implementations are never
/// mutated by the solver.
pub trait Program {
    /// A method handle. Equality and hashing identify a method for the
    /// entire run.
    type Method: Clone + Eq + Hash + Debug;

    /// A control-flow node handle. Nodes must be unique across the whole
    /// program, not just within one method, for the merged solution of
    /// [`Solver::meet_over_valid_paths`](crate::solver::Solver::meet_over_valid_paths)
    /// to be meaningful.
    type Node: Clone + Eq + Hash + Debug;

    /// The methods the analysis starts from.
    fn entry_points(&self) -> Vec<Self::Method>;

    /// Builds the control flow graph of a method.
    ///
    /// The solver calls this at most once per method and shares the result
    /// across every context of that method.
    fn flow_graph(&self, method: &Self::Method) -> FlowGraph<Self::Node>;

    /// Returns `true` if the node is a call.
    fn is_call(&self, node: &Self::Node) -> bool;

    /// Resolves the targets of a call node in the given method.
    fn call_targets(&self, caller: &Self::Method, node: &Self::Node) -> CallTargets<Self::Method>;

    /// Returns `true` if the method has no analysable body.
    ///
    /// Phantom methods are skipped when they show up among resolved call
    /// targets. The default implementation reports every method as
    /// analysable.
    fn is_phantom(&self, method: &Self::Method) -> bool {
        let _ = method;
        false
    }
}
