//! Per-(method, boundary value) analysis state.

use std::{
    collections::{BTreeSet, HashMap},
    fmt::Debug,
    hash::Hash,
    rc::Rc,
};

use crate::{graph::FlowGraph, lattice::MeetSemiLattice, problem::Direction};

/// Identifies a [`Context`] within one solver run.
///
/// Ids are assigned in creation order and never reused, so a larger id
/// always denotes a newer context. The solver's context worklist is ordered
/// by id and processes the newest context first, which finishes recursive
/// call chains before returning to older callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display("ctx#{_0}")]
pub struct ContextId(pub(crate) usize);

impl ContextId {
    pub(crate) const fn index(self) -> usize {
        self.0
    }
}

/// An entry of a context's node worklist.
///
/// Items are ordered by reverse-postorder rank in the analysis direction;
/// `Boundary` sorts after every node and requests a recomputation of the
/// context's far-side boundary value once every pending node before it has
/// been processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum WorkItem {
    Node(u32),
    Boundary,
}

/// One analysis of one method under a specific boundary value.
///
/// A context owns the per-node value tables of its method and a worklist of
/// nodes still to process. The value it was keyed with — the entry value of
/// a forward analysis, the exit value of a backward one — never changes
/// after creation; the opposite boundary value is recomputed every time the
/// context stabilises.
#[derive(Debug)]
pub struct Context<M, N, A> {
    id: ContextId,
    method: M,
    graph: Option<Rc<FlowGraph<N>>>,
    entry_value: A,
    exit_value: A,
    before: HashMap<N, A>,
    after: HashMap<N, A>,
    worklist: BTreeSet<WorkItem>,
    analysed: bool,
    freed: bool,
}

impl<M, N, A> Context<M, N, A>
where
    N: Clone + Eq + Hash + Debug,
    A: MeetSemiLattice,
{
    /// Creates a context with every per-node value at top, the boundary
    /// value placed on the entry side of the analysis direction, and every
    /// node pending on the worklist.
    pub(crate) fn new(
        id: ContextId,
        method: M,
        graph: Rc<FlowGraph<N>>,
        direction: Direction,
        boundary: A,
    ) -> Self {
        let mut before: HashMap<N, A> = graph.nodes().map(|n| (n.clone(), A::top())).collect();
        let mut after: HashMap<N, A> = graph.nodes().map(|n| (n.clone(), A::top())).collect();
        let seeded = match direction {
            Direction::Forward => &mut before,
            Direction::Backward => &mut after,
        };
        for node in graph.entries(direction) {
            seeded.insert(node.clone(), boundary.clone());
        }
        let (entry_value, exit_value) = match direction {
            Direction::Forward => (boundary, A::top()),
            Direction::Backward => (A::top(), boundary),
        };
        let node_count = u32::try_from(graph.len()).expect("node count overflow");
        let worklist = (0..node_count).map(WorkItem::Node).collect();
        Self {
            id,
            method,
            graph: Some(graph),
            entry_value,
            exit_value,
            before,
            after,
            worklist,
            analysed: false,
            freed: false,
        }
    }

    /// The unique id of this context.
    #[must_use]
    pub const fn id(&self) -> ContextId {
        self.id
    }

    /// The method this context analyses.
    #[must_use]
    pub const fn method(&self) -> &M {
        &self.method
    }

    /// The dataflow value at the entry of the method.
    #[must_use]
    pub const fn entry_value(&self) -> &A {
        &self.entry_value
    }

    /// The dataflow value at the exit of the method.
    #[must_use]
    pub const fn exit_value(&self) -> &A {
        &self.exit_value
    }

    /// The dataflow value just before the given node, or `None` once the
    /// value tables have been released or when the node does not belong to
    /// this context's method.
    #[must_use]
    pub fn value_before(&self, node: &N) -> Option<&A> {
        self.before.get(node)
    }

    /// The dataflow value just after the given node; `None` under the same
    /// conditions as [`value_before`](Self::value_before).
    #[must_use]
    pub fn value_after(&self, node: &N) -> Option<&A> {
        self.after.get(node)
    }

    /// Whether this context has stabilised at least once. An analysed
    /// context has a meaningful far-side boundary value, though it may
    /// still be refined while callees of the method are being analysed.
    #[must_use]
    pub const fn is_analysed(&self) -> bool {
        self.analysed
    }

    /// Whether the per-node value tables have been released.
    #[must_use]
    pub const fn is_freed(&self) -> bool {
        self.freed
    }

    /// The control flow graph of the analysed method.
    ///
    /// # Panics
    /// Panics if the value tables have been released.
    pub(crate) fn graph(&self) -> &Rc<FlowGraph<N>> {
        self.graph.as_ref().expect("context has been freed")
    }

    pub(crate) fn pop_work(&mut self) -> Option<WorkItem> {
        self.worklist.pop_first()
    }

    pub(crate) fn push_work(&mut self, item: WorkItem) {
        self.worklist.insert(item);
    }

    /// The value on the side information arrives from.
    pub(crate) fn inflow(&self, direction: Direction, node: &N) -> &A {
        let table = match direction {
            Direction::Forward => &self.before,
            Direction::Backward => &self.after,
        };
        table.get(node).expect("per-node value missing")
    }

    pub(crate) fn set_inflow(&mut self, direction: Direction, node: N, value: A) {
        let table = match direction {
            Direction::Forward => &mut self.before,
            Direction::Backward => &mut self.after,
        };
        table.insert(node, value);
    }

    /// The value on the side a transfer writes to.
    pub(crate) fn outflow(&self, direction: Direction, node: &N) -> &A {
        self.inflow(direction.reversed(), node)
    }

    pub(crate) fn set_outflow(&mut self, direction: Direction, node: N, value: A) {
        self.set_inflow(direction.reversed(), node, value);
    }

    /// The boundary value this context is keyed by.
    pub(crate) const fn key_value(&self, direction: Direction) -> &A {
        match direction {
            Direction::Forward => &self.entry_value,
            Direction::Backward => &self.exit_value,
        }
    }

    /// The boundary value on the far side, recomputed at stabilisation.
    pub(crate) const fn result_value(&self, direction: Direction) -> &A {
        self.key_value(direction.reversed())
    }

    pub(crate) fn set_result_value(&mut self, direction: Direction, value: A) {
        match direction {
            Direction::Forward => self.exit_value = value,
            Direction::Backward => self.entry_value = value,
        }
    }

    pub(crate) fn mark_analysed(&mut self) {
        self.analysed = true;
    }

    pub(crate) fn values_before(&self) -> impl Iterator<Item = (&N, &A)> {
        self.before.iter()
    }

    pub(crate) fn values_after(&self) -> impl Iterator<Item = (&N, &A)> {
        self.after.iter()
    }

    /// Releases the per-node value tables, the node worklist, and the CFG
    /// handle, keeping only the id, the method, the boundary values, and
    /// the analysed flag.
    pub(crate) fn release_tables(&mut self) {
        self.graph = None;
        self.before = HashMap::new();
        self.after = HashMap::new();
        self.worklist = BTreeSet::new();
        self.freed = true;
    }
}
