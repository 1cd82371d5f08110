//! Control flow graphs shared by all contexts of a method.

use std::{
    collections::{HashMap, HashSet},
    fmt::Debug,
    hash::Hash,
};

use petgraph::{
    Direction as EdgeDirection,
    graph::{DiGraph, NodeIndex},
    visit::{DfsPostOrder, GraphRef, IntoNeighbors, Reversed, Visitable},
};

use crate::problem::Direction;

/// An error that occurs when constructing a [`FlowGraph`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FlowGraphError {
    /// A node appears more than once in the node list.
    #[error("Duplicate node: {0}")]
    DuplicateNode(String),
    /// An edge endpoint does not appear in the node list.
    #[error("Edge endpoint is not a node of the graph: {0}")]
    UnknownEndpoint(String),
    /// An edge appears more than once in the edge list.
    #[error("Duplicate edge: {0}")]
    DuplicateEdge(String),
    /// A boundary override does not appear in the node list.
    #[error("Boundary override is not a node of the graph: {0}")]
    UnknownBoundary(String),
}

/// The control flow graph of a single method.
///
/// A flow graph is immutable once constructed and is shared by every
/// analysis context of its method. Besides the usual neighbourhood queries
/// it carries two precomputed reverse-postorder node rankings, one per
/// analysis direction, which the solver uses to order per-context node
/// worklists.
#[derive(Debug, Clone)]
pub struct FlowGraph<N> {
    graph: DiGraph<N, ()>,
    index_of: HashMap<N, NodeIndex>,
    heads: Vec<NodeIndex>,
    tails: Vec<NodeIndex>,
    forward: Traversal,
    backward: Traversal,
}

/// A total ranking of the nodes in one analysis direction.
#[derive(Debug, Clone)]
struct Traversal {
    rank_of: Vec<u32>,
    by_rank: Vec<NodeIndex>,
}

impl<N> FlowGraph<N>
where
    N: Clone + Eq + Hash + Debug,
{
    /// Constructs a flow graph from node and edge lists.
    ///
    /// Heads are inferred as the nodes without incoming edges and tails as
    /// the nodes without outgoing edges. Use [`FlowGraph::with_boundaries`]
    /// when entry or exit nodes carry edges (e.g. a loop back to the entry).
    ///
    /// # Errors
    /// See [`FlowGraphError`].
    pub fn new(
        nodes: impl IntoIterator<Item = N>,
        edges: impl IntoIterator<Item = (N, N)>,
    ) -> Result<Self, FlowGraphError> {
        Self::build(nodes, edges, None)
    }

    /// Constructs a flow graph with explicitly designated heads and tails.
    ///
    /// # Errors
    /// See [`FlowGraphError`].
    pub fn with_boundaries(
        nodes: impl IntoIterator<Item = N>,
        edges: impl IntoIterator<Item = (N, N)>,
        heads: impl IntoIterator<Item = N>,
        tails: impl IntoIterator<Item = N>,
    ) -> Result<Self, FlowGraphError> {
        let heads: Vec<_> = heads.into_iter().collect();
        let tails: Vec<_> = tails.into_iter().collect();
        Self::build(nodes, edges, Some((heads, tails)))
    }

    fn build(
        nodes: impl IntoIterator<Item = N>,
        edges: impl IntoIterator<Item = (N, N)>,
        boundaries: Option<(Vec<N>, Vec<N>)>,
    ) -> Result<Self, FlowGraphError> {
        let mut graph = DiGraph::new();
        let mut index_of = HashMap::new();
        for node in nodes {
            let idx = graph.add_node(node.clone());
            if index_of.insert(node.clone(), idx).is_some() {
                return Err(FlowGraphError::DuplicateNode(format!("{node:?}")));
            }
        }
        let mut seen = HashSet::new();
        for (source, target) in edges {
            let source_idx = *index_of
                .get(&source)
                .ok_or_else(|| FlowGraphError::UnknownEndpoint(format!("{source:?}")))?;
            let target_idx = *index_of
                .get(&target)
                .ok_or_else(|| FlowGraphError::UnknownEndpoint(format!("{target:?}")))?;
            if !seen.insert((source_idx, target_idx)) {
                return Err(FlowGraphError::DuplicateEdge(format!(
                    "{source:?} -> {target:?}"
                )));
            }
            graph.add_edge(source_idx, target_idx, ());
        }

        let (heads, tails) = match boundaries {
            Some((heads, tails)) => {
                let resolve = |nodes: Vec<N>| {
                    nodes
                        .into_iter()
                        .map(|n| {
                            index_of
                                .get(&n)
                                .copied()
                                .ok_or_else(|| FlowGraphError::UnknownBoundary(format!("{n:?}")))
                        })
                        .collect::<Result<Vec<_>, _>>()
                };
                (resolve(heads)?, resolve(tails)?)
            }
            None => {
                let without = |direction: EdgeDirection| {
                    graph
                        .node_indices()
                        .filter(|&idx| graph.neighbors_directed(idx, direction).next().is_none())
                        .collect::<Vec<_>>()
                };
                (
                    without(EdgeDirection::Incoming),
                    without(EdgeDirection::Outgoing),
                )
            }
        };

        let forward = Traversal::of(&graph, &heads, graph.node_count());
        let backward = Traversal::of(Reversed(&graph), &tails, graph.node_count());
        Ok(Self {
            graph,
            index_of,
            heads,
            tails,
            forward,
            backward,
        })
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns `true` if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Returns `true` if the given node belongs to the graph.
    #[must_use]
    pub fn contains(&self, node: &N) -> bool {
        self.index_of.contains_key(node)
    }

    /// Returns an iterator over the nodes.
    pub fn nodes(&self) -> impl Iterator<Item = &N> {
        self.graph.node_weights()
    }

    /// Returns an iterator over the predecessors of the given node.
    pub fn predecessors(&self, node: &N) -> impl Iterator<Item = &N> {
        self.neighbors(node, EdgeDirection::Incoming)
    }

    /// Returns an iterator over the successors of the given node.
    pub fn successors(&self, node: &N) -> impl Iterator<Item = &N> {
        self.neighbors(node, EdgeDirection::Outgoing)
    }

    /// Returns an iterator over the entry nodes.
    pub fn heads(&self) -> impl Iterator<Item = &N> {
        self.heads.iter().map(|&idx| &self.graph[idx])
    }

    /// Returns an iterator over the exit nodes.
    pub fn tails(&self) -> impl Iterator<Item = &N> {
        self.tails.iter().map(|&idx| &self.graph[idx])
    }

    fn neighbors(&self, node: &N, direction: EdgeDirection) -> impl Iterator<Item = &N> {
        self.index_of
            .get(node)
            .into_iter()
            .flat_map(move |&idx| self.graph.neighbors_directed(idx, direction))
            .map(|idx| &self.graph[idx])
    }

    fn traversal(&self, direction: Direction) -> &Traversal {
        match direction {
            Direction::Forward => &self.forward,
            Direction::Backward => &self.backward,
        }
    }

    /// The nodes where the boundary value is placed at context creation.
    pub(crate) fn entries(&self, direction: Direction) -> impl Iterator<Item = &N> {
        let boundary = match direction {
            Direction::Forward => &self.heads,
            Direction::Backward => &self.tails,
        };
        boundary.iter().map(|&idx| &self.graph[idx])
    }

    /// The nodes whose values fold into the boundary value on stabilisation.
    pub(crate) fn exits(&self, direction: Direction) -> impl Iterator<Item = &N> {
        self.entries(direction.reversed())
    }

    pub(crate) fn is_exit(&self, direction: Direction, node: &N) -> bool {
        let boundary = match direction {
            Direction::Forward => &self.tails,
            Direction::Backward => &self.heads,
        };
        self.index_of
            .get(node)
            .is_some_and(|idx| boundary.contains(idx))
    }

    /// Neighbours whose values flow into the given node.
    pub(crate) fn flows_from(&self, direction: Direction, node: &N) -> impl Iterator<Item = &N> {
        let edge_direction = match direction {
            Direction::Forward => EdgeDirection::Incoming,
            Direction::Backward => EdgeDirection::Outgoing,
        };
        self.neighbors(node, edge_direction)
    }

    /// Neighbours the given node's value flows into.
    pub(crate) fn flows_into(&self, direction: Direction, node: &N) -> impl Iterator<Item = &N> {
        self.flows_from(direction.reversed(), node)
    }

    /// The reverse-postorder rank of the given node in the given direction.
    ///
    /// # Panics
    /// Panics if the node does not belong to the graph.
    pub(crate) fn rank(&self, direction: Direction, node: &N) -> u32 {
        let idx = self.index_of[node];
        self.traversal(direction).rank_of[idx.index()]
    }

    /// The node with the given reverse-postorder rank.
    pub(crate) fn node_at(&self, direction: Direction, rank: u32) -> &N {
        let idx = self.traversal(direction).by_rank[rank as usize];
        &self.graph[idx]
    }
}

impl Traversal {
    /// Ranks all nodes in reverse postorder from the given start nodes.
    ///
    /// Nodes unreachable from the starts are ranked after the reachable
    /// ones, in index order.
    fn of<G>(graph: G, starts: &[NodeIndex], node_count: usize) -> Self
    where
        G: GraphRef + IntoNeighbors<NodeId = NodeIndex> + Visitable<NodeId = NodeIndex>,
    {
        let mut postorder = Vec::new();
        let mut starts = starts.iter().copied();
        if let Some(first) = starts.next() {
            let mut dfs = DfsPostOrder::new(graph, first);
            while let Some(idx) = dfs.next(graph) {
                postorder.push(idx);
            }
            for start in starts {
                dfs.move_to(start);
                while let Some(idx) = dfs.next(graph) {
                    postorder.push(idx);
                }
            }
        }
        let mut ranked = Self {
            rank_of: vec![u32::MAX; node_count],
            by_rank: Vec::with_capacity(node_count),
        };
        for idx in postorder.into_iter().rev() {
            ranked.push(idx);
        }
        for idx in (0..node_count).map(NodeIndex::new) {
            if ranked.rank_of[idx.index()] == u32::MAX {
                ranked.push(idx);
            }
        }
        ranked
    }

    fn push(&mut self, idx: NodeIndex) {
        debug_assert_eq!(self.rank_of[idx.index()], u32::MAX);
        self.rank_of[idx.index()] = u32::try_from(self.by_rank.len()).expect("rank overflow");
        self.by_rank.push(idx);
    }
}
