//! The interprocedural fixpoint driver.

use std::{
    collections::{BTreeSet, HashMap, hash_map::Entry},
    fmt,
    rc::Rc,
};

use itertools::Itertools;

use crate::{
    context::{Context, ContextId, WorkItem},
    graph::FlowGraph,
    lattice::MeetSemiLattice,
    problem::{DataflowProblem, Direction},
    program::{CallTargets, Program},
    transition::{CallSite, TransitionTable},
};

/// A context-free projection of a context-sensitive analysis result: for
/// every node, the meet of its values over all contexts containing it.
#[derive(Debug)]
pub struct DataflowSolution<N, A> {
    before: HashMap<N, A>,
    after: HashMap<N, A>,
}

impl<N, A> DataflowSolution<N, A>
where
    N: Clone + Eq + std::hash::Hash,
{
    /// The merged dataflow value just before the given node.
    #[must_use]
    pub fn value_before(&self, node: &N) -> Option<&A> {
        self.before.get(node)
    }

    /// The merged dataflow value just after the given node.
    #[must_use]
    pub fn value_after(&self, node: &N) -> Option<&A> {
        self.after.get(node)
    }
}

/// The value-context interprocedural fixpoint solver.
///
/// A solver owns the analysis state of one run: the contexts created so
/// far, the transition table relating call sites to callee contexts, and
/// the worklist of contexts with pending nodes. Construct it with a program
/// and a [`DataflowProblem`], run [`solve`](Self::solve), then query the
/// per-context results or project them with
/// [`meet_over_valid_paths`](Self::meet_over_valid_paths).
pub struct Solver<'p, P, D>
where
    P: Program,
    D: DataflowProblem<P>,
{
    program: &'p P,
    problem: D,
    direction: Direction,
    verbose: bool,
    free_results_on_the_fly: bool,
    contexts: Vec<Context<P::Method, P::Node, D::Value>>,
    contexts_of: HashMap<P::Method, Vec<ContextId>>,
    graphs: HashMap<P::Method, Rc<FlowGraph<P::Node>>>,
    transitions: TransitionTable<P::Method, P::Node>,
    worklist: BTreeSet<ContextId>,
}

impl<P, D> fmt::Debug for Solver<'_, P, D>
where
    P: Program,
    D: DataflowProblem<P>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Solver")
            .field("direction", &self.direction)
            .field("contexts", &self.contexts.len())
            .field("pending", &self.worklist.len())
            .finish_non_exhaustive()
    }
}

impl<'p, P, D> Solver<'p, P, D>
where
    P: Program,
    D: DataflowProblem<P>,
{
    /// Creates a solver for the given program and problem.
    pub fn new(program: &'p P, problem: D) -> Self {
        let direction = problem.direction();
        Self {
            program,
            problem,
            direction,
            verbose: false,
            free_results_on_the_fly: false,
            contexts: Vec::new(),
            contexts_of: HashMap::new(),
            graphs: HashMap::new(),
            transitions: TransitionTable::default(),
            worklist: BTreeSet::new(),
        }
    }

    /// Logs every node transfer, not just context lifecycle events.
    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Releases the per-node value tables of a context as soon as no
    /// pending context can reach it again.
    ///
    /// This keeps boundary values and the transition table intact — context
    /// lookups and call-graph queries keep working — but makes
    /// [`meet_over_valid_paths`](Self::meet_over_valid_paths) unusable.
    /// Only analyses that observe transitions or boundary values instead of
    /// per-node results should enable this.
    #[must_use]
    pub fn free_results_on_the_fly(mut self, free: bool) -> Self {
        self.free_results_on_the_fly = free;
        self
    }

    /// The direction of the analysis being solved.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Runs the fixpoint: seeds one context per entry point with its
    /// boundary value, then processes contexts newest-first until no
    /// context has pending nodes. Calling it again is a no-op.
    ///
    /// # Errors
    /// Propagates the first error returned by a transfer function.
    pub fn solve(&mut self) -> Result<(), D::Err> {
        for method in self.program.entry_points() {
            let boundary = self.problem.boundary_value(&method);
            if self.find_context_id(&method, &boundary).is_none() {
                self.create_context(method, boundary);
            }
        }
        while let Some(&id) = self.worklist.last() {
            match self.contexts[id.index()].pop_work() {
                None => {
                    self.contexts[id.index()].mark_analysed();
                    self.worklist.remove(&id);
                }
                Some(WorkItem::Node(rank)) => self.step(id, rank)?,
                Some(WorkItem::Boundary) => self.stabilise(id),
            }
        }
        for context in self.contexts.iter().filter(|it| !it.is_analysed()) {
            log::warn!(
                "{} for {:?} did not stabilise",
                context.id(),
                context.method()
            );
        }
        Ok(())
    }

    /// Processes one node of one context: merges the values flowing in from
    /// its neighbours, applies the matching transfer function, and
    /// propagates onward when the result changed.
    fn step(&mut self, id: ContextId, rank: u32) -> Result<(), D::Err> {
        let direction = self.direction;
        let graph = Rc::clone(self.contexts[id.index()].graph());
        let node = graph.node_at(direction, rank).clone();

        // A node with no incoming values keeps what context creation
        // placed there (the boundary value on entry nodes, top elsewhere).
        let mut sources = graph.flows_from(direction, &node).peekable();
        if sources.peek().is_some() {
            let merged = sources.fold(D::Value::top(), |acc, source| {
                acc.meet(self.contexts[id.index()].outflow(direction, source).clone())
            });
            self.contexts[id.index()].set_inflow(direction, node.clone(), merged);
        }

        let inflow = self.contexts[id.index()].inflow(direction, &node).clone();
        let previous = self.contexts[id.index()].outflow(direction, &node).clone();
        let transferred = if self.program.is_call(&node) {
            self.transfer_call(id, &node, &inflow)?
        } else {
            self.problem
                .normal_flow(&self.contexts[id.index()], &node, &inflow)?
        };
        // The defensive meet masks non-monotone transfers: a node's value
        // never regresses within a context.
        let outflow = transferred.meet(previous.clone());
        if self.verbose {
            log::debug!("{id} {node:?}: {inflow:?} -> {outflow:?}");
        }
        self.contexts[id.index()].set_outflow(direction, node.clone(), outflow.clone());

        if outflow != previous {
            let pending: Vec<u32> = graph
                .flows_into(direction, &node)
                .map(|target| graph.rank(direction, target))
                .collect();
            for target in pending {
                self.contexts[id.index()].push_work(WorkItem::Node(target));
            }
        }
        if graph.is_exit(direction, &node) {
            self.contexts[id.index()].push_work(WorkItem::Boundary);
        }
        Ok(())
    }

    /// Transfer for a call node: one callee context per resolved target,
    /// met with the local flow; unresolved calls become default sites and
    /// keep the local flow only.
    fn transfer_call(
        &mut self,
        id: ContextId,
        node: &P::Node,
        inflow: &D::Value,
    ) -> Result<D::Value, D::Err> {
        let direction = self.direction;
        let caller = self.contexts[id.index()].method().clone();
        let site = CallSite::new(id, node.clone());
        let targets = match self.program.call_targets(&caller, node) {
            CallTargets::Resolved(targets) => targets,
            CallTargets::Unknown => {
                log::debug!("{site} has unresolvable targets");
                self.transitions.mark_default(site);
                return self
                    .problem
                    .call_local_flow(&self.contexts[id.index()], node, inflow);
            }
        };

        let mut outflow = D::Value::top();
        for method in targets {
            if self.program.is_phantom(&method) {
                continue;
            }
            let key = match direction {
                Direction::Forward => {
                    self.problem
                        .call_entry_flow(&self.contexts[id.index()], &method, node, inflow)?
                }
                Direction::Backward => {
                    self.problem
                        .call_exit_flow(&self.contexts[id.index()], &method, node, inflow)?
                }
            };
            let callee = self
                .find_context_id(&method, &key)
                .unwrap_or_else(|| self.create_context(method.clone(), key));
            self.transitions.record(site.clone(), method.clone(), callee);
            if self.contexts[callee.index()].is_analysed() {
                let boundary = self.contexts[callee.index()].result_value(direction).clone();
                let returned = match direction {
                    Direction::Forward => self.problem.call_exit_flow(
                        &self.contexts[id.index()],
                        &method,
                        node,
                        &boundary,
                    )?,
                    Direction::Backward => self.problem.call_entry_flow(
                        &self.contexts[id.index()],
                        &method,
                        node,
                        &boundary,
                    )?,
                };
                outflow = outflow.meet(returned);
            }
        }
        let local = self
            .problem
            .call_local_flow(&self.contexts[id.index()], node, inflow)?;
        Ok(outflow.meet(local))
    }

    /// Recomputes a context's far-side boundary value once every path has
    /// reached the method end, and wakes the call sites waiting on it.
    fn stabilise(&mut self, id: ContextId) {
        let direction = self.direction;
        let graph = Rc::clone(self.contexts[id.index()].graph());
        let boundary = graph.exits(direction).fold(D::Value::top(), |acc, exit| {
            acc.meet(self.contexts[id.index()].outflow(direction, exit).clone())
        });

        let context = &mut self.contexts[id.index()];
        let first = !context.is_analysed();
        let changed = context.result_value(direction) != &boundary;
        log::debug!(
            "{id} for {:?} stabilised at {boundary:?}",
            context.method()
        );
        context.set_result_value(direction, boundary);
        context.mark_analysed();

        // An unchanged boundary value carries no new information to the
        // callers; re-waking them would re-schedule a self-caller forever.
        if first || changed {
            let waiting: Vec<CallSite<P::Node>> = self
                .transitions
                .callers(id)
                .into_iter()
                .flatten()
                .cloned()
                .collect();
            for site in waiting {
                let caller = site.context();
                debug_assert!(!self.contexts[caller.index()].is_freed());
                let rank = self.contexts[caller.index()]
                    .graph()
                    .rank(direction, site.node());
                self.contexts[caller.index()].push_work(WorkItem::Node(rank));
                self.worklist.insert(caller);
            }
        }

        if self.free_results_on_the_fly {
            self.reclaim(id);
        }
    }

    /// Releases the value tables of the stabilised context and everything
    /// it can reach, unless any of that is still pending.
    fn reclaim(&mut self, id: ContextId) {
        let reachable = self
            .transitions
            .reachable_from(id, |context| self.contexts[context.index()].is_freed());
        if reachable.iter().any(|context| self.worklist.contains(context)) {
            return;
        }
        let released: Vec<ContextId> = reachable
            .into_iter()
            .chain([id])
            .filter(|context| !self.contexts[context.index()].is_freed())
            .collect();
        for context in &released {
            self.contexts[context.index()].release_tables();
        }
        log::debug!(
            "released value tables of {} after {id} stabilised",
            released.iter().sorted().join(", ")
        );
    }

    fn create_context(&mut self, method: P::Method, boundary: D::Value) -> ContextId {
        let graph = match self.graphs.get(&method) {
            Some(graph) => Rc::clone(graph),
            None => {
                let graph = Rc::new(self.program.flow_graph(&method));
                self.graphs.insert(method.clone(), Rc::clone(&graph));
                graph
            }
        };
        let id = ContextId(self.contexts.len());
        log::debug!("created {id} for {method:?}");
        self.contexts
            .push(Context::new(id, method.clone(), graph, self.direction, boundary));
        self.contexts_of.entry(method).or_default().push(id);
        self.worklist.insert(id);
        id
    }

    fn find_context_id(&self, method: &P::Method, boundary: &D::Value) -> Option<ContextId> {
        self.contexts_of.get(method)?.iter().copied().find(|&id| {
            self.contexts[id.index()].key_value(self.direction) == boundary
        })
    }

    /// The context with the given id.
    ///
    /// # Panics
    /// Panics if the id does not belong to this solver.
    #[must_use]
    pub fn context(&self, id: ContextId) -> &Context<P::Method, P::Node, D::Value> {
        &self.contexts[id.index()]
    }

    /// The contexts created for the given method, oldest first.
    pub fn contexts_of(
        &self,
        method: &P::Method,
    ) -> impl Iterator<Item = &Context<P::Method, P::Node, D::Value>> {
        self.contexts_of
            .get(method)
            .into_iter()
            .flatten()
            .map(|&id| &self.contexts[id.index()])
    }

    /// The context of the given method keyed by the given boundary value:
    /// its entry value in a forward analysis, its exit value in a backward
    /// one.
    #[must_use]
    pub fn find_context(
        &self,
        method: &P::Method,
        boundary: &D::Value,
    ) -> Option<&Context<P::Method, P::Node, D::Value>> {
        self.find_context_id(method, boundary)
            .map(|id| &self.contexts[id.index()])
    }

    /// The methods at least one context was created for.
    pub fn methods(&self) -> impl Iterator<Item = &P::Method> {
        self.contexts_of.keys()
    }

    /// The call sites that transitioned into the given context.
    pub fn callers(&self, id: ContextId) -> impl Iterator<Item = &CallSite<P::Node>> {
        self.transitions.callers(id).into_iter().flatten()
    }

    /// The callee context per target method of the given call site.
    #[must_use]
    pub fn targets(&self, site: &CallSite<P::Node>) -> Option<&HashMap<P::Method, ContextId>> {
        self.transitions.targets(site)
    }

    /// The table relating call sites to callee contexts.
    #[must_use]
    pub fn transition_table(&self) -> &TransitionTable<P::Method, P::Node> {
        &self.transitions
    }

    /// Projects the context-sensitive result down to one before and one
    /// after value per node, folding `meet` over all contexts containing
    /// the node.
    ///
    /// # Panics
    /// Panics if any context's value tables have been released (see
    /// [`free_results_on_the_fly`](Self::free_results_on_the_fly)).
    #[must_use]
    pub fn meet_over_valid_paths(&self) -> DataflowSolution<P::Node, D::Value> {
        let mut before = HashMap::new();
        let mut after = HashMap::new();
        for context in &self.contexts {
            assert!(
                !context.is_freed(),
                "cannot project a solution after value tables were released"
            );
            for (node, value) in context.values_before() {
                meet_into(&mut before, node, value);
            }
            for (node, value) in context.values_after() {
                meet_into(&mut after, node, value);
            }
        }
        DataflowSolution { before, after }
    }
}

fn meet_into<N, A>(solution: &mut HashMap<N, A>, node: &N, value: &A)
where
    N: Clone + Eq + std::hash::Hash,
    A: MeetSemiLattice,
{
    match solution.entry(node.clone()) {
        Entry::Occupied(mut entry) => {
            let merged = entry.get().clone().meet(value.clone());
            entry.insert(merged);
        }
        Entry::Vacant(entry) => {
            entry.insert(value.clone());
        }
    }
}
