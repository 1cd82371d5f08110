//! The bidirectional index from call sites to callee contexts.

use std::{
    collections::{HashMap, HashSet},
    fmt::Debug,
    hash::Hash,
};

use crate::context::ContextId;

/// A call site: a call node within the context it was reached from.
///
/// Call sites are unique across a run — the same call node reached under
/// two different contexts of its method forms two different call sites.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
#[display("{context}@{node:?}")]
pub struct CallSite<N: Debug> {
    context: ContextId,
    node: N,
}

impl<N: Debug> CallSite<N> {
    pub(crate) const fn new(context: ContextId, node: N) -> Self {
        Self { context, node }
    }

    /// The context the call was made from.
    #[must_use]
    pub const fn context(&self) -> ContextId {
        self.context
    }

    /// The call node.
    #[must_use]
    pub const fn node(&self) -> &N {
        &self.node
    }
}

/// Records which callee context every call site transitioned to, and the
/// reverse: which call sites are waiting on a context.
///
/// The two directions are kept exactly consistent: a call site appears in
/// [`callers`](Self::callers) of a context if and only if
/// [`targets`](Self::targets) maps the site to that context for some
/// method. Call sites whose targets cannot be resolved are set aside as
/// *default* sites and carry no transitions.
#[derive(Debug)]
pub struct TransitionTable<M, N: Debug> {
    transitions: HashMap<CallSite<N>, HashMap<M, ContextId>>,
    callers: HashMap<ContextId, HashSet<CallSite<N>>>,
    call_sites_of: HashMap<ContextId, HashSet<CallSite<N>>>,
    default_sites: HashSet<CallSite<N>>,
}

impl<M, N: Debug> Default for TransitionTable<M, N> {
    fn default() -> Self {
        Self {
            transitions: HashMap::new(),
            callers: HashMap::new(),
            call_sites_of: HashMap::new(),
            default_sites: HashSet::new(),
        }
    }
}

impl<M, N> TransitionTable<M, N>
where
    M: Clone + Eq + Hash,
    N: Clone + Eq + Hash + Debug,
{
    /// Records that `site` transitions to the context `callee` analysing
    /// `method`. A site holds at most one callee context per target method;
    /// re-recording replaces the previous context and drops its stale
    /// reverse entry.
    pub(crate) fn record(&mut self, site: CallSite<N>, method: M, callee: ContextId) {
        let targets = self.transitions.entry(site.clone()).or_default();
        if let Some(previous) = targets.insert(method, callee)
            && previous != callee
            && !targets.values().any(|&target| target == previous)
        {
            Self::unlink(&mut self.callers, previous, &site);
        }
        self.callers.entry(callee).or_default().insert(site.clone());
        self.call_sites_of
            .entry(site.context())
            .or_default()
            .insert(site);
    }

    /// Marks `site` as a default site: its targets are unknown and no
    /// callee context exists for it. Prior transitions from the site are
    /// removed.
    pub(crate) fn mark_default(&mut self, site: CallSite<N>) {
        if let Some(targets) = self.transitions.remove(&site) {
            let stale: HashSet<_> = targets.into_values().collect();
            for callee in stale {
                Self::unlink(&mut self.callers, callee, &site);
            }
        }
        Self::unlink(&mut self.call_sites_of, site.context(), &site);
        self.default_sites.insert(site);
    }

    fn unlink(
        index: &mut HashMap<ContextId, HashSet<CallSite<N>>>,
        key: ContextId,
        site: &CallSite<N>,
    ) {
        if let Some(sites) = index.get_mut(&key) {
            sites.remove(site);
            if sites.is_empty() {
                index.remove(&key);
            }
        }
    }

    /// The callee context per target method of the given call site.
    #[must_use]
    pub fn targets(&self, site: &CallSite<N>) -> Option<&HashMap<M, ContextId>> {
        self.transitions.get(site)
    }

    /// The call sites that transitioned into the given context.
    #[must_use]
    pub fn callers(&self, context: ContextId) -> Option<&HashSet<CallSite<N>>> {
        self.callers.get(&context)
    }

    /// The outgoing call sites of the given context.
    #[must_use]
    pub fn call_sites_of(&self, context: ContextId) -> Option<&HashSet<CallSite<N>>> {
        self.call_sites_of.get(&context)
    }

    /// Whether the given call site was marked default.
    #[must_use]
    pub fn is_default(&self, site: &CallSite<N>) -> bool {
        self.default_sites.contains(site)
    }

    /// An iterator over the default call sites.
    pub fn default_sites(&self) -> impl Iterator<Item = &CallSite<N>> {
        self.default_sites.iter()
    }

    /// The contexts transitively reachable from `start` through recorded
    /// transitions. `start` itself is reported only when it lies on a
    /// cycle. Contexts for which `skip` returns `true` are neither reported
    /// nor traversed through.
    pub fn reachable_from(
        &self,
        start: ContextId,
        skip: impl Fn(ContextId) -> bool,
    ) -> HashSet<ContextId> {
        let mut reached = HashSet::new();
        let mut pending = vec![start];
        while let Some(context) = pending.pop() {
            let Some(sites) = self.call_sites_of.get(&context) else {
                continue;
            };
            for site in sites {
                let Some(targets) = self.transitions.get(site) else {
                    continue;
                };
                for &callee in targets.values() {
                    if !skip(callee) && reached.insert(callee) {
                        pending.push(callee);
                    }
                }
            }
        }
        reached
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site(context: usize, node: u32) -> CallSite<u32> {
        CallSite::new(ContextId(context), node)
    }

    #[test]
    fn transitions_and_callers_stay_consistent() {
        let mut table = TransitionTable::default();
        table.record(site(0, 7), "f", ContextId(1));
        table.record(site(0, 9), "g", ContextId(2));

        assert_eq!(table.targets(&site(0, 7)).unwrap()["f"], ContextId(1));
        assert!(table.callers(ContextId(1)).unwrap().contains(&site(0, 7)));
        assert_eq!(table.call_sites_of(ContextId(0)).unwrap().len(), 2);
        assert!(table.callers(ContextId(0)).is_none());
    }

    #[test]
    fn rebinding_drops_the_stale_reverse_entry() {
        let mut table = TransitionTable::default();
        table.record(site(0, 7), "f", ContextId(1));
        table.record(site(0, 7), "f", ContextId(2));

        assert_eq!(table.targets(&site(0, 7)).unwrap()["f"], ContextId(2));
        assert!(table.callers(ContextId(1)).is_none());
        assert!(table.callers(ContextId(2)).unwrap().contains(&site(0, 7)));
    }

    #[test]
    fn rebinding_keeps_the_entry_shared_with_another_method() {
        // The same site maps two target methods onto the same context (as a
        // degenerate resolver might); re-binding one must keep the other.
        let mut table = TransitionTable::default();
        table.record(site(0, 7), "f", ContextId(1));
        table.record(site(0, 7), "g", ContextId(1));
        table.record(site(0, 7), "f", ContextId(2));

        assert!(table.callers(ContextId(1)).unwrap().contains(&site(0, 7)));
        assert!(table.callers(ContextId(2)).unwrap().contains(&site(0, 7)));
    }

    #[test]
    fn default_sites_carry_no_transitions() {
        let mut table = TransitionTable::default();
        table.record(site(0, 7), "f", ContextId(1));
        table.mark_default(site(0, 7));

        assert!(table.is_default(&site(0, 7)));
        assert!(table.targets(&site(0, 7)).is_none());
        assert!(table.callers(ContextId(1)).is_none());
        assert!(table.call_sites_of(ContextId(0)).is_none());
        assert_eq!(table.default_sites().count(), 1);
    }

    #[test]
    fn reachability_follows_transitions() {
        let mut table = TransitionTable::default();
        table.record(site(0, 1), "f", ContextId(1));
        table.record(site(1, 2), "g", ContextId(2));
        table.record(site(3, 4), "h", ContextId(4));

        let reached = table.reachable_from(ContextId(0), |_| false);
        assert_eq!(reached, [ContextId(1), ContextId(2)].into_iter().collect());
    }

    #[test]
    fn reachability_reports_the_start_on_a_cycle() {
        let mut table = TransitionTable::default();
        table.record(site(0, 1), "f", ContextId(1));
        table.record(site(1, 2), "g", ContextId(0));

        let reached = table.reachable_from(ContextId(0), |_| false);
        assert!(reached.contains(&ContextId(0)));
    }

    #[test]
    fn reachability_skips_filtered_contexts() {
        let mut table = TransitionTable::default();
        table.record(site(0, 1), "f", ContextId(1));
        table.record(site(1, 2), "g", ContextId(2));

        let reached = table.reachable_from(ContextId(0), |context| context == ContextId(1));
        assert!(reached.is_empty());
    }
}
