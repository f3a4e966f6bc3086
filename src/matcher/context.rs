//! Match contexts: the scope of one pattern-graph level.
//!
//! Contexts nest through parent pointers; lookups walk the chain. A context
//! created for a speculative attempt (an alternation alternative, a
//! repetition iteration) is simply dropped on failure, discarding its
//! trackers. Promotion merges a child's tracker map into its parent without
//! cloning tracker state: trackers are shared `Rc<RefCell<_>>` values, so a
//! tracker mutated after promotion is mutated everywhere it is referenced.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::graph::HostGraph;
use crate::pattern::{GraphId, NodeId};

use super::tracker::TrackerRef;

/// `graph port -> (operator, interior port)`: operator endpoints standing in
/// for a graph's exterior ports.
pub(crate) type PortMap<G> = BTreeMap<usize, (<G as HostGraph>::Op, usize)>;

/// Scope for matching one pattern-graph level.
pub(crate) struct MatchContext<'a, G: HostGraph> {
    parent: Option<&'a MatchContext<'a, G>>,
    /// The pattern node this context scopes, if any (a graph, alternation or
    /// repetition node).
    pub(crate) node: Option<NodeId>,
    /// The graph body scoped by this context, when `node` is a graph node.
    pub(crate) graph: Option<GraphId>,
    state: RefCell<ContextState<G>>,
}

struct ContextState<G: HostGraph> {
    ops_to_visit: VecDeque<G::Op>,
    trackers: HashMap<G::Op, TrackerRef>,
    /// Insertion order of `trackers`, for deterministic reporting.
    claim_order: Vec<G::Op>,
    unhandled_nodes: HashSet<NodeId>,
    in_port_map: PortMap<G>,
    out_port_map: PortMap<G>,
}

impl<G: HostGraph> Default for ContextState<G> {
    fn default() -> Self {
        Self {
            ops_to_visit: VecDeque::new(),
            trackers: HashMap::new(),
            claim_order: Vec::new(),
            unhandled_nodes: HashSet::new(),
            in_port_map: BTreeMap::new(),
            out_port_map: BTreeMap::new(),
        }
    }
}

impl<'a, G: HostGraph> MatchContext<'a, G> {
    /// The global scope backing a whole match attempt.
    pub(crate) fn root() -> Self {
        Self {
            parent: None,
            node: None,
            graph: None,
            state: RefCell::new(ContextState::default()),
        }
    }

    /// A scope for matching the body of graph `graph`, wrapped by pattern
    /// node `node`. All children start out unhandled.
    pub(crate) fn for_graph(
        parent: &'a MatchContext<'a, G>,
        node: NodeId,
        graph: GraphId,
        children: impl IntoIterator<Item = NodeId>,
    ) -> Self {
        let mut state = ContextState::default();
        state.unhandled_nodes.extend(children);
        Self {
            parent: Some(parent),
            node: Some(node),
            graph: Some(graph),
            state: RefCell::new(state),
        }
    }

    /// A staging scope (repetition bookkeeping, per-iteration scratch).
    pub(crate) fn staging(parent: &'a MatchContext<'a, G>, node: Option<NodeId>) -> Self {
        Self {
            parent: Some(parent),
            node,
            graph: None,
            state: RefCell::new(ContextState::default()),
        }
    }

    pub(crate) fn parent(&self) -> Option<&'a MatchContext<'a, G>> {
        self.parent
    }

    /// Find the tracker claiming `op`, walking the context chain.
    pub(crate) fn find_tracker(&self, op: G::Op) -> Option<TrackerRef> {
        let mut ctx = Some(self);
        while let Some(c) = ctx {
            if let Some(t) = c.state.borrow().trackers.get(&op) {
                return Some(t.clone());
            }
            ctx = c.parent;
        }
        None
    }

    /// Record a fresh tracker in this scope.
    pub(crate) fn insert_tracker(&self, op: G::Op, tracker: TrackerRef) {
        let mut state = self.state.borrow_mut();
        if state.trackers.insert(op, tracker).is_none() {
            state.claim_order.push(op);
        }
    }

    /// Merge `child`'s trackers into this scope, keeping existing claims.
    pub(crate) fn merge_trackers(&self, child: &MatchContext<'_, G>) {
        let child_state = child.state.borrow();
        let mut state = self.state.borrow_mut();
        for &op in &child_state.claim_order {
            if let Some(t) = child_state.trackers.get(&op) {
                if !state.trackers.contains_key(&op) {
                    state.trackers.insert(op, t.clone());
                    state.claim_order.push(op);
                }
            }
        }
    }

    pub(crate) fn claim_order(&self) -> Vec<G::Op> {
        self.state.borrow().claim_order.clone()
    }

    pub(crate) fn enqueue(&self, op: G::Op) {
        self.state.borrow_mut().ops_to_visit.push_back(op);
    }

    pub(crate) fn pop_op(&self) -> Option<G::Op> {
        self.state.borrow_mut().ops_to_visit.pop_front()
    }

    pub(crate) fn remove_unhandled(&self, node: NodeId) {
        self.state.borrow_mut().unhandled_nodes.remove(&node);
    }

    pub(crate) fn unhandled_nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<_> = self
            .state
            .borrow()
            .unhandled_nodes
            .iter()
            .copied()
            .collect();
        nodes.sort_unstable();
        nodes
    }

    /// Record an input pad endpoint. Existing entries win, like the rest of
    /// the context merges.
    pub(crate) fn set_in_port(&self, graph_port: usize, entry: (G::Op, usize)) {
        self.state
            .borrow_mut()
            .in_port_map
            .entry(graph_port)
            .or_insert(entry);
    }

    pub(crate) fn set_out_port(&self, graph_port: usize, entry: (G::Op, usize)) {
        self.state
            .borrow_mut()
            .out_port_map
            .entry(graph_port)
            .or_insert(entry);
    }

    pub(crate) fn get_in_port(&self, graph_port: usize) -> Option<(G::Op, usize)> {
        self.state.borrow().in_port_map.get(&graph_port).copied()
    }

    pub(crate) fn get_out_port(&self, graph_port: usize) -> Option<(G::Op, usize)> {
        self.state.borrow().out_port_map.get(&graph_port).copied()
    }

    pub(crate) fn in_port_map(&self) -> PortMap<G> {
        self.state.borrow().in_port_map.clone()
    }

    pub(crate) fn out_port_map(&self) -> PortMap<G> {
        self.state.borrow().out_port_map.clone()
    }

    /// Merge `entries` into the input pad map, keeping existing entries.
    pub(crate) fn merge_in_port_map(&self, entries: &PortMap<G>) {
        let mut state = self.state.borrow_mut();
        for (&k, &v) in entries {
            state.in_port_map.entry(k).or_insert(v);
        }
    }

    pub(crate) fn merge_out_port_map(&self, entries: &PortMap<G>) {
        let mut state = self.state.borrow_mut();
        for (&k, &v) in entries {
            state.out_port_map.entry(k).or_insert(v);
        }
    }

    /// Replace the input pad map wholesale (repetition tail updates).
    pub(crate) fn replace_in_port_map(&self, entries: PortMap<G>) {
        self.state.borrow_mut().in_port_map = entries;
    }

    pub(crate) fn replace_out_port_map(&self, entries: PortMap<G>) {
        self.state.borrow_mut().out_port_map = entries;
    }
}
