//! Nested pattern graphs.
//!
//! A pattern is a tree of *pattern nodes*: concrete operator positions
//! ([`PatternKind::Op`]), nested sub-graphs, ordered alternations and bounded
//! repetitions. Nodes live in a single arena owned by [`Pattern`] and refer
//! to each other by [`NodeId`]; graph bodies are side tables keyed by
//! [`GraphId`]. Producer/consumer relations between nodes are stored as
//! `(node, port)` pairs in both directions, as structural relations rather
//! than ownership links.
//!
//! Patterns are built with [`PatternBuilder`] and immutable afterwards.

mod builder;

pub use builder::{in_edge, InEdge, PatternBuilder, PatternError};

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use derive_more::{From, Into};
use smallvec::SmallVec;

use crate::graph::HostGraph;

/// Identifies a pattern node within a [`Pattern`] arena.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
pub struct NodeId(pub usize);

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Identifies a graph body within a [`Pattern`] arena.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
pub struct GraphId(pub usize);

impl fmt::Debug for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// A decision predicate evaluated against a candidate operator.
pub type DecisionFn<G> = Arc<dyn Fn(&G, <G as HostGraph>::Op) -> bool>;

/// The producing end of a pattern edge: `(node, output port)`.
pub type Producer = (NodeId, usize);

/// The consuming end of a pattern edge: `(node, input port)`.
pub type Consumer = (NodeId, usize);

/// The four kinds of pattern node.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PatternKind {
    /// A concrete operator position, matched by decision predicates.
    Op,
    /// A nested sub-graph.
    Graph,
    /// An ordered list of alternative sub-graphs.
    Alternation,
    /// A sub-graph body repeated a bounded number of times.
    Repetition,
}

pub(crate) struct PatternNode<G: HostGraph> {
    pub(crate) name: String,
    /// Declared producers, keyed by input port.
    pub(crate) inputs: BTreeMap<usize, Producer>,
    /// Declared consumers, keyed by output port.
    pub(crate) outputs: BTreeMap<usize, SmallVec<[Consumer; 2]>>,
    pub(crate) kind: NodeKind<G>,
}

pub(crate) enum NodeKind<G: HostGraph> {
    Op(OpPattern<G>),
    Graph(GraphId),
    Alternation(Vec<GraphId>),
    Repetition(RepetitionPattern),
}

pub(crate) struct OpPattern<G: HostGraph> {
    pub(crate) predicates: Vec<DecisionFn<G>>,
    /// Two input ports whose constraints may bind to either operand.
    pub(crate) commutative_pair: Option<(usize, usize)>,
    /// Input ports that may stay unhandled even when their producer is
    /// another matched operator.
    pub(crate) allowed_internal_inputs: BTreeSet<usize>,
    /// Output ports that may feed operators outside the match.
    pub(crate) allowed_external_outputs: BTreeSet<usize>,
}

pub(crate) struct RepetitionPattern {
    pub(crate) body: GraphId,
    /// How body instances chain: `(body output port, body input port)`.
    pub(crate) port_map: SmallVec<[(usize, usize); 2]>,
    pub(crate) min_rep: usize,
    pub(crate) max_rep: usize,
}

pub(crate) struct GraphBody {
    /// The wrapper node exposing this body as a pattern node.
    pub(crate) node: NodeId,
    /// Child nodes, in declaration order.
    pub(crate) nodes: Vec<NodeId>,
    /// Graph input port -> interior consumers.
    pub(crate) inner_consumers: BTreeMap<usize, SmallVec<[Consumer; 1]>>,
    /// Graph output port -> interior producer.
    pub(crate) inner_producers: BTreeMap<usize, Producer>,
}

/// An immutable nested pattern graph.
///
/// Construct with [`Pattern::builder`]. The generic parameter ties the
/// pattern's decision predicates to a host graph type.
pub struct Pattern<G: HostGraph> {
    pub(crate) nodes: Vec<PatternNode<G>>,
    pub(crate) graphs: Vec<GraphBody>,
    pub(crate) root: GraphId,
}

impl<G: HostGraph> Pattern<G> {
    /// Start building a pattern.
    pub fn builder() -> PatternBuilder<G> {
        PatternBuilder::new()
    }

    /// The wrapper node of the top-level graph.
    pub fn root(&self) -> NodeId {
        self.graphs[self.root.0].node
    }

    /// The kind of `node`.
    pub fn kind(&self, node: NodeId) -> PatternKind {
        match self.node(node).kind {
            NodeKind::Op(_) => PatternKind::Op,
            NodeKind::Graph(_) => PatternKind::Graph,
            NodeKind::Alternation(_) => PatternKind::Alternation,
            NodeKind::Repetition(_) => PatternKind::Repetition,
        }
    }

    /// The debug name of `node`.
    pub fn name(&self, node: NodeId) -> &str {
        &self.node(node).name
    }

    /// Number of nodes in the arena, across all nesting levels.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn node(&self, id: NodeId) -> &PatternNode<G> {
        &self.nodes[id.0]
    }

    pub(crate) fn graph(&self, id: GraphId) -> &GraphBody {
        &self.graphs[id.0]
    }

    /// The wrapper node of graph body `id`.
    pub(crate) fn graph_node(&self, id: GraphId) -> NodeId {
        self.graphs[id.0].node
    }

    pub(crate) fn is_op(&self, id: NodeId) -> bool {
        matches!(self.node(id).kind, NodeKind::Op(_))
    }

    pub(crate) fn as_op(&self, id: NodeId) -> Option<&OpPattern<G>> {
        match &self.node(id).kind {
            NodeKind::Op(op) => Some(op),
            _ => None,
        }
    }

    pub(crate) fn as_graph(&self, id: NodeId) -> Option<GraphId> {
        match self.node(id).kind {
            NodeKind::Graph(g) => Some(g),
            _ => None,
        }
    }

    pub(crate) fn as_alternation(&self, id: NodeId) -> Option<&[GraphId]> {
        match &self.node(id).kind {
            NodeKind::Alternation(alts) => Some(alts),
            _ => None,
        }
    }

    pub(crate) fn as_repetition(&self, id: NodeId) -> Option<&RepetitionPattern> {
        match &self.node(id).kind {
            NodeKind::Repetition(rep) => Some(rep),
            _ => None,
        }
    }

    /// The declared producer feeding input `port` of `node`.
    pub(crate) fn producer(&self, node: NodeId, port: usize) -> Option<&Producer> {
        self.node(node).inputs.get(&port)
    }

    /// The declared consumers on output `port` of `node`.
    pub(crate) fn consumers(&self, node: NodeId, port: usize) -> Option<&[Consumer]> {
        self.node(node).outputs.get(&port).map(|v| v.as_slice())
    }
}

impl<G: HostGraph> fmt::Debug for Pattern<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pattern")
            .field("nodes", &self.nodes.len())
            .field("graphs", &self.graphs.len())
            .field("root", &self.root)
            .finish()
    }
}
