//! Bindings: directives pairing an operator position with a pattern position.

use crate::graph::HostGraph;
use crate::pattern::NodeId;

/// Which side of the pattern node a binding attaches to.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum BindKind {
    /// Seed binding; `forward` selects the first or last node of a graph.
    Root {
        /// Match in declaration order (`true`) or from the last node.
        forward: bool,
    },
    /// The operator consumes from a neighbor already matched upstream.
    In,
    /// The operator produces into a neighbor already matched downstream.
    Out,
}

impl BindKind {
    pub(crate) fn is_forward(&self) -> bool {
        matches!(self, BindKind::Root { forward: true } | BindKind::In)
    }
}

/// Directs the matcher to pair `op` (at `op_port`) with pattern `node`
/// (at `pattern_port`).
///
/// `consumer_index` selects which consumer slot on the producer's output
/// value the binding refers to; it is meaningful for [`BindKind::Out`] only.
pub(crate) struct Binding<G: HostGraph> {
    pub(crate) kind: BindKind,
    pub(crate) op: G::Op,
    pub(crate) op_port: usize,
    pub(crate) node: NodeId,
    pub(crate) pattern_port: usize,
    pub(crate) consumer_index: usize,
}

impl<G: HostGraph> Binding<G> {
    pub(crate) fn root(op: G::Op, node: NodeId, forward: bool) -> Self {
        Self {
            kind: BindKind::Root { forward },
            op,
            op_port: 0,
            node,
            pattern_port: 0,
            consumer_index: 0,
        }
    }
}

impl<G: HostGraph> Clone for Binding<G> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<G: HostGraph> Copy for Binding<G> {}
