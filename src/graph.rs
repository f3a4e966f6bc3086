//! The read-only query surface of the host operator graph.
//!
//! The matcher never owns or mutates the graph it matches on. Everything it
//! needs is expressed as queries on operator and value identifiers: port
//! counts, the value at each port, and producer/consumer relations on values.
//! Implement [`HostGraph`] for your graph representation to make it
//! matchable; [`crate::concrete::OpDag`] is a ready-made arena implementation.

use std::fmt::Debug;
use std::hash::Hash;

/// An operator graph that patterns can be matched on.
///
/// Operators and values are identified by cheap copyable ids. A value has
/// exactly one producer `(op, output port)` — or none, for graph inputs — and
/// an ordered list of consumers `(op, input port)`. The position of a
/// consumer in that list is its *consumer index*, the stable identifier used
/// by the matcher's bookkeeping; implementations must keep the order stable
/// for the duration of a match.
pub trait HostGraph {
    /// Operator identifier.
    type Op: Copy + Eq + Hash + Debug;
    /// Value (edge carrier) identifier.
    type Value: Copy + Eq + Hash + Debug;

    /// All operators of the graph, in a stable order.
    fn ops(&self) -> impl Iterator<Item = Self::Op> + '_;

    /// Number of input ports of `op`.
    fn num_inputs(&self, op: Self::Op) -> usize;

    /// Number of output ports of `op`.
    fn num_outputs(&self, op: Self::Op) -> usize;

    /// The value consumed by `op` at input `port`, if connected.
    fn input_value(&self, op: Self::Op, port: usize) -> Option<Self::Value>;

    /// The value produced by `op` at output `port`.
    fn output_value(&self, op: Self::Op, port: usize) -> Option<Self::Value>;

    /// The producer of `value`, or `None` for graph inputs.
    fn producer(&self, value: Self::Value) -> Option<(Self::Op, usize)>;

    /// The consumers of `value`, in stable order.
    fn consumers(&self, value: Self::Value) -> Vec<(Self::Op, usize)>;

    /// Number of consumers on output `port` of `op`.
    fn num_output_consumers(&self, op: Self::Op, port: usize) -> usize {
        self.output_value(op, port)
            .map_or(0, |v| self.consumers(v).len())
    }

    /// Whether `op` carries the external "matched" marker.
    ///
    /// The marker is written by the rewriter that consumes matches, never by
    /// the matcher itself. A marked operator is excluded from all further
    /// matching.
    fn is_matched(&self, op: Self::Op) -> bool;

    /// A display name for `op`, used in diagnostics only.
    fn op_name(&self, op: Self::Op) -> String {
        format!("{:?}", op)
    }
}
