//! A simple arena-backed operator DAG.
//!
//! Operators carry a kind string and fixed numbers of input and output
//! ports. Every output port owns one value; inputs are connected to values
//! after the fact, either to another operator's output or to a free-standing
//! source value standing in for a graph input.

use std::fmt;
use std::sync::Arc;

use derive_more::{From, Into};

use crate::graph::HostGraph;
use crate::pattern::DecisionFn;

/// Identifies an operator of an [`OpDag`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
pub struct OpId(pub usize);

impl fmt::Debug for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op{}", self.0)
    }
}

/// Identifies a value of an [`OpDag`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, From, Into)]
pub struct ValueId(pub usize);

impl fmt::Debug for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

struct OpData {
    kind: String,
    inputs: Vec<Option<ValueId>>,
    outputs: Vec<ValueId>,
    matched: bool,
}

struct ValueData {
    producer: Option<(OpId, usize)>,
    consumers: Vec<(OpId, usize)>,
}

/// An arena of operators and values implementing [`HostGraph`].
#[derive(Default)]
pub struct OpDag {
    ops: Vec<OpData>,
    values: Vec<ValueData>,
}

impl OpDag {
    /// An empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an operator with `num_inputs` unconnected inputs and
    /// `num_outputs` fresh output values.
    pub fn add_op(&mut self, kind: impl Into<String>, num_inputs: usize, num_outputs: usize) -> OpId {
        let op = OpId(self.ops.len());
        let outputs = (0..num_outputs)
            .map(|port| {
                let value = ValueId(self.values.len());
                self.values.push(ValueData {
                    producer: Some((op, port)),
                    consumers: Vec::new(),
                });
                value
            })
            .collect();
        self.ops.push(OpData {
            kind: kind.into(),
            inputs: vec![None; num_inputs],
            outputs,
            matched: false,
        });
        op
    }

    /// Add a free-standing value with no producer (a graph input).
    pub fn add_source(&mut self) -> ValueId {
        let value = ValueId(self.values.len());
        self.values.push(ValueData {
            producer: None,
            consumers: Vec::new(),
        });
        value
    }

    /// Connect `value` to input `port` of `op`, appending to the value's
    /// consumer list.
    pub fn connect(&mut self, value: ValueId, op: OpId, port: usize) {
        self.values[value.0].consumers.push((op, port));
        self.ops[op.0].inputs[port] = Some(value);
    }

    /// Connect output `src.1` of `src.0` to input `dst.1` of `dst.0`.
    pub fn wire(&mut self, src: (OpId, usize), dst: (OpId, usize)) {
        let value = self.output_of(src.0, src.1);
        self.connect(value, dst.0, dst.1);
    }

    /// The value produced at output `port` of `op`.
    pub fn output_of(&self, op: OpId, port: usize) -> ValueId {
        self.ops[op.0].outputs[port]
    }

    /// The kind string of `op`.
    pub fn op_kind(&self, op: OpId) -> &str {
        &self.ops[op.0].kind
    }

    /// Set or clear the matched marker of `op`.
    pub fn set_matched(&mut self, op: OpId, matched: bool) {
        self.ops[op.0].matched = matched;
    }
}

impl HostGraph for OpDag {
    type Op = OpId;
    type Value = ValueId;

    fn ops(&self) -> impl Iterator<Item = OpId> + '_ {
        (0..self.ops.len()).map(OpId)
    }

    fn num_inputs(&self, op: OpId) -> usize {
        self.ops.get(op.0).map_or(0, |o| o.inputs.len())
    }

    fn num_outputs(&self, op: OpId) -> usize {
        self.ops.get(op.0).map_or(0, |o| o.outputs.len())
    }

    fn input_value(&self, op: OpId, port: usize) -> Option<ValueId> {
        self.ops.get(op.0)?.inputs.get(port).copied().flatten()
    }

    fn output_value(&self, op: OpId, port: usize) -> Option<ValueId> {
        self.ops.get(op.0)?.outputs.get(port).copied()
    }

    fn producer(&self, value: ValueId) -> Option<(OpId, usize)> {
        self.values.get(value.0)?.producer
    }

    fn consumers(&self, value: ValueId) -> Vec<(OpId, usize)> {
        self.values
            .get(value.0)
            .map_or_else(Vec::new, |v| v.consumers.clone())
    }

    fn is_matched(&self, op: OpId) -> bool {
        self.ops.get(op.0).is_some_and(|o| o.matched)
    }

    fn op_name(&self, op: OpId) -> String {
        self.ops
            .get(op.0)
            .map_or_else(|| format!("{:?}", op), |o| format!("{}_{}", o.kind, op.0))
    }
}

/// A decision predicate matching operators by kind string.
pub fn kind_is(kind: impl Into<String>) -> DecisionFn<OpDag> {
    let kind = kind.into();
    Arc::new(move |dag: &OpDag, op| dag.op_kind(op) == kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn producer_consumer_bookkeeping() {
        let mut dag = OpDag::new();
        let x = dag.add_source();
        let add = dag.add_op("add", 2, 1);
        let relu = dag.add_op("relu", 1, 1);
        let mul = dag.add_op("mul", 2, 1);
        dag.connect(x, add, 0);
        dag.connect(x, add, 1);
        dag.wire((add, 0), (relu, 0));
        dag.wire((add, 0), (mul, 1));

        assert_eq!(dag.producer(x), None);
        assert_eq!(dag.consumers(x), vec![(add, 0), (add, 1)]);
        let add_out = dag.output_of(add, 0);
        assert_eq!(dag.producer(add_out), Some((add, 0)));
        assert_eq!(dag.consumers(add_out), vec![(relu, 0), (mul, 1)]);
        assert_eq!(dag.num_output_consumers(add, 0), 2);
        assert_eq!(dag.input_value(mul, 0), None);
        assert_eq!(dag.input_value(mul, 1), Some(add_out));
    }

    #[test]
    fn kind_predicate() {
        let mut dag = OpDag::new();
        let add = dag.add_op("add", 0, 1);
        let pred = kind_is("add");
        assert!(pred(&dag, add));
        assert!(!kind_is("mul")(&dag, add));
    }
}
