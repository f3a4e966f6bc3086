//! Matching a single operator position: attributes, then inputs, then
//! outputs.

use tracing::trace;

use crate::graph::HostGraph;
use crate::pattern::{Consumer, NodeId, PatternKind, Producer};

use super::binding::{BindKind, Binding};
use super::context::MatchContext;
use super::tracker::{InputMatchTask, OutputMatchTask};
use super::MatchRun;

impl<'a, G: HostGraph> MatchRun<'a, G> {
    /// Evaluate the decision predicates of leaf `node` against `op`.
    pub(crate) fn match_op_attributes(&self, op: G::Op, node: NodeId) -> bool {
        let Some(leaf) = self.pattern.as_op(node) else {
            return false;
        };
        leaf.predicates.iter().all(|pred| pred(self.host, op))
    }

    /// The position of `(op, in_port)` in the consumer list of the value it
    /// reads.
    pub(crate) fn consumer_index_of(&self, op: G::Op, in_port: usize) -> Option<usize> {
        let value = self.host.input_value(op, in_port)?;
        self.host
            .consumers(value)
            .iter()
            .position(|&(o, p)| o == op && p == in_port)
    }

    /// Drive matching of the operator at the head of the work queue.
    ///
    /// Precondition: `op` has a tracker reachable from `ctx`.
    pub(crate) fn match_node(&self, op: G::Op, ctx: &MatchContext<'_, G>) -> bool {
        let Some(tracker) = ctx.find_tracker(op) else {
            return false;
        };
        let node = tracker.borrow().node;
        if !self.pattern.is_op(node) {
            return false;
        }
        if !self.match_op_attributes(op, node) {
            trace!(
                op = %self.host.op_name(op),
                node = self.pattern.name(node),
                "attribute mismatch"
            );
            return false;
        }
        if !self.match_node_inputs(op, ctx) {
            return false;
        }
        if !self.match_node_outputs(op, ctx) {
            return false;
        }

        // If this leaf backs an i/o pad of the current graph, record the
        // operator endpoint for the parent level.
        if let Some(graph) = ctx.graph {
            let body = self.pattern.graph(graph);
            for (&graph_port, consumers) in &body.inner_consumers {
                if consumers.len() > 1 {
                    // Inner port forwarding only works for single consumers.
                    return false;
                }
                let Some(&(con_node, con_port)) = consumers.first() else {
                    continue;
                };
                if con_node == node {
                    ctx.set_in_port(graph_port, (op, con_port));
                }
            }
            for (&graph_port, &(prod_node, prod_port)) in &body.inner_producers {
                if prod_node == node {
                    ctx.set_out_port(graph_port, (op, prod_port));
                }
            }
        }

        ctx.remove_unhandled(node);
        true
    }

    fn match_node_inputs(&self, op: G::Op, ctx: &MatchContext<'_, G>) -> bool {
        let Some(tracker) = ctx.find_tracker(op) else {
            return false;
        };
        let node = tracker.borrow().node;
        if self.pattern.node(node).inputs.is_empty() {
            return true;
        }
        loop {
            let task = tracker.borrow_mut().src_to_visit.pop_front();
            let Some(task) = task else { break };
            let (prod, alt_prod) = match task {
                InputMatchTask::Normal { port }
                | InputMatchTask::CommutativeOne { port, .. } => {
                    (self.pattern.producer(node, port), None)
                }
                InputMatchTask::CommutativeTwo { port, alt_port } => (
                    self.pattern.producer(node, port),
                    self.pattern.producer(node, alt_port),
                ),
                InputMatchTask::CommutativePinned { pattern_port, .. } => {
                    (self.pattern.producer(node, pattern_port), None)
                }
            };
            if !self.match_input(op, ctx, task, prod, alt_prod) {
                return false;
            }
        }
        true
    }

    /// Resolve one pending input task of `op` against the pattern producers.
    pub(crate) fn match_input(
        &self,
        op: G::Op,
        ctx: &MatchContext<'_, G>,
        task: InputMatchTask,
        prod: Option<&Producer>,
        alt_prod: Option<&Producer>,
    ) -> bool {
        let Some(tracker) = ctx.find_tracker(op) else {
            return false;
        };
        let num_inputs = self.host.num_inputs(op);
        if task.probe_port() >= num_inputs {
            // An exhausted operator input is tolerated only when the pattern
            // producer is a repetition that may run zero trips.
            return matches!(task, InputMatchTask::Normal { .. })
                && prod
                    .map_or(false, |&(n, _)| {
                        self.pattern.kind(n) == PatternKind::Repetition
                    });
        }

        match task {
            InputMatchTask::Normal { port } => {
                let Some(&(prod_node, prod_oport)) = prod else {
                    return false;
                };
                let Some(index) = self.consumer_index_of(op, port) else {
                    return false;
                };
                let Some(value) = self.host.input_value(op, port) else {
                    return false;
                };
                let Some((prod_op, prod_op_port)) = self.host.producer(value) else {
                    return false;
                };
                tracker.borrow_mut().clear_input(port);
                let bind = Binding {
                    kind: BindKind::Out,
                    op: prod_op,
                    op_port: prod_op_port,
                    node: prod_node,
                    pattern_port: prod_oport,
                    consumer_index: index,
                };
                if self.pattern.is_op(prod_node) {
                    self.register_binding(&bind, ctx)
                } else {
                    self.resolve_node(&bind, ctx)
                }
            }
            InputMatchTask::CommutativeOne { port, alt_port } => {
                let Some(&(prod_node, prod_oport)) = prod else {
                    return false;
                };
                if !self.pattern.is_op(prod_node) {
                    return false;
                }
                // Try the producers of both commutative ports in turn.
                if let Some(prod_op) = self.producer_at(op, port) {
                    if self.match_op_attributes(prod_op, prod_node) {
                        return self.bind_node_input(op, port, prod_node, prod_oport, ctx);
                    }
                }
                if alt_port >= num_inputs {
                    return false;
                }
                let Some(alt_op) = self.producer_at(op, alt_port) else {
                    return false;
                };
                if !self.match_op_attributes(alt_op, prod_node) {
                    return false;
                }
                self.bind_node_input(op, alt_port, prod_node, prod_oport, ctx)
            }
            InputMatchTask::CommutativeTwo { port, alt_port } => {
                let (Some(&(prod_node, prod_oport)), Some(&(alt_node, alt_oport))) =
                    (prod, alt_prod)
                else {
                    return false;
                };
                if !self.pattern.is_op(prod_node) || !self.pattern.is_op(alt_node) {
                    return false;
                }
                if alt_port >= num_inputs {
                    return false;
                }
                let Some(prod_op) = self.producer_at(op, port) else {
                    return false;
                };
                let Some(alt_op) = self.producer_at(op, alt_port) else {
                    return false;
                };
                let port_handled = !tracker.borrow().input_unhandled(port);
                let alt_handled = !tracker.borrow().input_unhandled(alt_port);
                if port_handled {
                    // One side already claimed; the other is constrained to
                    // the opposite pattern node.
                    let claimed = ctx.find_tracker(prod_op).map(|t| t.borrow().node);
                    if claimed == Some(prod_node) {
                        self.bind_node_input(op, alt_port, alt_node, alt_oport, ctx)
                    } else {
                        self.bind_node_input(op, alt_port, prod_node, prod_oport, ctx)
                    }
                } else if alt_handled {
                    let claimed = ctx.find_tracker(alt_op).map(|t| t.borrow().node);
                    if claimed == Some(prod_node) {
                        self.bind_node_input(op, port, alt_node, alt_oport, ctx)
                    } else {
                        self.bind_node_input(op, port, prod_node, prod_oport, ctx)
                    }
                } else if self.match_op_attributes(prod_op, prod_node)
                    && self.match_op_attributes(alt_op, alt_node)
                {
                    self.bind_node_input(op, port, prod_node, prod_oport, ctx)
                        && self.bind_node_input(op, alt_port, alt_node, alt_oport, ctx)
                } else if self.match_op_attributes(alt_op, prod_node)
                    && self.match_op_attributes(prod_op, alt_node)
                {
                    self.bind_node_input(op, alt_port, prod_node, prod_oport, ctx)
                        && self.bind_node_input(op, port, alt_node, alt_oport, ctx)
                } else {
                    false
                }
            }
            InputMatchTask::CommutativePinned { op_port, .. } => {
                let Some(&(prod_node, prod_oport)) = prod else {
                    return false;
                };
                self.bind_node_input(op, op_port, prod_node, prod_oport, ctx)
            }
        }
    }

    /// The producer operator of the value read by `op` at `in_port`.
    fn producer_at(&self, op: G::Op, in_port: usize) -> Option<G::Op> {
        let value = self.host.input_value(op, in_port)?;
        self.host.producer(value).map(|(o, _)| o)
    }

    /// Bind input `in_port` of `op` to pattern producer
    /// `(prod_node, prod_oport)` through an output-side binding on the
    /// producing operator.
    fn bind_node_input(
        &self,
        op: G::Op,
        in_port: usize,
        prod_node: NodeId,
        prod_oport: usize,
        ctx: &MatchContext<'_, G>,
    ) -> bool {
        let Some(index) = self.consumer_index_of(op, in_port) else {
            return false;
        };
        let Some(value) = self.host.input_value(op, in_port) else {
            return false;
        };
        let Some((prod_op, prod_op_port)) = self.host.producer(value) else {
            return false;
        };
        let Some(tracker) = ctx.find_tracker(op) else {
            return false;
        };
        tracker.borrow_mut().clear_input(in_port);
        let bind = Binding {
            kind: BindKind::Out,
            op: prod_op,
            op_port: prod_op_port,
            node: prod_node,
            pattern_port: prod_oport,
            consumer_index: index,
        };
        self.register_binding(&bind, ctx)
    }

    fn match_node_outputs(&self, op: G::Op, ctx: &MatchContext<'_, G>) -> bool {
        let Some(tracker) = ctx.find_tracker(op) else {
            return false;
        };
        let node = tracker.borrow().node;
        if self.pattern.node(node).outputs.is_empty() {
            return true;
        }
        loop {
            let task = tracker.borrow_mut().dst_to_visit.pop_front();
            let Some(task) = task else { break };
            let Some(consumers) = self.pattern.consumers(node, task.port) else {
                return false;
            };
            if !self.match_output(op, ctx, task, consumers) {
                return false;
            }
        }
        true
    }

    /// Resolve one pending output task of `op` against the declared pattern
    /// consumers `cons`.
    pub(crate) fn match_output(
        &self,
        op: G::Op,
        ctx: &MatchContext<'_, G>,
        task: OutputMatchTask,
        cons: &[Consumer],
    ) -> bool {
        let value = (task.port < self.host.num_outputs(op))
            .then(|| self.host.output_value(op, task.port))
            .flatten();
        let op_consumers = value
            .map(|v| self.host.consumers(v))
            .unwrap_or_default();
        if op_consumers.is_empty() {
            // An exhausted operator output is tolerated only when the sole
            // pattern consumer is a repetition that may run zero trips.
            return cons.len() == 1 && self.pattern.kind(cons[0].0) == PatternKind::Repetition;
        }
        let Some(tracker) = ctx.find_tracker(op) else {
            return false;
        };

        if cons.len() == 1 && op_consumers.len() == 1 {
            // Fast path: one pattern consumer, one operator consumer.
            let (con_node, con_iport) = cons[0];
            let (con_op, con_op_port) = op_consumers[0];
            tracker.borrow_mut().clear_output(task.port, 0);
            let bind = Binding {
                kind: BindKind::In,
                op: con_op,
                op_port: con_op_port,
                node: con_node,
                pattern_port: con_iport,
                consumer_index: 0,
            };
            return if self.pattern.is_op(con_node) {
                self.register_binding(&bind, ctx)
            } else {
                self.resolve_node(&bind, ctx)
            };
        }

        // General path: first-fit assignment of pattern consumers to
        // operator consumers.
        if cons.len() > op_consumers.len() {
            return false;
        }
        for &(con_node, con_iport) in cons {
            if !self.pattern.is_op(con_node) {
                return false;
            }
            let mut matched = false;
            for &(con_op, con_op_port) in &op_consumers {
                if !self.match_op_attributes(con_op, con_node) {
                    continue;
                }
                if let Some(con_tracker) = ctx.find_tracker(con_op) {
                    let unhandled = con_tracker.borrow().input_unhandled(con_op_port);
                    if !unhandled && con_op_port != con_iport {
                        continue;
                    }
                }
                let Some(index) = self.consumer_index_of(con_op, con_op_port) else {
                    return false;
                };
                tracker.borrow_mut().clear_output(task.port, index);
                let bind = Binding {
                    kind: BindKind::In,
                    op: con_op,
                    op_port: con_op_port,
                    node: con_node,
                    pattern_port: con_iport,
                    consumer_index: index,
                };
                if !self.register_binding(&bind, ctx) {
                    return false;
                }
                matched = true;
                break;
            }
            if !matched {
                return false;
            }
        }
        true
    }
}
