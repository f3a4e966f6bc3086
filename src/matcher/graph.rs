//! Matching a (sub)pattern-graph against a region of the host graph.

use itertools::Itertools;
use tracing::trace;

use crate::graph::HostGraph;
use crate::pattern::{NodeId, PatternKind};

use super::binding::{BindKind, Binding};
use super::context::{MatchContext, PortMap};
use super::tracker::{InputMatchTask, OutputMatchTask};
use super::MatchRun;

/// Exterior port endpoints of a matched sub-graph, reported to callers that
/// reconcile them out-of-band (alternations).
pub(crate) struct IoMap<G: HostGraph> {
    pub(crate) inputs: PortMap<G>,
    pub(crate) outputs: PortMap<G>,
}

impl<G: HostGraph> Default for IoMap<G> {
    fn default() -> Self {
        Self {
            inputs: PortMap::<G>::new(),
            outputs: PortMap::<G>::new(),
        }
    }
}

impl<'a, G: HostGraph> MatchRun<'a, G> {
    /// Dispatch a binding whose pattern node is not an operator position.
    pub(crate) fn resolve_node(&self, bind: &Binding<G>, ctx: &MatchContext<'_, G>) -> bool {
        match self.pattern.kind(bind.node) {
            PatternKind::Graph => self.match_graph(bind, ctx, None),
            PatternKind::Alternation => self.match_alternation(bind, ctx),
            PatternKind::Repetition => self.match_repetition(bind, ctx),
            PatternKind::Op => false,
        }
    }

    /// Match the graph body behind `bind.node` against the host region
    /// reachable from the binding. On success the local trackers are merged
    /// into `parent` and the graph's exterior ports are reconciled with its
    /// pattern neighbors.
    pub(crate) fn match_graph(
        &self,
        bind: &Binding<G>,
        parent: &MatchContext<'_, G>,
        io_map: Option<&mut IoMap<G>>,
    ) -> bool {
        let Some(graph) = self.pattern.as_graph(bind.node) else {
            return false;
        };
        trace!(graph = self.pattern.name(bind.node), "match_graph");
        let body = self.pattern.graph(graph);
        let local = MatchContext::for_graph(parent, bind.node, graph, body.nodes.iter().copied());

        // Compute the initial interior binding.
        let mut interior = *bind;
        match bind.kind {
            BindKind::Root { forward } => {
                let node = if forward {
                    body.nodes.first()
                } else {
                    body.nodes.last()
                };
                let Some(&node) = node else { return false };
                interior.node = node;
            }
            BindKind::In => {
                let Some(consumers) = body.inner_consumers.get(&bind.pattern_port) else {
                    return false;
                };
                let Ok(&(node, port)) = consumers.iter().exactly_one() else {
                    return false;
                };
                interior.node = node;
                interior.pattern_port = port;
            }
            BindKind::Out => {
                let Some(&(node, port)) = body.inner_producers.get(&bind.pattern_port) else {
                    return false;
                };
                interior.node = node;
                interior.pattern_port = port;
            }
        }

        let seeded = if self.pattern.is_op(interior.node) {
            self.register_binding(&interior, &local)
        } else {
            self.resolve_node(&interior, &local)
        };
        if !seeded {
            return false;
        }

        // Flush the work queue.
        while let Some(op) = local.pop_op() {
            if !self.match_node(op, &local) {
                trace!(graph = self.pattern.name(bind.node), "match_graph: fail");
                return false;
            }
        }

        // Residual check: only zero-trip repetitions may stay unhandled.
        for node in local.unhandled_nodes() {
            match self.pattern.as_repetition(node) {
                Some(rep) if rep.min_rep == 0 => {}
                _ => {
                    trace!(
                        node = self.pattern.name(node),
                        "match_graph: unhandled pattern node"
                    );
                    return false;
                }
            }
        }

        if !self.fill_parent_io_map(&local) {
            return false;
        }
        // Merge trackers before reconciling: the reconciliation binds against
        // operators claimed at this level.
        parent.merge_trackers(&local);

        if !self.match_graph_inputs(&local, bind.node, bind, &local.in_port_map()) {
            return false;
        }
        if !self.match_graph_outputs(&local, bind.node, &local.out_port_map()) {
            return false;
        }

        if let Some(io_map) = io_map {
            io_map.inputs.extend(local.in_port_map());
            io_map.outputs.extend(local.out_port_map());
        }
        true
    }

    /// Copy the i/o pad endpoints of `local` into its parent: either into
    /// the parent-graph slots targeting `local`'s node, or verbatim when the
    /// parent has no graph scope (staging contexts).
    pub(crate) fn fill_parent_io_map(&self, local: &MatchContext<'_, G>) -> bool {
        let Some(parent) = local.parent() else {
            return true;
        };
        let Some(parent_graph) = parent.graph else {
            parent.merge_in_port_map(&local.in_port_map());
            parent.merge_out_port_map(&local.out_port_map());
            return true;
        };
        let body = self.pattern.graph(parent_graph);
        for (&graph_port, consumers) in &body.inner_consumers {
            if consumers.len() > 1 {
                return false;
            }
            let Some(&(con_node, con_port)) = consumers.first() else {
                continue;
            };
            if Some(con_node) == local.node {
                if let Some(entry) = local.get_in_port(con_port) {
                    parent.set_in_port(graph_port, entry);
                }
            }
        }
        for (&graph_port, &(prod_node, prod_port)) in &body.inner_producers {
            if Some(prod_node) == local.node {
                if let Some(entry) = local.get_out_port(prod_port) {
                    parent.set_out_port(graph_port, entry);
                }
            }
        }
        true
    }

    /// Reconcile a graph's exterior input pads with the pattern producers
    /// declared on `graph_node`, synthesizing input tasks on the pad
    /// operators.
    pub(crate) fn match_graph_inputs(
        &self,
        ctx: &MatchContext<'_, G>,
        graph_node: NodeId,
        graph_binding: &Binding<G>,
        in_port_map: &PortMap<G>,
    ) -> bool {
        for (&graph_port, &(op, op_in_port)) in in_port_map {
            let Some(&prod) = self.pattern.producer(graph_node, graph_port) else {
                continue;
            };
            if graph_binding.kind == BindKind::In && graph_binding.pattern_port == graph_port {
                // This pad carried the caller's binding; nothing to re-match.
                if let Some(tracker) = ctx.find_tracker(op) {
                    tracker.borrow_mut().clear_input(op_in_port);
                }
                continue;
            }
            let Some(tracker) = ctx.find_tracker(op) else {
                return false;
            };
            let leaf = tracker.borrow().node;
            let comm = self.pattern.as_op(leaf).and_then(|o| o.commutative_pair);
            let task = match comm {
                Some((_, alt_port)) => InputMatchTask::CommutativeOne {
                    port: op_in_port,
                    alt_port,
                },
                None => InputMatchTask::Normal { port: op_in_port },
            };
            if !self.match_input(op, ctx, task, Some(&prod), None) {
                return false;
            }
        }
        true
    }

    /// Reconcile a graph's exterior output pads with the pattern consumers
    /// declared on `graph_node`.
    pub(crate) fn match_graph_outputs(
        &self,
        ctx: &MatchContext<'_, G>,
        graph_node: NodeId,
        out_port_map: &PortMap<G>,
    ) -> bool {
        for (&graph_port, &(op, op_out_port)) in out_port_map {
            let Some(consumers) = self.pattern.consumers(graph_node, graph_port) else {
                continue;
            };
            let task = OutputMatchTask {
                port: op_out_port,
                // Unused in this reconciliation path.
                num_consumers: 0,
            };
            if !self.match_output(op, ctx, task, consumers) {
                return false;
            }
        }
        true
    }
}
