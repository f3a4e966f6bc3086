//! Repetitions: a body graph matched a bounded number of times, chained
//! through declared port pairs.

use tracing::trace;

use crate::graph::HostGraph;

use super::binding::{BindKind, Binding};
use super::context::MatchContext;
use super::tracker::{InputMatchTask, OutputMatchTask};
use super::MatchRun;

impl<'a, G: HostGraph> MatchRun<'a, G> {
    /// Match `bind.node`'s body between `min_rep` and `max_rep` times,
    /// stitching body-out -> body-in edges between consecutive iterations.
    ///
    /// Iterations are speculative: each one is matched in a scratch context
    /// and promoted into a confirmed context only once its cross-iteration
    /// edges check out. When the body stops matching, whatever is confirmed
    /// is committed, provided `min_rep` was reached. A zero-trip repetition
    /// forwards the binding to its declared neighbor instead.
    pub(crate) fn match_repetition(
        &self,
        bind: &Binding<G>,
        parent: &MatchContext<'_, G>,
    ) -> bool {
        let Some(rep) = self.pattern.as_repetition(bind.node) else {
            return false;
        };
        let body_node = self.pattern.graph_node(rep.body);
        let port_map = rep.port_map.clone();
        let (min_rep, max_rep) = (rep.min_rep, rep.max_rep);
        let forward = bind.kind.is_forward();

        // Confirmed iterations accumulate here; the speculative context
        // scopes the iteration currently being attempted. Both see the real
        // parent for alias checks.
        let confirmed = MatchContext::staging(parent, Some(bind.node));
        let speculative = MatchContext::staging(parent, Some(bind.node));

        let mut iter_bind = *bind;
        iter_bind.node = body_node;

        let mut trips = 0;
        while trips < max_rep {
            let scratch = MatchContext::staging(&speculative, None);
            if !self.match_graph(&iter_bind, &scratch, None) {
                break;
            }
            // Locate the seed of the next iteration through the chained edge
            // of this one, before the iteration is committed.
            let next = (trips + 1 < max_rep)
                .then(|| {
                    if forward {
                        self.next_seed_forward(&scratch, port_map[0])
                    } else {
                        self.next_seed_backward(&scratch, port_map[0])
                    }
                })
                .flatten();
            // Stitch edges across the previous and this iteration.
            if trips > 0 {
                let (out_ctx, in_ctx) = if forward {
                    (&confirmed, &scratch)
                } else {
                    (&scratch, &confirmed)
                };
                for &(out_port, in_port) in &port_map {
                    if !self.stitch_edge(out_ctx, in_ctx, out_port, in_port) {
                        trace!(
                            repetition = self.pattern.name(bind.node),
                            trips,
                            "repetition: stitch failed"
                        );
                        return false;
                    }
                }
            }
            // Promote the iteration.
            confirmed.merge_trackers(&scratch);
            if forward {
                if trips == 0 {
                    confirmed.merge_in_port_map(&scratch.in_port_map());
                }
                confirmed.replace_out_port_map(scratch.out_port_map());
            } else {
                if trips == 0 {
                    confirmed.merge_out_port_map(&scratch.out_port_map());
                }
                confirmed.replace_in_port_map(scratch.in_port_map());
            }
            trips += 1;
            if trips < max_rep {
                match next {
                    Some(op) => iter_bind.op = op,
                    None => break,
                }
            }
        }
        trace!(
            repetition = self.pattern.name(bind.node),
            trips,
            min_rep,
            max_rep,
            "repetition matched"
        );

        if trips < min_rep {
            return false;
        }
        if trips == 0 {
            if !self.forward_zero_trip(bind, parent, forward) {
                return false;
            }
        } else {
            parent.merge_trackers(&confirmed);
            if !self.match_graph_inputs(parent, bind.node, bind, &confirmed.in_port_map()) {
                return false;
            }
            if !self.match_graph_outputs(parent, bind.node, &confirmed.out_port_map()) {
                return false;
            }
            if !self.fill_parent_io_map(&confirmed) {
                return false;
            }
        }
        parent.remove_unhandled(bind.node);
        true
    }

    /// The operator seeding the next iteration, following the chained body
    /// output forward through the host graph.
    fn next_seed_forward(
        &self,
        scratch: &MatchContext<'_, G>,
        (body_out, body_in): (usize, usize),
    ) -> Option<G::Op> {
        let (out_op, out_port) = scratch.get_out_port(body_out)?;
        let value = self.host.output_value(out_op, out_port)?;
        let consumers = self.host.consumers(value);
        if consumers.len() == 1 {
            return Some(consumers[0].0);
        }
        // The chained value fans out. Heuristic: the next head is the first
        // consumer whose attributes match the leaf claimed for the body
        // in-port of the iteration just matched.
        let (in_op, _) = scratch.get_in_port(body_in)?;
        let prev_in_leaf = scratch.find_tracker(in_op)?.borrow().node;
        consumers
            .iter()
            .map(|&(op, _)| op)
            .find(|&op| self.match_op_attributes(op, prev_in_leaf))
    }

    /// Backward mirror of [`Self::next_seed_forward`].
    fn next_seed_backward(
        &self,
        scratch: &MatchContext<'_, G>,
        (_, body_in): (usize, usize),
    ) -> Option<G::Op> {
        let (in_op, in_port) = scratch.get_in_port(body_in)?;
        let value = self.host.input_value(in_op, in_port)?;
        self.host.producer(value).map(|(op, _)| op)
    }

    /// Verify and record one chained edge between two iterations: the host
    /// producer of the consumer-side input must be the producer-side
    /// operator, and both endpoints are marked handled.
    fn stitch_edge(
        &self,
        out_ctx: &MatchContext<'_, G>,
        in_ctx: &MatchContext<'_, G>,
        out_port: usize,
        in_port: usize,
    ) -> bool {
        let Some((prod_op, prod_port)) = out_ctx.get_out_port(out_port) else {
            return false;
        };
        let Some((con_op, con_port)) = in_ctx.get_in_port(in_port) else {
            return false;
        };
        let actual = self
            .host
            .input_value(con_op, con_port)
            .and_then(|v| self.host.producer(v));
        if actual.map(|(op, _)| op) != Some(prod_op) {
            return false;
        }
        let Some(index) = self.consumer_index_of(con_op, con_port) else {
            return false;
        };
        let Some(prod_tracker) = out_ctx.find_tracker(prod_op) else {
            return false;
        };
        prod_tracker.borrow_mut().clear_output(prod_port, index);
        let Some(con_tracker) = in_ctx.find_tracker(con_op) else {
            return false;
        };
        con_tracker.borrow_mut().clear_input(con_port);
        true
    }

    /// Zero-trip: the repetition matched no body instance. Forward the
    /// binding request to the repetition's declared neighbor so the pattern
    /// "sees through" the optional element.
    fn forward_zero_trip(
        &self,
        bind: &Binding<G>,
        parent: &MatchContext<'_, G>,
        forward: bool,
    ) -> bool {
        trace!(repetition = self.pattern.name(bind.node), "zero trip");
        if forward {
            let Some(consumers) = self.pattern.consumers(bind.node, 0) else {
                return true;
            };
            match bind.kind {
                BindKind::Root { .. } => {
                    let &[(con_node, _)] = consumers else {
                        return false;
                    };
                    let mut optional = *bind;
                    optional.node = con_node;
                    self.resolve_node(&optional, parent)
                }
                _ => {
                    // Re-run output matching on the operator feeding the
                    // repetition, now against the declared successor.
                    let Some(value) = self.host.input_value(bind.op, bind.op_port) else {
                        return false;
                    };
                    let Some((prod_op, prod_port)) = self.host.producer(value) else {
                        return false;
                    };
                    let task = OutputMatchTask {
                        port: prod_port,
                        num_consumers: 0,
                    };
                    self.match_output(prod_op, parent, task, consumers)
                }
            }
        } else {
            let Some(&producer) = self.pattern.producer(bind.node, 0) else {
                return true;
            };
            match bind.kind {
                BindKind::Root { .. } => {
                    let mut optional = *bind;
                    optional.node = producer.0;
                    self.resolve_node(&optional, parent)
                }
                _ => {
                    // Re-run input matching on the operator consuming from
                    // the repetition, now against the declared predecessor.
                    let Some(value) = self.host.output_value(bind.op, bind.op_port) else {
                        return false;
                    };
                    let consumers = self.host.consumers(value);
                    let Some(&(con_op, con_port)) = consumers.get(bind.consumer_index) else {
                        return false;
                    };
                    let task = InputMatchTask::Normal { port: con_port };
                    self.match_input(con_op, parent, task, Some(&producer), None)
                }
            }
        }
    }
}
