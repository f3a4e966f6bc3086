//! Per-matched-operator bookkeeping.
//!
//! A [`NodeTracker`] is created when an operator is first claimed by a
//! pattern position. It carries the pending input/output match tasks derived
//! from the pattern node's declared edges and one "unhandled" flag per
//! operator edge endpoint. A flag is cleared when the corresponding edge is
//! connected to a pattern edge; whatever remains set after a successful match
//! crosses the match boundary.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use bitvec::prelude::*;

use crate::graph::HostGraph;
use crate::pattern::{NodeId, Pattern};

use super::binding::{BindKind, Binding};
use super::context::MatchContext;
use super::MatchRun;

pub(crate) type TrackerRef = Rc<RefCell<NodeTracker>>;

/// One pending input-side task of a tracker.
///
/// The commutative states form a tiny protocol: a leaf with a commutative
/// pair `(a, b)` starts out with a single `CommutativeTwo` task covering both
/// ports. When one side gets consumed by a binding, the task transitions to
/// `CommutativePinned`, which records the remaining constraint explicitly:
/// the pattern port still to be satisfied and the operator port it must bind
/// to.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum InputMatchTask {
    /// The pattern input at `port` binds to the operator input at `port`.
    Normal {
        port: usize,
    },
    /// A single constraint at `port` that may bind to either commutative
    /// operator port.
    CommutativeOne {
        port: usize,
        alt_port: usize,
    },
    /// Two distinct constraints; either permutation is acceptable.
    CommutativeTwo {
        port: usize,
        alt_port: usize,
    },
    /// One side of a `CommutativeTwo` has been consumed.
    CommutativePinned {
        /// The operator port left for the remaining constraint.
        op_port: usize,
        /// The pattern port of the remaining constraint.
        pattern_port: usize,
    },
}

impl InputMatchTask {
    /// The operator input port this task will read when dispatched.
    pub(crate) fn probe_port(&self) -> usize {
        match *self {
            InputMatchTask::Normal { port }
            | InputMatchTask::CommutativeOne { port, .. }
            | InputMatchTask::CommutativeTwo { port, .. } => port,
            InputMatchTask::CommutativePinned { op_port, .. } => op_port,
        }
    }
}

/// One pending output-side task: `num_consumers` consumer slots on pattern
/// output `port` still need to be claimed.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct OutputMatchTask {
    pub(crate) port: usize,
    pub(crate) num_consumers: usize,
}

/// State of one matched operator: the pattern position claiming it, its
/// pending match tasks and per-edge unhandled flags.
///
/// The operator itself is the key under which the tracker is stored in its
/// [`MatchContext`].
pub(crate) struct NodeTracker {
    pub(crate) node: NodeId,
    pub(crate) src_to_visit: VecDeque<InputMatchTask>,
    pub(crate) dst_to_visit: VecDeque<OutputMatchTask>,
    /// `true` while operator input `i` is not connected to any pattern edge.
    pub(crate) op_unhandled_input: BitVec,
    /// `true` while consumer slot `k` of operator output `i` is unclaimed.
    pub(crate) op_unhandled_output: Vec<BitVec>,
}

impl NodeTracker {
    /// Build the tracker for `bind`, deriving tasks from the pattern leaf's
    /// declared edges. Returns `None` when the bound node is not an operator
    /// position.
    pub(crate) fn new<G: HostGraph>(
        host: &G,
        pattern: &Pattern<G>,
        bind: &Binding<G>,
    ) -> Option<Self> {
        let leaf = pattern.as_op(bind.node)?;
        let declared = pattern.node(bind.node);

        let mut src_to_visit = VecDeque::new();
        let mut pending: VecDeque<usize> = declared.inputs.keys().copied().collect();
        let comm = leaf.commutative_pair;
        while let Some(port) = pending.pop_front() {
            match comm {
                Some((a, b)) if port == a => {
                    if let Some(pos) = pending.iter().position(|&p| p == b) {
                        pending.remove(pos);
                        src_to_visit.push_back(InputMatchTask::CommutativeTwo {
                            port: a,
                            alt_port: b,
                        });
                    } else {
                        src_to_visit.push_back(InputMatchTask::CommutativeOne {
                            port: a,
                            alt_port: b,
                        });
                    }
                }
                _ => src_to_visit.push_back(InputMatchTask::Normal { port }),
            }
        }

        let dst_to_visit = declared
            .outputs
            .iter()
            .map(|(&port, consumers)| OutputMatchTask {
                port,
                num_consumers: consumers.len(),
            })
            .collect();

        let op_unhandled_input = bitvec![1; host.num_inputs(bind.op)];
        let op_unhandled_output = (0..host.num_outputs(bind.op))
            .map(|i| bitvec![1; host.num_output_consumers(bind.op, i)])
            .collect();

        Some(Self {
            node: bind.node,
            src_to_visit,
            dst_to_visit,
            op_unhandled_input,
            op_unhandled_output,
        })
    }

    /// Clear the unhandled flag of input `port`, if in range.
    pub(crate) fn clear_input(&mut self, port: usize) {
        if port < self.op_unhandled_input.len() {
            self.op_unhandled_input.set(port, false);
        }
    }

    /// Clear the unhandled flag of consumer slot `index` on output `port`.
    pub(crate) fn clear_output(&mut self, port: usize, index: usize) {
        if let Some(flags) = self.op_unhandled_output.get_mut(port) {
            if index < flags.len() {
                flags.set(index, false);
            }
        }
    }

    pub(crate) fn input_unhandled(&self, port: usize) -> bool {
        self.op_unhandled_input.get(port).map_or(false, |b| *b)
    }
}

impl<'a, G: HostGraph> MatchRun<'a, G> {
    /// Establish `bind` in `ctx`, creating or checking the tracker of the
    /// bound operator and applying the binding to its pending tasks.
    pub(crate) fn register_binding(&self, bind: &Binding<G>, ctx: &MatchContext<'_, G>) -> bool {
        if self.host.is_matched(bind.op) {
            return false;
        }
        let tracker = match ctx.find_tracker(bind.op) {
            Some(tracker) => {
                if tracker.borrow().node != bind.node {
                    // Claimed by an incompatible pattern position.
                    return false;
                }
                tracker
            }
            None => {
                let Some(tracker) = NodeTracker::new(self.host, self.pattern, bind) else {
                    return false;
                };
                let tracker = Rc::new(RefCell::new(tracker));
                ctx.enqueue(bind.op);
                ctx.insert_tracker(bind.op, tracker.clone());
                tracker
            }
        };

        match bind.kind {
            BindKind::In => self.apply_input_binding(bind, &tracker),
            BindKind::Out => self.apply_output_binding(bind, &tracker),
            BindKind::Root { .. } => true,
        }
    }

    fn apply_input_binding(&self, bind: &Binding<G>, tracker: &TrackerRef) -> bool {
        let mut tracker = tracker.borrow_mut();
        if bind.op_port >= tracker.op_unhandled_input.len() {
            return false;
        }
        tracker.op_unhandled_input.set(bind.op_port, false);

        let mut task_to_remove = None;
        for (i, task) in tracker.src_to_visit.iter_mut().enumerate() {
            match *task {
                InputMatchTask::Normal { port } if port == bind.pattern_port => {
                    if bind.op_port != bind.pattern_port {
                        return false;
                    }
                    task_to_remove = Some(i);
                }
                InputMatchTask::CommutativeOne { port, alt_port }
                    if port == bind.pattern_port || alt_port == bind.pattern_port =>
                {
                    if bind.op_port == port || bind.op_port == alt_port {
                        task_to_remove = Some(i);
                    } else {
                        return false;
                    }
                }
                InputMatchTask::CommutativeTwo { port, alt_port }
                    if port == bind.pattern_port || alt_port == bind.pattern_port =>
                {
                    if bind.op_port == port || bind.op_port == alt_port {
                        let pattern_port = if bind.pattern_port == port { alt_port } else { port };
                        let op_port = if bind.op_port == port { alt_port } else { port };
                        *task = InputMatchTask::CommutativePinned {
                            op_port,
                            pattern_port,
                        };
                    } else {
                        return false;
                    }
                }
                InputMatchTask::CommutativePinned {
                    op_port,
                    pattern_port,
                } if pattern_port == bind.pattern_port => {
                    if bind.op_port == op_port {
                        task_to_remove = Some(i);
                    } else {
                        return false;
                    }
                }
                _ => {}
            }
        }
        if let Some(i) = task_to_remove {
            tracker.src_to_visit.remove(i);
        }
        true
    }

    fn apply_output_binding(&self, bind: &Binding<G>, tracker: &TrackerRef) -> bool {
        let mut tracker = tracker.borrow_mut();
        match tracker.op_unhandled_output.get_mut(bind.op_port) {
            Some(flags) if bind.consumer_index < flags.len() => {
                flags.set(bind.consumer_index, false);
            }
            _ => return false,
        }

        let mut task_to_remove = None;
        for (i, task) in tracker.dst_to_visit.iter_mut().enumerate() {
            if task.port == bind.pattern_port {
                if bind.op_port != bind.pattern_port {
                    return false;
                }
                task.num_consumers = task.num_consumers.saturating_sub(1);
                if task.num_consumers == 0 {
                    task_to_remove = Some(i);
                }
                break;
            }
        }
        if let Some(i) = task_to_remove {
            tracker.dst_to_visit.remove(i);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concrete::{kind_is, OpDag};
    use crate::pattern::in_edge;

    /// add(a, b) with a commutative pair over both inputs yields a single
    /// two-constraint task.
    #[test]
    fn commutative_inputs_collapse_to_one_task() {
        let mut dag = OpDag::new();
        let x = dag.add_source();
        let y = dag.add_source();
        let add = dag.add_op("add", 2, 1);
        dag.connect(x, add, 0);
        dag.connect(y, add, 1);

        let mut builder = Pattern::<OpDag>::builder();
        let root = builder.root();
        let a = builder.append_op(root, vec![kind_is("mul")]).unwrap();
        let b = builder.append_op(root, vec![kind_is("conv")]).unwrap();
        let p_add = builder
            .append_op_with_inputs(
                root,
                vec![kind_is("add")],
                vec![in_edge(0, a, 0), in_edge(1, b, 0)],
            )
            .unwrap();
        builder.set_commutative_pair(p_add, (0, 1)).unwrap();
        let pattern = builder.finish().unwrap();

        let bind = Binding::root(add, p_add, true);
        let tracker = NodeTracker::new(&dag, &pattern, &bind).unwrap();
        assert_eq!(
            tracker.src_to_visit,
            VecDeque::from(vec![InputMatchTask::CommutativeTwo {
                port: 0,
                alt_port: 1
            }])
        );
        assert_eq!(tracker.op_unhandled_input.len(), 2);
        assert!(tracker.op_unhandled_input.all());
    }

    /// Only one commutative port among the declared inputs yields a
    /// one-constraint task; the other input stays normal.
    #[test]
    fn single_commutative_constraint() {
        let mut dag = OpDag::new();
        let x = dag.add_source();
        let y = dag.add_source();
        let add = dag.add_op("add", 2, 1);
        dag.connect(x, add, 0);
        dag.connect(y, add, 1);

        let mut builder = Pattern::<OpDag>::builder();
        let root = builder.root();
        let a = builder.append_op(root, vec![kind_is("mul")]).unwrap();
        let p_add = builder
            .append_op_with_inputs(root, vec![kind_is("add")], vec![in_edge(0, a, 0)])
            .unwrap();
        builder.set_commutative_pair(p_add, (0, 1)).unwrap();
        let pattern = builder.finish().unwrap();

        let bind = Binding::root(add, p_add, true);
        let tracker = NodeTracker::new(&dag, &pattern, &bind).unwrap();
        assert_eq!(
            tracker.src_to_visit,
            VecDeque::from(vec![InputMatchTask::CommutativeOne {
                port: 0,
                alt_port: 1
            }])
        );
    }

    /// Pinning a two-constraint task records the remaining constraint.
    #[test]
    fn two_constraint_pins_remaining_side() {
        let mut dag = OpDag::new();
        let x = dag.add_source();
        let y = dag.add_source();
        let add = dag.add_op("add", 2, 1);
        dag.connect(x, add, 0);
        dag.connect(y, add, 1);

        let mut builder = Pattern::<OpDag>::builder();
        let root = builder.root();
        let a = builder.append_op(root, vec![kind_is("mul")]).unwrap();
        let b = builder.append_op(root, vec![kind_is("conv")]).unwrap();
        let p_add = builder
            .append_op_with_inputs(
                root,
                vec![kind_is("add")],
                vec![in_edge(0, a, 0), in_edge(1, b, 0)],
            )
            .unwrap();
        builder.set_commutative_pair(p_add, (0, 1)).unwrap();
        let pattern = builder.finish().unwrap();

        let run = MatchRun {
            host: &dag,
            pattern: &pattern,
        };
        let ctx = MatchContext::root();
        // Pattern port 0 arrives on operator port 1: the remaining pattern
        // port 1 is pinned to operator port 0.
        let bind = Binding {
            kind: BindKind::In,
            op: add,
            op_port: 1,
            node: p_add,
            pattern_port: 0,
            consumer_index: 0,
        };
        assert!(run.register_binding(&bind, &ctx));
        let tracker = ctx.find_tracker(add).unwrap();
        let tracker = tracker.borrow();
        assert_eq!(
            tracker.src_to_visit,
            VecDeque::from(vec![InputMatchTask::CommutativePinned {
                op_port: 0,
                pattern_port: 1
            }])
        );
        assert!(!tracker.input_unhandled(1));
        assert!(tracker.input_unhandled(0));
    }

    /// A second claim with a different pattern node is rejected.
    #[test]
    fn conflicting_claim_rejected() {
        let mut dag = OpDag::new();
        let add = dag.add_op("add", 0, 1);

        let mut builder = Pattern::<OpDag>::builder();
        let root = builder.root();
        let p1 = builder.append_op(root, vec![kind_is("add")]).unwrap();
        let p2 = builder.append_op(root, vec![kind_is("add")]).unwrap();
        let pattern = builder.finish().unwrap();

        let run = MatchRun {
            host: &dag,
            pattern: &pattern,
        };
        let ctx = MatchContext::root();
        assert!(run.register_binding(&Binding::root(add, p1, true), &ctx));
        assert!(!run.register_binding(&Binding::root(add, p2, true), &ctx));
    }

    /// Operators carrying the external matched marker are never claimed.
    #[test]
    fn marked_op_rejected() {
        let mut dag = OpDag::new();
        let add = dag.add_op("add", 0, 1);
        dag.set_matched(add, true);

        let mut builder = Pattern::<OpDag>::builder();
        let root = builder.root();
        let p1 = builder.append_op(root, vec![kind_is("add")]).unwrap();
        let pattern = builder.finish().unwrap();

        let run = MatchRun {
            host: &dag,
            pattern: &pattern,
        };
        let ctx = MatchContext::root();
        assert!(!run.register_binding(&Binding::root(add, p1, true), &ctx));
    }
}
