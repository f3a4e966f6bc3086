//! The nested matching engine.
//!
//! Matching walks the host graph from a seed operator, driven by the pattern
//! structure: operator positions propagate bindings to their pattern
//! neighbors, nested graphs scope their own work queue, alternations commit
//! to the first viable alternative and repetitions greedily extend until the
//! body stops matching. Every failure is boolean and unwinds by early
//! return; speculative state dies with its context.

mod alternation;
mod binding;
mod context;
mod graph;
mod node;
mod repetition;
mod tracker;

use std::collections::HashSet;

use tracing::{debug, trace};

use crate::graph::HostGraph;
use crate::pattern::{NodeId, Pattern};

use self::binding::Binding;
use self::context::MatchContext;

/// Which way the matcher walks from the seed operator.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum MatchDirection {
    /// Seed on the first declared pattern node and walk towards consumers.
    #[default]
    Forward,
    /// Seed on the last declared pattern node and walk towards producers.
    Backward,
}

/// Options controlling a match attempt.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct MatchOptions {
    /// When `true`, any unhandled edge may cross the match boundary. When
    /// `false`, boundary crossings are restricted to the ports each leaf
    /// explicitly allows (external producers are always acceptable inputs).
    pub auto_export_externals: bool,
    /// Walk direction from the seed.
    pub direction: MatchDirection,
}

/// A successful match: the claimed operators and the values crossing the
/// match boundary.
pub struct PatternMatch<G: HostGraph> {
    /// Matched operators paired with the leaf pattern node claiming each,
    /// in claim order.
    pub matched_ops: Vec<(G::Op, NodeId)>,
    /// External input values, in claim order of the consuming operators,
    /// then port order.
    pub inputs: Vec<G::Value>,
    /// Output values with at least one external (or no) consumer.
    pub outputs: Vec<G::Value>,
}

impl<G: HostGraph> Clone for PatternMatch<G> {
    fn clone(&self) -> Self {
        Self {
            matched_ops: self.matched_ops.clone(),
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
        }
    }
}

impl<G: HostGraph> std::fmt::Debug for PatternMatch<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternMatch")
            .field("matched_ops", &self.matched_ops)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish()
    }
}

impl<G: HostGraph> PatternMatch<G> {
    /// The operators claimed by this match.
    pub fn ops(&self) -> impl Iterator<Item = G::Op> + '_ {
        self.matched_ops.iter().map(|&(op, _)| op)
    }
}

/// Matches one nested pattern against host graphs.
pub struct NestedMatcher<'p, G: HostGraph> {
    pattern: &'p Pattern<G>,
    options: MatchOptions,
}

impl<'p, G: HostGraph> NestedMatcher<'p, G> {
    /// A matcher with default options.
    pub fn new(pattern: &'p Pattern<G>) -> Self {
        Self::with_options(pattern, MatchOptions::default())
    }

    /// A matcher with explicit options.
    pub fn with_options(pattern: &'p Pattern<G>, options: MatchOptions) -> Self {
        Self { pattern, options }
    }

    /// Attempt a match seeded at `seed`.
    pub fn find_rooted_match(&self, host: &G, seed: G::Op) -> Option<PatternMatch<G>> {
        let run = MatchRun {
            host,
            pattern: self.pattern,
        };
        run.run(seed, self.options)
    }

    /// Attempt a match at every operator of `host`, returning the matches
    /// found. Seeds are tried independently; overlap control is left to the
    /// caller (typically by setting the matched marker between rewrites).
    pub fn find_matches(&self, host: &G) -> Vec<PatternMatch<G>> {
        host.ops()
            .filter(|&op| !host.is_matched(op))
            .filter_map(|op| self.find_rooted_match(host, op))
            .collect()
    }
}

/// One match attempt: host, pattern and options, shared by the mutually
/// recursive match functions.
pub(crate) struct MatchRun<'a, G: HostGraph> {
    pub(crate) host: &'a G,
    pub(crate) pattern: &'a Pattern<G>,
}

impl<'a, G: HostGraph> MatchRun<'a, G> {
    fn run(&self, seed: G::Op, options: MatchOptions) -> Option<PatternMatch<G>> {
        let forward = options.direction == MatchDirection::Forward;
        trace!(seed = %self.host.op_name(seed), forward, "match_pattern");
        let global = MatchContext::root();
        let bind = Binding::root(seed, self.pattern.root(), forward);
        if !self.match_graph(&bind, &global, None) {
            return None;
        }
        let m = self.classify_boundary(&global, options.auto_export_externals)?;
        debug!(
            seed = %self.host.op_name(seed),
            ops = m.matched_ops.len(),
            inputs = m.inputs.len(),
            outputs = m.outputs.len(),
            "match_pattern: success"
        );
        Some(m)
    }

    /// Walk the residual unhandled edges of every matched operator and
    /// classify each as internal, an external input/output, or a policy
    /// violation failing the whole match.
    fn classify_boundary(
        &self,
        global: &MatchContext<'_, G>,
        auto_export: bool,
    ) -> Option<PatternMatch<G>> {
        let order = global.claim_order();
        let matched: HashSet<G::Op> = order.iter().copied().collect();
        let mut result = PatternMatch {
            matched_ops: Vec::with_capacity(order.len()),
            inputs: Vec::new(),
            outputs: Vec::new(),
        };
        for &op in &order {
            let tracker = global.find_tracker(op)?;
            let tracker = tracker.borrow();
            let leaf = tracker.node;
            let leaf_pattern = self.pattern.as_op(leaf)?;
            result.matched_ops.push((op, leaf));

            for port in tracker.op_unhandled_input.iter_ones() {
                let Some(value) = self.host.input_value(op, port) else {
                    continue;
                };
                let internal = self
                    .host
                    .producer(value)
                    .is_some_and(|(prod, _)| matched.contains(&prod));
                if !internal {
                    result.inputs.push(value);
                } else if !auto_export {
                    let allowed = &leaf_pattern.allowed_internal_inputs;
                    let port_allowed = allowed.contains(&port)
                        || leaf_pattern.commutative_pair.is_some_and(|(a, b)| {
                            (port == a && allowed.contains(&b))
                                || (port == b && allowed.contains(&a))
                        });
                    if !port_allowed {
                        debug!(
                            op = %self.host.op_name(op),
                            port,
                            "unhandled internal input not allowed"
                        );
                        return None;
                    }
                }
            }

            // A leaf with no declared consumers is a pattern sink; its
            // outputs may always leave the match.
            let is_sink = self.pattern.node(leaf).outputs.is_empty();
            for (port, flags) in tracker.op_unhandled_output.iter().enumerate() {
                let Some(value) = self.host.output_value(op, port) else {
                    continue;
                };
                if flags.is_empty() {
                    // No consumers at all: always exported.
                    result.outputs.push(value);
                    continue;
                }
                let consumers = self.host.consumers(value);
                let external_allowed =
                    auto_export || leaf_pattern.allowed_external_outputs.contains(&port);
                let mut unhandled = false;
                for slot in flags.iter_ones() {
                    let Some(&(con_op, _)) = consumers.get(slot) else {
                        continue;
                    };
                    if matched.contains(&con_op) {
                        // Claimed by the match through another path.
                        continue;
                    }
                    if !(is_sink || external_allowed) {
                        debug!(
                            op = %self.host.op_name(op),
                            port,
                            "side output not allowed"
                        );
                        return None;
                    }
                    unhandled = true;
                }
                if unhandled {
                    result.outputs.push(value);
                }
            }
        }
        Some(result)
    }
}
