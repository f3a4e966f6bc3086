//! Alternations: ordered alternatives, first viable one wins.

use tracing::trace;

use crate::graph::HostGraph;

use super::binding::Binding;
use super::context::MatchContext;
use super::graph::IoMap;
use super::MatchRun;

impl<'a, G: HostGraph> MatchRun<'a, G> {
    /// Try each alternative sub-graph in declaration order against the real
    /// parent context and keep the first that succeeds.
    ///
    /// The engine commits to that alternative: a failure later in the
    /// surrounding match will not come back to try the next one.
    pub(crate) fn match_alternation(
        &self,
        bind: &Binding<G>,
        parent: &MatchContext<'_, G>,
    ) -> bool {
        let Some(alternatives) = self.pattern.as_alternation(bind.node) else {
            return false;
        };
        let mut io_map = IoMap::<G>::default();
        let mut success = false;
        for &alternative in alternatives {
            let mut local_bind = *bind;
            local_bind.node = self.pattern.graph_node(alternative);
            if self.match_graph(&local_bind, parent, Some(&mut io_map)) {
                trace!(
                    alternation = self.pattern.name(bind.node),
                    chosen = self.pattern.name(local_bind.node),
                    "alternation committed"
                );
                success = true;
                break;
            }
        }
        if !success {
            return false;
        }
        // Reconcile the alternation node's declared edges against the
        // winning alternative's exterior pads.
        if !self.match_graph_inputs(parent, bind.node, bind, &io_map.inputs) {
            return false;
        }
        if !self.match_graph_outputs(parent, bind.node, &io_map.outputs) {
            return false;
        }
        parent.remove_unhandled(bind.node);
        true
    }
}
