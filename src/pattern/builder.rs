//! Construction and validation of pattern graphs.

use std::collections::BTreeMap;

use smallvec::SmallVec;
use thiserror::Error;

use super::{
    DecisionFn, GraphBody, GraphId, NodeId, NodeKind, OpPattern, Pattern, PatternNode, Producer,
    RepetitionPattern,
};
use crate::graph::HostGraph;

/// An input edge for `append_*` calls:
/// `(input port, (producer node, producer output port))`.
pub type InEdge = (usize, (NodeId, usize));

/// Shorthand for building an [`InEdge`].
pub fn in_edge(port: usize, node: NodeId, oport: usize) -> InEdge {
    (port, (node, oport))
}

/// Errors raised while building a pattern.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum PatternError {
    /// A node id does not refer to a node of this builder.
    #[error("unknown pattern node {0:?}")]
    UnknownNode(NodeId),
    /// A graph id does not refer to a graph of this builder.
    #[error("unknown pattern graph {0:?}")]
    UnknownGraph(GraphId),
    /// An edge or port declaration refers to a node outside the graph.
    #[error("node {node:?} does not belong to graph {graph:?}")]
    ForeignNode {
        /// The referenced node.
        node: NodeId,
        /// The graph the declaration was made on.
        graph: GraphId,
    },
    /// Two producers were declared for the same input port.
    #[error("input port {port} of {node:?} already has a producer")]
    InputTaken {
        /// The consuming node.
        node: NodeId,
        /// The contested input port.
        port: usize,
    },
    /// Two interior producers were declared for the same graph output port.
    #[error("graph {graph:?} already exposes output port {port}")]
    OutputPortTaken {
        /// The graph the port was declared on.
        graph: GraphId,
        /// The contested output port.
        port: usize,
    },
    /// A commutative pair must name two distinct input ports.
    #[error("commutative pair ({0}, {1}) must name two distinct input ports")]
    BadCommutativePair(usize, usize),
    /// Repetition bounds must satisfy `min_rep <= max_rep` and `max_rep >= 1`.
    #[error("repetition bounds [{min}, {max}] are invalid")]
    BadRepetitionBounds {
        /// Minimum trip count.
        min: usize,
        /// Maximum trip count.
        max: usize,
    },
    /// A repetition must declare at least one chaining port pair.
    #[error("repetition must declare at least one (output, input) port pair")]
    EmptyPortMap,
    /// An alternation must list at least one alternative.
    #[error("alternation must list at least one alternative")]
    EmptyAlternation,
    /// Every graph must contain at least one node.
    #[error("graph {0:?} has no nodes")]
    EmptyGraph(GraphId),
    /// The operation applies to operator positions only.
    #[error("node {0:?} is not an operator position")]
    NotAnOp(NodeId),
}

/// Builds a [`Pattern`].
///
/// Nodes are appended to graphs; sub-graphs for nesting, alternation bodies
/// and repetition bodies are created with [`PatternBuilder::add_graph`] and
/// populated the same way before being referenced.
pub struct PatternBuilder<G: HostGraph> {
    nodes: Vec<PatternNode<G>>,
    graphs: Vec<GraphBody>,
    /// Owning graph of each node, parallel to `nodes`.
    owner: Vec<GraphId>,
}

impl<G: HostGraph> PatternBuilder<G> {
    /// Create a builder with an empty root graph.
    pub fn new() -> Self {
        let mut builder = Self {
            nodes: Vec::new(),
            graphs: Vec::new(),
            owner: Vec::new(),
        };
        builder.add_graph();
        builder
    }

    /// The top-level graph.
    pub fn root(&self) -> GraphId {
        GraphId(0)
    }

    /// Create an empty graph body for nesting, an alternative or a
    /// repetition body.
    pub fn add_graph(&mut self) -> GraphId {
        let graph = GraphId(self.graphs.len());
        let node = NodeId(self.nodes.len());
        self.nodes.push(PatternNode {
            name: format!("graph_{}", graph.0),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            kind: NodeKind::Graph(graph),
        });
        // Wrapper nodes belong to no graph; park them on their own body.
        self.owner.push(graph);
        self.graphs.push(GraphBody {
            node,
            nodes: Vec::new(),
            inner_consumers: BTreeMap::new(),
            inner_producers: BTreeMap::new(),
        });
        graph
    }

    /// Append an operator position with no declared inputs.
    pub fn append_op(
        &mut self,
        graph: GraphId,
        predicates: Vec<DecisionFn<G>>,
    ) -> Result<NodeId, PatternError> {
        self.append_op_with_inputs(graph, predicates, Vec::new())
    }

    /// Append an operator position consuming from earlier nodes of `graph`.
    pub fn append_op_with_inputs(
        &mut self,
        graph: GraphId,
        predicates: Vec<DecisionFn<G>>,
        in_edges: Vec<InEdge>,
    ) -> Result<NodeId, PatternError> {
        let name = format!("op_{}", self.nodes.len());
        self.append_node(
            graph,
            name,
            NodeKind::Op(OpPattern {
                predicates,
                commutative_pair: None,
                allowed_internal_inputs: Default::default(),
                allowed_external_outputs: Default::default(),
            }),
            in_edges,
        )
    }

    /// Append a nested graph node with body `body`.
    pub fn append_graph(
        &mut self,
        graph: GraphId,
        body: GraphId,
        in_edges: Vec<InEdge>,
    ) -> Result<NodeId, PatternError> {
        self.check_graph(body)?;
        let name = format!("nested_{}", body.0);
        self.append_node(graph, name, NodeKind::Graph(body), in_edges)
    }

    /// Append an alternation over `alternatives`, tried in order.
    pub fn append_alternation(
        &mut self,
        graph: GraphId,
        alternatives: Vec<GraphId>,
        in_edges: Vec<InEdge>,
    ) -> Result<NodeId, PatternError> {
        if alternatives.is_empty() {
            return Err(PatternError::EmptyAlternation);
        }
        for &alt in &alternatives {
            self.check_graph(alt)?;
        }
        let name = format!("alternation_{}", self.nodes.len());
        self.append_node(graph, name, NodeKind::Alternation(alternatives), in_edges)
    }

    /// Append a repetition of `body`, chained through `port_map`, matched
    /// between `min_rep` and `max_rep` times (inclusive).
    pub fn append_repetition(
        &mut self,
        graph: GraphId,
        body: GraphId,
        port_map: Vec<(usize, usize)>,
        min_rep: usize,
        max_rep: usize,
        in_edges: Vec<InEdge>,
    ) -> Result<NodeId, PatternError> {
        self.check_graph(body)?;
        if min_rep > max_rep || max_rep == 0 {
            return Err(PatternError::BadRepetitionBounds {
                min: min_rep,
                max: max_rep,
            });
        }
        if port_map.is_empty() {
            return Err(PatternError::EmptyPortMap);
        }
        let name = format!("repetition_{}", self.nodes.len());
        self.append_node(
            graph,
            name,
            NodeKind::Repetition(RepetitionPattern {
                body,
                port_map: SmallVec::from_vec(port_map),
                min_rep,
                max_rep,
            }),
            in_edges,
        )
    }

    /// Append an optional occurrence of `body`, chained through port 0.
    pub fn append_optional(
        &mut self,
        graph: GraphId,
        body: GraphId,
        in_edges: Vec<InEdge>,
    ) -> Result<NodeId, PatternError> {
        self.append_repetition(graph, body, vec![(0, 0)], 0, 1, in_edges)
    }

    /// Rename `node` for diagnostics.
    pub fn set_name(&mut self, node: NodeId, name: impl Into<String>) -> Result<(), PatternError> {
        self.check_node(node)?;
        self.nodes[node.0].name = name.into();
        Ok(())
    }

    /// Declare input ports `pair` of an operator position as commutative.
    pub fn set_commutative_pair(
        &mut self,
        node: NodeId,
        pair: (usize, usize),
    ) -> Result<(), PatternError> {
        if pair.0 == pair.1 {
            return Err(PatternError::BadCommutativePair(pair.0, pair.1));
        }
        self.op_mut(node)?.commutative_pair = Some(pair);
        Ok(())
    }

    /// Allow input `port` of `node` to stay unhandled even when fed by
    /// another matched operator.
    pub fn allow_internal_input(&mut self, node: NodeId, port: usize) -> Result<(), PatternError> {
        self.op_mut(node)?.allowed_internal_inputs.insert(port);
        Ok(())
    }

    /// Allow output `port` of `node` to feed operators outside the match.
    pub fn allow_external_output(&mut self, node: NodeId, port: usize) -> Result<(), PatternError> {
        self.op_mut(node)?.allowed_external_outputs.insert(port);
        Ok(())
    }

    /// Expose input `node_iport` of interior `node` as input `graph_iport`
    /// of `graph`.
    pub fn create_input_port(
        &mut self,
        graph: GraphId,
        graph_iport: usize,
        node: NodeId,
        node_iport: usize,
    ) -> Result<(), PatternError> {
        self.check_membership(graph, node)?;
        self.graphs[graph.0]
            .inner_consumers
            .entry(graph_iport)
            .or_default()
            .push((node, node_iport));
        Ok(())
    }

    /// Expose output `node_oport` of interior `node` as output `graph_oport`
    /// of `graph`.
    pub fn create_output_port(
        &mut self,
        graph: GraphId,
        graph_oport: usize,
        node: NodeId,
        node_oport: usize,
    ) -> Result<(), PatternError> {
        self.check_membership(graph, node)?;
        let producers = &mut self.graphs[graph.0].inner_producers;
        if producers.contains_key(&graph_oport) {
            return Err(PatternError::OutputPortTaken {
                graph,
                port: graph_oport,
            });
        }
        producers.insert(graph_oport, (node, node_oport));
        Ok(())
    }

    /// Validate and freeze the pattern.
    pub fn finish(self) -> Result<Pattern<G>, PatternError> {
        for (i, graph) in self.graphs.iter().enumerate() {
            if graph.nodes.is_empty() {
                return Err(PatternError::EmptyGraph(GraphId(i)));
            }
            for &(node, _) in graph.inner_consumers.values().flatten() {
                if self.owner[node.0] != GraphId(i) {
                    return Err(PatternError::ForeignNode {
                        node,
                        graph: GraphId(i),
                    });
                }
            }
            for &(node, _) in graph.inner_producers.values() {
                if self.owner[node.0] != GraphId(i) {
                    return Err(PatternError::ForeignNode {
                        node,
                        graph: GraphId(i),
                    });
                }
            }
        }
        Ok(Pattern {
            nodes: self.nodes,
            graphs: self.graphs,
            root: GraphId(0),
        })
    }

    fn append_node(
        &mut self,
        graph: GraphId,
        name: String,
        kind: NodeKind<G>,
        in_edges: Vec<InEdge>,
    ) -> Result<NodeId, PatternError> {
        self.check_graph(graph)?;
        let node = NodeId(self.nodes.len());
        let mut inputs: BTreeMap<usize, Producer> = BTreeMap::new();
        for (port, (prod, prod_oport)) in in_edges {
            self.check_membership(graph, prod)?;
            if inputs.insert(port, (prod, prod_oport)).is_some() {
                return Err(PatternError::InputTaken { node, port });
            }
        }
        // Record the reverse consumer relation on each producer.
        for (&port, &(prod, prod_oport)) in &inputs {
            self.nodes[prod.0]
                .outputs
                .entry(prod_oport)
                .or_default()
                .push((node, port));
        }
        self.nodes.push(PatternNode {
            name,
            inputs,
            outputs: BTreeMap::new(),
            kind,
        });
        self.owner.push(graph);
        self.graphs[graph.0].nodes.push(node);
        Ok(node)
    }

    fn check_node(&self, node: NodeId) -> Result<(), PatternError> {
        if node.0 >= self.nodes.len() {
            return Err(PatternError::UnknownNode(node));
        }
        Ok(())
    }

    fn check_graph(&self, graph: GraphId) -> Result<(), PatternError> {
        if graph.0 >= self.graphs.len() {
            return Err(PatternError::UnknownGraph(graph));
        }
        Ok(())
    }

    fn check_membership(&self, graph: GraphId, node: NodeId) -> Result<(), PatternError> {
        self.check_graph(graph)?;
        self.check_node(node)?;
        if self.owner[node.0] != graph {
            return Err(PatternError::ForeignNode { node, graph });
        }
        Ok(())
    }

    fn op_mut(&mut self, node: NodeId) -> Result<&mut OpPattern<G>, PatternError> {
        self.check_node(node)?;
        match &mut self.nodes[node.0].kind {
            NodeKind::Op(op) => Ok(op),
            _ => Err(PatternError::NotAnOp(node)),
        }
    }
}

impl<G: HostGraph> Default for PatternBuilder<G> {
    fn default() -> Self {
        Self::new()
    }
}
