// crates/elspeth-core/src/graph.rs
// ============================================================================
// Module: Elspeth Execution Graph
// Description: Validated acyclic multigraph over pipeline nodes.
// Purpose: Build, validate, and schedule the pipeline topology.
// Dependencies: crate::{contracts, pipeline}, serde_json
// ============================================================================

//! ## Overview
//! The execution graph is an acyclic directed multigraph with two label-space
//! invariants: edge labels are unique per source node, and every gate route
//! target is one of the graph's sinks. Node identifiers are opaque; all
//! topology questions go through the explicit maps below, never through
//! identifier string inspection.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

use crate::contracts::IdGenerator;
use crate::contracts::NodeId;
use crate::contracts::NodeType;
use crate::contracts::RoutingMode;
use crate::pipeline::PipelineSpec;
use crate::pipeline::RouteTarget;
use crate::pipeline::StageKind;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Label of the default chain edge out of every non-terminal node.
pub const CONTINUE_LABEL: &str = "continue";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised during graph construction and validation.
#[derive(Debug, Error)]
pub enum GraphValidationError {
    /// The graph contains a cycle.
    #[error("execution graph contains a cycle")]
    CycleDetected,
    /// The graph has no sinks.
    #[error("execution graph has no sinks")]
    NoSinks,
    /// The configured output sink is not defined.
    #[error("output sink {name:?} is not defined")]
    UnknownOutputSink {
        /// Missing sink name.
        name: String,
    },
    /// A gate route targets an unknown sink.
    #[error("route {label:?} on {plugin:?} targets unknown sink {target:?}")]
    UnknownRouteTarget {
        /// Gate plugin name.
        plugin: String,
        /// Route label.
        label: String,
        /// Missing sink name.
        target: String,
    },
    /// Two edges out of one node share a label.
    #[error("duplicate edge label {label:?} out of node {node}")]
    DuplicateLabel {
        /// Source node identifier.
        node: NodeId,
        /// Colliding label.
        label: String,
    },
    /// A route was declared on a non-gate plugin.
    #[error("plugin {plugin:?} declares routes but is not a gate")]
    RoutesOnNonGate {
        /// Offending plugin name.
        plugin: String,
    },
    /// An aggregation plugin is missing its binding.
    #[error("aggregation plugin {plugin:?} has no trigger binding")]
    MissingAggregationBinding {
        /// Offending plugin name.
        plugin: String,
    },
}

// ============================================================================
// SECTION: Graph Elements
// ============================================================================

/// One node in the execution graph.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphNode {
    /// Opaque node identifier.
    pub node_id: NodeId,
    /// Node type.
    pub node_type: NodeType,
    /// Plugin name the node binds.
    pub plugin_name: String,
    /// Position in the linear chain; absent for sinks.
    pub sequence: Option<u32>,
    /// Sink name for sink nodes.
    pub sink_name: Option<String>,
    /// Node configuration as supplied by the specification.
    pub options: Value,
}

/// One directed, labelled edge.
///
/// # Invariants
/// - `label` is unique among edges sharing `from`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEdge {
    /// Source node identifier.
    pub from: NodeId,
    /// Target node identifier.
    pub to: NodeId,
    /// Routing label.
    pub label: String,
    /// Default routing mode.
    pub mode: RoutingMode,
}

// ============================================================================
// SECTION: Execution Graph
// ============================================================================

/// Validated acyclic execution graph.
#[derive(Debug, Clone)]
pub struct ExecutionGraph {
    /// Nodes in registration order.
    nodes: Vec<GraphNode>,
    /// Edges in registration order.
    edges: Vec<GraphEdge>,
    /// Source node identifier.
    source: NodeId,
    /// Sink name to node identifier map.
    sink_ids: BTreeMap<String, NodeId>,
    /// Chain sequence to node identifier map.
    transform_ids: BTreeMap<u32, NodeId>,
}

impl ExecutionGraph {
    /// Builds a graph from a pipeline specification.
    ///
    /// Creates nodes for the source, the row plugins in order, and the sinks;
    /// creates `continue` edges for the linear chain ending at the output
    /// sink, plus one labelled edge per gate route.
    ///
    /// # Errors
    ///
    /// Returns [`GraphValidationError`] when the specification violates any
    /// graph invariant.
    pub fn from_spec(
        spec: &PipelineSpec,
        ids: &IdGenerator,
    ) -> Result<Self, GraphValidationError> {
        let mut nodes = Vec::new();
        let mut sink_ids = BTreeMap::new();
        let mut transform_ids = BTreeMap::new();

        let source_id = NodeId::new(ids.next_id(&format!("source_{}", spec.source.plugin)));
        nodes.push(GraphNode {
            node_id: source_id.clone(),
            node_type: NodeType::Source,
            plugin_name: spec.source.plugin.clone(),
            sequence: None,
            sink_name: None,
            options: spec.source.options.clone(),
        });

        for (name, sink) in &spec.sinks {
            let sink_id = NodeId::new(ids.next_id(&format!("sink_{}", sink.plugin)));
            sink_ids.insert(name.clone(), sink_id.clone());
            nodes.push(GraphNode {
                node_id: sink_id,
                node_type: NodeType::Sink,
                plugin_name: sink.plugin.clone(),
                sequence: None,
                sink_name: Some(name.clone()),
                options: sink.options.clone(),
            });
        }
        if sink_ids.is_empty() {
            return Err(GraphValidationError::NoSinks);
        }
        let Some(output_sink_id) = sink_ids.get(&spec.output_sink).cloned() else {
            return Err(GraphValidationError::UnknownOutputSink {
                name: spec.output_sink.clone(),
            });
        };

        let mut chain = vec![source_id.clone()];
        for (index, row_plugin) in spec.row_plugins.iter().enumerate() {
            let sequence = u32::try_from(index).map_or(u32::MAX, |value| value);
            let (node_type, prefix) = match row_plugin.kind {
                StageKind::Transform => (NodeType::Transform, "transform"),
                StageKind::Gate => (NodeType::Gate, "gate"),
                StageKind::Aggregation => (NodeType::Aggregation, "aggregation"),
            };
            if row_plugin.kind != StageKind::Gate && !row_plugin.routes.is_empty() {
                return Err(GraphValidationError::RoutesOnNonGate {
                    plugin: row_plugin.plugin.clone(),
                });
            }
            if row_plugin.kind == StageKind::Aggregation && row_plugin.aggregation.is_none() {
                return Err(GraphValidationError::MissingAggregationBinding {
                    plugin: row_plugin.plugin.clone(),
                });
            }
            let node_id =
                NodeId::new(ids.next_id(&format!("{prefix}_{}", row_plugin.plugin)));
            transform_ids.insert(sequence, node_id.clone());
            nodes.push(GraphNode {
                node_id: node_id.clone(),
                node_type,
                plugin_name: row_plugin.plugin.clone(),
                sequence: Some(sequence),
                sink_name: None,
                options: row_plugin.options.clone(),
            });
            chain.push(node_id);
        }
        chain.push(output_sink_id);

        let mut edges = Vec::new();
        for pair in chain.windows(2) {
            edges.push(GraphEdge {
                from: pair[0].clone(),
                to: pair[1].clone(),
                label: CONTINUE_LABEL.to_string(),
                mode: RoutingMode::Move,
            });
        }

        for (index, row_plugin) in spec.row_plugins.iter().enumerate() {
            if row_plugin.kind != StageKind::Gate {
                continue;
            }
            let sequence = u32::try_from(index).map_or(u32::MAX, |value| value);
            let Some(gate_id) = transform_ids.get(&sequence).cloned() else {
                continue;
            };
            for (label, target) in &row_plugin.routes {
                let RouteTarget::Sink(sink_name) = target else {
                    continue;
                };
                let Some(target_id) = sink_ids.get(sink_name).cloned() else {
                    return Err(GraphValidationError::UnknownRouteTarget {
                        plugin: row_plugin.plugin.clone(),
                        label: label.clone(),
                        target: sink_name.clone(),
                    });
                };
                edges.push(GraphEdge {
                    from: gate_id.clone(),
                    to: target_id,
                    label: label.clone(),
                    mode: RoutingMode::Move,
                });
            }
        }

        let graph = Self {
            nodes,
            edges,
            source: source_id,
            sink_ids,
            transform_ids,
        };
        graph.validate()?;
        Ok(graph)
    }

    /// Validates the graph invariants.
    ///
    /// # Errors
    ///
    /// Returns [`GraphValidationError`] on cycles, missing sinks, or label
    /// collisions.
    pub fn validate(&self) -> Result<(), GraphValidationError> {
        if self.sink_ids.is_empty() {
            return Err(GraphValidationError::NoSinks);
        }
        for (index, edge) in self.edges.iter().enumerate() {
            let duplicate = self.edges[..index]
                .iter()
                .any(|other| other.from == edge.from && other.label == edge.label);
            if duplicate {
                return Err(GraphValidationError::DuplicateLabel {
                    node: edge.from.clone(),
                    label: edge.label.clone(),
                });
            }
        }
        self.topological_order().map(|_| ())
    }

    /// Returns the nodes in a deterministic topological order.
    ///
    /// # Errors
    ///
    /// Returns [`GraphValidationError::CycleDetected`] when no ordering
    /// exists.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, GraphValidationError> {
        let mut in_degree: BTreeMap<&NodeId, usize> =
            self.nodes.iter().map(|node| (&node.node_id, 0)).collect();
        for edge in &self.edges {
            if let Some(degree) = in_degree.get_mut(&edge.to) {
                *degree += 1;
            }
        }
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut ready: Vec<&NodeId> = self
            .nodes
            .iter()
            .map(|node| &node.node_id)
            .filter(|id| in_degree.get(id).copied() == Some(0))
            .collect();
        while let Some(next) = ready.first().cloned() {
            ready.remove(0);
            order.push(next.clone());
            for edge in &self.edges {
                if &edge.from != next {
                    continue;
                }
                if let Some(degree) = in_degree.get_mut(&edge.to) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(&edge.to);
                    }
                }
            }
        }
        if order.len() != self.nodes.len() {
            return Err(GraphValidationError::CycleDetected);
        }
        Ok(order)
    }

    /// Returns the source node identifier.
    #[must_use]
    pub const fn get_source(&self) -> &NodeId {
        &self.source
    }

    /// Returns the sink node identifiers in name order.
    #[must_use]
    pub fn get_sinks(&self) -> Vec<NodeId> {
        self.sink_ids.values().cloned().collect()
    }

    /// Returns the sink name to node identifier map.
    #[must_use]
    pub const fn get_sink_id_map(&self) -> &BTreeMap<String, NodeId> {
        &self.sink_ids
    }

    /// Returns the chain sequence to node identifier map.
    #[must_use]
    pub const fn get_transform_id_map(&self) -> &BTreeMap<u32, NodeId> {
        &self.transform_ids
    }

    /// Returns the edges in registration order.
    #[must_use]
    pub fn get_edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    /// Returns the nodes in registration order.
    #[must_use]
    pub fn get_nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    /// Returns node details by identifier.
    #[must_use]
    pub fn get_node_info(&self, node_id: &NodeId) -> Option<&GraphNode> {
        self.nodes.iter().find(|node| &node.node_id == node_id)
    }

    /// Returns the edge out of `from` carrying `label`.
    #[must_use]
    pub fn edge_by_label(&self, from: &NodeId, label: &str) -> Option<&GraphEdge> {
        self.edges.iter().find(|edge| &edge.from == from && edge.label == label)
    }
}
