use std::collections::HashMap;

use tracing::warn;

use super::edge::Edge;
use super::node::{Node, NodeKind};

/// Id of the synthetic entry node. Edges leaving it select the first step.
pub const START_NODE_ID: &str = "goal_node";

/// An indexed, read-only workflow graph.
///
/// Nodes are indexed by id and outgoing edges are precomputed into an
/// adjacency list that keeps edge-list order, so the engine's "first edge
/// wins" rule is a slice index.
#[derive(Debug, Clone, Default)]
pub struct WorkflowGraph {
    nodes: HashMap<String, Node>,
    order: Vec<String>,
    adjacency: HashMap<String, Vec<String>>,
}

impl WorkflowGraph {
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        let mut index = HashMap::with_capacity(nodes.len());
        let mut order = Vec::with_capacity(nodes.len());
        for node in nodes {
            if index.contains_key(&node.id) {
                warn!(node_id = %node.id, "Duplicate node id, keeping the first");
                continue;
            }
            order.push(node.id.clone());
            index.insert(node.id.clone(), node);
        }

        let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
        for edge in edges {
            adjacency.entry(edge.source).or_default().push(edge.target);
        }

        Self {
            nodes: index,
            order,
            adjacency,
        }
    }

    /// Targets of the edges leaving `node_id`, in edge-list order.
    pub fn successors(&self, node_id: &str) -> &[String] {
        self.adjacency
            .get(node_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn first_successor(&self, node_id: &str) -> Option<&String> {
        self.successors(node_id).first()
    }

    pub fn node_by_id(&self, node_id: &str) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    /// Agent names bound to agent steps, in node order, without repeats.
    pub fn agent_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for id in &self.order {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            if node.kind != NodeKind::AgentStep {
                continue;
            }
            if let Some(name) = node.agent_name() {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
