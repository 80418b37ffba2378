use serde::{Deserialize, Serialize};

/// What a node does when the engine reaches it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    /// Invoke a named agent with a prompt built from the goal and the previous output.
    #[serde(alias = "agent", alias = "agentNode")]
    AgentStep,
    /// Wait a fixed number of milliseconds.
    #[serde(alias = "delay", alias = "delayNode")]
    DelayStep,
    /// Entry marker. Never executed as a step.
    Start,
    /// Any kind this engine does not know. Executed as a no-op.
    #[default]
    #[serde(other)]
    Other,
}

/// Per-node payload. Every field is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeData {
    #[serde(default, alias = "agent_name", skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default, alias = "delay_ms", skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// A node in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier for this node.
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: NodeKind,
    #[serde(default)]
    pub data: NodeData,
}

impl Node {
    /// Create an agent step bound to `agent_name`.
    pub fn agent(id: impl Into<String>, agent_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::AgentStep,
            data: NodeData {
                agent_name: Some(agent_name.into()),
                ..NodeData::default()
            },
        }
    }

    /// Create a delay step.
    pub fn delay(id: impl Into<String>, delay_ms: u64) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::DelayStep,
            data: NodeData {
                delay_ms: Some(delay_ms as f64),
                ..NodeData::default()
            },
        }
    }

    /// Create a node of an arbitrary kind with empty data.
    pub fn other(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            data: NodeData::default(),
        }
    }

    /// Set the task for an agent step.
    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.data.task = Some(task.into());
        self
    }

    /// Set the display label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.data.label = Some(label.into());
        self
    }

    /// The bound agent name, if set and not blank.
    pub fn agent_name(&self) -> Option<&str> {
        non_blank(self.data.agent_name.as_deref())
    }

    /// The step task, if set and not blank.
    pub fn task(&self) -> Option<&str> {
        non_blank(self.data.task.as_deref())
    }

    /// Effective delay in milliseconds. Unset, non-finite, or non-positive
    /// values fall back to `default_ms`.
    pub fn delay_ms(&self, default_ms: u64) -> u64 {
        match self.data.delay_ms {
            Some(ms) if ms.is_finite() && ms > 0.0 => ms.round() as u64,
            _ => default_ms,
        }
    }
}

pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_aliases() {
        for (wire, kind) in [
            ("agentStep", NodeKind::AgentStep),
            ("agentNode", NodeKind::AgentStep),
            ("agent", NodeKind::AgentStep),
            ("delayStep", NodeKind::DelayStep),
            ("delayNode", NodeKind::DelayStep),
            ("delay", NodeKind::DelayStep),
            ("start", NodeKind::Start),
            ("stickyNote", NodeKind::Other),
        ] {
            let json = format!(r#"{{"id":"n","type":"{}"}}"#, wire);
            let node: Node = serde_json::from_str(&json).unwrap();
            assert_eq!(node.kind, kind, "wire type {}", wire);
        }
    }

    #[test]
    fn test_missing_type_is_other() {
        let node: Node = serde_json::from_str(r#"{"id":"n"}"#).unwrap();
        assert_eq!(node.kind, NodeKind::Other);
        assert_eq!(node.data, NodeData::default());
    }

    #[test]
    fn test_node_data_camel_case() {
        let json = r#"{"id":"a","type":"agentNode","data":{"agentName":"researcher","task":"Dig","label":"A"},"position":{"x":0,"y":0}}"#;
        let node: Node = serde_json::from_str(json).unwrap();
        assert_eq!(node.agent_name(), Some("researcher"));
        assert_eq!(node.task(), Some("Dig"));
        assert_eq!(node.data.label.as_deref(), Some("A"));
    }

    #[test]
    fn test_blank_fields_count_as_unset() {
        let node = Node::agent("a", "  ").with_task("\n");
        assert_eq!(node.agent_name(), None);
        assert_eq!(node.task(), None);
    }

    #[test]
    fn test_delay_defaults() {
        assert_eq!(Node::delay("d", 250).delay_ms(1000), 250);
        assert_eq!(Node::other("d", NodeKind::DelayStep).delay_ms(1000), 1000);

        let mut node = Node::delay("d", 0);
        assert_eq!(node.delay_ms(1000), 1000);
        node.data.delay_ms = Some(-5.0);
        assert_eq!(node.delay_ms(1000), 1000);
        node.data.delay_ms = Some(f64::NAN);
        assert_eq!(node.delay_ms(1000), 1000);
    }
}
