//! The declarative flow graph format executed by the sandbox's flow interpreter.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What causes a [`FlowDefinition`] to begin executing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Fired when the host delivers a named plugin message.
    OnMessage { message_kind: String },
    /// Fired on a fixed interval, in seconds.
    OnInterval { seconds: u64 },
    /// Fired once when the plugin finishes loading.
    OnLoad,
}

/// A single step in a flow graph.
///
/// Node ids are graph-local strings; `next` names the node to run after
/// this one completes (`None` ends the flow). Nodes with branches (like
/// `IfElse`) instead name their successors inline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(flatten)]
    pub kind: NodeKind,
    pub next: Option<String>,
}

/// The operation a [`Node`] performs.
///
/// A fixed, non-extensible vocabulary: state and field mutation,
/// arithmetic, conditional branching, list filtering, a handful of
/// host-observable side effects (toast, navigate, emit message, persist),
/// and an outbound HTTPS call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    /// Replace the flow's entire state object at `path` with `value`.
    SetState { path: String, value: serde_json::Value },
    /// Replace a single field within the current state object.
    SetField { field: String, value: serde_json::Value },
    /// Add `by` to the numeric field named `field`.
    Increment { field: String, by: f64 },
    /// Branch on a boolean field; `then` and `otherwise` name successor
    /// node ids, overriding the node's own `next`.
    IfElse { condition_field: String, then: String, otherwise: String },
    /// Keep only the elements of the list at `field` matching `predicate_field`.
    Filter { field: String, predicate_field: String },
    /// Show a transient message to the user.
    ShowToast { message: String },
    /// Navigate the host UI to `target`.
    Navigate { target: String },
    /// Emit a message to another plugin.
    EmitMessage { receiver: String, payload_field: String },
    /// Persist the current state object to the plugin's storage.
    PersistState,
    /// Issue an outbound HTTPS request. Non-HTTPS URLs are rejected by the
    /// interpreter before the hardware/network broker is ever called: the
    /// response field is set to an empty string and the status field to
    /// `-1`, and no broker call is made.
    Curl { url: String, method: String, status_field: String, response_field: String },
}

/// A complete, host-validated flow graph as declared by a plugin manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub id: String,
    pub trigger: Trigger,
    pub entry_node: String,
    pub nodes: HashMap<String, Node>,
}

impl FlowDefinition {
    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looks_up_declared_nodes() {
        let mut nodes = HashMap::new();
        nodes.insert(
            "start".to_string(),
            Node {
                id: "start".to_string(),
                kind: NodeKind::ShowToast { message: "hi".to_string() },
                next: None,
            },
        );
        let flow = FlowDefinition {
            id: "welcome".to_string(),
            trigger: Trigger::OnLoad,
            entry_node: "start".to_string(),
            nodes,
        };
        assert!(flow.node("start").is_some());
        assert!(flow.node("missing").is_none());
    }

    #[test]
    fn node_kind_round_trips_through_json() {
        let kind = NodeKind::IfElse {
            condition_field: "is_admin".to_string(),
            then: "grant".to_string(),
            otherwise: "deny".to_string(),
        };
        let json = serde_json::to_string(&kind).unwrap();
        let back: NodeKind = serde_json::from_str(&json).unwrap();
        match back {
            NodeKind::IfElse { condition_field, .. } => assert_eq!(condition_field, "is_admin"),
            _ => panic!("wrong variant"),
        }
    }
}
