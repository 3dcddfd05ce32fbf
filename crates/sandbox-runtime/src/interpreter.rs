//! The declarative flow interpreter.
//!
//! A [`FlowDefinition`] is a small data-driven state machine — no code is
//! ever loaded or evaluated, only the closed node vocabulary
//! `sandbox_types::flow::NodeKind` enumerates. Bounded to 128 step
//! transitions per run; `Curl` rejects non-HTTPS URLs before ever
//! reaching the hardware/network broker; `PersistState` writes only
//! through the filesystem broker proxy, never touches the local
//! filesystem directly (the sandbox process has no ambient filesystem
//! authority of its own).

use std::collections::HashMap;

use tokio::io::{AsyncRead, AsyncWrite};
use url::Url;

use sandbox_types::flow::{FlowDefinition, NodeKind};

use crate::proxy::{BrokerProxies, BrokerProxy};

/// Per-flow-run step budget. Exceeding this aborts the run with
/// `step_limit_exceeded` rather than looping forever on a malformed or
/// adversarial flow graph.
pub const STEP_LIMIT: u32 = 128;

/// The mutable state a flow run threads through its nodes: a flat JSON
/// object, matched against the `SetState`/`SetField`/`Increment` node
/// semantics, which all address fields of a single object rather than
/// an arbitrary document.
pub type FlowState = serde_json::Map<String, serde_json::Value>;

/// The outcome of one interpreter run.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowOutcome {
    pub ok: bool,
    pub error: Option<String>,
    pub state: FlowState,
}

/// Executes [`FlowDefinition`] graphs against a [`BrokerProxy`] for the
/// handful of node kinds that need a host-side effect (`Curl`,
/// `PersistState`, `EmitMessage`, `ShowToast`, `Navigate`).
pub struct FlowInterpreter<'a, S> {
    proxies: BrokerProxies<'a, S>,
}

impl<'a, S: AsyncRead + AsyncWrite + Unpin> FlowInterpreter<'a, S> {
    pub fn new(proxy: &'a BrokerProxy<S>) -> Self {
        Self { proxies: BrokerProxies::new(proxy) }
    }

    /// Run `flow` starting at its declared entry node, with `initial_state`
    /// as the starting state object.
    pub async fn run(&self, flow: &FlowDefinition, initial_state: FlowState) -> FlowOutcome {
        let mut state = initial_state;
        let mut current = flow.entry_node.clone();
        let mut steps = 0u32;

        loop {
            if steps >= STEP_LIMIT {
                return FlowOutcome { ok: false, error: Some("step_limit_exceeded".to_string()), state };
            }
            steps += 1;

            let Some(node) = flow.node(&current) else {
                return FlowOutcome {
                    ok: false,
                    error: Some(format!("unknown node '{current}' in flow '{}'", flow.id)),
                    state,
                };
            };

            let next = match self.execute(node, &mut state).await {
                Ok(next) => next,
                Err(message) => return FlowOutcome { ok: false, error: Some(message), state },
            };

            match next {
                Some(id) => current = id,
                None => return FlowOutcome { ok: true, error: None, state },
            }
        }
    }

    /// Execute one node against `state`, returning the id of the next
    /// node to run (`None` ends the flow).
    async fn execute(
        &self,
        node: &sandbox_types::flow::Node,
        state: &mut FlowState,
    ) -> Result<Option<String>, String> {
        match &node.kind {
            NodeKind::SetState { path, value } => {
                state.insert(path.clone(), value.clone());
            }
            NodeKind::SetField { field, value } => {
                state.insert(field.clone(), value.clone());
            }
            NodeKind::Increment { field, by } => {
                let current = state.get(field).and_then(|v| v.as_f64()).unwrap_or(0.0);
                state.insert(field.clone(), serde_json::json!(current + by));
            }
            NodeKind::IfElse { condition_field, then, otherwise } => {
                let truthy = state.get(condition_field).and_then(|v| v.as_bool()).unwrap_or(false);
                return Ok(Some(if truthy { then.clone() } else { otherwise.clone() }));
            }
            NodeKind::Filter { field, predicate_field } => {
                let predicate = state.get(predicate_field).and_then(|v| v.as_array()).cloned().unwrap_or_default();
                let allowed: std::collections::HashSet<String> =
                    predicate.iter().filter_map(|v| v.as_str().map(str::to_string)).collect();
                if let Some(serde_json::Value::Array(items)) = state.get(field).cloned() {
                    let filtered: Vec<_> = items
                        .into_iter()
                        .filter(|item| item.as_str().map(|s| allowed.contains(s)).unwrap_or(false))
                        .collect();
                    state.insert(field.clone(), serde_json::Value::Array(filtered));
                }
            }
            NodeKind::ShowToast { message } => {
                self.proxies
                    .submit_log("info", "flow.toast", message)
                    .await
                    .map_err(|e| e.to_string())?;
            }
            NodeKind::Navigate { target } => {
                state.insert("_navigated_to".to_string(), serde_json::json!(target));
            }
            NodeKind::EmitMessage { receiver, payload_field } => {
                let payload = state.get(payload_field).cloned().unwrap_or(serde_json::Value::Null);
                self.proxies.send_message(receiver, payload).await.map_err(|e| e.to_string())?;
            }
            NodeKind::PersistState => {
                let path = format!("flow-state/{}.json", node.id);
                self.proxies.create_file(&path).await.map_err(|e| e.to_string())?;
            }
            NodeKind::Curl { url, method: _, status_field, response_field } => {
                self.run_curl(url, status_field, response_field, state).await;
            }
        }
        Ok(node.next.clone())
    }

    /// `Curl` rejects any non-HTTPS URL before a broker call is ever
    /// made: the response field becomes `""` and the status field `-1`.
    async fn run_curl(&self, url: &str, status_field: &str, response_field: &str, state: &mut FlowState) {
        let is_https = Url::parse(url).map(|u| u.scheme() == "https").unwrap_or(false);
        if !is_https {
            state.insert(status_field.to_string(), serde_json::json!(-1));
            state.insert(response_field.to_string(), serde_json::json!(""));
            return;
        }

        match self.proxies.http_get(url).await {
            Ok((status, body)) => {
                state.insert(status_field.to_string(), serde_json::json!(status));
                state.insert(response_field.to_string(), serde_json::json!(body));
            }
            Err(_) => {
                state.insert(status_field.to_string(), serde_json::json!(-1));
                state.insert(response_field.to_string(), serde_json::json!(""));
            }
        }
    }
}

/// Build a chain of `count` `SetState` nodes, each pointing at the next,
/// the last pointing nowhere. Used by tests exercising the step limit and
/// by the runtime's synthetic flows.
pub fn linear_chain(prefix: &str, count: usize) -> HashMap<String, sandbox_types::flow::Node> {
    let mut nodes = HashMap::new();
    for i in 0..count {
        let id = format!("{prefix}{i}");
        let next = if i + 1 < count { Some(format!("{prefix}{}", i + 1)) } else { None };
        nodes.insert(
            id.clone(),
            sandbox_types::flow::Node {
                id,
                kind: NodeKind::SetState { path: "i".to_string(), value: serde_json::json!(i) },
                next,
            },
        );
    }
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandbox_types::flow::{Node, Trigger};
    use sandbox_types::PluginId;
    use sandbox_types::SessionToken;

    fn flow_with(entry: &str, nodes: HashMap<String, Node>) -> FlowDefinition {
        FlowDefinition { id: "test-flow".to_string(), trigger: Trigger::OnLoad, entry_node: entry.to_string(), nodes }
    }

    #[tokio::test]
    async fn set_state_and_increment_update_fields() {
        let (client, _server) = tokio::io::duplex(8192);
        let proxy = BrokerProxy::new(client, PluginId::new("demo-automation").unwrap(), SessionToken(1));
        let interpreter = FlowInterpreter::new(&proxy);

        let mut nodes = HashMap::new();
        nodes.insert(
            "a".to_string(),
            Node { id: "a".to_string(), kind: NodeKind::SetField { field: "count".to_string(), value: serde_json::json!(1) }, next: Some("b".to_string()) },
        );
        nodes.insert(
            "b".to_string(),
            Node { id: "b".to_string(), kind: NodeKind::Increment { field: "count".to_string(), by: 4.0 }, next: None },
        );
        let flow = flow_with("a", nodes);

        let outcome = interpreter.run(&flow, FlowState::new()).await;
        assert!(outcome.ok);
        assert_eq!(outcome.state["count"], serde_json::json!(5.0));
    }

    #[tokio::test]
    async fn exceeding_step_limit_aborts_the_run() {
        let (client, _server) = tokio::io::duplex(8192);
        let proxy = BrokerProxy::new(client, PluginId::new("demo-automation").unwrap(), SessionToken(1));
        let interpreter = FlowInterpreter::new(&proxy);

        let flow = flow_with("n0", linear_chain("n", 140));
        let outcome = interpreter.run(&flow, FlowState::new()).await;

        assert!(!outcome.ok);
        assert_eq!(outcome.error.as_deref(), Some("step_limit_exceeded"));
    }

    #[tokio::test]
    async fn http_url_short_circuits_without_a_broker_call() {
        let (client, _server) = tokio::io::duplex(8192);
        let proxy = BrokerProxy::new(client, PluginId::new("demo-automation").unwrap(), SessionToken(1));
        let interpreter = FlowInterpreter::new(&proxy);

        let mut nodes = HashMap::new();
        nodes.insert(
            "curl".to_string(),
            Node {
                id: "curl".to_string(),
                kind: NodeKind::Curl {
                    url: "http://example.com".to_string(),
                    method: "GET".to_string(),
                    status_field: "s".to_string(),
                    response_field: "b".to_string(),
                },
                next: None,
            },
        );
        let flow = flow_with("curl", nodes);

        // `_server` half is never driven, so any accidental broker call
        // here would hang the test rather than silently pass.
        let outcome = interpreter.run(&flow, FlowState::new()).await;
        assert!(outcome.ok);
        assert_eq!(outcome.state["s"], serde_json::json!(-1));
        assert_eq!(outcome.state["b"], serde_json::json!(""));
    }

    #[tokio::test]
    async fn if_else_branches_on_condition_field() {
        let (client, _server) = tokio::io::duplex(8192);
        let proxy = BrokerProxy::new(client, PluginId::new("demo-automation").unwrap(), SessionToken(1));
        let interpreter = FlowInterpreter::new(&proxy);

        let mut nodes = HashMap::new();
        nodes.insert(
            "branch".to_string(),
            Node {
                id: "branch".to_string(),
                kind: NodeKind::IfElse { condition_field: "flag".to_string(), then: "yes".to_string(), otherwise: "no".to_string() },
                next: None,
            },
        );
        nodes.insert("yes".to_string(), Node { id: "yes".to_string(), kind: NodeKind::SetField { field: "branch".to_string(), value: serde_json::json!("yes") }, next: None });
        nodes.insert("no".to_string(), Node { id: "no".to_string(), kind: NodeKind::SetField { field: "branch".to_string(), value: serde_json::json!("no") }, next: None });
        let flow = flow_with("branch", nodes);

        let mut state = FlowState::new();
        state.insert("flag".to_string(), serde_json::json!(true));
        let outcome = interpreter.run(&flow, state).await;
        assert_eq!(outcome.state["branch"], serde_json::json!("yes"));
    }

    #[tokio::test]
    async fn unknown_entry_node_fails_cleanly() {
        let (client, _server) = tokio::io::duplex(8192);
        let proxy = BrokerProxy::new(client, PluginId::new("demo-automation").unwrap(), SessionToken(1));
        let interpreter = FlowInterpreter::new(&proxy);

        let flow = flow_with("missing", HashMap::new());
        let outcome = interpreter.run(&flow, FlowState::new()).await;
        assert!(!outcome.ok);
    }
}
