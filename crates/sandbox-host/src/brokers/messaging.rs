//! The inter-plugin messaging broker.
//!
//! Delivery is best-effort and at-most-once: each receiver has a bounded
//! queue and a full queue drops its oldest entry rather than blocking the
//! sender. `sendMessage` for a `Request`-kind message waits for a
//! correlated `sendResponse` call up to the IPC deadline, pairing
//! responses with requests by correlation id — an `Event` message is
//! fire-and-forget and returns as soon as it is queued.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::oneshot;
use uuid::Uuid;

use sandbox_types::{AuditKind, AuditSeverity, MessageKind, PluginId, PluginMessage, SandboxError};

use crate::analytics::now_epoch;
use crate::secure_wrapper::SecureWrapper;

#[derive(Debug, Deserialize)]
struct SendMessageArg {
    receiver: String,
    #[serde(default = "default_kind")]
    kind: MessageKind,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default = "default_ttl_ms")]
    ttl_ms: u64,
}

fn default_kind() -> MessageKind {
    MessageKind::Event
}

fn default_ttl_ms() -> u64 {
    30_000
}

#[derive(Debug, Deserialize)]
struct SendResponseArg {
    request_id: Uuid,
    receiver: String,
    #[serde(default)]
    payload: serde_json::Value,
}

fn now_ms() -> u64 {
    now_epoch().saturating_mul(1000)
}

/// Inter-plugin message routing with per-receiver bounded, drop-oldest
/// queues and request/response correlation.
#[derive(Clone)]
pub struct MessagingBroker {
    registered: Arc<DashSet<PluginId>>,
    queues: Arc<DashMap<PluginId, Mutex<VecDeque<PluginMessage>>>>,
    pending: Arc<DashMap<Uuid, oneshot::Sender<PluginMessage>>>,
    queue_capacity: usize,
    request_deadline: Duration,
}

impl MessagingBroker {
    pub fn new(queue_capacity: usize, request_deadline: Duration) -> Self {
        Self {
            registered: Arc::new(DashSet::new()),
            queues: Arc::new(DashMap::new()),
            pending: Arc::new(DashMap::new()),
            queue_capacity,
            request_deadline,
        }
    }

    fn parse<T: serde::de::DeserializeOwned>(args: &serde_json::Value) -> Result<T, SandboxError> {
        serde_json::from_value(args.clone()).map_err(|e| SandboxError::InvalidArgument(e.to_string()))
    }

    fn enqueue(&self, receiver: &PluginId, message: PluginMessage) {
        let mut queue = self.queues.entry(receiver.clone()).or_default().lock();
        if queue.len() >= self.queue_capacity {
            queue.pop_front();
        }
        queue.push_back(message);
    }

    pub fn register_plugin(&self, plugin_id: &PluginId) -> Result<serde_json::Value, SandboxError> {
        self.registered.insert(plugin_id.clone());
        self.queues.entry(plugin_id.clone()).or_default();
        Ok(serde_json::json!({"registered": true}))
    }

    pub fn unregister_plugin(&self, plugin_id: &PluginId) -> Result<serde_json::Value, SandboxError> {
        self.registered.remove(plugin_id);
        self.queues.remove(plugin_id);
        Ok(serde_json::json!({"unregistered": true}))
    }

    /// Deliver `args` to its receiver. `Event` messages return immediately
    /// once queued; `Request` messages block for a correlated
    /// `sendResponse` up to the configured deadline.
    pub async fn send_message(&self, plugin_id: &PluginId, args: &serde_json::Value) -> Result<serde_json::Value, SandboxError> {
        let arg: SendMessageArg = Self::parse(args)?;
        let receiver = PluginId::new(&arg.receiver).map_err(|e| SandboxError::InvalidArgument(e.to_string()))?;
        let now = now_ms();

        let message = PluginMessage {
            id: Uuid::new_v4(),
            sender: plugin_id.clone(),
            receiver: receiver.clone(),
            kind: arg.kind,
            payload: arg.payload,
            correlation_id: None,
            expires_at_ms: now.saturating_add(arg.ttl_ms),
        };

        if !matches!(arg.kind, MessageKind::Request) {
            self.enqueue(&receiver, message);
            return Ok(serde_json::json!({"delivered": true}));
        }

        let (tx, rx) = oneshot::channel();
        self.pending.insert(message.id, tx);
        self.enqueue(&receiver, message.clone());

        match tokio::time::timeout(self.request_deadline, rx).await {
            Ok(Ok(response)) => Ok(serde_json::json!({
                "delivered": true,
                "response": response.payload,
            })),
            Ok(Err(_)) => {
                self.pending.remove(&message.id);
                Err(SandboxError::Internal)
            }
            Err(_) => {
                self.pending.remove(&message.id);
                Err(SandboxError::Timeout)
            }
        }
    }

    /// Drain every non-expired message currently queued for `plugin_id`.
    pub async fn receive_messages(&self, plugin_id: &PluginId) -> Result<serde_json::Value, SandboxError> {
        let now = now_ms();
        let messages = if let Some(queue) = self.queues.get(plugin_id) {
            let mut queue = queue.lock();
            let drained: Vec<PluginMessage> = queue.drain(..).collect();
            drained.into_iter().filter(|m| !m.is_expired(now)).collect::<Vec<_>>()
        } else {
            Vec::new()
        };
        serde_json::to_value(messages).map_err(|_| SandboxError::Internal)
    }

    /// Complete a pending request with its correlated response. A
    /// response addressed to a request that is no longer pending (the
    /// requester's sandbox died, or the request already timed out) is
    /// dropped and audited rather than treated as an error.
    pub async fn send_response(
        &self,
        plugin_id: &PluginId,
        args: &serde_json::Value,
        wrapper: &SecureWrapper,
    ) -> Result<serde_json::Value, SandboxError> {
        let arg: SendResponseArg = Self::parse(args)?;
        let receiver = PluginId::new(&arg.receiver).map_err(|e| SandboxError::InvalidArgument(e.to_string()))?;

        let Some((_, tx)) = self.pending.remove(&arg.request_id) else {
            wrapper
                .audit(
                    AuditKind::MessageDroppedDeadPlugin,
                    AuditSeverity::Info,
                    Some(plugin_id.as_str().to_string()),
                    format!("response for request '{}' has no pending requester", arg.request_id),
                )
                .await;
            return Ok(serde_json::json!(false));
        };

        let now = now_ms();
        let response = PluginMessage::response_to(arg.request_id, plugin_id.clone(), receiver, arg.payload, 30_000, now);
        match tx.send(response) {
            Ok(()) => Ok(serde_json::json!(true)),
            Err(_) => {
                wrapper
                    .audit(
                        AuditKind::MessageDroppedDeadPlugin,
                        AuditSeverity::Info,
                        Some(plugin_id.as_str().to_string()),
                        format!("requester for '{}' disconnected before the response arrived", arg.request_id),
                    )
                    .await;
                Ok(serde_json::json!(false))
            }
        }
    }
}
