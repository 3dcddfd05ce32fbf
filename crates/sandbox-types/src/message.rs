//! Plugin-to-plugin message envelopes carried by the messaging broker.

use serde::{Deserialize, Serialize};

use crate::ids::PluginId;

/// The delivery kind of a [`PluginMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// A fire-and-forget notification; no reply is expected.
    Event,
    /// A request awaiting a correlated [`MessageKind::Response`].
    Request,
    /// A reply to a prior `Request`, matched by `correlation_id`.
    Response,
}

/// A message routed between two plugins by the messaging broker.
///
/// Delivery is best-effort and at-most-once: the broker never retries and
/// never blocks a sender on a full receiver queue, it drops the oldest
/// queued message instead (see [`crate::error::SandboxError`] for the
/// caller-visible outcomes of a send).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginMessage {
    /// Unique id of this message.
    pub id: uuid::Uuid,
    /// The plugin that sent it.
    pub sender: PluginId,
    /// The plugin it is addressed to.
    pub receiver: PluginId,
    /// What kind of message this is.
    pub kind: MessageKind,
    /// Opaque, plugin-defined payload.
    pub payload: serde_json::Value,
    /// Links a `Response` back to the `Request` it answers. `None` for
    /// `Event` messages and for `Request`s that expect no particular
    /// correlation (fire-and-forget requests).
    pub correlation_id: Option<uuid::Uuid>,
    /// Unix epoch milliseconds after which the message is no longer worth
    /// delivering and may be dropped from its receiver's queue.
    pub expires_at_ms: u64,
}

impl PluginMessage {
    /// Build a new event message with no correlation id.
    pub fn event(sender: PluginId, receiver: PluginId, payload: serde_json::Value, ttl_ms: u64, now_ms: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            sender,
            receiver,
            kind: MessageKind::Event,
            payload,
            correlation_id: None,
            expires_at_ms: now_ms.saturating_add(ttl_ms),
        }
    }

    /// Build a response correlated to `request_id`.
    pub fn response_to(
        request_id: uuid::Uuid,
        sender: PluginId,
        receiver: PluginId,
        payload: serde_json::Value,
        ttl_ms: u64,
        now_ms: u64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            sender,
            receiver,
            kind: MessageKind::Response,
            payload,
            correlation_id: Some(request_id),
            expires_at_ms: now_ms.saturating_add(ttl_ms),
        }
    }

    /// Whether this message is still worth delivering at `now_ms`.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugin(name: &str) -> PluginId {
        PluginId::new(name).unwrap()
    }

    #[test]
    fn event_has_no_correlation_id() {
        let msg = PluginMessage::event(plugin("a-sender"), plugin("b-receiver"), serde_json::json!({}), 1000, 0);
        assert!(msg.correlation_id.is_none());
        assert_eq!(msg.kind, MessageKind::Event);
    }

    #[test]
    fn response_carries_correlation_id() {
        let request_id = uuid::Uuid::new_v4();
        let msg = PluginMessage::response_to(
            request_id,
            plugin("b-receiver"),
            plugin("a-sender"),
            serde_json::json!({"ok": true}),
            1000,
            0,
        );
        assert_eq!(msg.correlation_id, Some(request_id));
    }

    #[test]
    fn expiry_is_ttl_relative_to_now() {
        let msg = PluginMessage::event(plugin("a"), plugin("b"), serde_json::json!(null), 500, 1_000);
        assert!(!msg.is_expired(1_400));
        assert!(msg.is_expired(1_500));
    }
}
