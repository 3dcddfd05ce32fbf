//! The message envelope carried inside every IPC frame payload, and the
//! per-method deadline policy used to bound how long a caller waits.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sandbox_types::{PluginId, SandboxError, SessionToken};

/// A broker call proxied from a sandbox child to the host.
///
/// `claimed_plugin_id` is attacker-controlled data and is kept only for
/// diagnostics; every handler re-derives the caller's real identity from
/// `session_token` via the host's identity registry before trusting
/// anything else in the call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerCall {
    pub call_id: Uuid,
    pub session_token: SessionToken,
    pub claimed_plugin_id: PluginId,
    pub method: String,
    pub args: serde_json::Value,
}

/// The host's answer to a [`BrokerCall`], correlated by `call_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerReply {
    pub call_id: Uuid,
    pub result: Result<serde_json::Value, SandboxError>,
}

/// Everything that can cross the host/sandbox byte stream in either
/// direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum Envelope {
    /// Sandbox → host: a proxied broker call.
    Call(BrokerCall),
    /// Host → sandbox: the reply to a prior call.
    Reply(BrokerReply),
    /// Sandbox → host: handshake identity attestation.
    Handshake {
        plugin_id: PluginId,
        content_digest: String,
        pid: u32,
    },
    /// Host → sandbox: handshake acceptance, carrying the issued session.
    HandshakeAck { session_token: SessionToken },
    /// Either direction: a routed plugin message (see `sandbox_types::PluginMessage`).
    Message(serde_json::Value),
    /// Host → sandbox: graceful shutdown request.
    Shutdown,
    /// Sandbox → host: liveness probe response.
    Pong,
}

/// Per-method IPC deadlines. Every suspendable broker call is bounded by
/// one of these so a misbehaving broker or stalled host component cannot
/// wedge a sandbox indefinitely.
#[derive(Debug, Clone, Copy)]
pub struct DeadlinePolicy {
    pub default_call: Duration,
    pub handshake: Duration,
}

impl DeadlinePolicy {
    /// The deadline for a named broker method, falling back to
    /// `default_call` for anything not explicitly listed.
    pub fn for_method(&self, method: &str) -> Duration {
        match method {
            "handshake" | "load" => self.handshake,
            _ => self.default_call,
        }
    }
}

impl Default for DeadlinePolicy {
    fn default() -> Self {
        Self {
            default_call: Duration::from_secs(10),
            handshake: Duration::from_secs(5),
        }
    }
}
