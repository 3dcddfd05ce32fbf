//! The append-only security audit event taxonomy.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Severity of an [`AuditEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSeverity {
    /// Informational, expected activity.
    Info,
    /// Worth a human's attention but not itself a security incident.
    Warning,
    /// A likely policy violation or attack attempt.
    High,
    /// A confirmed breach or host-endangering condition.
    Critical,
}

/// The kind of policy-relevant occurrence an [`AuditEvent`] records.
///
/// A closed set so callers match on an enum rather than a free string:
/// crash/spoofing/resource/protocol events plus the capability, rate
/// limit, session, and circuit breaker occurrences the rest of the host
/// emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// A sandbox process exited unexpectedly.
    SandboxCrash,
    /// A caller's claimed plugin id did not match its verified identity.
    SpoofingAttempt,
    /// A broker call was denied for lacking a required capability.
    CapabilityDenied,
    /// A capability was granted (at install or first use).
    CapabilityGranted,
    /// A per-(method, plugin) rate limit tripped.
    RateLimited,
    /// A plugin crossed a resource threshold.
    ResourceExceeded,
    /// A malformed IPC frame was dropped.
    SandboxProtocolViolation,
    /// A session was opened for a newly attested sandbox.
    SessionOpened,
    /// A session ended (sandbox termination, unload, or crash).
    SessionClosed,
    /// The logging broker's persistence circuit breaker opened.
    CircuitBreakerOpened,
    /// The logging broker's persistence circuit breaker closed again.
    CircuitBreakerClosed,
    /// A message/response was dropped because its receiver was already
    /// unregistered or unloaded.
    MessageDroppedDeadPlugin,
    /// A file system broker call attempted to escape the sandbox root.
    PathEscapeAttempt,
    /// A hardware/network broker call used a non-HTTPS URL without the
    /// low-security capability.
    InsecureUrlRejected,
}

/// A structured, append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event id.
    pub id: uuid::Uuid,
    /// Unix epoch seconds at which the event occurred.
    pub epoch: u64,
    /// What happened.
    pub kind: AuditKind,
    /// How serious it is.
    pub severity: AuditSeverity,
    /// The component that detected and emitted the event.
    pub source: String,
    /// The plugin id involved, if any.
    pub plugin_id: Option<String>,
    /// A short human-readable message.
    pub message: String,
    /// Structured details specific to `kind`.
    #[serde(default)]
    pub details: HashMap<String, serde_json::Value>,
}

impl AuditEvent {
    /// Construct a new audit event with no extra details.
    pub fn new(
        epoch: u64,
        kind: AuditKind,
        severity: AuditSeverity,
        source: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            epoch,
            kind,
            severity,
            source: source.into(),
            plugin_id: None,
            message: message.into(),
            details: HashMap::new(),
        }
    }

    /// Attach the plugin id this event concerns.
    pub fn with_plugin(mut self, plugin_id: impl Into<String>) -> Self {
        self.plugin_id = Some(plugin_id.into());
        self
    }

    /// Attach one structured detail field.
    pub fn with_detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}
