//! The enforcement pipeline shared by every privileged broker call.
//!
//! The steps run in order: re-derive identity from the session token,
//! check the capability, consume a rate-limit token, then
//! (broker-specific) normalize input and delegate. [`SecureWrapper::authorize`]
//! implements the first three steps and the audit side effects that go with
//! them; each broker performs its own input normalization (path containment,
//! URL scheme checks) and delegates only once `authorize` has returned the
//! caller's real identity.

use sandbox_types::{
    AuditEvent, AuditKind, AuditSeverity, Capability, PeerCredentials, PluginId, SandboxError, SessionToken,
};

use crate::analytics::{now_epoch, AnalyticsStore, Stream};
use crate::capability_manager::CapabilityManager;
use crate::identity::IdentityRegistry;
use crate::rate_limiter::RateLimiter;

/// Bundles the three host-process singletons every privileged call must
/// consult, plus the audit sink, behind a single entry point so no broker
/// can accidentally skip a step.
#[derive(Clone)]
pub struct SecureWrapper {
    identity: IdentityRegistry,
    capabilities: CapabilityManager,
    rate_limiter: RateLimiter,
    analytics: AnalyticsStore,
}

impl SecureWrapper {
    pub fn new(
        identity: IdentityRegistry,
        capabilities: CapabilityManager,
        rate_limiter: RateLimiter,
        analytics: AnalyticsStore,
    ) -> Self {
        Self { identity, capabilities, rate_limiter, analytics }
    }

    /// Run identity re-derivation, capability enforcement, and rate
    /// limiting for one call to `method` requiring `capability`. Returns
    /// the verified plugin id (never the caller's claimed one) on success.
    ///
    /// `peer_credentials` is the OS-level fact the transport captured when
    /// it accepted this connection, not anything the sandbox sent in the
    /// call itself; when present, identity is re-derived with the
    /// stronger token+credentials binding (`IdentityRegistry::verify_with_credentials`)
    /// so a session token replayed from a different process is rejected on
    /// every call, not just at handshake.
    pub async fn authorize(
        &self,
        claimed_plugin_id: &PluginId,
        session_token: SessionToken,
        method: &str,
        capability: &Capability,
        peer_credentials: Option<&PeerCredentials>,
    ) -> Result<PluginId, SandboxError> {
        let verified_identity = match peer_credentials {
            Some(credentials) => self.identity.verify_with_credentials(session_token, credentials),
            None => self.identity.verify(session_token),
        };

        let verified = match verified_identity {
            Some(ref verified) if verified == claimed_plugin_id => verified.clone(),
            _ => {
                self.audit(
                    AuditKind::SpoofingAttempt,
                    AuditSeverity::High,
                    Some(claimed_plugin_id.as_str().to_string()),
                    format!("claimed plugin id '{claimed_plugin_id}' did not match the session's verified identity"),
                )
                .await;
                return Err(SandboxError::IdentityMismatch { claimed: claimed_plugin_id.as_str().to_string() });
            }
        };

        if !self.capabilities.is_granted(&verified, capability) {
            self.audit(
                AuditKind::CapabilityDenied,
                AuditSeverity::Warning,
                Some(verified.as_str().to_string()),
                format!("capability '{capability}' denied for method '{method}'"),
            )
            .await;
            return Err(SandboxError::CapabilityDenied {
                plugin_id: verified.as_str().to_string(),
                capability: capability.as_str().to_string(),
            });
        }

        if let Err(err) = self.rate_limiter.check(method, verified.as_str()) {
            self.audit(
                AuditKind::RateLimited,
                AuditSeverity::Info,
                Some(verified.as_str().to_string()),
                format!("rate limited on method '{method}'"),
            )
            .await;
            return Err(err.into_sandbox_error());
        }

        Ok(verified)
    }

    /// Append a security-stream audit event. Persistence is best-effort:
    /// a failure to write an audit record must never fail the call it
    /// describes, so errors are swallowed here (the analytics store's own
    /// append already logs internally on IO failure).
    pub async fn audit(&self, kind: AuditKind, severity: AuditSeverity, plugin_id: Option<String>, message: String) {
        let mut event = AuditEvent::new(now_epoch(), kind, severity, "secure_wrapper", message);
        if let Some(plugin_id) = plugin_id {
            event = event.with_plugin(plugin_id);
        }
        if let Err(err) = self.analytics.append(Stream::SecurityEvents, &event).await {
            tracing::error!(error = %err, "failed to persist audit event");
        }
    }
}
