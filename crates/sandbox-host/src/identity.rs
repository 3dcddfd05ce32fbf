//! Cross-process identity binding.
//!
//! The sandbox child's claimed plugin id is attacker-controlled data: a
//! malicious plugin can simply lie about which id it is. The
//! [`IdentityRegistry`] is the single authoritative source of truth —
//! every [`crate::secure_wrapper::SecureWrapper`] call re-derives identity
//! from the session token rather than trusting the caller's argument.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use rand::RngCore;

use sandbox_types::{PeerCredentials, PluginId, Session, SessionToken};

use crate::error::{HostError, HostResult};

/// What a sandbox child presents at handshake time to open a [`Session`].
#[derive(Debug, Clone)]
pub struct HandshakeClaim {
    pub plugin_id: PluginId,
    pub content_digest: String,
    pub peer_credentials: PeerCredentials,
}

/// The record the supervisor holds for which child it spawned for which
/// plugin, checked against a [`HandshakeClaim`] at handshake time.
#[derive(Debug, Clone)]
pub struct ExpectedSpawn {
    pub plugin_id: PluginId,
    pub content_digest: String,
}

/// Binds session tokens to verified plugin identities.
///
/// At most one active session exists per sandbox instance. Sessions do not
/// expire on idle; they end only when their sandbox terminates.
#[derive(Clone)]
pub struct IdentityRegistry {
    sessions: Arc<DashMap<SessionToken, Session>>,
    next_token_entropy: Arc<AtomicU64>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            next_token_entropy: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Attest a handshake claim against the spawn record the supervisor
    /// kept for this child, and issue a new session on success.
    ///
    /// On mismatch the caller is expected to log a `SPOOFING_ATTEMPT`
    /// audit event using the returned claimed id; this registry has no
    /// access to the analytics store itself.
    pub fn attest(
        &self,
        claim: HandshakeClaim,
        expected: &ExpectedSpawn,
        issued_epoch: u64,
    ) -> HostResult<Session> {
        if claim.plugin_id != expected.plugin_id || claim.content_digest != expected.content_digest {
            return Err(HostError::IdentityMismatch { claimed: claim.plugin_id.into() });
        }

        let token = self.mint_token();
        let session = Session {
            token,
            plugin_id: claim.plugin_id,
            issued_epoch,
            peer_credentials: claim.peer_credentials,
        };
        self.sessions.insert(token, session.clone());
        Ok(session)
    }

    /// The single authoritative identity source: `None` if the token is
    /// unknown (already closed, or never issued).
    pub fn verify(&self, token: SessionToken) -> Option<PluginId> {
        self.sessions.get(&token).map(|s| s.plugin_id.clone())
    }

    /// Verify both the token and that the presenting process still matches
    /// the credentials captured at handshake (the stronger binding used
    /// when peer credentials are available from the transport).
    pub fn verify_with_credentials(
        &self,
        token: SessionToken,
        credentials: &PeerCredentials,
    ) -> Option<PluginId> {
        let session = self.sessions.get(&token)?;
        if session.credentials_match(credentials) {
            Some(session.plugin_id.clone())
        } else {
            None
        }
    }

    /// Close a session, e.g. on sandbox termination.
    pub fn close(&self, token: SessionToken) {
        self.sessions.remove(&token);
    }

    /// Whether a session is currently open for `plugin_id`.
    pub fn has_active_session(&self, plugin_id: &PluginId) -> bool {
        self.sessions.iter().any(|entry| &entry.plugin_id == plugin_id)
    }

    fn mint_token(&self) -> SessionToken {
        let mut bytes = [0u8; 8];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let salt = self.next_token_entropy.fetch_add(1, Ordering::Relaxed);
        SessionToken(u64::from_le_bytes(bytes) ^ salt)
    }
}

impl Default for IdentityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Re-derive a caller's real identity and compare it to what they claimed,
/// per invariant P1. Returns `Ok(plugin_id)` only when they match.
pub fn verify_claim(
    registry: &IdentityRegistry,
    token: SessionToken,
    claimed: &PluginId,
) -> HostResult<PluginId> {
    match registry.verify(token) {
        Some(verified) if &verified == claimed => Ok(verified),
        _ => Err(HostError::IdentityMismatch { claimed: claimed.as_str().to_string() }),
    }
}
