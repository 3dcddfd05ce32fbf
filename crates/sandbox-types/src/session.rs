//! Identity-binding sessions.

use serde::{Deserialize, Serialize};

use crate::ids::PluginId;

/// A 64-bit random token binding an active sandbox instance to a verified
/// plugin id. Sessions do not expire on idle; they end only when the
/// sandbox they are bound to terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionToken(pub u64);

impl std::fmt::Display for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// OS-level credentials captured from the sandbox child at handshake time,
/// used for the stronger (token + credentials) identity binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerCredentials {
    /// Process id observed at handshake.
    pub pid: u32,
    /// Unix epoch seconds the process was observed to have started, used
    /// to detect pid reuse after a crash.
    pub start_epoch: u64,
}

/// A session binding a sandbox instance to a verified plugin identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// The token presented by the sandbox on every broker call.
    pub token: SessionToken,
    /// The plugin id this session is bound to.
    pub plugin_id: PluginId,
    /// Unix epoch seconds at which the session was issued.
    pub issued_epoch: u64,
    /// The child's OS credentials captured at handshake, used to detect a
    /// token replayed from a different (possibly impersonating) process.
    pub peer_credentials: PeerCredentials,
}

impl Session {
    /// Whether `credentials` still match the ones recorded at handshake.
    pub fn credentials_match(&self, credentials: &PeerCredentials) -> bool {
        &self.peer_credentials == credentials
    }
}
