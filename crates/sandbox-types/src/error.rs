//! The structured error taxonomy at the host/sandbox IPC boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can cross the IPC boundary back to a plugin.
///
/// Every variant here is one a plugin is allowed to observe; internal
/// host-only failure modes (child spawn failures, config errors, and the
/// like) live in each crate's own error enum and are translated into
/// [`SandboxError::Internal`] before they reach a sandbox.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum SandboxError {
    /// The requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A request argument failed validation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A file system path escaped the plugin's sandbox root.
    #[error("path escapes sandbox root: {0}")]
    PathEscape(String),

    /// The claimed plugin id did not match the identity bound to the
    /// session token.
    #[error("identity mismatch for claimed plugin '{claimed}'")]
    IdentityMismatch {
        /// The plugin id the caller claimed to be.
        claimed: String,
    },

    /// The capability required for this operation was not granted.
    #[error("capability '{capability}' denied for plugin '{plugin_id}'")]
    CapabilityDenied {
        /// The plugin whose capability was checked.
        plugin_id: String,
        /// The capability that was missing.
        capability: String,
    },

    /// The per-(method, plugin) rate limit was exhausted.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited {
        /// Milliseconds the caller should wait before retrying.
        retry_after_ms: u64,
    },

    /// The call did not complete before its IPC deadline.
    #[error("operation timed out")]
    Timeout,

    /// A resource limit was exceeded.
    #[error("resource exceeded: {kind}")]
    ResourceExceeded {
        /// Which resource was exceeded (e.g. "memory", "cpu", "threads").
        kind: String,
    },

    /// The sandbox process crashed or was otherwise lost.
    #[error("sandbox crashed")]
    SandboxCrash,

    /// An unclassified internal failure. Never carries details that could
    /// leak host internal state to a plugin.
    #[error("internal error")]
    Internal,
}

/// Convenience alias for operations that return a [`SandboxError`].
pub type SandboxResult<T> = Result<T, SandboxError>;
