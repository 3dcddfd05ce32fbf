//! Host-internal failure modes.
//!
//! These never cross the IPC boundary directly; [`HostError::into_sandbox_error`]
//! narrows each variant to the caller-visible [`sandbox_types::SandboxError`]
//! taxonomy so a sandbox never observes host internals (file paths, process
//! ids, raw IO messages).

use thiserror::Error;

use sandbox_types::SandboxError;

pub type HostResult<T> = Result<T, HostError>;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("plugin '{id}' not found")]
    PluginNotFound { id: String },

    #[error("plugin '{id}' is already loaded")]
    AlreadyLoaded { id: String },

    #[error("invalid lifecycle transition from {from:?} to {to:?} for plugin '{id}'")]
    InvalidTransition {
        id: String,
        from: sandbox_types::SandboxState,
        to: sandbox_types::SandboxState,
    },

    #[error("identity mismatch: claimed '{claimed}'")]
    IdentityMismatch { claimed: String },

    #[error("capability '{capability}' denied for plugin '{plugin_id}'")]
    CapabilityDenied { plugin_id: String, capability: String },

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("path '{0}' escapes the plugin sandbox root")]
    PathEscape(String),

    #[error("resource '{kind}' exceeded for plugin '{plugin_id}'")]
    ResourceExceeded { plugin_id: String, kind: String },

    #[error("operation timed out")]
    Timeout,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("sandbox process crashed")]
    SandboxCrash,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ipc transport error: {0}")]
    Ipc(#[from] sandbox_ipc::IpcError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl HostError {
    /// Narrow this internal error to the public, plugin-visible taxonomy.
    pub fn into_sandbox_error(self) -> SandboxError {
        match self {
            HostError::PluginNotFound { id } => SandboxError::NotFound(id),
            HostError::AlreadyLoaded { id } => {
                SandboxError::InvalidArgument(format!("plugin '{id}' already loaded"))
            }
            HostError::InvalidTransition { id, .. } => {
                SandboxError::InvalidArgument(format!("invalid lifecycle transition for '{id}'"))
            }
            HostError::IdentityMismatch { claimed } => SandboxError::IdentityMismatch { claimed },
            HostError::CapabilityDenied { plugin_id, capability } => {
                SandboxError::CapabilityDenied { plugin_id, capability }
            }
            HostError::RateLimited { retry_after_ms } => SandboxError::RateLimited { retry_after_ms },
            HostError::PathEscape(path) => SandboxError::PathEscape(path),
            HostError::ResourceExceeded { kind, .. } => SandboxError::ResourceExceeded { kind },
            HostError::Timeout => SandboxError::Timeout,
            HostError::InvalidArgument(msg) => SandboxError::InvalidArgument(msg),
            HostError::SandboxCrash => SandboxError::SandboxCrash,
            HostError::Io(_) | HostError::Ipc(_) | HostError::Internal(_) => SandboxError::Internal,
        }
    }
}
