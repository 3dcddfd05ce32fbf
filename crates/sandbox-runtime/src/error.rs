//! Internal error type for the sandbox process. Nothing here crosses the
//! IPC boundary directly: a [`RuntimeError`] either aborts the guest
//! process (bundle load failures, transport failures) or is mapped to a
//! [`sandbox_types::SandboxError`] by the flow interpreter before it ever
//! reaches plugin-visible state.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to read plugin bundle at {path}: {source}")]
    BundleRead { path: std::path::PathBuf, source: std::io::Error },

    #[error("malformed plugin manifest: {0}")]
    MalformedManifest(String),

    #[error("manifest config failed schema validation: {0:?}")]
    InvalidManifestConfig(Vec<sandbox_types::SchemaViolation>),

    #[error(transparent)]
    Ipc(#[from] sandbox_ipc::IpcError),

    #[error("host rejected the handshake")]
    HandshakeRejected,

    #[error("broker call failed: {0}")]
    Broker(#[from] sandbox_types::SandboxError),

    #[error("flow '{flow_id}' has no node '{node_id}'")]
    UnknownNode { flow_id: String, node_id: String },
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
