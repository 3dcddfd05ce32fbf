//! Transport-level failure modes, distinct from the [`sandbox_types::SandboxError`]
//! taxonomy a call can fail with once it reaches a broker.

use thiserror::Error;

/// Errors that can occur while framing or routing IPC traffic.
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("frame did not start with the expected magic bytes")]
    BadMagic,

    #[error("unsupported frame protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("frame payload of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),

    #[error("failed to encode or decode frame payload: {0}")]
    Codec(String),

    #[error("the call's deadline elapsed before a response arrived")]
    DeadlineElapsed,

    #[error("the peer closed the connection")]
    PeerClosed,

    #[error("underlying transport error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for fallible IPC transport operations.
pub type IpcResult<T> = Result<T, IpcError>;
