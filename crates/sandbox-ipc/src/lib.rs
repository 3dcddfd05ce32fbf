//! Framing and envelope types shared by the host supervisor and the
//! sandboxed plugin runtime across the process boundary.

pub mod envelope;
pub mod error;
pub mod frame;
pub mod transport;

pub use envelope::{BrokerCall, BrokerReply, DeadlinePolicy, Envelope};
pub use error::{IpcError, IpcResult};
pub use frame::{decode_payload, encode_payload, FrameCodec, MAX_FRAME_PAYLOAD};
pub use transport::{read_envelope, write_envelope};
