//! Wire framing for the host/sandbox byte stream.
//!
//! Every frame is a fixed 9-byte header followed by a JSON payload:
//! 4-byte magic, 1-byte version, 4-byte big-endian payload length. JSON
//! (rather than a binary format) is deliberate: the sandbox side must
//! remain implementable without trusting a shared native codec, and
//! payloads here are small control messages, not bulk data (bulk
//! data crosses the boundary as file handles, never as frame payload).

use bytes::{Buf, BufMut, BytesMut};
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{IpcError, IpcResult};

pub(crate) const MAGIC: [u8; 4] = *b"SBX1";
pub(crate) const VERSION: u8 = 1;
pub(crate) const HEADER_LEN: usize = 9;

/// Maximum payload size accepted by [`FrameCodec`]. Generous enough for
/// any control message; anything larger indicates a misbehaving or
/// malicious peer rather than a legitimate bulk transfer.
pub const MAX_FRAME_PAYLOAD: usize = 4 * 1024 * 1024;

/// A length-delimited, magic-prefixed frame codec for `tokio_util`'s
/// `Framed` adapter.
#[derive(Debug, Default)]
pub struct FrameCodec;

impl Encoder<BytesMut> for FrameCodec {
    type Error = IpcError;

    fn encode(&mut self, payload: BytesMut, dst: &mut BytesMut) -> IpcResult<()> {
        if payload.len() > MAX_FRAME_PAYLOAD {
            return Err(IpcError::FrameTooLarge(payload.len()));
        }
        dst.reserve(HEADER_LEN + payload.len());
        dst.put_slice(&MAGIC);
        dst.put_u8(VERSION);
        dst.put_u32(payload.len() as u32);
        dst.put_slice(&payload);
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = IpcError;

    fn decode(&mut self, src: &mut BytesMut) -> IpcResult<Option<BytesMut>> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let magic: [u8; 4] = src[0..4].try_into().expect("slice is 4 bytes");
        if magic != MAGIC {
            return Err(IpcError::BadMagic);
        }
        let version = src[4];
        if version != VERSION {
            return Err(IpcError::UnsupportedVersion(version));
        }
        let len = u32::from_be_bytes(src[5..9].try_into().expect("slice is 4 bytes")) as usize;
        if len > MAX_FRAME_PAYLOAD {
            return Err(IpcError::FrameTooLarge(len));
        }

        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        Ok(Some(src.split_to(len)))
    }
}

/// Serialize `value` to a JSON frame payload.
pub fn encode_payload<T: Serialize>(value: &T) -> IpcResult<BytesMut> {
    let bytes = serde_json::to_vec(value).map_err(|e| IpcError::Codec(e.to_string()))?;
    Ok(BytesMut::from(&bytes[..]))
}

/// Deserialize a frame payload into `T`.
pub fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> IpcResult<T> {
    serde_json::from_slice(payload).map_err(|e| IpcError::Codec(e.to_string()))
}
