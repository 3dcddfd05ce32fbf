//! A minimal async frame transport over a raw `AsyncRead`/`AsyncWrite`
//! stream, using the same wire format as [`crate::frame::FrameCodec`].
//!
//! The host and sandbox sides each hold a plain `UnixStream` half rather
//! than a `tokio_util::codec::Framed` adapter, so they drive this instead
//! of `Encoder`/`Decoder` directly.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::envelope::Envelope;
use crate::error::{IpcError, IpcResult};
use crate::frame::{decode_payload, encode_payload, HEADER_LEN, MAGIC, MAX_FRAME_PAYLOAD, VERSION};

/// Write one framed [`Envelope`] to `writer`.
pub async fn write_envelope<W: AsyncWrite + Unpin>(writer: &mut W, envelope: &Envelope) -> IpcResult<()> {
    let payload = encode_payload(envelope)?;

    let mut header = [0u8; HEADER_LEN];
    header[0..4].copy_from_slice(&MAGIC);
    header[4] = VERSION;
    header[5..9].copy_from_slice(&(payload.len() as u32).to_be_bytes());

    writer.write_all(&header).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed [`Envelope`] from `reader`.
///
/// Returns `Ok(None)` when the peer closes the stream cleanly before any
/// header bytes arrive; any other truncation is a hard [`IpcError::Io`].
pub async fn read_envelope<R: AsyncRead + Unpin>(reader: &mut R) -> IpcResult<Option<Envelope>> {
    let mut header = [0u8; HEADER_LEN];
    if let Err(err) = reader.read_exact(&mut header).await {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            return Ok(None);
        }
        return Err(IpcError::Io(err));
    }

    if header[0..4] != MAGIC {
        return Err(IpcError::BadMagic);
    }
    let version = header[4];
    if version != VERSION {
        return Err(IpcError::UnsupportedVersion(version));
    }
    let len = u32::from_be_bytes(header[5..9].try_into().expect("slice is 4 bytes")) as usize;
    if len > MAX_FRAME_PAYLOAD {
        return Err(IpcError::FrameTooLarge(len));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    let envelope = decode_payload(&payload)?;
    Ok(Some(envelope))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandbox_types::{PluginId, SessionToken};
    use uuid::Uuid;

    #[tokio::test]
    async fn round_trips_an_envelope_through_a_duplex_stream() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let sent = Envelope::Handshake {
            plugin_id: PluginId::new("demo-automation").unwrap(),
            content_digest: "digest-abc".to_string(),
            pid: 4242,
        };

        write_envelope(&mut a, &sent).await.unwrap();
        let received = read_envelope(&mut b).await.unwrap().unwrap();
        match received {
            Envelope::Handshake { plugin_id, .. } => assert_eq!(plugin_id.as_str(), "demo-automation"),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[tokio::test]
    async fn reading_after_clean_close_yields_none() {
        let (a, mut b) = tokio::io::duplex(4096);
        drop(a);
        assert!(read_envelope(&mut b).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn call_reply_round_trip_preserves_call_id() {
        let (mut a, mut b) = tokio::io::duplex(8192);
        let call_id = Uuid::new_v4();
        let call = Envelope::Call(crate::BrokerCall {
            call_id,
            session_token: SessionToken(7),
            claimed_plugin_id: PluginId::new("demo-automation").unwrap(),
            method: "httpGet".to_string(),
            args: serde_json::json!({"url": "https://example.com"}),
        });

        write_envelope(&mut a, &call).await.unwrap();
        match read_envelope(&mut b).await.unwrap().unwrap() {
            Envelope::Call(c) => assert_eq!(c.call_id, call_id),
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
