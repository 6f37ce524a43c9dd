//! Framed stdio codec for the native-messaging transport.
//!
//! Every message on the pipe is a 32-bit **native-endian** unsigned length
//! followed by that many bytes of UTF-8 JSON. The stream is raw bytes; there
//! is no line buffering anywhere on this path.
//!
//! Reads distinguish three terminal outcomes: a complete frame, a clean EOF
//! (pipe closed between frames), and a protocol error (oversized length or a
//! pipe closed mid-frame). Writes are atomic: length and payload go out in a
//! single buffer so concurrent writers serialised by a queue can never
//! interleave.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame payload size: 1 MiB. Larger payloads travel as cached
/// handles or follow-up tool calls, never as one frame.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Framing failures.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// A frame length exceeded [`MAX_FRAME_LEN`].
    #[error("frame of {len} bytes exceeds the {MAX_FRAME_LEN}-byte limit")]
    Oversized { len: usize },

    /// The pipe closed in the middle of a frame.
    #[error("pipe closed mid-frame ({missing} bytes missing)")]
    Truncated { missing: usize },

    /// The payload was not valid JSON.
    #[error("frame payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// An underlying I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Encode a payload into one contiguous frame buffer.
///
/// Rejects oversized payloads on the write side too, so a misbehaving
/// handler cannot emit a frame its peer is required to refuse.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(CodecError::Oversized { len: payload.len() });
    }
    let len = payload.len() as u32;
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&len.to_ne_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Write one frame. The length prefix and payload leave in a single write.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    let buf = encode_frame(payload)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Serialize a value and write it as one frame.
pub async fn write_json<W, T>(writer: &mut W, value: &T) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(value)?;
    write_frame(writer, &payload).await
}

/// Read the next frame.
///
/// Returns `Ok(None)` on a clean EOF at a frame boundary. A length beyond
/// the limit is rejected **before** any payload byte is read.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(CodecError::Truncated {
                missing: header.len() - filled,
            });
        }
        filled += n;
    }

    let len = u32::from_ne_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(CodecError::Oversized { len });
    }

    let mut payload = vec![0u8; len];
    let mut got = 0;
    while got < len {
        let n = reader.read(&mut payload[got..]).await?;
        if n == 0 {
            return Err(CodecError::Truncated { missing: len - got });
        }
        got += n;
    }
    Ok(Some(payload))
}

/// Read the next frame and deserialize its JSON payload.
pub async fn read_json<R, T>(reader: &mut R) -> Result<Option<T>, CodecError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    match read_frame(reader).await? {
        Some(payload) => Ok(Some(serde_json::from_slice(&payload)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use surf_types::protocol::{ToolRequest, WireMessage};

    #[tokio::test]
    async fn frame_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        write_frame(&mut client, br#"{"hello":1}"#).await.unwrap();
        let frame = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(frame, br#"{"hello":1}"#);
    }

    #[tokio::test]
    async fn json_round_trip_preserves_structure() {
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        let req = ToolRequest::new("a1", "navigate", serde_json::json!({"url": "https://example.org"}));
        write_json(&mut client, &WireMessage::ToolRequest(req)).await.unwrap();
        let back: WireMessage = read_json(&mut server).await.unwrap().unwrap();
        let WireMessage::ToolRequest(req) = back else {
            panic!("expected a tool request");
        };
        assert_eq!(req.params.tool, "navigate");
        assert_eq!(req.id, "a1");
    }

    #[tokio::test]
    async fn clean_eof_yields_none() {
        let (client, mut server) = tokio::io::duplex(1024);
        drop(client);
        assert!(read_frame(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_mid_header_is_truncated() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(&[1, 0]).await.unwrap();
        drop(client);
        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, CodecError::Truncated { missing: 2 }));
    }

    #[tokio::test]
    async fn eof_mid_payload_is_truncated() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let len = 10u32.to_ne_bytes();
        client.write_all(&len).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);
        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, CodecError::Truncated { missing: 7 }));
    }

    #[tokio::test]
    async fn frame_at_limit_accepted() {
        let (mut client, mut server) = tokio::io::duplex(4 * 1024 * 1024);
        let payload = vec![b'x'; MAX_FRAME_LEN];
        let writer = {
            let payload = payload.clone();
            tokio::spawn(async move {
                write_frame(&mut client, &payload).await.unwrap();
            })
        };
        let frame = read_frame(&mut server).await.unwrap().unwrap();
        writer.await.unwrap();
        assert_eq!(frame.len(), MAX_FRAME_LEN);
    }

    #[tokio::test]
    async fn frame_one_past_limit_rejected_without_reading_payload() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let len = ((MAX_FRAME_LEN + 1) as u32).to_ne_bytes();
        client.write_all(&len).await.unwrap();
        // No payload bytes follow; the reader must reject on the header alone.
        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, CodecError::Oversized { len } if len == MAX_FRAME_LEN + 1));
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let payload = vec![0u8; MAX_FRAME_LEN + 1];
        assert!(matches!(
            encode_frame(&payload),
            Err(CodecError::Oversized { .. })
        ));
    }

    #[test]
    fn encode_prefixes_native_endian_length() {
        let buf = encode_frame(b"abcd").unwrap();
        assert_eq!(&buf[..4], &4u32.to_ne_bytes());
        assert_eq!(&buf[4..], b"abcd");
    }
}
