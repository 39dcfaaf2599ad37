//! Native messaging framing: a 4-byte native-endian length followed by UTF-8 JSON.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::relay::{RelayRequest, RelayResponse};

/// Browsers accept messages up to 64 MiB from the extension.
pub const MAX_INBOUND_FRAME: usize = 64 * 1024 * 1024;
/// Browsers reject host replies larger than 1 MiB.
pub const MAX_OUTBOUND_FRAME: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("native messaging I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame of {len} bytes exceeds the {limit} byte limit")]
    TooLarge { len: usize, limit: usize },
    #[error("invalid message JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Inbound message with an optional correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(flatten)]
    pub request: RelayRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(flatten)]
    pub response: RelayResponse,
}

/// Reads one frame. `Ok(None)` means the peer closed the stream between frames.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0_u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }

    let len = u32::from_ne_bytes(header) as usize;
    if len > MAX_INBOUND_FRAME {
        return Err(FrameError::TooLarge {
            len,
            limit: MAX_INBOUND_FRAME,
        });
    }

    let mut payload = vec![0_u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_OUTBOUND_FRAME {
        return Err(FrameError::TooLarge {
            len: payload.len(),
            limit: MAX_OUTBOUND_FRAME,
        });
    }

    let len = payload.len() as u32;
    writer.write_all(&len.to_ne_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

pub fn decode_envelope(payload: &[u8]) -> Result<Envelope, FrameError> {
    Ok(serde_json::from_slice(payload)?)
}

pub fn encode_reply(reply: &ReplyEnvelope) -> Result<Vec<u8>, FrameError> {
    Ok(serde_json::to_vec(reply)?)
}

/// Best-effort `id` recovery from a payload that failed to decode as an envelope.
pub fn peek_id(payload: &[u8]) -> Option<u64> {
    serde_json::from_slice::<serde_json::Value>(payload)
        .ok()?
        .get("id")?
        .as_u64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::Outcome;

    #[tokio::test]
    async fn frames_carry_native_endian_length() {
        let (mut client, mut server) = tokio::io::duplex(256);
        write_frame(&mut client, br#"{"action":"ping"}"#)
            .await
            .expect("frame should write");

        let mut header = [0_u8; 4];
        server.read_exact(&mut header).await.expect("header should read");
        assert_eq!(u32::from_ne_bytes(header), 17);

        let mut body = vec![0_u8; 17];
        server.read_exact(&mut body).await.expect("body should read");
        assert_eq!(body, br#"{"action":"ping"}"#);
    }

    #[tokio::test]
    async fn read_frame_returns_payload_then_none_at_eof() {
        let (mut client, mut server) = tokio::io::duplex(256);
        write_frame(&mut client, b"{}").await.expect("frame should write");
        drop(client);

        let first = read_frame(&mut server).await.expect("read should succeed");
        assert_eq!(first.as_deref(), Some(&b"{}"[..]));
        let second = read_frame(&mut server).await.expect("read should succeed");
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn oversized_inbound_length_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let len = (MAX_INBOUND_FRAME as u32) + 1;
        client.write_all(&len.to_ne_bytes()).await.expect("header should write");

        let err = read_frame(&mut server).await.expect_err("frame should be rejected");
        assert!(matches!(err, FrameError::TooLarge { limit: MAX_INBOUND_FRAME, .. }));
    }

    #[tokio::test]
    async fn oversized_reply_is_not_written() {
        let (mut client, _server) = tokio::io::duplex(64);
        let payload = vec![b'a'; MAX_OUTBOUND_FRAME + 1];
        let err = write_frame(&mut client, &payload).await.expect_err("reply should be rejected");
        assert!(matches!(err, FrameError::TooLarge { limit: MAX_OUTBOUND_FRAME, .. }));
    }

    #[test]
    fn envelope_flattens_request_and_keeps_id() {
        let envelope = decode_envelope(
            br#"{"id":7,"action":"enhanceText","promptId":"summarize","selectedText":"x"}"#,
        )
        .expect("envelope should decode");
        assert_eq!(envelope.id, Some(7));
        assert!(matches!(
            envelope.request,
            RelayRequest::EnhanceText { ref prompt_id, .. } if prompt_id == "summarize"
        ));

        let reply = ReplyEnvelope {
            id: envelope.id,
            response: RelayResponse::Outcome(Outcome::enhanced("short".to_string())),
        };
        let payload = encode_reply(&reply).expect("reply should encode");
        let json: serde_json::Value = serde_json::from_slice(&payload).expect("valid json");
        assert_eq!(json, serde_json::json!({"id": 7, "success": true, "enhancedText": "short"}));
    }

    #[test]
    fn peek_id_survives_unknown_action() {
        let payload = br#"{"id":3,"action":"selfDestruct"}"#;
        assert!(decode_envelope(payload).is_err());
        assert_eq!(peek_id(payload), Some(3));
        assert_eq!(peek_id(b"not json"), None);
    }
}
