use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::relay::codec::{self, FrameError, ReplyEnvelope};
use crate::relay::{BackgroundService, Outcome, RelayResponse};

const REPLY_QUEUE_CAPACITY: usize = 64;

/// Serves native-messaging requests until the browser closes `reader`.
///
/// Every request runs in its own task so a `ping` is answered while an
/// `enhanceText` waits in the rate limiter; a single writer task owns `writer`.
pub async fn serve<R, W>(
    service: BackgroundService,
    mut reader: R,
    writer: W,
) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (reply_tx, reply_rx) = mpsc::channel::<ReplyEnvelope>(REPLY_QUEUE_CAPACITY);
    let writer_task = tokio::spawn(write_replies(writer, reply_rx));

    let read_result = loop {
        let payload = match codec::read_frame(&mut reader).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                info!("native messaging input closed");
                break Ok(());
            }
            Err(err) => break Err(err),
        };

        match codec::decode_envelope(&payload) {
            Ok(envelope) => {
                debug!(id = ?envelope.id, action = envelope.request.action(), "request received");
                let service = service.clone();
                let reply_tx = reply_tx.clone();
                tokio::spawn(async move {
                    let response = service.handle(envelope.request).await;
                    let reply = ReplyEnvelope {
                        id: envelope.id,
                        response,
                    };
                    if reply_tx.send(reply).await.is_err() {
                        warn!("reply dropped: writer task has stopped");
                    }
                });
            }
            Err(err) => {
                warn!("rejecting malformed request: {err}");
                let reply = ReplyEnvelope {
                    id: codec::peek_id(&payload),
                    response: RelayResponse::Outcome(Outcome::failed(err.to_string())),
                };
                if reply_tx.send(reply).await.is_err() {
                    break Ok(());
                }
            }
        }
    };

    // In-flight tasks hold their own senders; the writer drains until the last one finishes.
    drop(reply_tx);
    let write_result = writer_task
        .await
        .map_err(|err| FrameError::Io(std::io::Error::other(err.to_string())))?;

    read_result.and(write_result)
}

async fn write_replies<W>(
    mut writer: W,
    mut reply_rx: mpsc::Receiver<ReplyEnvelope>,
) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(reply) = reply_rx.recv().await {
        let payload = encode_bounded(&reply)?;
        if let Err(err) = codec::write_frame(&mut writer, &payload).await {
            error!("failed to write native messaging reply: {err}");
            return Err(err);
        }
    }
    Ok(())
}

/// Encodes a reply, swapping an oversized one for an error outcome with the same id.
fn encode_bounded(reply: &ReplyEnvelope) -> Result<Vec<u8>, FrameError> {
    let payload = codec::encode_reply(reply)?;
    if payload.len() <= codec::MAX_OUTBOUND_FRAME {
        return Ok(payload);
    }

    warn!(len = payload.len(), "reply exceeds native messaging limit");
    codec::encode_reply(&ReplyEnvelope {
        id: reply.id,
        response: RelayResponse::Outcome(Outcome::failed(format!(
            "Reply of {} bytes exceeds the {} byte message limit",
            payload.len(),
            codec::MAX_OUTBOUND_FRAME
        ))),
    })
}
