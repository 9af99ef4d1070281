use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{MuxError, TransportError};
use crate::multiplexer::Shared;
use crate::transport::InboundStream;

/// Decode a frame into its `type` tag and the full message.
pub fn decode_envelope(raw: &str) -> Result<(String, Value), MuxError> {
    let malformed = |reason: &str| MuxError::MalformedMessage {
        raw: raw.to_string(),
        reason: reason.to_string(),
    };

    let message: Value = serde_json::from_str(raw).map_err(|e| malformed(&e.to_string()))?;
    let tag = match message.get("type") {
        Some(Value::String(tag)) => tag.clone(),
        Some(_) => return Err(malformed("`type` is not a string")),
        None if message.is_object() => return Err(malformed("missing `type`")),
        None => return Err(malformed("not an object")),
    };
    Ok((tag, message))
}

/// Route one decoded message to its handler and wait for the handler to finish.
pub(crate) async fn dispatch_message(
    shared: &Shared,
    tag: &str,
    message: Value,
) -> Result<(), MuxError> {
    let resolved = shared.active.lock().resolve(tag, &shared.fallback_tag);
    let Some(resolved) = resolved else {
        return Err(MuxError::UnrecognizedProtocol { message });
    };

    if resolved.freed {
        // A deferred request may be waiting for this tag
        shared.wake.notify_one();
    }

    match resolved.entry.handler {
        Some(handler) => {
            handler
                .call(message)
                .await
                .map_err(|source| MuxError::Handler {
                    tag: resolved.key,
                    source,
                })
        }
        None => {
            debug!("No handler registered for {}, message dropped", resolved.key);
            Ok(())
        }
    }
}

/// Consume inbound frames until the stream ends, `cancel` fires, or a frame
/// cannot be routed.
pub(crate) async fn dispatch_loop(
    shared: Arc<Shared>,
    mut inbound: InboundStream,
    cancel: CancellationToken,
) -> Result<(), MuxError> {
    info!("Starting message listener");

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Message listener cancelled");
                break;
            }
            next = inbound.next() => next,
        };

        let Some(frame) = next else {
            info!("Inbound stream ended");
            break;
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(TransportError::InvalidUtf8 { lossy, reason }) => {
                return Err(MuxError::MalformedMessage { raw: lossy, reason });
            }
            Err(e) => return Err(e.into()),
        };
        let (tag, message) = decode_envelope(&frame)?;
        debug!("Received {}", tag);
        dispatch_message(&shared, &tag, message).await?;
    }
    Ok(())
}
