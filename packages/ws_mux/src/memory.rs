//! In-process transport for tests and for embedding the multiplexer next to
//! an in-process peer.

use futures::channel::mpsc;
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use serde_json::Value;

use crate::error::TransportError;
use crate::transport::{InboundStream, OutboundSink, Transport};

/// Multiplexer side of an in-memory connection. Create with [`pair`].
pub struct MemoryTransport {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<String>,
    refuse: Option<String>,
}

/// Peer side of an in-memory connection: reads what the multiplexer sent and
/// pushes inbound frames to it.
pub struct MemoryPeer {
    sent: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<String>,
}

/// Build a connected transport/peer pair.
pub fn pair() -> (MemoryTransport, MemoryPeer) {
    let (out_tx, out_rx) = mpsc::unbounded();
    let (in_tx, in_rx) = mpsc::unbounded();
    (
        MemoryTransport {
            outbound: out_tx,
            inbound: in_rx,
            refuse: None,
        },
        MemoryPeer {
            sent: out_rx,
            inbound: in_tx,
        },
    )
}

impl MemoryTransport {
    /// A transport whose connect always fails as unreachable.
    pub fn refusing(reason: impl Into<String>) -> Self {
        let (transport, _peer) = pair();
        Self {
            refuse: Some(reason.into()),
            ..transport
        }
    }
}

impl Transport for MemoryTransport {
    fn target(&self) -> String {
        "memory".to_string()
    }

    fn connect(
        self: Box<Self>,
    ) -> BoxFuture<'static, Result<(OutboundSink, InboundStream), TransportError>> {
        Box::pin(async move {
            let MemoryTransport {
                outbound,
                inbound,
                refuse,
            } = *self;
            if let Some(reason) = refuse {
                return Err(TransportError::Unreachable(reason));
            }
            let sink = outbound.sink_map_err(|_| TransportError::Closed);
            Ok((Box::pin(sink) as OutboundSink, inbound.map(Ok::<_, TransportError>).boxed()))
        })
    }
}

impl MemoryPeer {
    /// Deliver a raw frame to the multiplexer.
    pub fn push(&self, frame: impl Into<String>) -> Result<(), TransportError> {
        self.inbound
            .unbounded_send(frame.into())
            .map_err(|_| TransportError::Closed)
    }

    pub fn push_json(&self, value: &Value) -> Result<(), TransportError> {
        self.push(value.to_string())
    }

    /// Next frame sent by the multiplexer; `None` once its sink is closed.
    pub async fn next_sent(&mut self) -> Option<String> {
        self.sent.next().await
    }

    /// Next sent frame decoded as JSON.
    pub async fn next_sent_json(&mut self) -> Option<Value> {
        let frame = self.next_sent().await?;
        serde_json::from_str(&frame).ok()
    }

    /// End the inbound stream, as if the peer dropped the connection.
    pub fn hang_up(&self) {
        self.inbound.close_channel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let (transport, mut peer) = pair();
        let (mut sink, mut inbound) = Box::new(transport).connect().await.unwrap();

        sink.send("{\"type\":\"PING\"}".to_string()).await.unwrap();
        assert_eq!(peer.next_sent().await.as_deref(), Some("{\"type\":\"PING\"}"));

        peer.push("{\"type\":\"pong\"}").unwrap();
        assert_eq!(inbound.next().await.unwrap().unwrap(), "{\"type\":\"pong\"}");
    }

    #[tokio::test]
    async fn closing_sink_ends_peer_stream() {
        let (transport, mut peer) = pair();
        let (mut sink, _inbound) = Box::new(transport).connect().await.unwrap();
        sink.close().await.unwrap();
        assert!(peer.next_sent().await.is_none());
    }

    #[tokio::test]
    async fn hang_up_ends_inbound() {
        let (transport, peer) = pair();
        let (_sink, mut inbound) = Box::new(transport).connect().await.unwrap();
        peer.hang_up();
        assert!(inbound.next().await.is_none());
    }

    #[tokio::test]
    async fn refusing_transport_fails_connect() {
        let result = Box::new(MemoryTransport::refusing("nobody home"))
            .connect()
            .await;
        assert!(matches!(result, Err(TransportError::Unreachable(_))));
    }
}
