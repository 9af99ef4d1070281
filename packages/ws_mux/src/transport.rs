//! Duplex transports the multiplexer runs over.
//!
//! A transport is consumed by `connect`, which yields an outbound sink of text
//! frames and an inbound stream of text frames. Closing the sink closes the
//! connection; the inbound stream ends when the peer goes away.

use futures::future::{self, BoxFuture};
use futures::stream::BoxStream;
use futures::{Sink, SinkExt, StreamExt};
use std::pin::Pin;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use crate::error::TransportError;

pub type OutboundSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;
pub type InboundStream = BoxStream<'static, Result<String, TransportError>>;

pub trait Transport: Send + 'static {
    /// Human-readable target, used in logs and errors.
    fn target(&self) -> String;

    fn connect(
        self: Box<Self>,
    ) -> BoxFuture<'static, Result<(OutboundSink, InboundStream), TransportError>>;
}

/// URI scheme of a WebSocket target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Plain,
    Secure,
}

impl Scheme {
    pub fn of(uri: &str) -> Result<Self, TransportError> {
        match uri.split_once("://").map(|(scheme, _)| scheme) {
            Some(s) if s.eq_ignore_ascii_case("ws") => Ok(Self::Plain),
            Some(s) if s.eq_ignore_ascii_case("wss") => Ok(Self::Secure),
            _ => Err(TransportError::UnsupportedScheme(uri.to_string())),
        }
    }
}

/// WebSocket client transport. `wss://` targets use rustls with the
/// platform's native root certificates.
#[derive(Debug, Clone)]
pub struct WsTransport {
    uri: String,
}

impl WsTransport {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }

}

impl Transport for WsTransport {
    fn target(&self) -> String {
        self.uri.clone()
    }

    fn connect(
        self: Box<Self>,
    ) -> BoxFuture<'static, Result<(OutboundSink, InboundStream), TransportError>> {
        Box::pin(async move {
            let scheme = Scheme::of(&self.uri)?;
            debug!("Opening {:?} WebSocket to {}", scheme, self.uri);
            if scheme == Scheme::Secure {
                // Errors only when a provider is already installed
                let _ = rustls::crypto::ring::default_provider().install_default();
            }

            let (ws_stream, _) = tokio_tungstenite::connect_async(self.uri.as_str())
                .await
                .map_err(TransportError::from_tungstenite)?;
            let (ws_write, ws_read) = ws_stream.split();

            let outbound = ws_write
                .sink_map_err(TransportError::from_tungstenite)
                .with(|text: String| {
                    future::ready(Ok::<_, TransportError>(Message::Text(text.into())))
                });

            let inbound = ws_read.filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                    Ok(Message::Binary(data)) => Some(binary_text(data.to_vec())),
                    Ok(Message::Close(frame)) => {
                        debug!("Peer sent close frame: {:?}", frame);
                        None
                    }
                    // Ping/pong are answered by tungstenite
                    Ok(_) => None,
                    Err(e) => Some(Err(TransportError::from_tungstenite(e))),
                })
            });

            Ok((Box::pin(outbound) as OutboundSink, inbound.boxed()))
        })
    }
}

/// Binary frames carry text only when they are valid UTF-8.
fn binary_text(data: Vec<u8>) -> Result<String, TransportError> {
    String::from_utf8(data).map_err(|e| TransportError::InvalidUtf8 {
        lossy: String::from_utf8_lossy(e.as_bytes()).into_owned(),
        reason: e.utf8_error().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_frames_must_be_utf8() {
        assert_eq!(
            binary_text(br#"{"type":"message"}"#.to_vec()).unwrap(),
            r#"{"type":"message"}"#
        );
        match binary_text(vec![b'{', 0xFF, b'}']) {
            Err(TransportError::InvalidUtf8 { lossy, .. }) => assert_eq!(lossy, "{\u{FFFD}}"),
            other => panic!("expected InvalidUtf8, got {other:?}"),
        }
    }

    #[test]
    fn scheme_detection() {
        assert_eq!(Scheme::of("ws://localhost:4000/socket").unwrap(), Scheme::Plain);
        assert_eq!(Scheme::of("wss://example.com/socket").unwrap(), Scheme::Secure);
        assert_eq!(Scheme::of("WSS://example.com").unwrap(), Scheme::Secure);
    }

    #[test]
    fn scheme_rejects_http_and_garbage() {
        assert!(matches!(
            Scheme::of("http://example.com"),
            Err(TransportError::UnsupportedScheme(_))
        ));
        assert!(Scheme::of("localhost:4000").is_err());
    }

    #[tokio::test]
    async fn ws_connect_rejects_bad_scheme_before_dialing() {
        let transport = Box::new(WsTransport::new("ftp://example.com"));
        let result = transport.connect().await;
        assert!(matches!(result, Err(TransportError::UnsupportedScheme(_))));
    }
}
