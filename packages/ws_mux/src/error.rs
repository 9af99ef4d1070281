use serde_json::Value;
use tokio_tungstenite::tungstenite;

/// Errors raised by a [`Transport`](crate::transport::Transport) implementation.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The peer could not be reached (refused, reset, aborted).
    #[error("peer is unreachable: {0}")]
    Unreachable(String),

    /// The URI scheme is neither `ws` nor `wss`.
    #[error("unsupported URI scheme in {0}")]
    UnsupportedScheme(String),

    /// A binary frame arrived that is not valid UTF-8. `lossy` keeps a
    /// printable rendition for error reports.
    #[error("binary frame is not valid UTF-8: {reason}")]
    InvalidUtf8 { lossy: String, reason: String },

    /// The connection is already closed.
    #[error("connection closed")]
    Closed,

    #[error(transparent)]
    WebSocket(tungstenite::Error),
}

impl TransportError {
    /// Classify a tungstenite error, folding socket-level refusals into
    /// [`TransportError::Unreachable`].
    pub fn from_tungstenite(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::Io(io_err)
                if matches!(
                    io_err.kind(),
                    std::io::ErrorKind::ConnectionRefused
                        | std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::ConnectionAborted
                ) =>
            {
                Self::Unreachable(io_err.to_string())
            }
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                Self::Closed
            }
            other => Self::WebSocket(other),
        }
    }
}

/// Errors surfaced by the multiplexer.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// Establishing the transport failed. Returned from `run`.
    #[error("failed to connect to {uri}: {source}")]
    Connection {
        uri: String,
        #[source]
        source: TransportError,
    },

    /// The connect attempt exceeded the configured timeout.
    #[error("timed out connecting to {uri} after {secs}s")]
    ConnectTimeout { uri: String, secs: u64 },

    /// An inbound frame could not be decoded into an envelope with a `type`.
    #[error("malformed message ({reason}): {raw}")]
    MalformedMessage { raw: String, reason: String },

    /// No active entry and no fallback entry matched the inbound tag.
    #[error("The following response was not expected or is not a recognized protocol: {message}")]
    UnrecognizedProtocol { message: Value },

    /// A handler returned an error while processing a dispatched message.
    #[error("handler for `{tag}` failed: {source}")]
    Handler {
        tag: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("multiplexer is already running")]
    AlreadyRunning,

    #[error("multiplexer has not been started")]
    NotStarted,

    #[error("invalid configuration: {0}")]
    Config(#[from] Box<figment::Error>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_io_is_unreachable() {
        let io = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        let err = TransportError::from_tungstenite(tungstenite::Error::Io(io));
        assert!(matches!(err, TransportError::Unreachable(_)));
    }

    #[test]
    fn other_io_stays_websocket() {
        let io = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        let err = TransportError::from_tungstenite(tungstenite::Error::Io(io));
        assert!(matches!(err, TransportError::WebSocket(_)));
    }

    #[test]
    fn closed_is_closed() {
        let err = TransportError::from_tungstenite(tungstenite::Error::ConnectionClosed);
        assert!(matches!(err, TransportError::Closed));
    }

    #[test]
    fn unrecognized_protocol_message_carries_payload() {
        let err = MuxError::UnrecognizedProtocol {
            message: serde_json::json!({"type": "mystery"}),
        };
        let text = err.to_string();
        assert!(text.contains("not a recognized protocol"));
        assert!(text.contains("mystery"));
    }
}
