//! ws_mux - tag-correlated request/response multiplexing over one WebSocket
//!
//! Many logically independent exchanges share a single duplex connection.
//! Every outbound [`Request`] names the `type` of the response it expects (its
//! tag); at most one request per tag is in flight at a time, and inbound
//! messages are routed back to the handler holding their tag. Persistent
//! listeners receive every message with their tag; a listener registered
//! under `"default"` catches messages no one else claimed.
//!
//! # Example
//!
//! ```no_run
//! use serde_json::json;
//! use ws_mux::{Handler, Multiplexer, MuxConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ws_mux::MuxError> {
//!     let config = MuxConfig::load(None)?;
//!     let mux = Multiplexer::from_config(&config);
//!
//!     mux.add_static_listener(
//!         "message",
//!         Handler::from_fn(|msg| println!("<{}> {}", msg["name"], msg["message"])),
//!     );
//!     mux.run().await?;
//!
//!     let login = mux.request(
//!         json!({"type": "LOGIN", "email": "a@b.com", "password": "x"}),
//!         "login",
//!     );
//!     if let Ok(reply) = login.await {
//!         println!("logged in: {}", reply["result"]);
//!     }
//!
//!     mux.send(json!({"type": "MESSAGE", "channel": "1", "message": "hello"}));
//!     mux.close().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatch;
mod drain;
mod error;
pub mod memory;
mod multiplexer;
pub mod queue;
mod request;
pub mod table;
pub mod transport;

pub use config::MuxConfig;
pub use dispatch::decode_envelope;
pub use error::{MuxError, TransportError};
pub use multiplexer::{ConnectionState, Multiplexer};
pub use request::{Handler, HandlerFuture, Request};
pub use transport::{InboundStream, OutboundSink, Scheme, Transport, WsTransport};
