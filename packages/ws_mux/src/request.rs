use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Future returned by a [`Handler`] invocation.
pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Callback invoked with a decoded inbound message.
///
/// Cheap to clone; persistent listeners are invoked once per matching message,
/// one-shot handlers at most once. An `Err` is fatal to the dispatch loop.
#[derive(Clone)]
pub struct Handler(Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>);

impl Handler {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self(Arc::new(move |msg| -> HandlerFuture { Box::pin(f(msg)) }))
    }

    /// Wrap a synchronous, infallible callback.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        Self::new(move |msg| {
            f(msg);
            std::future::ready(Ok(()))
        })
    }

    pub(crate) fn call(&self, msg: Value) -> HandlerFuture {
        (self.0)(msg)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Handler(..)")
    }
}

/// An outbound request, or a listener registration when `persistent` is set.
#[derive(Debug, Clone)]
pub struct Request {
    /// JSON value sent verbatim as one text frame. Ignored for persistent entries.
    pub payload: Value,
    /// Response `type` this request waits for. Empty means fire-and-forget.
    pub tag: String,
    pub handler: Option<Handler>,
    /// Registered under `tag` without sending, never removed by dispatch.
    pub persistent: bool,
}

impl Request {
    /// A request expecting a response tagged `tag`, with no handler attached yet.
    pub fn new(payload: Value, tag: impl Into<String>) -> Self {
        Self {
            payload,
            tag: tag.into(),
            handler: None,
            persistent: false,
        }
    }

    pub fn fire_and_forget(payload: Value) -> Self {
        Self::new(payload, "")
    }

    /// A persistent listener registration for `tag`.
    pub fn listener(tag: impl Into<String>, handler: Handler) -> Self {
        Self {
            payload: Value::Null,
            tag: tag.into(),
            handler: Some(handler),
            persistent: true,
        }
    }

    pub fn with_handler(mut self, handler: Handler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn is_tagged(&self) -> bool {
        !self.tag.is_empty()
    }
}
