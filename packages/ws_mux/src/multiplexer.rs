use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, warn};

use crate::config::{MuxConfig, default_fallback_tag};
use crate::error::{MuxError, TransportError};
use crate::queue::PendingQueue;
use crate::request::{Handler, Request};
use crate::table::ActiveTable;
use crate::transport::{Transport, WsTransport};
use crate::{dispatch, drain};

/// Lifecycle of the underlying connection. Only moves forward:
/// Disconnected → Connecting → Connected → Closed. A failed connect goes
/// from Connecting to Closed, and `close()` before `run()` goes straight
/// from Disconnected to Closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

/// State shared by the facade, the drain loop and the dispatch loop.
/// Locks are never held across an await.
pub(crate) struct Shared {
    pub(crate) pending: Mutex<PendingQueue>,
    pub(crate) active: Mutex<ActiveTable>,
    /// Wakes the drain loop on enqueue and when a tag is freed.
    pub(crate) wake: Notify,
    pub(crate) fallback_tag: String,
}

impl Shared {
    pub(crate) fn new(fallback_tag: impl Into<String>) -> Self {
        Self {
            pending: Mutex::new(PendingQueue::new()),
            active: Mutex::new(ActiveTable::new()),
            wake: Notify::new(),
            fallback_tag: fallback_tag.into(),
        }
    }

    pub(crate) fn enqueue(&self, request: Request) {
        self.pending.lock().push(request);
        self.wake.notify_one();
    }
}

/// Multiplexes tagged request/response exchanges over one duplex connection.
///
/// Requests are queued with [`queue_request`](Self::queue_request) and sent by
/// a background drain task once their tag is free; inbound messages are routed
/// by their `type` field to the request (or persistent listener) holding that
/// tag. Nothing is sent before [`run`](Self::run).
///
/// ```no_run
/// use serde_json::json;
/// use ws_mux::{Handler, Multiplexer, Request};
///
/// # async fn demo() -> Result<(), ws_mux::MuxError> {
/// let mux = Multiplexer::connect_to("wss://chat.example.com/socket");
/// mux.add_static_listener("message", Handler::from_fn(|msg| println!("{msg}")));
/// mux.queue_request(
///     Request::new(json!({"type": "LOGIN", "email": "a@b.com", "password": "x"}), "login")
///         .with_handler(Handler::from_fn(|msg| println!("login: {}", msg["result"]))),
/// );
/// mux.run().await?;
/// mux.wait().await?;
/// # Ok(())
/// # }
/// ```
pub struct Multiplexer {
    shared: Arc<Shared>,
    transport: Mutex<Option<Box<dyn Transport>>>,
    target: String,
    connect_timeout: Option<Duration>,
    state: Arc<watch::Sender<ConnectionState>>,
    cancel: CancellationToken,
    drain_task: Mutex<Option<JoinHandle<Result<(), MuxError>>>>,
    dispatch_task: Mutex<Option<JoinHandle<Result<(), MuxError>>>>,
    span: Span,
}

impl Multiplexer {
    /// Multiplexer over `transport` with default settings.
    pub fn new(transport: impl Transport) -> Self {
        Self::with_config(transport, &MuxConfig::default())
    }

    /// Multiplexer over `transport`, taking the timeout and fallback tag from
    /// `config`. `config.uri` is ignored.
    pub fn with_config(transport: impl Transport, config: &MuxConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let fallback = if config.fallback_tag.is_empty() {
            default_fallback_tag()
        } else {
            config.fallback_tag.clone()
        };
        let target = transport.target();
        let transport: Box<dyn Transport> = Box::new(transport);
        Self {
            shared: Arc::new(Shared::new(fallback)),
            target,
            transport: Mutex::new(Some(transport)),
            connect_timeout: config.connect_timeout(),
            state: Arc::new(state),
            cancel: CancellationToken::new(),
            drain_task: Mutex::new(None),
            dispatch_task: Mutex::new(None),
            span: Span::none(),
        }
    }

    /// WebSocket multiplexer for `config.uri`.
    pub fn from_config(config: &MuxConfig) -> Self {
        Self::with_config(WsTransport::new(config.uri.clone()), config)
    }

    /// WebSocket multiplexer for `uri` with default settings.
    pub fn connect_to(uri: impl Into<String>) -> Self {
        Self::new(WsTransport::new(uri))
    }

    /// Instrument both background loops with `span`. Defaults to a disabled span.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Append `request` to the pending queue. It is sent on a later drain
    /// cycle once its tag is free.
    pub fn queue_request(&self, request: Request) {
        debug!(
            "Queued new request: tag={:?} persistent={} payload={}",
            request.tag, request.persistent, request.payload
        );
        self.shared.enqueue(request);
    }

    /// Register `handler` for every inbound message tagged `tag`. Takes effect
    /// on the next drain cycle.
    pub fn add_static_listener(&self, tag: impl Into<String>, handler: Handler) {
        self.queue_request(Request::listener(tag, handler));
    }

    /// Queue an untagged, fire-and-forget payload.
    pub fn send(&self, payload: Value) {
        self.queue_request(Request::fire_and_forget(payload));
    }

    /// Queue `payload` expecting a response tagged `tag`; the receiver resolves
    /// with that response. It errors if the multiplexer goes away first.
    pub fn request(&self, payload: Value, tag: impl Into<String>) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(Mutex::new(Some(tx)));
        let handler = Handler::from_fn(move |msg| {
            if let Some(tx) = slot.lock().take() {
                let _ = tx.send(msg);
            }
        });
        self.queue_request(Request::new(payload, tag).with_handler(handler));
        rx
    }

    /// Connect, then start the drain and dispatch loops as background tasks.
    /// Returns once both are spawned.
    pub async fn run(&self) -> Result<(), MuxError> {
        if self.state() == ConnectionState::Closed {
            return Err(MuxError::Transport(TransportError::Closed));
        }
        let transport = self.transport.lock().take().ok_or(MuxError::AlreadyRunning)?;

        self.state.send_replace(ConnectionState::Connecting);
        info!(parent: &self.span, "Connecting to {}", self.target);

        let connect = transport.connect();
        let connected = match self.connect_timeout {
            Some(limit) => match tokio::time::timeout(limit, connect).await {
                Ok(result) => result,
                Err(_) => {
                    self.state.send_replace(ConnectionState::Closed);
                    return Err(MuxError::ConnectTimeout {
                        uri: self.target.clone(),
                        secs: limit.as_secs(),
                    });
                }
            },
            None => connect.await,
        };
        let (sink, inbound) = match connected {
            Ok(halves) => halves,
            Err(source) => {
                self.state.send_replace(ConnectionState::Closed);
                error!(parent: &self.span, "Failed to connect to {}: {}", self.target, source);
                return Err(MuxError::Connection {
                    uri: self.target.clone(),
                    source,
                });
            }
        };

        self.state.send_replace(ConnectionState::Connected);
        info!(parent: &self.span, "Connected to {}", self.target);

        let drain = tokio::spawn(
            drain::drain_loop(self.shared.clone(), sink, self.cancel.clone())
                .instrument(self.span.clone()),
        );

        let shared = self.shared.clone();
        let cancel = self.cancel.clone();
        let state = self.state.clone();
        let dispatch = tokio::spawn(
            async move {
                let result = dispatch::dispatch_loop(shared, inbound, cancel.clone()).await;
                if let Err(e) = &result {
                    error!("Message listener stopped: {}", e);
                }
                // The connection is gone either way; stop sending too
                cancel.cancel();
                state.send_replace(ConnectionState::Closed);
                result
            }
            .instrument(self.span.clone()),
        );

        *self.drain_task.lock() = Some(drain);
        *self.dispatch_task.lock() = Some(dispatch);
        Ok(())
    }

    /// Wait for the dispatch loop to end and return its outcome. Fatal
    /// dispatch errors (malformed or unrecognized messages, failing handlers)
    /// surface here. Only the first call observes the outcome.
    pub async fn wait(&self) -> Result<(), MuxError> {
        let handle = self.dispatch_task.lock().take().ok_or(MuxError::NotStarted)?;
        join_loop(handle).await
    }

    /// Stop both loops and let the connection drop. Queued requests stay
    /// pending; no further handlers run.
    pub async fn close(&self) {
        info!(parent: &self.span, "Letting connection drop");
        self.cancel.cancel();
        self.transport.lock().take();

        let drain = self.drain_task.lock().take();
        if let Some(handle) = drain {
            if let Err(e) = join_loop(handle).await {
                warn!(parent: &self.span, "Request queue manager ended with error: {}", e);
            }
        }
        self.state.send_replace(ConnectionState::Closed);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Tag consulted when an inbound `type` has no entry of its own.
    pub fn fallback_tag(&self) -> &str {
        &self.shared.fallback_tag
    }

    pub fn pending_len(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Tags currently held in the active table, sorted.
    pub fn active_tags(&self) -> Vec<String> {
        self.shared.active.lock().tags()
    }

    pub fn is_active(&self, tag: &str) -> bool {
        self.shared.active.lock().contains(tag)
    }

    pub fn is_persistent(&self, tag: &str) -> bool {
        self.shared
            .active
            .lock()
            .get(tag)
            .is_some_and(|entry| entry.persistent)
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn join_loop(handle: JoinHandle<Result<(), MuxError>>) -> Result<(), MuxError> {
    match handle.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => {
            debug!("Loop task was cancelled: {}", e);
            Ok(())
        }
    }
}
