//! Per-room WebSocket transport.
//!
//! A [`ChatTransport`] is bound to one room and owns at most one live
//! connection. The socket is driven by a spawned connection task; the
//! transport itself only flips state, hands outbound bodies to the task and
//! signals shutdown, so every public method is synchronous.
//!
//! The backend cannot read custom headers during the WebSocket upgrade, so
//! the bearer token travels as the `token` query parameter.

use classchat_entity::{ChatMessage, MessageRecord};
use futures_util::{SinkExt, StreamExt};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::join_path;
use crate::credentials::CredentialProvider;
use crate::error::ChatError;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// Why a connection ended without the caller closing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Server closed the socket
    Remote { code: Option<u16>, reason: String },
    /// Server refused the session (close code 1008): bad token, not
    /// enrolled, or the class is not live
    Rejected { reason: String },
    /// Upgrade answered with HTTP 401
    Unauthorized,
    /// Upgrade failed for any other reason
    HandshakeFailed(String),
    /// Socket error or abrupt end of stream
    Network(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Remote { code: Some(code), reason } if !reason.is_empty() => {
                write!(f, "closed by server ({code}: {reason})")
            },
            CloseReason::Remote { code: Some(code), .. } => write!(f, "closed by server ({code})"),
            CloseReason::Remote { code: None, .. } => write!(f, "closed by server"),
            CloseReason::Rejected { reason } if !reason.is_empty() => write!(f, "rejected by server: {reason}"),
            CloseReason::Rejected { .. } => write!(f, "rejected by server"),
            CloseReason::Unauthorized => write!(f, "credential rejected"),
            CloseReason::HandshakeFailed(e) => write!(f, "handshake failed: {e}"),
            CloseReason::Network(e) => write!(f, "connection lost: {e}"),
        }
    }
}

type OpenHandler = Box<dyn FnMut() + Send>;
type MessageHandler = Box<dyn FnMut(ChatMessage) + Send>;
type CloseHandler = Box<dyn FnMut(CloseReason) + Send>;

/// Callbacks run on the connection task. They must not call back into the
/// transport's handler registration.
#[derive(Default)]
struct Handlers {
    on_open: Option<OpenHandler>,
    on_message: Option<MessageHandler>,
    on_close: Option<CloseHandler>,
}

/// State shared between the transport and its connection task.
struct Shared {
    room_id: i64,
    state: watch::Sender<TransportState>,
    handlers: Mutex<Handlers>,
    /// Bumped on every open and close; a task only reports for its own epoch.
    epoch: AtomicU64,
}

impl Shared {
    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn fire_open(&self, epoch: u64) {
        if !self.is_current(epoch) {
            return;
        }
        if let Ok(mut handlers) = self.handlers.lock() {
            if let Some(handler) = handlers.on_open.as_mut() {
                handler();
            }
        }
    }

    /// Frames read by a connection that has since been closed or replaced
    /// are dropped here.
    fn fire_message(&self, epoch: u64, message: ChatMessage) {
        if !self.is_current(epoch) {
            debug!(room_id = self.room_id, id = message.id, "Dropping frame from a closed connection");
            return;
        }
        if let Ok(mut handlers) = self.handlers.lock() {
            if let Some(handler) = handlers.on_message.as_mut() {
                handler(message);
            }
        }
    }

    fn fire_close(&self, reason: CloseReason) {
        if let Ok(mut handlers) = self.handlers.lock() {
            if let Some(handler) = handlers.on_close.as_mut() {
                handler(reason);
            }
        }
    }

    /// Marks the connection closed and runs the close hook, unless the
    /// caller already closed it or a newer connection took over.
    fn finish(&self, epoch: u64, reason: CloseReason) {
        if !self.is_current(epoch) {
            return;
        }

        let changed = self.state.send_if_modified(|state| {
            if *state == TransportState::Closed {
                false
            } else {
                *state = TransportState::Closed;
                true
            }
        });

        if changed {
            warn!(room_id = self.room_id, %reason, "Chat connection closed");
            self.fire_close(reason);
        }
    }
}

/// WebSocket transport for one room
pub struct ChatTransport {
    ws_base_url: Url,
    credentials: Arc<dyn CredentialProvider>,
    shared: Arc<Shared>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl ChatTransport {
    /// Create an idle transport for `room_id`.
    ///
    /// # Arguments
    /// * `room_id` - Room the connection is scoped to
    /// * `ws_base_url` - WebSocket base URL of the backend
    /// * `credentials` - Source of the token passed during the handshake
    pub fn new(room_id: i64, ws_base_url: Url, credentials: Arc<dyn CredentialProvider>) -> Self {
        let (state, _) = watch::channel(TransportState::Idle);

        Self {
            ws_base_url,
            credentials,
            shared: Arc::new(Shared {
                room_id,
                state,
                handlers: Mutex::new(Handlers::default()),
                epoch: AtomicU64::new(0),
            }),
            outbound: None,
            shutdown: None,
        }
    }

    pub fn room_id(&self) -> i64 {
        self.shared.room_id
    }

    pub fn state(&self) -> TransportState {
        *self.shared.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<TransportState> {
        self.shared.state.subscribe()
    }

    /// Called once the handshake succeeds.
    pub fn on_open<F>(&self, handler: F)
    where
        F: FnMut() + Send + 'static,
    {
        if let Ok(mut handlers) = self.shared.handlers.lock() {
            handlers.on_open = Some(Box::new(handler));
        }
    }

    /// Called once per well-formed inbound message.
    pub fn on_message<F>(&self, handler: F)
    where
        F: FnMut(ChatMessage) + Send + 'static,
    {
        if let Ok(mut handlers) = self.shared.handlers.lock() {
            handlers.on_message = Some(Box::new(handler));
        }
    }

    /// Called when the connection ends without [`ChatTransport::close`].
    pub fn on_close<F>(&self, handler: F)
    where
        F: FnMut(CloseReason) + Send + 'static,
    {
        if let Ok(mut handlers) = self.shared.handlers.lock() {
            handlers.on_close = Some(Box::new(handler));
        }
    }

    /// Room endpoint with the credential attached.
    fn endpoint(&self) -> Result<Url, ChatError> {
        let mut url = join_path(
            &self.ws_base_url,
            &format!("chat/ws/live-classes/{}/chat", self.shared.room_id),
        )?;
        let token = self.credentials.bearer_token()?;
        url.query_pairs_mut().append_pair("token", &token);
        Ok(url)
    }

    /// Start connecting. Must be called from within a Tokio runtime.
    ///
    /// Fails with [`ChatError::AlreadyOpen`] while a connection is being
    /// established or is open; no second connection is created.
    pub fn open(&mut self) -> Result<(), ChatError> {
        let current = self.state();
        if matches!(current, TransportState::Connecting | TransportState::Open) {
            warn!(room_id = self.shared.room_id, ?current, "Ignoring open on active transport");
            return Err(ChatError::AlreadyOpen);
        }

        let url = self.endpoint()?;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.outbound = Some(outbound_tx);
        self.shutdown = Some(shutdown_tx);
        self.shared.state.send_replace(TransportState::Connecting);

        debug!(room_id = self.shared.room_id, epoch, "Opening chat connection");
        tokio::spawn(run_connection(Arc::clone(&self.shared), epoch, url, outbound_rx, shutdown_rx));
        Ok(())
    }

    /// Write one text frame. Only valid while open; nothing is queued.
    pub fn send(&self, body: &str) -> Result<(), ChatError> {
        if self.state() != TransportState::Open {
            return Err(ChatError::NotConnected);
        }

        self.outbound
            .as_ref()
            .ok_or(ChatError::NotConnected)?
            .send(body.to_string())
            .map_err(|_| ChatError::NotConnected)
    }

    /// Close the connection. Idempotent and valid in any state; an
    /// in-flight handshake is abandoned.
    pub fn close(&mut self) {
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        self.outbound = None;
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        let previous = self.shared.state.send_replace(TransportState::Closed);
        if previous != TransportState::Closed {
            info!(room_id = self.shared.room_id, ?previous, "Closed chat connection");
        }
    }
}

impl Drop for ChatTransport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_connection(
    shared: Arc<Shared>,
    epoch: u64,
    url: Url,
    mut outbound: mpsc::UnboundedReceiver<String>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let room_id = shared.room_id;

    let stream = tokio::select! {
        biased;
        _ = &mut shutdown => {
            debug!(room_id, "Handshake cancelled");
            return;
        },
        result = tokio_tungstenite::connect_async(url.as_str()) => match result {
            Ok((stream, _response)) => stream,
            Err(e) => {
                shared.finish(epoch, handshake_failure(&e));
                return;
            },
        },
    };

    let opened = shared.is_current(epoch)
        && shared.state.send_if_modified(|state| {
            if *state == TransportState::Connecting {
                *state = TransportState::Open;
                true
            } else {
                false
            }
        });
    if !opened {
        return;
    }

    info!(room_id, "Chat connection open");
    shared.fire_open(epoch);

    let (mut sink, mut stream) = stream.split();

    let reason = loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                let frame = CloseFrame { code: CloseCode::Normal, reason: "client closed".into() };
                if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                    debug!(room_id, "Close frame not delivered: {}", e);
                }
                return;
            },
            Some(body) = outbound.recv() => {
                if let Err(e) = sink.send(Message::Text(body.into())).await {
                    break CloseReason::Network(e.to_string());
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(message) = parse_frame(room_id, &text) {
                        shared.fire_message(epoch, message);
                    }
                },
                Some(Ok(Message::Binary(data))) => {
                    warn!(room_id, len = data.len(), "Dropping binary frame");
                },
                Some(Ok(Message::Close(frame))) => break close_reason(frame),
                Some(Ok(_)) => {},
                Some(Err(e)) => break CloseReason::Network(e.to_string()),
                None => break CloseReason::Network("stream ended".to_string()),
            },
        }
    };

    shared.finish(epoch, reason);
}

/// Decode one inbound text frame. Malformed frames are logged and dropped.
fn parse_frame(room_id: i64, text: &str) -> Option<ChatMessage> {
    let record = match serde_json::from_str::<MessageRecord>(text) {
        Ok(record) => record,
        Err(e) => {
            warn!(room_id, "Dropping malformed frame: {}", e);
            return None;
        },
    };

    let id = record.id;
    let message = ChatMessage::from_record(record, room_id);
    if message.is_none() {
        warn!(room_id, id, "Dropping frame addressed to another room");
    }
    message
}

fn handshake_failure(error: &tungstenite::Error) -> CloseReason {
    match error {
        tungstenite::Error::Http(response) if response.status().as_u16() == 401 => {
            CloseReason::Unauthorized
        },
        tungstenite::Error::Http(response) => {
            CloseReason::HandshakeFailed(format!("HTTP {}", response.status()))
        },
        other => CloseReason::HandshakeFailed(other.to_string()),
    }
}

fn close_reason(frame: Option<CloseFrame>) -> CloseReason {
    match frame {
        Some(frame) if frame.code == CloseCode::Policy => {
            CloseReason::Rejected { reason: frame.reason.as_str().to_owned() }
        },
        Some(frame) => CloseReason::Remote {
            code: Some(u16::from(frame.code)),
            reason: frame.reason.as_str().to_owned(),
        },
        None => CloseReason::Remote { code: None, reason: String::new() },
    }
}
