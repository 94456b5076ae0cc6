//! In-process chat backend for integration tests.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

pub const WAIT: Duration = Duration::from_secs(5);

/// Frames the test pushes to every connected client.
#[derive(Debug, Clone)]
pub enum ServerFrame {
    Text(String),
    Close(u16, String),
}

pub struct ChatServer {
    pub ws_base: Url,
    /// Text frames received from clients
    pub received: mpsc::UnboundedReceiver<String>,
    /// Request URIs (path and query) of completed upgrades
    pub requests: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
    push: broadcast::Sender<ServerFrame>,
}

impl ChatServer {
    pub async fn start() -> Self {
        Self::start_with_status(None).await
    }

    /// Server that refuses every upgrade with `status`.
    pub async fn rejecting(status: u16) -> Self {
        Self::start_with_status(Some(status)).await
    }

    async fn start_with_status(reject_with: Option<u16>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();

        let (received_tx, received) = mpsc::unbounded_channel();
        let (push, _) = broadcast::channel(64);
        let requests = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let push_tx = push.clone();
        let requests_log = requests.clone();
        let counter = connections.clone();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { break };
                let mut pushes = push_tx.subscribe();
                let received_tx = received_tx.clone();
                let requests_log = requests_log.clone();
                let counter = counter.clone();

                tokio::spawn(async move {
                    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                        if let Some(status) = reject_with {
                            let rejection = http::Response::builder().status(status).body(None).unwrap();
                            return Err(rejection);
                        }
                        requests_log.lock().unwrap().push(request.uri().to_string());
                        Ok(response)
                    };

                    let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
                        return;
                    };
                    counter.fetch_add(1, Ordering::SeqCst);
                    let (mut sink, mut source) = ws.split();

                    loop {
                        tokio::select! {
                            pushed = pushes.recv() => match pushed {
                                Ok(ServerFrame::Text(text)) => {
                                    if sink.send(Message::Text(text.into())).await.is_err() {
                                        break;
                                    }
                                },
                                Ok(ServerFrame::Close(code, reason)) => {
                                    let frame = CloseFrame { code: CloseCode::from(code), reason: reason.into() };
                                    let _ = sink.send(Message::Close(Some(frame))).await;
                                    break;
                                },
                                Err(_) => break,
                            },
                            incoming = source.next() => match incoming {
                                Some(Ok(Message::Text(text))) => {
                                    let _ = received_tx.send(text.as_str().to_owned());
                                },
                                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                                Some(Ok(_)) => {},
                            },
                        }
                    }
                });
            }
        });

        let ws_base = Url::parse(&format!("ws://{addr}")).unwrap();
        Self { ws_base, received, requests, connections, push }
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// The server counts an upgrade slightly after the client sees it.
    pub async fn wait_for_connections(&self, count: usize) {
        within(async {
            while self.connections() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
    }

    pub fn push_text(&self, text: impl Into<String>) {
        self.push.send(ServerFrame::Text(text.into())).unwrap();
    }

    pub fn push_close(&self, code: u16, reason: &str) {
        self.push.send(ServerFrame::Close(code, reason.to_string())).unwrap();
    }

    pub async fn next_received(&mut self) -> String {
        within(self.received.recv()).await.expect("server channel closed")
    }
}

/// JSON frame as the backend broadcasts it.
pub fn live_frame(id: i64, user_id: i64, message: &str, is_admin: bool) -> String {
    serde_json::json!({
        "id": id,
        "user_id": user_id,
        "message": message,
        "created_at": "2025-03-01T10:00:00.000000+00:00",
        "is_admin": is_admin,
    })
    .to_string()
}

/// Fails the test if `fut` does not finish within [`WAIT`].
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(WAIT, fut).await.expect("timed out")
}
