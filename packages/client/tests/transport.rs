mod common;

use classchat_client::{ChatError, ChatMessage, ChatTransport, CloseReason, StaticCredentials, TransportState};
use common::{ChatServer, live_frame, within};
use std::sync::Arc;
use tokio::sync::mpsc;

struct Wired {
    transport: ChatTransport,
    messages: mpsc::UnboundedReceiver<ChatMessage>,
    closes: mpsc::UnboundedReceiver<CloseReason>,
}

fn wired(server: &ChatServer, room_id: i64) -> Wired {
    let transport = ChatTransport::new(
        room_id,
        server.ws_base.clone(),
        Arc::new(StaticCredentials::new("secret-token")),
    );

    let (message_tx, messages) = mpsc::unbounded_channel();
    let (close_tx, closes) = mpsc::unbounded_channel();
    transport.on_message(move |message| {
        let _ = message_tx.send(message);
    });
    transport.on_close(move |reason| {
        let _ = close_tx.send(reason);
    });

    Wired { transport, messages, closes }
}

async fn wait_for_state(transport: &ChatTransport, target: TransportState) {
    let mut states = transport.subscribe();
    within(states.wait_for(|state| *state == target)).await.unwrap();
}

#[tokio::test]
async fn test_open_passes_token_in_query() {
    let server = ChatServer::start().await;
    let mut wired = wired(&server, 12);

    wired.transport.open().unwrap();
    wait_for_state(&wired.transport, TransportState::Open).await;

    let requests = server.requests.lock().unwrap().clone();
    assert_eq!(requests, vec!["/chat/ws/live-classes/12/chat?token=secret-token".to_string()]);
}

#[tokio::test]
async fn test_on_open_fires_once_connected() {
    let server = ChatServer::start().await;
    let mut transport = ChatTransport::new(1, server.ws_base.clone(), Arc::new(StaticCredentials::new("t")));
    let (open_tx, mut opened) = mpsc::unbounded_channel();
    transport.on_open(move || {
        let _ = open_tx.send(());
    });

    assert_eq!(transport.state(), TransportState::Idle);
    transport.open().unwrap();
    within(opened.recv()).await.unwrap();
    assert_eq!(transport.state(), TransportState::Open);
}

#[tokio::test]
async fn test_send_reaches_server() {
    let mut server = ChatServer::start().await;
    let mut wired = wired(&server, 3);

    wired.transport.open().unwrap();
    wait_for_state(&wired.transport, TransportState::Open).await;

    wired.transport.send("good morning").unwrap();
    assert_eq!(server.next_received().await, "good morning");
}

#[tokio::test]
async fn test_inbound_frames_are_stamped_with_room() {
    let server = ChatServer::start().await;
    let mut wired = wired(&server, 9);

    wired.transport.open().unwrap();
    wait_for_state(&wired.transport, TransportState::Open).await;

    server.push_text(live_frame(41, 7, "question about slide 3", false));
    let message = within(wired.messages.recv()).await.unwrap();

    assert_eq!(message.id, 41);
    assert_eq!(message.room_id, 9);
    assert_eq!(message.author_id, 7);
    assert_eq!(message.body, "question about slide 3");
    assert!(!message.from_instructor);
}

#[tokio::test]
async fn test_malformed_frames_do_not_drop_connection() {
    let server = ChatServer::start().await;
    let mut wired = wired(&server, 9);

    wired.transport.open().unwrap();
    wait_for_state(&wired.transport, TransportState::Open).await;

    server.push_text("{not json");
    server.push_text(r#"{"id": 1}"#);
    server.push_text(live_frame(2, 7, "still here", true));

    let message = within(wired.messages.recv()).await.unwrap();
    assert_eq!(message.id, 2);
    assert!(message.from_instructor);
    assert_eq!(wired.transport.state(), TransportState::Open);
    assert!(wired.closes.try_recv().is_err());
}

#[tokio::test]
async fn test_open_while_open_keeps_single_connection() {
    let server = ChatServer::start().await;
    let mut wired = wired(&server, 4);

    wired.transport.open().unwrap();
    assert!(matches!(wired.transport.open(), Err(ChatError::AlreadyOpen)));
    wait_for_state(&wired.transport, TransportState::Open).await;
    assert!(matches!(wired.transport.open(), Err(ChatError::AlreadyOpen)));

    server.wait_for_connections(1).await;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(server.connections(), 1);
}

#[tokio::test]
async fn test_close_then_send_fails_without_close_hook() {
    let server = ChatServer::start().await;
    let mut wired = wired(&server, 4);

    wired.transport.open().unwrap();
    wait_for_state(&wired.transport, TransportState::Open).await;

    wired.transport.close();
    assert_eq!(wired.transport.state(), TransportState::Closed);
    assert!(matches!(wired.transport.send("late"), Err(ChatError::NotConnected)));

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(wired.closes.try_recv().is_err());
}

#[tokio::test]
async fn test_close_during_handshake() {
    let server = ChatServer::start().await;
    let mut wired = wired(&server, 4);

    wired.transport.open().unwrap();
    wired.transport.close();
    assert_eq!(wired.transport.state(), TransportState::Closed);

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(wired.transport.state(), TransportState::Closed);
    assert!(wired.closes.try_recv().is_err());
}

#[tokio::test]
async fn test_reopen_after_close() {
    let server = ChatServer::start().await;
    let mut wired = wired(&server, 4);

    wired.transport.open().unwrap();
    wait_for_state(&wired.transport, TransportState::Open).await;
    wired.transport.close();

    wired.transport.open().unwrap();
    wait_for_state(&wired.transport, TransportState::Open).await;
    server.wait_for_connections(2).await;
    assert_eq!(server.connections(), 2);
}

#[tokio::test]
async fn test_remote_close_reports_reason() {
    let server = ChatServer::start().await;
    let mut wired = wired(&server, 4);

    wired.transport.open().unwrap();
    wait_for_state(&wired.transport, TransportState::Open).await;

    server.push_close(1001, "server restart");
    let reason = within(wired.closes.recv()).await.unwrap();

    assert_eq!(reason, CloseReason::Remote { code: Some(1001), reason: "server restart".to_string() });
    assert_eq!(wired.transport.state(), TransportState::Closed);
}

#[tokio::test]
async fn test_policy_close_is_rejection() {
    let server = ChatServer::start().await;
    let mut wired = wired(&server, 4);

    wired.transport.open().unwrap();
    wait_for_state(&wired.transport, TransportState::Open).await;

    server.push_close(1008, "Live class not live");
    let reason = within(wired.closes.recv()).await.unwrap();

    assert_eq!(reason, CloseReason::Rejected { reason: "Live class not live".to_string() });
}

#[tokio::test]
async fn test_unauthorized_handshake() {
    let server = ChatServer::rejecting(401).await;
    let mut wired = wired(&server, 4);

    wired.transport.open().unwrap();
    let reason = within(wired.closes.recv()).await.unwrap();

    assert_eq!(reason, CloseReason::Unauthorized);
    assert_eq!(wired.transport.state(), TransportState::Closed);
    assert_eq!(server.connections(), 0);
}

#[tokio::test]
async fn test_other_handshake_failure() {
    let server = ChatServer::rejecting(503).await;
    let mut wired = wired(&server, 4);

    wired.transport.open().unwrap();
    let reason = within(wired.closes.recv()).await.unwrap();

    assert!(matches!(reason, CloseReason::HandshakeFailed(_)));
}
