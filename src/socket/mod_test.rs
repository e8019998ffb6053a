use std::time::Duration;

use serde_json::json;

use super::*;
use crate::test_helpers::{MockSocket, wait_until};

async fn next_event(events: &mut broadcast::Receiver<SocketEvent>) -> SocketEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("socket event in time")
        .expect("socket event")
}

#[test]
fn retry_codes_cover_reserved_range_only() {
    assert!(!is_retry_code(1000));
    assert!(is_retry_code(1001));
    assert!(is_retry_code(1006));
    assert!(is_retry_code(1999));
    assert!(!is_retry_code(2000));
    assert!(!is_retry_code(4000));
}

#[test]
fn dispatch_routes_by_channel_and_param() {
    let mut routes = Routes::new();
    let (board_tx, mut board_rx) = mpsc::unbounded_channel();
    let (chat_tx, mut chat_rx) = mpsc::unbounded_channel();
    routes.insert(ChannelKey::new("paintboard", ""), board_tx);
    routes.insert(ChannelKey::new("chat", "7"), chat_tx);

    dispatch(&mut routes, r#"{"_ws_type":"heartbeat","_channel":"chat","_channel_param":"7"}"#);
    dispatch(&mut routes, r#"{"_ws_type":"heartbeat","_channel":"chat","_channel_param":"8"}"#);
    dispatch(&mut routes, r#"{"_ws_type":"join_result","_channel":"paintboard","_channel_param":""}"#);
    dispatch(&mut routes, "not json");
    dispatch(&mut routes, r#"{"_ws_type":"mystery","_channel":"paintboard","_channel_param":""}"#);

    assert!(matches!(chat_rx.try_recv(), Ok(Incoming::Heartbeat { .. })));
    assert!(chat_rx.try_recv().is_err());
    assert!(matches!(board_rx.try_recv(), Ok(Incoming::JoinResult { .. })));
    assert!(board_rx.try_recv().is_err());
}

#[test]
fn dispatch_forgets_dropped_receivers() {
    let mut routes = Routes::new();
    let (tx, rx) = mpsc::unbounded_channel();
    routes.insert(ChannelKey::new("paintboard", ""), tx);
    drop(rx);
    dispatch(&mut routes, r#"{"_ws_type":"heartbeat","_channel":"paintboard","_channel_param":""}"#);
    assert!(routes.is_empty());
}

#[tokio::test]
async fn channel_joins_and_receives_broadcasts() {
    let server = MockSocket::new(true);
    let url = server.start().await;
    let (socket, mut events) = ChannelSocket::connect(url, ChannelTimings::default());
    assert_eq!(next_event(&mut events).await, SocketEvent::Open);

    let mut channel = socket.channel("paintboard", "", "").expect("channel");
    let joined = tokio::time::timeout(Duration::from_secs(5), channel.recv()).await.expect("join in time");
    assert!(matches!(joined, Some(ChannelEvent::Joined { .. })));

    server.send_update(4, 5, 6);
    let message = tokio::time::timeout(Duration::from_secs(5), channel.recv()).await.expect("message in time");
    let Some(ChannelEvent::Message(payload)) = message else {
        panic!("expected a broadcast, got {message:?}");
    };
    assert_eq!(payload.get("color"), Some(&json!(6)));

    channel.send(json!({"ping": true})).expect("send");
    wait_until("data envelope", || server.received().iter().any(|text| text.contains("\"ping\""))).await;

    socket.close();
    assert_eq!(
        next_event(&mut events).await,
        SocketEvent::Closed { code: Some(CLOSE_NORMAL), reason: "closed by client".to_owned() }
    );
}

#[tokio::test]
async fn retryable_close_reconnects() {
    let server = MockSocket::new(true);
    let url = server.start().await;
    let (socket, mut events) = ChannelSocket::connect(url, ChannelTimings::default());
    assert_eq!(next_event(&mut events).await, SocketEvent::Open);
    wait_until("first connection", || server.connections() == 1).await;

    server.close_with(1001);
    assert!(matches!(next_event(&mut events).await, SocketEvent::Reconnecting { code: Some(1001), .. }));
    assert_eq!(next_event(&mut events).await, SocketEvent::Open);
    wait_until("second connection", || server.connections() == 2).await;
    socket.close();
}

#[tokio::test]
async fn other_close_codes_are_terminal() {
    let server = MockSocket::new(true);
    let url = server.start().await;
    let (socket, mut events) = ChannelSocket::connect(url, ChannelTimings::default());
    assert_eq!(next_event(&mut events).await, SocketEvent::Open);
    wait_until("connection", || server.connections() == 1).await;

    server.close_with(4000);
    let event = next_event(&mut events).await;
    assert!(matches!(event, SocketEvent::Closed { code: Some(4000), .. }), "{event:?}");

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(server.connections(), 1);
    assert!(matches!(socket.send(&Outgoing::data(&ChannelKey::new("x", ""), json!(1))), Err(SocketError::Stopped)));
}

#[tokio::test]
async fn unreachable_server_keeps_retrying() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let (socket, mut events) = ChannelSocket::connect(format!("ws://{addr}/ws"), ChannelTimings::default());
    assert!(matches!(next_event(&mut events).await, SocketEvent::Reconnecting { code: None, .. }));
    socket.close();
    assert!(matches!(next_event(&mut events).await, SocketEvent::Closed { code: Some(CLOSE_NORMAL), .. }));
}

#[tokio::test(start_paused = true)]
async fn silent_server_times_out_the_handshake() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    // Accept and hold connections without ever answering the upgrade.
    let holder = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let (socket, mut events) = ChannelSocket::connect(format!("ws://{addr}/ws"), ChannelTimings::default());
    let event = tokio::time::timeout(CONNECT_TIMEOUT + Duration::from_secs(5), events.recv())
        .await
        .expect("handshake gives up in time")
        .expect("socket event");
    let SocketEvent::Reconnecting { code: None, reason } = event else {
        panic!("expected a reconnect, got {event:?}");
    };
    assert!(reason.contains("timed out"), "{reason}");

    socket.close();
    assert!(matches!(next_event(&mut events).await, SocketEvent::Closed { code: Some(CLOSE_NORMAL), .. }));
    holder.abort();
}
