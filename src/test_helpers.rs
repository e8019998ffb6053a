//! Local HTTP and websocket doubles for the board endpoints.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::routing::{any, get, post};
use envelope::Outgoing;
use serde_json::json;
use tokio::sync::broadcast;

async fn bind(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move { axum::serve(listener, app).await.expect("serve") });
    format!("{addr}")
}

/// Poll `check` until it holds; fails the test after five seconds.
pub async fn wait_until(what: &str, check: impl Fn() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

// =============================================================================
// HTTP
// =============================================================================

/// A request seen by [`MockHttp`].
#[derive(Debug, Clone)]
pub struct Seen {
    pub path: String,
    pub cookie: Option<String>,
    pub body: String,
}

/// Scripted HTTP endpoint serving `/board` and `/paint`. Replies are
/// consumed in order; the last one repeats forever.
#[derive(Default)]
pub struct MockHttp {
    replies: Mutex<VecDeque<(u16, String)>>,
    seen: Mutex<Vec<Seen>>,
}

impl MockHttp {
    pub fn new(replies: &[(u16, &str)]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|(s, b)| (*s, (*b).to_owned())).collect()),
            seen: Mutex::new(Vec::new()),
        })
    }

    /// Serve on an ephemeral port and return `http://host:port`.
    pub async fn start(self: &Arc<Self>) -> String {
        let app = Router::new()
            .route("/board", get(reply))
            .route("/paint", post(reply))
            .with_state(Arc::clone(self));
        format!("http://{}", bind(app).await)
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().expect("seen lock").clone()
    }

    pub fn hits(&self) -> usize {
        self.seen.lock().expect("seen lock").len()
    }

    fn next_reply(&self) -> (u16, String) {
        let mut replies = self.replies.lock().expect("replies lock");
        if replies.len() > 1 {
            replies.pop_front().expect("reply")
        } else {
            replies.front().cloned().unwrap_or((404, String::new()))
        }
    }
}

async fn reply(
    State(mock): State<Arc<MockHttp>>,
    uri: axum::http::Uri,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    let cookie = headers
        .get(axum::http::header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(ToOwned::to_owned);
    mock.seen
        .lock()
        .expect("seen lock")
        .push(Seen { path: uri.path().to_owned(), cookie, body });
    let (status, body) = mock.next_reply();
    (StatusCode::from_u16(status).expect("status"), body)
}

// =============================================================================
// WEBSOCKET
// =============================================================================

#[derive(Debug, Clone)]
enum Push {
    Text(String),
    Close(u16),
}

/// Websocket endpoint that records client frames, optionally acknowledges
/// joins, and forwards pushed frames to every live connection.
pub struct MockSocket {
    ack_joins: bool,
    connections: AtomicUsize,
    received: Mutex<Vec<String>>,
    push: broadcast::Sender<Push>,
}

impl MockSocket {
    pub fn new(ack_joins: bool) -> Arc<Self> {
        let (push, _) = broadcast::channel(64);
        Arc::new(Self { ack_joins, connections: AtomicUsize::new(0), received: Mutex::new(Vec::new()), push })
    }

    /// Serve on an ephemeral port and return `ws://host:port/ws`.
    pub async fn start(self: &Arc<Self>) -> String {
        let app = Router::new().route("/ws", any(upgrade)).with_state(Arc::clone(self));
        format!("ws://{}/ws", bind(app).await)
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<String> {
        self.received.lock().expect("received lock").clone()
    }

    /// Number of `join_channel` frames received so far.
    pub fn joins(&self) -> usize {
        self.received()
            .iter()
            .filter(|text| matches!(serde_json::from_str(text), Ok(Outgoing::JoinChannel { .. })))
            .count()
    }

    pub fn send_text(&self, text: impl Into<String>) {
        self.push.send(Push::Text(text.into())).expect("live connection");
    }

    pub fn send_update(&self, x: i32, y: i32, color: u8) {
        self.send_text(
            json!({
                "_ws_type": "server_broadcast",
                "_channel": "paintboard",
                "_channel_param": "",
                "type": "paintboard_update",
                "x": x,
                "y": y,
                "color": color,
            })
            .to_string(),
        );
    }

    pub fn close_with(&self, code: u16) {
        self.push.send(Push::Close(code)).expect("live connection");
    }
}

async fn upgrade(State(mock): State<Arc<MockSocket>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, mock))
}

async fn serve_socket(mut socket: WebSocket, mock: Arc<MockSocket>) {
    let mut push = mock.push.subscribe();
    mock.connections.fetch_add(1, Ordering::SeqCst);
    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let text = text.to_string();
                    mock.received.lock().expect("received lock").push(text.clone());
                    if !mock.ack_joins {
                        continue;
                    }
                    if let Ok(Outgoing::JoinChannel { channel, channel_param, .. }) = serde_json::from_str(&text) {
                        let ack = json!({
                            "_ws_type": "join_result",
                            "_channel": channel,
                            "_channel_param": channel_param,
                            "welcome_message": "welcome",
                        });
                        if socket.send(Message::Text(ack.to_string().into())).await.is_err() {
                            return;
                        }
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return,
            },
            pushed = push.recv() => match pushed {
                Ok(Push::Text(text)) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        return;
                    }
                }
                Ok(Push::Close(code)) => {
                    let frame = CloseFrame { code, reason: "test close".into() };
                    socket.send(Message::Close(Some(frame))).await.ok();
                    return;
                }
                Err(_) => return,
            },
        }
    }
}
