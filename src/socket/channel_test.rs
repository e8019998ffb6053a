use serde_json::json;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use super::*;

fn timings(join_retry: Option<Duration>) -> ChannelTimings {
    ChannelTimings {
        join_timeout: Duration::from_secs(5),
        join_retry,
        liveness_timeout: Duration::from_secs(120),
    }
}

/// Plays the connection task: records commands and delivers envelopes.
struct Harness {
    commands: UnboundedReceiver<Command>,
    route: Option<UnboundedSender<Incoming>>,
    sent: Vec<Value>,
    unrouted: bool,
}

impl Harness {
    fn drain(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Route(_, route) => self.route = Some(route),
                Command::Send(text) => self.sent.push(serde_json::from_str(&text).expect("json")),
                Command::Unroute(_) => self.unrouted = true,
                Command::Close => {}
            }
        }
    }

    fn deliver(&mut self, envelope: Value) {
        self.drain();
        let incoming = envelope::decode_envelope(&envelope.to_string()).expect("envelope");
        self.route.as_ref().expect("route").send(incoming).expect("deliver");
    }

    fn joins(&mut self) -> usize {
        self.drain();
        self.sent.iter().filter(|v| v["type"] == "join_channel").count()
    }
}

fn open(timings: ChannelTimings) -> (Channel, Harness) {
    let (socket, commands) = ChannelSocket::detached(timings);
    let channel = socket.channel("paintboard", "", "").expect("open");
    let mut harness = Harness { commands, route: None, sent: Vec::new(), unrouted: false };
    harness.drain();
    (channel, harness)
}

fn ack() -> Value {
    json!({"_ws_type": "join_result", "_channel": "paintboard", "_channel_param": "", "welcome_message": "hi"})
}

fn heartbeat() -> Value {
    json!({"_ws_type": "heartbeat", "_channel": "paintboard", "_channel_param": ""})
}

#[tokio::test(start_paused = true)]
async fn opening_routes_and_sends_join() {
    let (channel, harness) = open(timings(None));
    assert!(harness.route.is_some());
    assert_eq!(
        harness.sent,
        vec![json!({"type": "join_channel", "channel": "paintboard", "channel_param": "", "exclusive_key": ""})]
    );
    assert!(!channel.is_joined());
    assert_eq!(channel.key().to_string(), "paintboard");
}

#[tokio::test(start_paused = true)]
async fn acknowledgement_joins() {
    let (mut channel, mut harness) = open(timings(None));
    harness.deliver(ack());
    assert_eq!(channel.recv().await, Some(ChannelEvent::Joined { welcome: Some(json!("hi")) }));
    assert!(channel.is_joined());
}

#[tokio::test(start_paused = true)]
async fn missing_acknowledgement_times_out_and_closes() {
    let (mut channel, mut harness) = open(timings(None));
    let start = Instant::now();
    assert_eq!(
        channel.recv().await,
        Some(ChannelEvent::Failed(ChannelError::JoinTimeout(Duration::from_secs(5))))
    );
    assert_eq!(start.elapsed(), Duration::from_secs(5));
    assert_eq!(channel.recv().await, None);

    harness.drain();
    assert!(harness.unrouted);
    assert_eq!(harness.sent.last().expect("sent")["type"], "disconnect_channel");
}

#[tokio::test(start_paused = true)]
async fn join_retry_resends_until_acknowledged() {
    let timings = ChannelTimings { join_timeout: Duration::from_secs(1), ..timings(Some(Duration::from_secs(1))) };
    let (mut channel, mut harness) = open(timings);

    let waited = tokio::time::timeout(Duration::from_millis(2_500), channel.recv()).await;
    assert!(waited.is_err(), "no event while retrying");
    assert_eq!(harness.joins(), 3);

    harness.deliver(ack());
    assert!(matches!(channel.recv().await, Some(ChannelEvent::Joined { .. })));
}

#[tokio::test(start_paused = true)]
async fn heartbeats_extend_liveness() {
    let (mut channel, mut harness) = open(timings(None));
    harness.deliver(ack());
    channel.recv().await;
    let joined_at = Instant::now();

    tokio::time::sleep(Duration::from_secs(100)).await;
    harness.deliver(heartbeat());
    let waited = tokio::time::timeout(Duration::from_secs(100), channel.recv()).await;
    assert!(waited.is_err(), "heartbeat produces no event");

    assert_eq!(
        channel.recv().await,
        Some(ChannelEvent::Failed(ChannelError::LivenessTimeout(Duration::from_secs(120))))
    );
    assert_eq!(joined_at.elapsed(), Duration::from_secs(220));
}

#[tokio::test(start_paused = true)]
async fn broadcast_payload_is_delivered() {
    let (mut channel, mut harness) = open(timings(None));
    harness.deliver(ack());
    channel.recv().await;
    harness.deliver(json!({
        "_ws_type": "server_broadcast",
        "_channel": "paintboard",
        "_channel_param": "",
        "type": "paintboard_update",
        "x": 1,
        "y": 2,
        "color": 3,
    }));

    let Some(ChannelEvent::Message(payload)) = channel.recv().await else {
        panic!("expected a message");
    };
    assert_eq!(payload.get("type"), Some(&json!("paintboard_update")));
    assert_eq!(payload.get("x"), Some(&json!(1)));
}

#[tokio::test(start_paused = true)]
async fn kickoff_closes_channel() {
    let (mut channel, mut harness) = open(timings(None));
    harness.deliver(ack());
    channel.recv().await;
    harness.deliver(json!({"_ws_type": "exclusive_kickoff", "_channel": "paintboard", "_channel_param": ""}));

    assert!(matches!(channel.recv().await, Some(ChannelEvent::Kicked(_))));
    assert_eq!(channel.recv().await, None);
    harness.drain();
    assert!(harness.unrouted);
}

#[tokio::test(start_paused = true)]
async fn send_wraps_data_until_closed() {
    let (mut channel, mut harness) = open(timings(None));
    channel.send(json!({"hello": 1})).expect("send");
    harness.drain();
    assert_eq!(
        harness.sent.last().expect("sent"),
        &json!({"type": "data", "channel": "paintboard", "channel_param": "", "data": {"hello": 1}})
    );

    channel.close();
    assert!(matches!(channel.send(json!(null)), Err(SocketError::ChannelClosed(_))));
}

#[tokio::test(start_paused = true)]
async fn dropping_channel_unroutes() {
    let (channel, mut harness) = open(timings(None));
    drop(channel);
    harness.drain();
    assert!(harness.unrouted);
}

#[tokio::test(start_paused = true)]
async fn lost_route_reports_disconnected() {
    let (mut channel, mut harness) = open(timings(None));
    harness.route = None;
    assert_eq!(channel.recv().await, Some(ChannelEvent::Failed(ChannelError::Disconnected)));
}
