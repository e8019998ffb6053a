//! Channel socket: one reconnecting websocket multiplexing named channels.
//!
//! DESIGN
//! ======
//! A single connection task owns the websocket. Handles talk to it through
//! an unbounded command queue (send text, add or remove a route, close) and
//! observe it through a broadcast of [`SocketEvent`]s. Incoming envelopes
//! are decoded once and routed by `(channel, channel_param)` to the matching
//! [`Channel`]; anything unmatched or malformed is dropped.
//!
//! RECONNECT POLICY
//! ================
//! Close codes 1001..=1999, transport errors, handshakes that outlast
//! [`CONNECT_TIMEOUT`] and connections that vanish without a close frame are
//! retried with exponential back-off (1 s doubling to 10 s). Any other close
//! code, or [`ChannelSocket::close`], ends the task with
//! [`SocketEvent::Closed`]. Routes survive a reconnect; channels do not
//! rejoin on their own, their owner decides when to join again.

mod channel;

use std::collections::HashMap;
use std::time::Duration;

use envelope::{ChannelKey, Incoming, Outgoing, encode_envelope};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

pub use channel::{Channel, ChannelError, ChannelEvent};

use crate::config::ChannelTimings;

const RECONNECT_BASE: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(10);
/// Upper bound on one TCP, TLS and websocket handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const EVENT_CAPACITY: usize = 32;

/// Close code reported for a client-initiated close.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code reported when the connection drops without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;
const CLOSE_NO_STATUS: u16 = 1005;

/// Whether a close code asks the client to reconnect.
#[must_use]
pub fn is_retry_code(code: u16) -> bool {
    (1001..=1999).contains(&code)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// A connection (or reconnection) completed its handshake.
    Open,
    /// The connection was lost and a new one will be attempted.
    /// `code` is `None` when the handshake itself failed.
    Reconnecting { code: Option<u16>, reason: String },
    /// The socket is finished. No further events follow.
    Closed { code: Option<u16>, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("socket task has stopped")]
    Stopped,
    #[error("channel {0} is closed")]
    ChannelClosed(ChannelKey),
    #[error(transparent)]
    Codec(#[from] envelope::CodecError),
}

pub(crate) enum Command {
    Send(String),
    Route(ChannelKey, mpsc::UnboundedSender<Incoming>),
    Unroute(ChannelKey),
    Close,
}

type Routes = HashMap<ChannelKey, mpsc::UnboundedSender<Incoming>>;
type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Cloneable handle to the connection task.
#[derive(Clone)]
pub struct ChannelSocket {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<SocketEvent>,
    timings: ChannelTimings,
}

impl ChannelSocket {
    /// Spawn the connection task for `url`. Must be called inside a tokio runtime.
    pub fn connect(url: impl Into<String>, timings: ChannelTimings) -> (Self, broadcast::Receiver<SocketEvent>) {
        let (commands, inbox) = mpsc::unbounded_channel();
        let (events, receiver) = broadcast::channel(EVENT_CAPACITY);
        tokio::spawn(run_connection(url.into(), inbox, events.clone()));
        (Self { commands, events, timings }, receiver)
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SocketEvent> {
        self.events.subscribe()
    }

    /// Queue an envelope for the current connection. Envelopes queued while
    /// disconnected are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::Codec`] if the envelope cannot be encoded and
    /// [`SocketError::Stopped`] once the socket has closed.
    pub fn send(&self, envelope: &Outgoing) -> Result<(), SocketError> {
        let text = encode_envelope(envelope)?;
        self.command(Command::Send(text))
    }

    /// Route `name`/`param` to a new [`Channel`] and send its join request.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::Stopped`] once the socket has closed.
    pub fn channel(&self, name: &str, param: &str, exclusive_key: &str) -> Result<Channel, SocketError> {
        Channel::open(self.clone(), ChannelKey::new(name, param), exclusive_key, self.timings)
    }

    /// Close normally. No reconnect follows.
    pub fn close(&self) {
        if self.commands.send(Command::Close).is_err() {
            debug!("socket task already stopped");
        }
    }

    pub(crate) fn command(&self, command: Command) -> Result<(), SocketError> {
        self.commands.send(command).map_err(|_| SocketError::Stopped)
    }

    /// Handle with no connection task; the caller plays the task's role.
    #[cfg(test)]
    pub(crate) fn detached(timings: ChannelTimings) -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (commands, inbox) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        (Self { commands, events, timings }, inbox)
    }
}

// =============================================================================
// CONNECTION TASK
// =============================================================================

enum Ended {
    ByClient,
    Remote { code: u16, reason: String },
    Dropped(String),
}

async fn run_connection(
    url: String,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: broadcast::Sender<SocketEvent>,
) {
    let mut routes = Routes::new();
    let mut delay = RECONNECT_BASE;

    loop {
        let connecting = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url.as_str()));
        tokio::pin!(connecting);
        let connected = loop {
            tokio::select! {
                result = &mut connecting => break match result {
                    Ok(handshake) => handshake.map_err(|error| error.to_string()),
                    Err(_) => Err(format!("handshake timed out after {}s", CONNECT_TIMEOUT.as_secs())),
                },
                command = commands.recv() => {
                    if !handle_offline(command, &mut routes) {
                        emit(&events, closed_by_client());
                        return;
                    }
                }
            }
        };

        match connected {
            Ok((stream, _)) => {
                delay = RECONNECT_BASE;
                info!(%url, "socket connected");
                emit(&events, SocketEvent::Open);
                match serve(stream, &mut commands, &mut routes).await {
                    Ended::ByClient => {
                        info!(%url, "socket closed by client");
                        emit(&events, closed_by_client());
                        return;
                    }
                    Ended::Remote { code, reason } if is_retry_code(code) => {
                        warn!(code, %reason, "socket closed by server; reconnecting");
                        emit(&events, SocketEvent::Reconnecting { code: Some(code), reason });
                    }
                    Ended::Remote { code, reason } => {
                        warn!(code, %reason, "socket closed by server");
                        emit(&events, SocketEvent::Closed { code: Some(code), reason });
                        return;
                    }
                    Ended::Dropped(reason) => {
                        warn!(%reason, "socket dropped; reconnecting");
                        emit(&events, SocketEvent::Reconnecting { code: Some(CLOSE_ABNORMAL), reason });
                    }
                }
            }
            Err(reason) => {
                warn!(%url, %reason, "socket connect failed; retrying");
                emit(&events, SocketEvent::Reconnecting { code: None, reason });
            }
        }

        let pause = tokio::time::sleep(delay);
        tokio::pin!(pause);
        delay = (delay * 2).min(RECONNECT_MAX);
        loop {
            tokio::select! {
                () = &mut pause => break,
                command = commands.recv() => {
                    if !handle_offline(command, &mut routes) {
                        emit(&events, closed_by_client());
                        return;
                    }
                }
            }
        }
    }
}

async fn serve(stream: Stream, commands: &mut mpsc::UnboundedReceiver<Command>, routes: &mut Routes) -> Ended {
    let (mut sink, mut source) = stream.split();
    loop {
        tokio::select! {
            message = source.next() => match message {
                Some(Ok(Message::Text(text))) => dispatch(routes, text.as_str()),
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => dispatch(routes, text),
                    Err(error) => debug!(%error, "dropping non-utf8 binary message"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame.map_or((CLOSE_NO_STATUS, String::new()), |f| {
                        (u16::from(f.code), f.reason.as_str().to_owned())
                    });
                    return Ended::Remote { code, reason };
                }
                Some(Ok(_)) => {}
                Some(Err(error)) => return Ended::Dropped(error.to_string()),
                None => return Ended::Dropped("stream ended without a close frame".to_owned()),
            },
            command = commands.recv() => match command {
                None | Some(Command::Close) => {
                    let frame = CloseFrame { code: CloseCode::Normal, reason: String::new().into() };
                    if let Err(error) = sink.send(Message::Close(Some(frame))).await {
                        debug!(%error, "close frame not delivered");
                    }
                    return Ended::ByClient;
                }
                Some(Command::Send(text)) => {
                    if let Err(error) = sink.send(Message::Text(text.into())).await {
                        return Ended::Dropped(error.to_string());
                    }
                }
                Some(Command::Route(key, route)) => {
                    routes.insert(key, route);
                }
                Some(Command::Unroute(key)) => {
                    routes.remove(&key);
                }
            },
        }
    }
}

/// Apply a command that arrived while disconnected. Returns `false` when
/// the socket should stop.
fn handle_offline(command: Option<Command>, routes: &mut Routes) -> bool {
    match command {
        None | Some(Command::Close) => false,
        Some(Command::Send(_)) => {
            warn!("socket not connected; dropping outgoing envelope");
            true
        }
        Some(Command::Route(key, route)) => {
            routes.insert(key, route);
            true
        }
        Some(Command::Unroute(key)) => {
            routes.remove(&key);
            true
        }
    }
}

fn dispatch(routes: &mut Routes, text: &str) {
    let incoming = match envelope::decode_envelope(text) {
        Ok(incoming) => incoming,
        Err(error) => {
            debug!(%error, "dropping malformed envelope");
            return;
        }
    };
    let key = incoming.channel_key();
    let Some(route) = routes.get(&key) else {
        debug!(%key, "no channel for envelope; dropping");
        return;
    };
    if route.send(incoming).is_err() {
        debug!(%key, "channel receiver gone; removing route");
        routes.remove(&key);
    }
}

fn closed_by_client() -> SocketEvent {
    SocketEvent::Closed { code: Some(CLOSE_NORMAL), reason: "closed by client".to_owned() }
}

fn emit(events: &broadcast::Sender<SocketEvent>, event: SocketEvent) {
    if events.send(event).is_err() {
        debug!("no socket event subscribers");
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
