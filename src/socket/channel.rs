//! One logical channel on a [`ChannelSocket`].
//!
//! The channel owns its timer as a plain deadline field: before the join is
//! acknowledged it is the join deadline, afterwards the liveness deadline
//! that every acknowledgement, heartbeat or data message pushes forward.
//! Missing either deadline fails the channel and closes it.

use std::time::Duration;

use envelope::{ChannelKey, Incoming, Outgoing};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{ChannelSocket, Command, SocketError};
use crate::config::ChannelTimings;

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// The server acknowledged the join.
    Joined { welcome: Option<Value> },
    /// A `server_broadcast` payload.
    Message(Map<String, Value>),
    /// Another connection took this channel's exclusive key. The channel is closed.
    Kicked(Map<String, Value>),
    /// The channel failed and is closed.
    Failed(ChannelError),
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("join not acknowledged within {0:?}")]
    JoinTimeout(Duration),
    #[error("no channel traffic within {0:?}")]
    LivenessTimeout(Duration),
    #[error("socket stopped delivering to this channel")]
    Disconnected,
}

pub struct Channel {
    socket: ChannelSocket,
    key: ChannelKey,
    exclusive_key: String,
    inbox: mpsc::UnboundedReceiver<Incoming>,
    timings: ChannelTimings,
    joined: bool,
    closed: bool,
    deadline: Instant,
}

impl Channel {
    pub(super) fn open(
        socket: ChannelSocket,
        key: ChannelKey,
        exclusive_key: &str,
        timings: ChannelTimings,
    ) -> Result<Self, SocketError> {
        let (route, inbox) = mpsc::unbounded_channel();
        socket.command(Command::Route(key.clone(), route))?;
        let channel = Self {
            socket,
            key,
            exclusive_key: exclusive_key.to_owned(),
            inbox,
            timings,
            joined: false,
            closed: false,
            deadline: Instant::now() + timings.join_timeout,
        };
        channel.send_join()?;
        debug!(key = %channel.key, "joining channel");
        Ok(channel)
    }

    #[must_use]
    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    #[must_use]
    pub fn is_joined(&self) -> bool {
        self.joined
    }

    /// Next channel event, or `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        loop {
            if self.closed {
                return None;
            }
            let incoming = match tokio::time::timeout_at(self.deadline, self.inbox.recv()).await {
                Ok(Some(incoming)) => incoming,
                Ok(None) => return Some(self.fail(ChannelError::Disconnected)),
                Err(_) => match self.on_deadline() {
                    Some(event) => return Some(event),
                    None => continue,
                },
            };

            match incoming {
                Incoming::JoinResult { welcome_message, .. } => {
                    if !self.joined {
                        info!(key = %self.key, "channel joined");
                    }
                    self.joined = true;
                    self.touch();
                    return Some(ChannelEvent::Joined { welcome: welcome_message });
                }
                Incoming::Heartbeat { .. } => self.touch(),
                Incoming::ServerBroadcast { payload, .. } => {
                    self.touch();
                    return Some(ChannelEvent::Message(payload));
                }
                Incoming::ExclusiveKickoff { payload, .. } => {
                    warn!(key = %self.key, "channel taken over by another connection");
                    self.close();
                    return Some(ChannelEvent::Kicked(payload));
                }
            }
        }
    }

    /// Send an application payload on this channel.
    ///
    /// # Errors
    ///
    /// Returns [`SocketError::ChannelClosed`] after the channel closed, or the
    /// socket's own error.
    pub fn send(&self, data: Value) -> Result<(), SocketError> {
        if self.closed {
            return Err(SocketError::ChannelClosed(self.key.clone()));
        }
        self.socket.send(&Outgoing::data(&self.key, data))
    }

    /// Stop routing to this channel and tell the server. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(error) = self.socket.command(Command::Unroute(self.key.clone())) {
            debug!(key = %self.key, %error, "socket gone before channel close");
            return;
        }
        if let Err(error) = self.socket.send(&Outgoing::disconnect(&self.key, &self.exclusive_key)) {
            debug!(key = %self.key, %error, "disconnect not sent");
        }
    }

    fn send_join(&self) -> Result<(), SocketError> {
        self.socket.send(&Outgoing::join(&self.key, &self.exclusive_key))
    }

    fn touch(&mut self) {
        if self.joined {
            self.deadline = Instant::now() + self.timings.liveness_timeout;
        }
    }

    fn on_deadline(&mut self) -> Option<ChannelEvent> {
        if self.joined {
            return Some(self.fail(ChannelError::LivenessTimeout(self.timings.liveness_timeout)));
        }
        let Some(interval) = self.timings.join_retry else {
            return Some(self.fail(ChannelError::JoinTimeout(self.timings.join_timeout)));
        };
        debug!(key = %self.key, "join not acknowledged; sending again");
        if self.send_join().is_err() {
            return Some(self.fail(ChannelError::Disconnected));
        }
        self.deadline = Instant::now() + interval;
        None
    }

    fn fail(&mut self, error: ChannelError) -> ChannelEvent {
        warn!(key = %self.key, %error, "channel failed");
        self.close();
        ChannelEvent::Failed(error)
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
#[path = "channel_test.rs"]
mod tests;
