//! Shared envelope model and JSON codec for the paint board socket.
//!
//! This crate owns the wire representation spoken over the multiplexed
//! websocket: outgoing channel commands, incoming server envelopes tagged by
//! `_ws_type`, and the board payloads nested inside server broadcasts.
//! Payloads stay flexible (`serde_json::Map`) until a consumer asks for a
//! typed view of them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Error returned by the envelope codec.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The text could not be parsed as a known envelope shape.
    #[error("failed to decode envelope: {0}")]
    Json(#[from] serde_json::Error),
}

/// Routing key for a logical channel multiplexed over the socket.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    /// Channel name, e.g. `"paintboard"`.
    pub channel: String,
    /// Channel parameter; empty for global channels.
    pub param: String,
}

impl ChannelKey {
    #[must_use]
    pub fn new(channel: impl Into<String>, param: impl Into<String>) -> Self {
        Self { channel: channel.into(), param: param.into() }
    }
}

impl std::fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.param.is_empty() {
            write!(f, "{}", self.channel)
        } else {
            write!(f, "{}.{}", self.channel, self.param)
        }
    }
}

// =============================================================================
// OUTGOING
// =============================================================================

/// Envelope sent from the client to the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outgoing {
    /// Subscribe to a channel.
    JoinChannel { channel: String, channel_param: String, exclusive_key: String },
    /// Unsubscribe from a channel.
    DisconnectChannel { channel: String, channel_param: String, exclusive_key: String },
    /// Application payload addressed to a channel.
    Data { channel: String, channel_param: String, data: Value },
}

impl Outgoing {
    #[must_use]
    pub fn join(key: &ChannelKey, exclusive_key: &str) -> Self {
        Self::JoinChannel {
            channel: key.channel.clone(),
            channel_param: key.param.clone(),
            exclusive_key: exclusive_key.to_owned(),
        }
    }

    #[must_use]
    pub fn disconnect(key: &ChannelKey, exclusive_key: &str) -> Self {
        Self::DisconnectChannel {
            channel: key.channel.clone(),
            channel_param: key.param.clone(),
            exclusive_key: exclusive_key.to_owned(),
        }
    }

    #[must_use]
    pub fn data(key: &ChannelKey, data: Value) -> Self {
        Self::Data { channel: key.channel.clone(), channel_param: key.param.clone(), data }
    }
}

// =============================================================================
// INCOMING
// =============================================================================

/// Envelope received from the server, discriminated by `_ws_type`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_ws_type", rename_all = "snake_case")]
pub enum Incoming {
    /// Acknowledgement of a `join_channel` request.
    JoinResult {
        #[serde(rename = "_channel", default)]
        channel: String,
        #[serde(rename = "_channel_param", default)]
        channel_param: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        welcome_message: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_number: Option<u64>,
    },
    /// Data pushed to every subscriber of a channel.
    ServerBroadcast {
        #[serde(rename = "_channel", default)]
        channel: String,
        #[serde(rename = "_channel_param", default)]
        channel_param: String,
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
    /// Server keepalive.
    Heartbeat {
        #[serde(rename = "_channel", default)]
        channel: String,
        #[serde(rename = "_channel_param", default)]
        channel_param: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_number: Option<u64>,
    },
    /// Another connection joined with the same exclusive key.
    ExclusiveKickoff {
        #[serde(rename = "_channel", default)]
        channel: String,
        #[serde(rename = "_channel_param", default)]
        channel_param: String,
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
}

impl Incoming {
    /// Routing key of the channel this envelope belongs to.
    #[must_use]
    pub fn channel_key(&self) -> ChannelKey {
        let (channel, param) = match self {
            Self::JoinResult { channel, channel_param, .. }
            | Self::ServerBroadcast { channel, channel_param, .. }
            | Self::Heartbeat { channel, channel_param, .. }
            | Self::ExclusiveKickoff { channel, channel_param, .. } => (channel, channel_param),
        };
        ChannelKey::new(channel.clone(), param.clone())
    }
}

// =============================================================================
// BOARD PAYLOADS
// =============================================================================

/// Typed view of a `server_broadcast` payload on the paint board channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Broadcast {
    /// A single cell changed color.
    PaintboardUpdate { x: i32, y: i32, color: u8 },
    /// Any payload type this client does not act on.
    #[serde(other)]
    Other,
}

// =============================================================================
// CODEC
// =============================================================================

/// Encode an outgoing envelope as JSON text.
///
/// # Errors
///
/// Returns [`CodecError::Json`] if the embedded data cannot be serialized.
pub fn encode_envelope(envelope: &Outgoing) -> Result<String, CodecError> {
    Ok(serde_json::to_string(envelope)?)
}

/// Decode JSON text into an incoming envelope.
///
/// # Errors
///
/// Returns [`CodecError::Json`] for malformed JSON or an unknown `_ws_type`.
pub fn decode_envelope(text: &str) -> Result<Incoming, CodecError> {
    Ok(serde_json::from_str(text)?)
}

/// Interpret a broadcast payload as a board message.
///
/// # Errors
///
/// Returns [`CodecError::Json`] when a known `type` carries malformed fields.
pub fn decode_broadcast(payload: &Map<String, Value>) -> Result<Broadcast, CodecError> {
    Ok(serde_json::from_value(Value::Object(payload.clone()))?)
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
