//! Bridge channel messages and the Engine.IO v3 text framing that carries them.

use crate::error::{LightingError, Result};
use crate::types::PowerState;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

/// Device listing request/response kind
pub const DEVICE_LIST: &str = "DeviceInfoDocGetList";

/// Device command request/response kind; also the literal success marker of a switch
pub const DEVICE_SET: &str = "DeviceInfoSet";

const DEVICE_SET_DATATYPE: &str = "DeviceInfoSetType";
const LIGHT_MODE_COMMAND: &str = "light-mode.set";
const LIGHT_MODE_DURATION_SECS: u64 = 60;
const DEVICE_LIST_SEQ: u64 = 2;
const DEVICE_SET_SEQ: u64 = 3;

/// Socket.IO event name used by the bridge for every application message
const MESSAGE_EVENT: &str = "message";

/// Message envelope exchanged with a bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message kind; doubles as the correlation tag
    pub msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Everything else the bridge sends (src, status, context, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Envelope {
    /// Create an envelope of the given kind addressed to a bridge
    pub fn new(msg: impl Into<String>, dst: impl Into<String>, seq: u64) -> Self {
        Self {
            msg: msg.into(),
            dst: Some(dst.into()),
            seq: Some(seq),
            datatype: None,
            body: None,
            extra: Map::new(),
        }
    }

    /// Ask a bridge for every device document it knows about
    pub fn device_list(bridge_id: &str) -> Self {
        Self::new(DEVICE_LIST, bridge_id, DEVICE_LIST_SEQ)
    }

    /// Set the light mode of one device behind a bridge
    ///
    /// `Off` maps to the `default` light mode, which hands the light back to
    /// its motion/schedule rules.
    pub fn switch(bridge_id: &str, device_id: &str, state: PowerState) -> Self {
        let mut envelope = Self::new(DEVICE_SET, bridge_id, DEVICE_SET_SEQ);
        envelope.datatype = Some(DEVICE_SET_DATATYPE.to_string());
        envelope.body = Some(json!([{
            "zid": device_id,
            "command": {
                "v1": [{
                    "commandType": LIGHT_MODE_COMMAND,
                    "data": {
                        "lightMode": state.light_mode(),
                        "duration": LIGHT_MODE_DURATION_SECS,
                    }
                }]
            }
        }]));
        envelope
    }

    /// The `body` as an array of entries, if present
    pub fn body_entries(&self) -> Option<&Vec<Value>> {
        self.body.as_ref().and_then(Value::as_array)
    }
}

/// Key matching an inbound message to the request that caused it
///
/// Built from the channel URL and the message kind only, so two requests of
/// the same kind on one channel cannot be told apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    channel: String,
    kind: String,
}

impl CorrelationKey {
    pub fn new(channel: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            kind: kind.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.channel, self.kind)
    }
}

/// Handshake data sent by the server in the Engine.IO open packet
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    #[serde(default)]
    pub sid: String,
    /// Milliseconds between client pings
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
}

fn default_ping_interval() -> u64 {
    25_000
}

fn default_ping_timeout() -> u64 {
    60_000
}

/// A decoded Engine.IO / Socket.IO text packet
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(OpenInfo),
    Close,
    Ping,
    Pong,
    /// Namespace connected; the channel is usable from here on
    Connected,
    Disconnected,
    /// A `message` event carrying an envelope
    Message(Box<Envelope>),
    /// Socket.IO error packet
    Error(String),
    /// Any other packet or event we have no use for
    Other(String),
}

/// Engine.IO ping frame
pub const PING_FRAME: &str = "2";
/// Engine.IO pong frame
pub const PONG_FRAME: &str = "3";

/// Decode one websocket text frame
pub fn decode(frame: &str) -> Result<Packet> {
    let mut chars = frame.chars();
    let packet = match chars.next() {
        Some('0') => {
            let info: OpenInfo = serde_json::from_str(chars.as_str())?;
            Packet::Open(info)
        }
        Some('1') => Packet::Close,
        Some('2') => Packet::Ping,
        Some('3') => Packet::Pong,
        Some('4') => decode_socket_packet(chars.as_str())?,
        Some('6') => Packet::Other(frame.to_string()),
        _ => {
            return Err(LightingError::Protocol(format!(
                "unrecognised frame: {frame}"
            )))
        }
    };
    Ok(packet)
}

fn decode_socket_packet(rest: &str) -> Result<Packet> {
    let mut chars = rest.chars();
    let packet = match chars.next() {
        Some('0') => Packet::Connected,
        Some('1') => Packet::Disconnected,
        Some('2') => decode_event(strip_namespace_and_ack(chars.as_str()))?,
        Some('4') => Packet::Error(strip_namespace_and_ack(chars.as_str()).to_string()),
        _ => Packet::Other(format!("4{rest}")),
    };
    Ok(packet)
}

fn strip_namespace_and_ack(payload: &str) -> &str {
    let payload = if payload.starts_with('/') {
        payload.split_once(',').map_or("", |(_, rest)| rest)
    } else {
        payload
    };
    payload.trim_start_matches(|c: char| c.is_ascii_digit())
}

fn decode_event(payload: &str) -> Result<Packet> {
    let value: Value = serde_json::from_str(payload)?;
    let items = value
        .as_array()
        .ok_or_else(|| LightingError::Protocol("event payload is not an array".to_string()))?;

    let name = items.first().and_then(Value::as_str).unwrap_or_default();
    if name != MESSAGE_EVENT {
        return Ok(Packet::Other(payload.to_string()));
    }

    let envelope = match items.get(1) {
        // Some bridges send the envelope as a JSON string
        Some(Value::String(text)) => serde_json::from_str(text)?,
        Some(other) => Envelope::deserialize(other)?,
        None => {
            return Err(LightingError::Protocol(
                "message event without payload".to_string(),
            ))
        }
    };
    Ok(Packet::Message(Box::new(envelope)))
}

/// Encode an envelope as a Socket.IO `message` event frame
pub fn encode_message(envelope: &Envelope) -> Result<String> {
    let payload = serde_json::to_string(&(MESSAGE_EVENT, envelope))?;
    Ok(format!("42{payload}"))
}
