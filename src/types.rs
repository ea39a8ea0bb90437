use crate::error::LightingError;
use crate::protocol::{Envelope, DEVICE_SET};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Location identifier
pub type LocationId = String;

/// Device identifier (the bridge's `zid`)
pub type DeviceId = String;

/// An account location, as listed by the locations endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    #[serde(rename = "location_id")]
    pub id: LocationId,
    #[serde(default)]
    pub name: String,
}

/// A lighting bridge reachable through a redeemed ticket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bridge {
    pub location_id: LocationId,
    pub location_name: String,
    /// Websocket URL of the bridge channel, ticket included
    pub channel_url: String,
    /// Bridge asset ids at the location; the first one is addressed
    pub bridge_ids: Vec<String>,
}

impl Bridge {
    /// Destination id used in envelopes sent to this bridge
    pub fn primary_id(&self) -> &str {
        self.bridge_ids.first().map_or("", String::as_str)
    }
}

/// A light discovered behind a bridge
///
/// Rebuilt on every discovery; never cached between tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub category_id: u32,
    pub location_id: LocationId,
    pub location_name: String,
    pub bridge_id: String,
    pub channel_url: String,
}

/// Desired light state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    On,
    Off,
}

impl PowerState {
    /// Value of the `lightMode` command field
    pub fn light_mode(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "default",
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::On => f.write_str("on"),
            Self::Off => f.write_str("off"),
        }
    }
}

impl FromStr for PowerState {
    type Err = LightingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "on" => Ok(Self::On),
            "off" => Ok(Self::Off),
            _ => Err(LightingError::InvalidState(s.to_string())),
        }
    }
}

/// Response of one bridge to one switch command
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchResult {
    pub device: Device,
    /// Message kind of the response; `DeviceInfoSet` on success
    pub kind: String,
    pub response: Envelope,
}

impl SwitchResult {
    pub fn is_success(&self) -> bool {
        self.kind == DEVICE_SET
    }
}

/// Outcome of a switch task
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SwitchReport {
    /// One entry per switched device, in dispatch order per bridge
    pub results: Vec<SwitchResult>,
    /// Requested names that matched no discovered device
    pub unmatched: Vec<String>,
}

impl SwitchReport {
    /// Every requested name matched and every bridge acknowledged
    pub fn is_success(&self) -> bool {
        !self.results.is_empty()
            && self.unmatched.is_empty()
            && self.results.iter().all(SwitchResult::is_success)
    }
}
