//! Turns bridge device documents into tagged [`Device`]s and resolves
//! user-supplied names against them.

use crate::error::{LightingError, Result};
use crate::protocol::Envelope;
use crate::types::{Bridge, Device};
use serde_json::Value;
use std::collections::HashSet;

/// `categoryId` the bridge uses for lights and light groups
pub const LIGHT_CATEGORY: u64 = 2;

/// Extract the lights from a device listing response
///
/// Documents without a `general.v2` section or a `zid` are skipped.
pub fn lights_from_response(bridge: &Bridge, response: &Envelope) -> Vec<Device> {
    let Some(entries) = response.body_entries() else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let Some(general) = entry.pointer("/general/v2") else {
                tracing::debug!("Skipping device document without general.v2");
                return None;
            };
            let category = general.get("categoryId").and_then(Value::as_u64)?;
            if category != LIGHT_CATEGORY {
                return None;
            }
            let Some(id) = general.get("zid").and_then(Value::as_str) else {
                tracing::warn!("Skipping light without zid at {}", bridge.location_name);
                return None;
            };
            let name = general
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default();

            Some(Device {
                id: id.to_string(),
                name: name.to_string(),
                category_id: u32::try_from(category).unwrap_or(u32::MAX),
                location_id: bridge.location_id.clone(),
                location_name: bridge.location_name.clone(),
                bridge_id: bridge.primary_id().to_string(),
                channel_url: bridge.channel_url.clone(),
            })
        })
        .collect()
}

/// Split a comma-separated name list, dropping blanks
pub fn parse_names(names: &str) -> Vec<String> {
    names
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Lights found across all bridges during one task
#[derive(Debug, Clone, Default)]
pub struct DeviceDirectory {
    devices: Vec<Device>,
}

/// Devices picked for a switch, plus the names that found nothing
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub devices: Vec<Device>,
    pub unmatched: Vec<String>,
}

impl DeviceDirectory {
    /// Flatten per-bridge results, keeping bridge order
    pub fn from_bridges(per_bridge: Vec<Vec<Device>>) -> Self {
        Self {
            devices: per_bridge.into_iter().flatten().collect(),
        }
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn into_devices(self) -> Vec<Device> {
        self.devices
    }

    /// Pick every device whose name matches one of `names`, ignoring case
    ///
    /// Names that match nothing are reported back rather than failing the
    /// selection; only a selection with no device at all is an error.
    pub fn select(&self, names: &str) -> Result<Selection> {
        let requested = parse_names(names);
        let mut seen = HashSet::new();
        let mut devices = Vec::new();
        let mut unmatched = Vec::new();

        for name in &requested {
            let wanted = name.to_lowercase();
            let mut found = false;
            for device in &self.devices {
                if device.name.to_lowercase() == wanted {
                    found = true;
                    if seen.insert(device.id.as_str()) {
                        devices.push(device.clone());
                    }
                }
            }
            if !found {
                unmatched.push(name.clone());
            }
        }

        if devices.is_empty() {
            return Err(LightingError::NotFound(names.to_string()));
        }
        Ok(Selection { devices, unmatched })
    }
}
