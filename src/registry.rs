//! Device registry — the set of dispensers known to this session.
//!
//! Devices enter the registry through discovery announcements, status
//! messages, or telemetry, and are never deleted; `last_seen` lets a
//! presentation layer apply its own staleness threshold. `is_connected`
//! flips only on an authenticated handshake, which is tracked by the
//! session, not inferred from traffic.
//!
//! Mutation methods return a cloned snapshot of the post-merge device so
//! observers always read atomic state, never a half-merged entry.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use log::warn;
use serde_json::{Map, Value};

/// A known dispenser.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    /// Stable hardware-assigned identity.
    pub device_id: String,
    /// Friendly name, from the announcement or derived from the id.
    pub name: String,
    /// Last status/telemetry fields received, merged key-by-key.
    pub attrs: Map<String, Value>,
    /// When the last message referencing this device arrived.
    pub last_seen: NaiveDateTime,
    /// True once any message referencing the device has arrived.
    pub is_available: bool,
    /// True only after a successful authenticated handshake.
    pub is_connected: bool,
}

impl Device {
    fn new(device_id: &str, now: NaiveDateTime) -> Self {
        let tail_start = device_id.char_indices().rev().nth(3).map_or(0, |(i, _)| i);
        let tail = &device_id[tail_start..];
        Self {
            device_id: device_id.to_string(),
            name: format!("Dispenser {tail}"),
            attrs: Map::new(),
            last_seen: now,
            is_available: true,
            is_connected: false,
        }
    }

    fn merge(&mut self, fields: &Map<String, Value>, now: NaiveDateTime) {
        for (key, value) in fields {
            match key.as_str() {
                "deviceId" => {}
                "name" => {
                    if let Value::String(name) = value {
                        self.name = name.clone();
                    }
                }
                _ => {
                    self.attrs.insert(key.clone(), value.clone());
                }
            }
        }
        self.last_seen = now;
        self.is_available = true;
    }
}

/// Registry of every dispenser seen on the bus.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, Device>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            devices: HashMap::new(),
        }
    }

    /// Upsert from a discovery announcement. The announcement itself names
    /// the device; announcements without a `deviceId` are dropped.
    pub fn record_discovery(
        &mut self,
        fields: &Map<String, Value>,
        now: NaiveDateTime,
    ) -> Option<Device> {
        let Some(Value::String(device_id)) = fields.get("deviceId") else {
            warn!("registry: discovery announcement without deviceId dropped");
            return None;
        };
        let device_id = device_id.clone();
        Some(self.upsert(&device_id, fields, now))
    }

    /// Upsert from a status message on the device's topic.
    pub fn record_status(
        &mut self,
        device_id: &str,
        fields: &Map<String, Value>,
        now: NaiveDateTime,
    ) -> Device {
        self.upsert(device_id, fields, now)
    }

    /// Upsert from a telemetry message on the device's topic.
    pub fn record_telemetry(
        &mut self,
        device_id: &str,
        fields: &Map<String, Value>,
        now: NaiveDateTime,
    ) -> Device {
        self.upsert(device_id, fields, now)
    }

    /// Mark the device's handshake session established. Idempotent; a no-op
    /// for devices never seen on the bus.
    pub fn mark_connected(&mut self, device_id: &str) -> Option<Device> {
        let device = self.devices.get_mut(device_id)?;
        device.is_connected = true;
        Some(device.clone())
    }

    /// Mark the device's handshake session closed. Idempotent.
    pub fn mark_disconnected(&mut self, device_id: &str) -> Option<Device> {
        let device = self.devices.get_mut(device_id)?;
        device.is_connected = false;
        Some(device.clone())
    }

    /// Pure query: has this device completed the handshake?
    pub fn is_connected(&self, device_id: &str) -> bool {
        self.devices
            .get(device_id)
            .is_some_and(|d| d.is_connected)
    }

    pub fn get(&self, device_id: &str) -> Option<&Device> {
        self.devices.get(device_id)
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Snapshot of every known device, unordered.
    pub fn snapshot(&self) -> Vec<Device> {
        self.devices.values().cloned().collect()
    }

    fn upsert(&mut self, device_id: &str, fields: &Map<String, Value>, now: NaiveDateTime) -> Device {
        let device = self
            .devices
            .entry(device_id.to_string())
            .or_insert_with(|| Device::new(device_id, now));
        device.merge(fields, now);
        device.clone()
    }
}
