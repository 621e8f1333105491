//! Coordinator configuration parameters
//!
//! All tunable parameters for a dispenser session. Values can be
//! overridden by the embedding application before the session is built.

use serde::{Deserialize, Serialize};

/// Core coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    // --- Bus ---
    /// Topic root under which all dispenser topics live
    pub topic_root: String,
    /// Client identity advertised in the `from` field of every publish
    pub client_id: String,

    // --- Device handshake ---
    /// Shared secret the dispensers expect in the `connect` command
    pub device_secret: String,

    // --- Command timeouts ---
    /// Seconds to wait for a `connect` response
    pub connect_timeout_secs: u32,
    /// Seconds to wait for a `dispense` response
    pub dispense_timeout_secs: u32,
    /// Seconds to wait for a `sync_schedules` response
    pub sync_timeout_secs: u32,

    // --- Discovery ---
    /// How long a discovery scan listens for announcements (seconds)
    pub scan_window_secs: u32,
    /// Delay before the automatic re-scan after the bus (re-)connects
    /// with an empty registry (seconds)
    pub rescan_delay_secs: u32,

    // --- Scheduling ---
    /// Dispense-evaluation tick period (seconds)
    pub tick_interval_secs: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            // Bus
            topic_root: "fido/dispensers".into(),
            client_id: "fido_app".into(),

            // Handshake
            device_secret: "FIDO2025".into(),

            // Timeouts
            connect_timeout_secs: 10,
            dispense_timeout_secs: 15,
            sync_timeout_secs: 10,

            // Discovery
            scan_window_secs: 8,
            rescan_delay_secs: 2,

            // Scheduling
            tick_interval_secs: 60, // once per minute
        }
    }
}

impl CoordinatorConfig {
    /// Timeout for a given command, in seconds.
    pub fn timeout_for(&self, action: &str) -> u32 {
        match action {
            "connect" => self.connect_timeout_secs,
            "dispense" => self.dispense_timeout_secs,
            _ => self.sync_timeout_secs,
        }
    }
}
