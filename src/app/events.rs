//! Outbound session events.
//!
//! The [`DispenserSession`](super::service::DispenserSession) emits these
//! through the [`EventSink`](super::ports::EventSink) port. Adapters on
//! the other side decide what to do with them — drive screen state, ring
//! the notification bell, append to a log.

use crate::registry::Device;

/// Structured events emitted by the session core.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Human-readable bus connection status changed.
    TransportStatus(String),

    /// A discovery scan started (the discover broadcast went out).
    ScanStarted,

    /// The scan window closed; carries the number of devices known.
    ScanFinished { found: usize },

    /// A device was inserted or merged in the registry. Carries an atomic
    /// snapshot of the post-merge state.
    DeviceUpdated(Device),

    /// A device completed the authenticated handshake.
    DeviceConnected { device_id: String },

    /// A device's handshake session ended.
    DeviceDisconnected { device_id: String },

    /// A correlated command reached a terminal failure.
    CommandFailed {
        device_id: String,
        action: String,
        reason: String,
    },

    /// A dispense command was acknowledged by the device.
    DispenseCompleted {
        device_id: String,
        amount_grams: u32,
        /// True when the autonomous scheduler issued it.
        scheduled: bool,
    },

    /// The device confirmed a schedule sync.
    ScheduleSynced { device_id: String },
}
