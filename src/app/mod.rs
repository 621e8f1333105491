//! Application core — pure coordination logic, zero I/O.
//!
//! This module contains the session coordinator for the FIDO system:
//! device/command flow orchestration, schedule editing, and the timers
//! that drive autonomous dispensing. All interaction with the bus, the
//! document store, and the presentation layer happens through **port
//! traits** defined in [`ports`] (plus the transport port in
//! [`bus`](crate::bus)), keeping this layer fully testable with mocks.

pub mod events;
pub mod ports;
pub mod service;
