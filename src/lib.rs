//! FIDO dispenser coordination library.
//!
//! Coordinates a client with feeding dispensers over a topic-based
//! message bus: device discovery and presence, request/response command
//! correlation, draft/synced schedule reconciliation, and the autonomous
//! dispense scheduler. The concrete bus client, document store, and
//! presentation layer plug in through port traits.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod bus;
pub mod config;
pub mod correlator;
pub mod dispense;
pub mod registry;
pub mod schedule;

mod error;

pub use config::CoordinatorConfig;
pub use error::{
    AuthError, CorrelationError, Error, ProtocolError, ReconcileError, Result, TransportError,
};
