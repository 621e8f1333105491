//! Transport abstraction — any pub/sub publish channel.
//!
//! Concrete implementations:
//! - an MQTT client (TCP or websocket, broker-side auth)
//! - the recording mock used by the integration tests
//!
//! The session is generic over `BusTransport`, so swapping the bus client
//! requires zero changes to the coordination logic. Subscribing and the
//! connection lifecycle stay with the embedder; inbound messages are fed
//! to the session as raw `(topic, payload)` pairs.

use crate::error::TransportError;

/// Fire-and-forget publish port.
pub trait BusTransport {
    /// Publish `payload` on `topic` with at-least-once delivery.
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;
}

/// A null transport that discards all publishes.
/// Useful as a default before the real bus client is wired up.
pub struct NullTransport;

impl BusTransport for NullTransport {
    fn publish(&mut self, _topic: &str, _payload: &[u8]) -> Result<(), TransportError> {
        Ok(())
    }
}
