//! Message-bus layer: topic scheme, wire envelopes, and the transport port.
//!
//! Nothing in here owns a socket. The concrete pub/sub client (MQTT or
//! otherwise) lives outside the crate and is reached through the
//! [`BusTransport`](transport::BusTransport) port; inbound traffic is fed
//! back in by the embedder as raw `(topic, payload)` pairs.

pub mod envelope;
pub mod topic;
pub mod transport;
