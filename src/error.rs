//! Unified error types for the FIDO coordination core.
//!
//! A single `Error` enum that every subsystem can convert into, keeping
//! the session coordinator's error handling uniform. Variants carry the
//! device- or store-supplied message where one exists, since those are
//! surfaced verbatim to the user-facing layer.

use std::fmt;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the crate funnels into this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The message bus is unavailable or a publish failed.
    Transport(TransportError),
    /// An inbound message could not be interpreted.
    Protocol(ProtocolError),
    /// A correlated command failed, timed out, or collided with a pending one.
    Correlation(CorrelationError),
    /// The device rejected the authenticated-connect handshake.
    Auth(AuthError),
    /// A draft/synced reconciliation step failed.
    Reconcile(ReconcileError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Protocol(e) => write!(f, "protocol: {e}"),
            Self::Correlation(e) => write!(f, "correlation: {e}"),
            Self::Auth(e) => write!(f, "auth: {e}"),
            Self::Reconcile(e) => write!(f, "reconcile: {e}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The bus client is not connected to the broker.
    NotConnected,
    /// The underlying client rejected the publish.
    PublishFailed(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "bus not connected"),
            Self::PublishFailed(msg) => write!(f, "publish failed: {msg}"),
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

// ---------------------------------------------------------------------------
// Protocol errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Payload was not valid UTF-8 JSON.
    MalformedPayload,
    /// Topic did not match the dispenser topic scheme.
    UnknownTopic,
    /// A response arrived without a command or action name.
    MissingCommandName,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedPayload => write!(f, "malformed payload"),
            Self::UnknownTopic => write!(f, "unknown topic"),
            Self::MissingCommandName => write!(f, "response missing command name"),
        }
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

// ---------------------------------------------------------------------------
// Correlation errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelationError {
    /// A command with the same `(device, command)` key is already in flight.
    /// Callers must await the pending operation before retrying.
    AlreadyPending,
    /// The device replied with `result:"error"`; carries the device message.
    Rejected(String),
    /// No response arrived before the command's deadline.
    TimedOut,
    /// The session was torn down while the command was pending.
    Cancelled,
}

impl fmt::Display for CorrelationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyPending => write!(f, "command already pending for this device"),
            Self::Rejected(msg) => write!(f, "device rejected command: {msg}"),
            Self::TimedOut => write!(f, "device did not respond in time"),
            Self::Cancelled => write!(f, "command cancelled"),
        }
    }
}

impl From<CorrelationError> for Error {
    fn from(e: CorrelationError) -> Self {
        Self::Correlation(e)
    }
}

// ---------------------------------------------------------------------------
// Authentication errors
// ---------------------------------------------------------------------------

/// Distinct from [`CorrelationError::Rejected`] so operations riding behind
/// an implicit connect (dispense, sync) can short-circuit on handshake
/// failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The device rejected the shared-secret handshake.
    HandshakeRejected(String),
    /// The connect command itself never got a response.
    HandshakeTimedOut,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HandshakeRejected(msg) => write!(f, "handshake rejected: {msg}"),
            Self::HandshakeTimedOut => write!(f, "handshake timed out"),
        }
    }
}

impl From<AuthError> for Error {
    fn from(e: AuthError) -> Self {
        Self::Auth(e)
    }
}

// ---------------------------------------------------------------------------
// Reconciliation errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// Feeding time failed validation (hour 1-12, minute in 5-minute steps).
    InvalidTime { hour: u8, minute: u8 },
    /// Referenced entry or portion id does not exist in the draft.
    UnknownId(String),
    /// No pet is currently selected.
    NoActivePet,
    /// Sync requires exactly one selected portion.
    NoPortionSelected,
    /// Loading a pet's schedule from the persistence layer failed.
    StoreRead(String),
    /// A persistence-layer write failed; remaining writes were aborted and
    /// the draft left untouched.
    StoreWrite(String),
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTime { hour, minute } => {
                write!(f, "invalid feeding time {hour}:{minute:02}")
            }
            Self::UnknownId(id) => write!(f, "unknown schedule id {id}"),
            Self::NoActivePet => write!(f, "no pet selected"),
            Self::NoPortionSelected => write!(f, "no portion selected"),
            Self::StoreRead(msg) => write!(f, "store read failed: {msg}"),
            Self::StoreWrite(msg) => write!(f, "store write failed: {msg}"),
        }
    }
}

impl From<ReconcileError> for Error {
    fn from(e: ReconcileError) -> Self {
        Self::Reconcile(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, Error>;
