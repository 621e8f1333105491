//! Port traits — the boundary between the session core and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ DispenserSession (domain)
//! ```
//!
//! Driven adapters (the document store, the UI event listener) implement
//! these traits. The session consumes them via generics at call sites, so
//! the coordination core never touches Firestore, MQTT sockets, or screen
//! code directly. The publish side of the bus has its own port,
//! [`BusTransport`](crate::bus::transport::BusTransport).

use std::fmt;

use crate::schedule::{FeedingTime, Portion};

// ───────────────────────────────────────────────────────────────
// Event sink port (domain → presentation / logging)
// ───────────────────────────────────────────────────────────────

/// The session emits structured [`SessionEvent`](super::events::SessionEvent)s
/// through this port. Adapters decide where they go — screen state, a log,
/// a notification bell.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::SessionEvent);
}

// ───────────────────────────────────────────────────────────────
// Schedule store port (domain ↔ per-pet document store)
// ───────────────────────────────────────────────────────────────

/// Per-pet persistent schedule storage: a `feedingTimes` collection and a
/// `portions` collection, each supporting create/update/delete by id.
///
/// `create_*` returns the persisted document id; the reconciler swaps it
/// in for the draft's `local-N` placeholder after a successful commit.
/// Real-time change notifications flow the other way, through
/// [`DispenserSession::on_store_changed`](super::service::DispenserSession::on_store_changed).
pub trait ScheduleStore {
    /// Load both collections for a pet, feeding times ordered by
    /// `time_order`.
    fn load(&self, pet_id: &str) -> Result<(Vec<FeedingTime>, Vec<Portion>), StoreError>;

    fn create_feeding_time(
        &mut self,
        pet_id: &str,
        time: &FeedingTime,
    ) -> Result<String, StoreError>;
    fn update_feeding_time(&mut self, pet_id: &str, time: &FeedingTime)
    -> Result<(), StoreError>;
    fn delete_feeding_time(&mut self, pet_id: &str, id: &str) -> Result<(), StoreError>;

    fn create_portion(&mut self, pet_id: &str, portion: &Portion) -> Result<String, StoreError>;
    fn update_portion(&mut self, pet_id: &str, portion: &Portion) -> Result<(), StoreError>;
    fn delete_portion(&mut self, pet_id: &str, id: &str) -> Result<(), StoreError>;
}

/// Errors from [`ScheduleStore`] operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Referenced document does not exist.
    NotFound,
    /// The backing store is unreachable (offline, auth expired).
    Unavailable,
    /// Generic backend failure with a backend-supplied message.
    Backend(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "document not found"),
            Self::Unavailable => write!(f, "store unavailable"),
            Self::Backend(msg) => write!(f, "store error: {msg}"),
        }
    }
}
