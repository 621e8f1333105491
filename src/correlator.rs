//! Command correlator — request/response semantics over fire-and-forget
//! pub/sub.
//!
//! Publishing a command registers a pending operation under the structured
//! key `(device_id, action)`. When a response arrives on the device's
//! response topic with a matching command name, the operation resolves and
//! its single-shot continuation fires. Every operation carries a deadline;
//! [`CommandCorrelator::expire_stale`] sweeps overdue entries so a silent
//! device can never leak a pending operation.
//!
//! At most one operation per key may be in flight: a second send for a
//! pending key is rejected with [`CorrelationError::AlreadyPending`]
//! instead of silently replacing the first handler. Different actions or
//! different devices are fully independent.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use chrono::{Duration, NaiveDateTime};
use futures::channel::oneshot;
use log::{debug, info, warn};
use serde_json::{Map, Value};

use crate::bus::envelope::{ResponseMessage, ResponseOutcome, command_envelope};
use crate::bus::topic::TopicScheme;
use crate::bus::transport::BusTransport;
use crate::config::CoordinatorConfig;
use crate::error::{AuthError, CorrelationError, Error, ProtocolError};

/// Dispenser command names.
pub mod action {
    pub const CONNECT: &str = "connect";
    pub const DISCONNECT: &str = "disconnect";
    pub const DISPENSE: &str = "dispense";
    pub const SYNC_SCHEDULES: &str = "sync_schedules";
}

// ───────────────────────────────────────────────────────────────
// Keys, origins, outcomes
// ───────────────────────────────────────────────────────────────

/// Structured pending-operation key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandKey {
    pub device_id: String,
    pub action: String,
}

/// Why a command was issued. Returned to the session on resolution so it
/// can advance multi-step flows (auto-connect, scheduled dispense).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOrigin {
    /// A user-facing call with no follow-up bookkeeping.
    Manual,
    /// A dispense; carries the gram amount for reporting, and the ledger
    /// slot to confirm when the autonomous scheduler issued it.
    Dispense {
        amount_grams: u32,
        ledger_key: Option<String>,
    },
}

/// Successful command acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandAck {
    pub device_id: String,
    pub action: String,
    /// Device-supplied message, possibly empty.
    pub message: String,
}

/// What a continuation receives.
pub type CommandReply = Result<CommandAck, Error>;

/// A pending operation that reached a terminal state, handed back to the
/// session for flow bookkeeping. The waiter (if any) has already fired.
#[derive(Debug)]
pub struct ResolvedCommand {
    pub key: CommandKey,
    pub origin: CommandOrigin,
    pub outcome: CommandReply,
}

// ───────────────────────────────────────────────────────────────
// Tickets
// ───────────────────────────────────────────────────────────────

/// Awaitable handle for a correlated command.
///
/// Resolves when the matching response is processed, the deadline sweep
/// rejects the operation, or the session is torn down.
#[derive(Debug)]
pub struct CommandTicket {
    rx: oneshot::Receiver<CommandReply>,
}

impl CommandTicket {
    pub(crate) fn new(rx: oneshot::Receiver<CommandReply>) -> Self {
        Self { rx }
    }

    /// Non-blocking check, for callers polling from a synchronous loop.
    pub fn try_outcome(&mut self) -> Option<CommandReply> {
        match self.rx.try_recv() {
            Ok(Some(reply)) => Some(reply),
            Ok(None) => None,
            Err(_) => Some(Err(CorrelationError::Cancelled.into())),
        }
    }
}

impl Future for CommandTicket {
    type Output = CommandReply;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(reply)) => Poll::Ready(reply),
            Poll::Ready(Err(_)) => Poll::Ready(Err(CorrelationError::Cancelled.into())),
            Poll::Pending => Poll::Pending,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Correlator
// ───────────────────────────────────────────────────────────────

struct PendingOp {
    waiter: Option<oneshot::Sender<CommandReply>>,
    origin: CommandOrigin,
    deadline: NaiveDateTime,
}

/// Pending-operation table plus the envelope/topic plumbing to publish
/// commands. Transport-decoupled: the bus client is passed in per call.
pub struct CommandCorrelator {
    pending: HashMap<CommandKey, PendingOp>,
    topics: TopicScheme,
    client_id: String,
    config: CoordinatorConfig,
}

impl CommandCorrelator {
    pub fn new(config: &CoordinatorConfig) -> Self {
        Self {
            pending: HashMap::new(),
            topics: TopicScheme::new(&config.topic_root),
            client_id: config.client_id.clone(),
            config: config.clone(),
        }
    }

    /// Publish a command and register the pending operation.
    ///
    /// `waiter` is the single-shot continuation; pass `None` for commands
    /// whose outcome the session consumes itself (chained flows). On any
    /// failure the waiter is notified with the error before it is
    /// returned, so a caller holding a ticket always observes the result.
    pub fn send(
        &mut self,
        transport: &mut impl BusTransport,
        device_id: &str,
        action: &str,
        payload: Map<String, Value>,
        origin: CommandOrigin,
        waiter: Option<oneshot::Sender<CommandReply>>,
        now: NaiveDateTime,
    ) -> Result<(), Error> {
        let key = CommandKey {
            device_id: device_id.to_string(),
            action: action.to_string(),
        };
        if self.pending.contains_key(&key) {
            warn!("correlator: {action} already pending for {device_id}");
            let err: Error = CorrelationError::AlreadyPending.into();
            Self::notify(waiter, Err(err.clone()));
            return Err(err);
        }

        let envelope = command_envelope(action, payload, &self.client_id, now);
        if let Err(e) = transport.publish(&self.topics.commands(device_id), &envelope) {
            let err: Error = e.into();
            Self::notify(waiter, Err(err.clone()));
            return Err(err);
        }
        info!("correlator: sent {action} to {device_id}");

        let deadline = now + Duration::seconds(i64::from(self.config.timeout_for(action)));
        self.pending.insert(
            key,
            PendingOp {
                waiter,
                origin,
                deadline,
            },
        );
        Ok(())
    }

    /// [`send`](Self::send) with a fresh ticket as the continuation.
    pub fn send_with_ticket(
        &mut self,
        transport: &mut impl BusTransport,
        device_id: &str,
        action: &str,
        payload: Map<String, Value>,
        origin: CommandOrigin,
        now: NaiveDateTime,
    ) -> Result<CommandTicket, Error> {
        let (tx, rx) = oneshot::channel();
        self.send(transport, device_id, action, payload, origin, Some(tx), now)?;
        Ok(CommandTicket::new(rx))
    }

    /// Match an inbound response to its pending operation.
    ///
    /// Returns the resolved operation for terminal results; `None` for
    /// progress acks, unmatched responses, and responses without a
    /// command name.
    pub fn resolve(
        &mut self,
        device_id: &str,
        response: &ResponseMessage,
    ) -> Option<ResolvedCommand> {
        let Some(name) = response.command_name() else {
            warn!(
                "correlator: dropped response from {device_id}: {}",
                ProtocolError::MissingCommandName
            );
            return None;
        };
        let key = CommandKey {
            device_id: device_id.to_string(),
            action: name.to_string(),
        };

        let reply = match response.outcome() {
            ResponseOutcome::InProgress => {
                debug!("correlator: {name} in progress on {device_id}");
                return None;
            }
            ResponseOutcome::Success => Ok(CommandAck {
                device_id: device_id.to_string(),
                action: name.to_string(),
                message: response.message.clone().unwrap_or_default(),
            }),
            ResponseOutcome::Failure(msg) => Err(Self::failure_error(name, msg)),
        };

        let Some(op) = self.pending.remove(&key) else {
            warn!("correlator: no pending {name} for {device_id}");
            return None;
        };
        Self::notify(op.waiter, reply.clone());
        Some(ResolvedCommand {
            key,
            origin: op.origin,
            outcome: reply,
        })
    }

    /// Reject every pending operation whose deadline has passed.
    pub fn expire_stale(&mut self, now: NaiveDateTime) -> Vec<ResolvedCommand> {
        let overdue: Vec<CommandKey> = self
            .pending
            .iter()
            .filter(|(_, op)| op.deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();

        let mut resolved = Vec::new();
        for key in overdue {
            let Some(op) = self.pending.remove(&key) else {
                continue;
            };
            warn!("correlator: {} to {} timed out", key.action, key.device_id);
            let reply = Err(Self::timeout_error(&key.action));
            Self::notify(op.waiter, reply.clone());
            resolved.push(ResolvedCommand {
                key,
                origin: op.origin,
                outcome: reply,
            });
        }
        resolved
    }

    /// Cancel everything (session teardown). Waiters observe `Cancelled`.
    pub fn cancel_all(&mut self) {
        for (key, op) in self.pending.drain() {
            debug!("correlator: cancelling pending {} for {}", key.action, key.device_id);
            Self::notify(op.waiter, Err(CorrelationError::Cancelled.into()));
        }
    }

    pub fn is_pending(&self, device_id: &str, action: &str) -> bool {
        self.pending.contains_key(&CommandKey {
            device_id: device_id.to_string(),
            action: action.to_string(),
        })
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    // ── Internal ──────────────────────────────────────────────

    /// Connect failures surface as authentication errors so dependent
    /// operations can short-circuit; everything else is a plain rejection.
    fn failure_error(action_name: &str, message: String) -> Error {
        if action_name == action::CONNECT {
            AuthError::HandshakeRejected(message).into()
        } else {
            CorrelationError::Rejected(message).into()
        }
    }

    fn timeout_error(action_name: &str) -> Error {
        if action_name == action::CONNECT {
            AuthError::HandshakeTimedOut.into()
        } else {
            CorrelationError::TimedOut.into()
        }
    }

    fn notify(waiter: Option<oneshot::Sender<CommandReply>>, reply: CommandReply) {
        if let Some(tx) = waiter {
            // The caller may have dropped its ticket; nothing to do then.
            let _ = tx.send(reply);
        }
    }
}
