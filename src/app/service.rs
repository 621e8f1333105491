//! Dispenser session — the coordination core.
//!
//! [`DispenserSession`] owns the device registry, command correlator,
//! schedule reconciler, and dispense scheduler, and wires them to the bus.
//! It is the explicit session-scoped handle the presentation layer holds;
//! there is no process-wide shared state.
//!
//! ```text
//!  bus inbound ──▶ ┌───────────────────────────┐ ──▶ EventSink
//!  timers      ──▶ │      DispenserSession      │
//!  user ops    ──▶ │ registry · correlator      │ ──▶ BusTransport
//!                  │ reconciler · scheduler     │ ◀─▶ ScheduleStore
//!                  └───────────────────────────┘
//! ```
//!
//! Everything runs on one logical thread: inbound messages and timer
//! callbacks are fed in sequentially by the embedder, handlers never
//! block, and command completion is delivered through single-shot
//! tickets resolved by later `on_message`/`poll` calls.

use std::collections::HashMap;

use chrono::{Duration, NaiveDateTime};
use futures::channel::oneshot;
use log::{debug, info, warn};
use serde_json::{Map, Value, json};

use crate::bus::envelope::{self, ResponseMessage};
use crate::bus::topic::{TopicKind, TopicScheme};
use crate::bus::transport::BusTransport;
use crate::config::CoordinatorConfig;
use crate::correlator::{
    CommandCorrelator, CommandOrigin, CommandReply, CommandTicket, ResolvedCommand, action,
};
use crate::dispense::DispenseScheduler;
use crate::error::{Error, ReconcileError, TransportError};
use crate::registry::{Device, DeviceRegistry};
use crate::schedule::{CommitSummary, ScheduleDraft};

use super::events::SessionEvent;
use super::ports::{EventSink, ScheduleStore};

// ───────────────────────────────────────────────────────────────
// Supporting types
// ───────────────────────────────────────────────────────────────

/// The pet whose schedule the session is currently editing/executing.
#[derive(Debug, Clone)]
pub struct ActivePet {
    pub pet_id: String,
    /// Dispenser assigned to this pet, if any. Without one the dispense
    /// scheduler stays dormant.
    pub dispenser_id: Option<String>,
}

/// Answer to "may I leave the schedule editor?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCheck {
    /// Nothing unsaved; leave freely.
    Clean,
    /// Unsaved edits exist; the presentation layer must ask the user and
    /// answer back through [`DispenserSession::resolve_exit`].
    UnsavedChanges,
}

/// The user's answer to the unsaved-changes prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDecision {
    DiscardAndLeave,
    KeepEditing,
}

/// A command queued behind an in-flight connect handshake.
struct DeferredCommand {
    action: String,
    payload: Map<String, Value>,
    origin: CommandOrigin,
    waiter: Option<oneshot::Sender<CommandReply>>,
}

// ───────────────────────────────────────────────────────────────
// DispenserSession
// ───────────────────────────────────────────────────────────────

/// Coordinates one client against any number of dispensers on the bus.
pub struct DispenserSession<T: BusTransport> {
    config: CoordinatorConfig,
    topics: TopicScheme,
    transport: T,

    registry: DeviceRegistry,
    correlator: CommandCorrelator,
    draft: ScheduleDraft,
    scheduler: DispenseScheduler,

    active_pet: Option<ActivePet>,
    /// Per-device commands waiting on the implicit connect handshake.
    deferred: HashMap<String, Vec<DeferredCommand>>,

    bus_connected: bool,
    scanning: bool,
    scan_deadline: Option<NaiveDateTime>,
    rescan_at: Option<NaiveDateTime>,
    connection_status: String,
}

impl<T: BusTransport> DispenserSession<T> {
    pub fn new(config: CoordinatorConfig, transport: T) -> Self {
        let topics = TopicScheme::new(&config.topic_root);
        let correlator = CommandCorrelator::new(&config);
        Self {
            config,
            topics,
            transport,
            registry: DeviceRegistry::new(),
            correlator,
            draft: ScheduleDraft::new(),
            scheduler: DispenseScheduler::new(),
            active_pet: None,
            deferred: HashMap::new(),
            bus_connected: false,
            scanning: false,
            scan_deadline: None,
            rescan_at: None,
            connection_status: "Disconnected".to_string(),
        }
    }

    // ── Transport lifecycle ───────────────────────────────────

    /// The embedder's bus client (re-)established its broker connection.
    pub fn on_transport_connected(&mut self, now: NaiveDateTime, sink: &mut impl EventSink) {
        self.bus_connected = true;
        self.set_status("Connected to broker", sink);
        if self.registry.is_empty() {
            self.rescan_at = Some(now + Duration::seconds(i64::from(self.config.rescan_delay_secs)));
            debug!("session: registry empty, re-scan scheduled");
        }
    }

    pub fn on_transport_disconnected(&mut self, sink: &mut impl EventSink) {
        self.bus_connected = false;
        self.scanning = false;
        self.scan_deadline = None;
        self.set_status("Disconnected from broker", sink);
    }

    // ── Inbound demux ─────────────────────────────────────────

    /// Feed one inbound bus message. Malformed bodies and foreign topics
    /// are dropped and logged; nothing in here fails.
    pub fn on_message(
        &mut self,
        topic: &str,
        payload: &[u8],
        now: NaiveDateTime,
        sink: &mut impl EventSink,
    ) {
        match self.topics.classify(topic) {
            Some(TopicKind::Discovery) => {
                let Ok(fields) = envelope::parse_object(payload) else {
                    warn!("session: malformed discovery payload dropped");
                    return;
                };
                // Our own discover broadcast echoes back on this topic.
                if fields.contains_key("action") {
                    return;
                }
                if let Some(device) = self.registry.record_discovery(&fields, now) {
                    info!("session: discovered {} ({})", device.device_id, device.name);
                    sink.emit(&SessionEvent::DeviceUpdated(device));
                }
            }
            Some(TopicKind::Status(device_id)) => {
                let Ok(fields) = envelope::parse_object(payload) else {
                    warn!("session: malformed status payload from {device_id} dropped");
                    return;
                };
                let device = self.registry.record_status(&device_id, &fields, now);
                sink.emit(&SessionEvent::DeviceUpdated(device));
            }
            Some(TopicKind::Data(device_id)) => {
                let Ok(fields) = envelope::parse_object(payload) else {
                    warn!("session: malformed telemetry payload from {device_id} dropped");
                    return;
                };
                let device = self.registry.record_telemetry(&device_id, &fields, now);
                sink.emit(&SessionEvent::DeviceUpdated(device));
            }
            Some(TopicKind::Response(device_id)) => {
                let Ok(response) = ResponseMessage::parse(payload) else {
                    warn!("session: malformed response payload from {device_id} dropped");
                    return;
                };
                if let Some(resolved) = self.correlator.resolve(&device_id, &response) {
                    self.handle_resolution(resolved, now, sink);
                }
            }
            None => debug!(
                "session: {} ignored: {topic}",
                crate::error::ProtocolError::UnknownTopic
            ),
        }
    }

    // ── Timers ────────────────────────────────────────────────

    /// Sub-minute timer duties: the post-connect re-scan, the scan-window
    /// close, and the pending-command deadline sweep. Call as often as
    /// convenient; every check is idempotent.
    pub fn poll(&mut self, now: NaiveDateTime, sink: &mut impl EventSink) {
        if self.rescan_at.is_some_and(|at| at <= now) {
            self.rescan_at = None;
            if let Err(e) = self.start_scan(now, sink) {
                warn!("session: scheduled re-scan failed: {e}");
            }
        }

        if self.scanning && self.scan_deadline.is_some_and(|deadline| deadline <= now) {
            self.scanning = false;
            self.scan_deadline = None;
            let found = self.registry.len();
            let status = if found > 0 {
                format!("{found} dispenser(s) found")
            } else {
                "No dispensers found".to_string()
            };
            self.set_status(&status, sink);
            sink.emit(&SessionEvent::ScanFinished { found });
        }

        for resolved in self.correlator.expire_stale(now) {
            self.handle_resolution(resolved, now, sink);
        }
    }

    /// The once-per-minute dispense evaluation. Runs [`poll`](Self::poll)
    /// first, then checks the draft schedule against the wall clock.
    pub fn minute_tick(&mut self, now: NaiveDateTime, sink: &mut impl EventSink) {
        self.poll(now, sink);

        let Some(pet) = &self.active_pet else { return };
        let Some(dispenser) = pet.dispenser_id.clone() else {
            return;
        };
        let Some(portion) = self.draft.selected_portion() else {
            return;
        };
        let amount = portion.amount_grams;

        let due = self.scheduler.due_slots(now, self.draft.times());
        for slot in due {
            info!(
                "session: slot {} due, dispensing {}g via {}",
                slot.ledger_key, amount, dispenser
            );
            let origin = CommandOrigin::Dispense {
                amount_grams: amount,
                ledger_key: Some(slot.ledger_key.clone()),
            };
            let mut payload = Map::new();
            payload.insert("amount".into(), json!(amount));
            if let Err(e) = self.issue_command(&dispenser, action::DISPENSE, payload, origin, None, now)
            {
                warn!(
                    "session: scheduled dispense for {} not issued: {e}",
                    slot.ledger_key
                );
            }
        }
    }

    // ── Discovery ─────────────────────────────────────────────

    /// Broadcast a discover request and open the scan window.
    pub fn start_scan(&mut self, now: NaiveDateTime, sink: &mut impl EventSink) -> Result<(), Error> {
        if !self.bus_connected {
            return Err(TransportError::NotConnected.into());
        }
        if self.scanning {
            return Ok(());
        }

        let request = envelope::discover_request(&self.config.client_id, now);
        self.transport.publish(&self.topics.discovery(), &request)?;

        self.scanning = true;
        self.scan_deadline =
            Some(now + Duration::seconds(i64::from(self.config.scan_window_secs)));
        self.set_status("Scanning for dispensers...", sink);
        sink.emit(&SessionEvent::ScanStarted);
        Ok(())
    }

    // ── Device commands ───────────────────────────────────────

    /// Explicit authenticated handshake with a dispenser.
    pub fn connect_device(
        &mut self,
        device_id: &str,
        now: NaiveDateTime,
    ) -> Result<CommandTicket, Error> {
        if !self.bus_connected {
            return Err(TransportError::NotConnected.into());
        }
        let mut payload = Map::new();
        payload.insert("password".into(), json!(self.config.device_secret));
        self.correlator.send_with_ticket(
            &mut self.transport,
            device_id,
            action::CONNECT,
            payload,
            CommandOrigin::Manual,
            now,
        )
    }

    /// Fire-and-forget disconnect plus local bookkeeping.
    pub fn disconnect_device(
        &mut self,
        device_id: &str,
        now: NaiveDateTime,
        sink: &mut impl EventSink,
    ) {
        if self.bus_connected {
            let bytes =
                envelope::command_envelope(action::DISCONNECT, Map::new(), &self.config.client_id, now);
            if let Err(e) = self.transport.publish(&self.topics.commands(device_id), &bytes) {
                warn!("session: disconnect publish to {device_id} failed: {e}");
            }
        }
        self.registry.mark_disconnected(device_id);
        self.set_status(&format!("Disconnected from {device_id}"), sink);
        sink.emit(&SessionEvent::DeviceDisconnected {
            device_id: device_id.to_string(),
        });
    }

    /// Manual dispense. Auto-connects first when the device session is
    /// not authenticated.
    pub fn dispense(
        &mut self,
        device_id: &str,
        amount_grams: u32,
        now: NaiveDateTime,
    ) -> Result<CommandTicket, Error> {
        let mut payload = Map::new();
        payload.insert("amount".into(), json!(amount_grams));
        let origin = CommandOrigin::Dispense {
            amount_grams,
            ledger_key: None,
        };
        self.issue_with_ticket(device_id, action::DISPENSE, payload, origin, now)
    }

    /// Push the draft schedule to the device. Auto-connects like
    /// [`dispense`](Self::dispense). Requires a selected portion — the
    /// wire format carries one gram amount per slot.
    pub fn sync_schedules(
        &mut self,
        device_id: &str,
        now: NaiveDateTime,
    ) -> Result<CommandTicket, Error> {
        let portion = self
            .draft
            .selected_portion()
            .ok_or(ReconcileError::NoPortionSelected)?;
        let grams = portion.amount_grams;

        let schedules: Vec<Value> = self
            .draft
            .times()
            .iter()
            .map(|t| {
                json!({
                    "hour": t.hour24(),
                    "minute": t.minute,
                    "portion": grams,
                    "active": t.enabled,
                })
            })
            .collect();
        let mut payload = Map::new();
        payload.insert("schedules".into(), Value::Array(schedules));

        self.issue_with_ticket(device_id, action::SYNC_SCHEDULES, payload, CommandOrigin::Manual, now)
    }

    // ── Pet lifecycle & schedule editing ──────────────────────

    /// Switch the active pet: load its schedule from the store and reset
    /// the dispense ledger.
    pub fn select_pet(
        &mut self,
        pet_id: &str,
        dispenser_id: Option<String>,
        store: &impl ScheduleStore,
    ) -> Result<(), Error> {
        let (times, portions) = store
            .load(pet_id)
            .map_err(|e| ReconcileError::StoreRead(e.to_string()))?;
        self.draft.load_from(times, portions);
        self.scheduler.reset();
        self.active_pet = Some(ActivePet {
            pet_id: pet_id.to_string(),
            dispenser_id,
        });
        info!("session: active pet is now {pet_id}");
        Ok(())
    }

    /// Drop the active pet. The in-memory dispense ledger is discarded.
    pub fn clear_pet(&mut self) {
        self.active_pet = None;
        self.scheduler.reset();
        self.draft = ScheduleDraft::new();
    }

    /// Real-time change notification from the document store. Refreshes
    /// the synced side only; draft edits survive.
    pub fn on_store_changed(
        &mut self,
        pet_id: &str,
        times: Vec<crate::schedule::FeedingTime>,
        portions: Vec<crate::schedule::Portion>,
    ) {
        if self.active_pet.as_ref().is_some_and(|p| p.pet_id == pet_id) {
            self.draft.refresh_synced(times, portions);
        }
    }

    /// Persist the draft: computes the add/update/delete set and applies
    /// it through the store port.
    pub fn commit_schedule(
        &mut self,
        store: &mut impl ScheduleStore,
    ) -> Result<CommitSummary, Error> {
        let pet_id = self
            .active_pet
            .as_ref()
            .ok_or(ReconcileError::NoActivePet)?
            .pet_id
            .clone();
        let summary = self.draft.commit_to(store, &pet_id)?;
        info!(
            "session: schedule committed for {pet_id} ({} created, {} updated, {} deleted)",
            summary.created, summary.updated, summary.deleted
        );
        Ok(summary)
    }

    /// May the schedule editor be left right now? A dirty draft requires
    /// an explicit [`resolve_exit`](Self::resolve_exit) answer.
    pub fn request_exit(&self) -> ExitCheck {
        if self.draft.has_unsaved_changes() {
            ExitCheck::UnsavedChanges
        } else {
            ExitCheck::Clean
        }
    }

    /// Consume the user's decision. Returns true when leaving is allowed.
    pub fn resolve_exit(&mut self, decision: ExitDecision) -> bool {
        match decision {
            ExitDecision::DiscardAndLeave => {
                self.draft.discard_edits();
                true
            }
            ExitDecision::KeepEditing => false,
        }
    }

    // ── Teardown ──────────────────────────────────────────────

    /// Cancel every pending command and drop per-pet state. Waiters
    /// observe `Cancelled`.
    pub fn shutdown(&mut self) {
        self.correlator.cancel_all();
        for (device_id, queued) in self.deferred.drain() {
            for cmd in queued {
                debug!("session: dropping deferred {} for {device_id}", cmd.action);
                if let Some(tx) = cmd.waiter {
                    let _ = tx.send(Err(crate::error::CorrelationError::Cancelled.into()));
                }
            }
        }
        self.clear_pet();
    }

    // ── Queries ───────────────────────────────────────────────

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn devices(&self) -> Vec<Device> {
        self.registry.snapshot()
    }

    pub fn draft(&self) -> &ScheduleDraft {
        &self.draft
    }

    /// Mutable access for draft edits (toggle/add/remove/select).
    pub fn draft_mut(&mut self) -> &mut ScheduleDraft {
        &mut self.draft
    }

    pub fn active_pet(&self) -> Option<&ActivePet> {
        self.active_pet.as_ref()
    }

    pub fn connection_status(&self) -> &str {
        &self.connection_status
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    // ── Internal: command flows ───────────────────────────────

    fn issue_with_ticket(
        &mut self,
        device_id: &str,
        action_name: &str,
        payload: Map<String, Value>,
        origin: CommandOrigin,
        now: NaiveDateTime,
    ) -> Result<CommandTicket, Error> {
        if !self.bus_connected {
            return Err(TransportError::NotConnected.into());
        }
        let (tx, rx) = oneshot::channel();
        self.issue_command(device_id, action_name, payload, origin, Some(tx), now)?;
        Ok(CommandTicket::new(rx))
    }

    /// Route a command directly or behind the implicit connect handshake.
    fn issue_command(
        &mut self,
        device_id: &str,
        action_name: &str,
        payload: Map<String, Value>,
        origin: CommandOrigin,
        waiter: Option<oneshot::Sender<CommandReply>>,
        now: NaiveDateTime,
    ) -> Result<(), Error> {
        if !self.bus_connected {
            return Err(TransportError::NotConnected.into());
        }
        if self.registry.is_connected(device_id) {
            return self.correlator.send(
                &mut self.transport,
                device_id,
                action_name,
                payload,
                origin,
                waiter,
                now,
            );
        }
        self.queue_behind_connect(device_id, action_name, payload, origin, waiter, now)
    }

    /// Ensure exactly one connect is in flight for the device and queue
    /// the command behind it.
    fn queue_behind_connect(
        &mut self,
        device_id: &str,
        action_name: &str,
        payload: Map<String, Value>,
        origin: CommandOrigin,
        waiter: Option<oneshot::Sender<CommandReply>>,
        now: NaiveDateTime,
    ) -> Result<(), Error> {
        // Single-pending-per-key also holds for the deferred queue.
        let queued = self.deferred.entry(device_id.to_string()).or_default();
        if queued.iter().any(|c| c.action == action_name) {
            let err: Error = crate::error::CorrelationError::AlreadyPending.into();
            if let Some(tx) = waiter {
                let _ = tx.send(Err(err.clone()));
            }
            return Err(err);
        }

        if !self.correlator.is_pending(device_id, action::CONNECT) {
            info!("session: {device_id} not connected, issuing implicit connect");
            let mut connect_payload = Map::new();
            connect_payload.insert("password".into(), json!(self.config.device_secret));
            self.correlator.send(
                &mut self.transport,
                device_id,
                action::CONNECT,
                connect_payload,
                CommandOrigin::Manual,
                None,
                now,
            )?;
        }

        self.deferred
            .entry(device_id.to_string())
            .or_default()
            .push(DeferredCommand {
                action: action_name.to_string(),
                payload,
                origin,
                waiter,
            });
        Ok(())
    }

    /// Advance flows when a pending operation reaches a terminal state.
    fn handle_resolution(
        &mut self,
        resolved: ResolvedCommand,
        now: NaiveDateTime,
        sink: &mut impl EventSink,
    ) {
        let ResolvedCommand { key, origin, outcome } = resolved;
        let device_id = key.device_id;

        match key.action.as_str() {
            action::CONNECT => match outcome {
                Ok(_) => {
                    self.registry.mark_connected(&device_id);
                    self.set_status(&format!("Connected to {device_id}"), sink);
                    sink.emit(&SessionEvent::DeviceConnected {
                        device_id: device_id.clone(),
                    });
                    self.flush_deferred(&device_id, now);
                }
                Err(e) => {
                    warn!("session: connect to {device_id} failed: {e}");
                    sink.emit(&SessionEvent::CommandFailed {
                        device_id: device_id.clone(),
                        action: action::CONNECT.to_string(),
                        reason: e.to_string(),
                    });
                    self.fail_deferred(&device_id, &e);
                }
            },
            action::DISPENSE => {
                let CommandOrigin::Dispense {
                    amount_grams,
                    ledger_key,
                } = origin
                else {
                    return;
                };
                let scheduled = ledger_key.is_some();
                match outcome {
                    Ok(_) => {
                        if let Some(ledger_key) = ledger_key {
                            self.scheduler.mark_fired(&ledger_key);
                        }
                        sink.emit(&SessionEvent::DispenseCompleted {
                            device_id,
                            amount_grams,
                            scheduled,
                        });
                    }
                    Err(e) => {
                        if let Some(ledger_key) = ledger_key {
                            // The slot stays unfired; by the next tick the
                            // clock has moved on, so it effectively skips
                            // until tomorrow.
                            warn!(
                                "session: scheduled dispense for {ledger_key} failed ({e}); slot left unfired"
                            );
                        }
                        sink.emit(&SessionEvent::CommandFailed {
                            device_id,
                            action: action::DISPENSE.to_string(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
            action::SYNC_SCHEDULES => match outcome {
                Ok(_) => {
                    info!("session: schedules synced to {device_id}");
                    sink.emit(&SessionEvent::ScheduleSynced { device_id });
                }
                Err(e) => sink.emit(&SessionEvent::CommandFailed {
                    device_id,
                    action: action::SYNC_SCHEDULES.to_string(),
                    reason: e.to_string(),
                }),
            },
            other => {
                if let Err(e) = outcome {
                    sink.emit(&SessionEvent::CommandFailed {
                        device_id,
                        action: other.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    /// The handshake succeeded: send everything queued behind it.
    fn flush_deferred(&mut self, device_id: &str, now: NaiveDateTime) {
        for cmd in self.deferred.remove(device_id).unwrap_or_default() {
            if let Err(e) = self.correlator.send(
                &mut self.transport,
                device_id,
                &cmd.action,
                cmd.payload,
                cmd.origin,
                cmd.waiter,
                now,
            ) {
                warn!("session: deferred {} to {device_id} not sent: {e}", cmd.action);
            }
        }
    }

    /// The handshake failed: everything queued behind it fails with the
    /// same authentication error.
    fn fail_deferred(&mut self, device_id: &str, err: &Error) {
        for cmd in self.deferred.remove(device_id).unwrap_or_default() {
            if let CommandOrigin::Dispense {
                ledger_key: Some(key),
                ..
            } = &cmd.origin
            {
                warn!("session: scheduled dispense for {key} aborted by failed handshake");
            }
            if let Some(tx) = cmd.waiter {
                let _ = tx.send(Err(err.clone()));
            }
        }
    }

    fn set_status(&mut self, status: &str, sink: &mut impl EventSink) {
        if self.connection_status != status {
            self.connection_status = status.to_string();
            sink.emit(&SessionEvent::TransportStatus(status.to_string()));
        }
    }
}
