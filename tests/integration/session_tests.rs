//! Command flows: handshake, implicit connect, correlation, timeouts,
//! and schedule sync/commit through the session.

use crate::mock_bus::{RecordingBus, RecordingSink, at};

use fidolink::adapters::memory_store::MemoryScheduleStore;
use fidolink::app::events::SessionEvent;
use fidolink::app::service::{DispenserSession, ExitCheck, ExitDecision};
use fidolink::schedule::{FeedingTime, Period, Portion};
use fidolink::{AuthError, CoordinatorConfig, CorrelationError, Error};

fn session() -> (DispenserSession<RecordingBus>, RecordingSink) {
    let mut sink = RecordingSink::new();
    let mut session = DispenserSession::new(CoordinatorConfig::default(), RecordingBus::new());
    session.on_transport_connected(at(9, 0, 0), &mut sink);
    (session, sink)
}

fn feed_status(session: &mut DispenserSession<RecordingBus>, sink: &mut RecordingSink, id: &str) {
    let payload = format!(r#"{{"deviceId":"{id}","status":"online"}}"#);
    let topic = format!("fido/dispensers/{id}/status");
    session.on_message(&topic, payload.as_bytes(), at(9, 0, 0), sink);
}

fn feed_response(
    session: &mut DispenserSession<RecordingBus>,
    sink: &mut RecordingSink,
    id: &str,
    body: &str,
) {
    let topic = format!("fido/dispensers/{id}/response");
    session.on_message(&topic, body.as_bytes(), at(9, 0, 5), sink);
}

fn seeded_store() -> MemoryScheduleStore {
    let mut store = MemoryScheduleStore::new();
    store.seed(
        "max",
        vec![FeedingTime {
            id: "a".into(),
            hour: 8,
            minute: 0,
            period: Period::Am,
            enabled: true,
            local: false,
        }],
        vec![Portion {
            id: "p1".into(),
            amount_grams: 150,
            selected: true,
            local: false,
        }],
    );
    store
}

// ── Explicit handshake ───────────────────────────────────────

#[test]
fn connect_success_flips_registry_and_resolves_ticket() {
    let (mut session, mut sink) = session();
    feed_status(&mut session, &mut sink, "D1");
    assert!(!session.registry().is_connected("D1"));

    let mut ticket = session.connect_device("D1", at(9, 0, 1)).unwrap();
    let doc = session.transport().last_command("D1").unwrap();
    assert_eq!(doc["action"], "connect");
    assert_eq!(doc["password"], "FIDO2025");
    assert!(ticket.try_outcome().is_none(), "no response yet");

    feed_response(&mut session, &mut sink, "D1", r#"{"command":"connect","result":"success"}"#);

    assert!(session.registry().is_connected("D1"));
    assert!(ticket.try_outcome().unwrap().is_ok());
    assert!(sink.events.iter().any(
        |e| matches!(e, SessionEvent::DeviceConnected { device_id } if device_id == "D1")
    ));
    assert_eq!(session.connection_status(), "Connected to D1");
}

#[test]
fn connect_rejection_surfaces_device_message() {
    let (mut session, mut sink) = session();
    feed_status(&mut session, &mut sink, "D1");

    let mut ticket = session.connect_device("D1", at(9, 0, 1)).unwrap();
    feed_response(
        &mut session,
        &mut sink,
        "D1",
        r#"{"command":"connect","result":"error","message":"wrong password"}"#,
    );

    let err = ticket.try_outcome().unwrap().unwrap_err();
    assert_eq!(
        err,
        Error::Auth(AuthError::HandshakeRejected("wrong password".into()))
    );
    assert!(!session.registry().is_connected("D1"));
}

// ── Implicit connect before dispense ─────────────────────────

#[test]
fn dispense_on_unconnected_device_connects_first() {
    let (mut session, mut sink) = session();
    feed_status(&mut session, &mut sink, "D1");

    let mut ticket = session.dispense("D1", 150, at(9, 0, 1)).unwrap();

    // Exactly one connect and no dispense on the wire yet.
    assert_eq!(session.transport().commands_for("D1"), vec!["connect"]);

    feed_response(&mut session, &mut sink, "D1", r#"{"command":"connect","result":"success"}"#);

    // The deferred dispense was flushed by the handshake.
    assert_eq!(session.transport().commands_for("D1"), vec!["connect", "dispense"]);
    let doc = session.transport().last_command("D1").unwrap();
    assert_eq!(doc["amount"], 150);

    feed_response(&mut session, &mut sink, "D1", r#"{"command":"dispense","result":"success"}"#);
    assert!(ticket.try_outcome().unwrap().is_ok());
    assert!(sink.events.iter().any(|e| matches!(
        e,
        SessionEvent::DispenseCompleted { amount_grams: 150, scheduled: false, .. }
    )));
}

#[test]
fn connected_device_dispenses_without_handshake() {
    let (mut session, mut sink) = session();
    feed_status(&mut session, &mut sink, "D1");
    let _ = session.connect_device("D1", at(9, 0, 1)).unwrap();
    feed_response(&mut session, &mut sink, "D1", r#"{"command":"connect","result":"success"}"#);

    let _ = session.dispense("D1", 200, at(9, 0, 6)).unwrap();
    assert_eq!(
        session.transport().commands_for("D1"),
        vec!["connect", "dispense"],
        "no second connect for an authenticated device"
    );
}

#[test]
fn failed_handshake_short_circuits_deferred_dispense() {
    let (mut session, mut sink) = session();
    feed_status(&mut session, &mut sink, "D1");

    let mut ticket = session.dispense("D1", 150, at(9, 0, 1)).unwrap();
    feed_response(
        &mut session,
        &mut sink,
        "D1",
        r#"{"command":"connect","result":"error","message":"denied"}"#,
    );

    let err = ticket.try_outcome().unwrap().unwrap_err();
    assert_eq!(err, Error::Auth(AuthError::HandshakeRejected("denied".into())));
    assert_eq!(
        session.transport().commands_for("D1"),
        vec!["connect"],
        "dispense never reaches the wire"
    );
}

// ── Single-pending-per-key ───────────────────────────────────

#[test]
fn second_dispense_while_pending_is_rejected() {
    let (mut session, mut sink) = session();
    feed_status(&mut session, &mut sink, "D1");
    let _ = session.connect_device("D1", at(9, 0, 1)).unwrap();
    feed_response(&mut session, &mut sink, "D1", r#"{"command":"connect","result":"success"}"#);

    let _first = session.dispense("D1", 150, at(9, 0, 6)).unwrap();
    let err = session.dispense("D1", 150, at(9, 0, 7)).unwrap_err();
    assert_eq!(err, Error::Correlation(CorrelationError::AlreadyPending));
}

#[test]
fn second_deferred_dispense_is_also_rejected() {
    let (mut session, mut sink) = session();
    feed_status(&mut session, &mut sink, "D1");

    let _first = session.dispense("D1", 150, at(9, 0, 1)).unwrap();
    let err = session.dispense("D1", 150, at(9, 0, 2)).unwrap_err();
    assert_eq!(err, Error::Correlation(CorrelationError::AlreadyPending));
}

// ── Timeouts ─────────────────────────────────────────────────

#[test]
fn unanswered_dispense_times_out_on_poll() {
    let (mut session, mut sink) = session();
    feed_status(&mut session, &mut sink, "D1");
    let _ = session.connect_device("D1", at(9, 0, 0)).unwrap();
    feed_response(&mut session, &mut sink, "D1", r#"{"command":"connect","result":"success"}"#);

    let mut ticket = session.dispense("D1", 150, at(9, 0, 10)).unwrap();

    session.poll(at(9, 0, 24), &mut sink);
    assert!(ticket.try_outcome().is_none(), "still within the 15 s window");

    session.poll(at(9, 0, 25), &mut sink);
    let err = ticket.try_outcome().unwrap().unwrap_err();
    assert_eq!(err, Error::Correlation(CorrelationError::TimedOut));
    assert!(sink.events.iter().any(|e| matches!(
        e,
        SessionEvent::CommandFailed { action, .. } if action == "dispense"
    )));
}

#[test]
fn connect_timeout_fails_commands_queued_behind_it() {
    let (mut session, mut sink) = session();
    feed_status(&mut session, &mut sink, "D1");

    let mut ticket = session.dispense("D1", 150, at(9, 0, 0)).unwrap();

    // connect deadline is 10 s
    session.poll(at(9, 0, 11), &mut sink);
    let err = ticket.try_outcome().unwrap().unwrap_err();
    assert_eq!(err, Error::Auth(AuthError::HandshakeTimedOut));
    assert_eq!(session.transport().commands_for("D1"), vec!["connect"]);
}

// ── Progress acks ────────────────────────────────────────────

#[test]
fn received_ack_does_not_resolve_the_command() {
    let (mut session, mut sink) = session();
    feed_status(&mut session, &mut sink, "D1");
    let _ = session.connect_device("D1", at(9, 0, 0)).unwrap();
    feed_response(&mut session, &mut sink, "D1", r#"{"command":"connect","result":"success"}"#);

    let mut ticket = session.dispense("D1", 150, at(9, 0, 6)).unwrap();
    feed_response(&mut session, &mut sink, "D1", r#"{"command":"dispense","result":"received"}"#);
    assert!(ticket.try_outcome().is_none());

    feed_response(&mut session, &mut sink, "D1", r#"{"command":"dispense","result":"completed"}"#);
    assert!(ticket.try_outcome().unwrap().is_ok());
}

// ── Schedule sync ────────────────────────────────────────────

#[test]
fn sync_schedules_sends_draft_in_wire_format() {
    let (mut session, mut sink) = session();
    feed_status(&mut session, &mut sink, "D1");
    let _ = session.connect_device("D1", at(9, 0, 0)).unwrap();
    feed_response(&mut session, &mut sink, "D1", r#"{"command":"connect","result":"success"}"#);

    let store = seeded_store();
    session.select_pet("max", Some("D1".into()), &store).unwrap();
    session.draft_mut().add_time(6, 30, Period::Pm).unwrap();

    let mut ticket = session.sync_schedules("D1", at(9, 0, 6)).unwrap();
    let doc = session.transport().last_command("D1").unwrap();
    assert_eq!(doc["action"], "sync_schedules");
    let schedules = doc["schedules"].as_array().unwrap();
    assert_eq!(schedules.len(), 2);
    assert_eq!(schedules[0]["hour"], 8);
    assert_eq!(schedules[0]["minute"], 0);
    assert_eq!(schedules[0]["portion"], 150);
    assert_eq!(schedules[0]["active"], true);
    assert_eq!(schedules[1]["hour"], 18, "pm entry carried on the 24-hour clock");
    assert_eq!(schedules[1]["minute"], 30);

    feed_response(
        &mut session,
        &mut sink,
        "D1",
        r#"{"command":"sync_schedules","result":"success"}"#,
    );
    assert!(ticket.try_outcome().unwrap().is_ok());
    assert!(sink.events.iter().any(
        |e| matches!(e, SessionEvent::ScheduleSynced { device_id } if device_id == "D1")
    ));
}

#[test]
fn sync_without_selected_portion_is_rejected() {
    let (mut session, mut sink) = session();
    feed_status(&mut session, &mut sink, "D1");

    let mut store = MemoryScheduleStore::new();
    store.seed("max", vec![], vec![]);
    session.select_pet("max", Some("D1".into()), &store).unwrap();

    let err = session.sync_schedules("D1", at(9, 0, 1)).unwrap_err();
    assert!(matches!(err, Error::Reconcile(_)));
}

// ── Draft commit + exit guard through the session ────────────

#[test]
fn commit_and_exit_guard_flow() {
    let (mut session, _sink) = session();
    let mut store = seeded_store();
    session.select_pet("max", Some("D1".into()), &store).unwrap();

    assert_eq!(session.request_exit(), ExitCheck::Clean);

    session.draft_mut().toggle_time("a").unwrap();
    assert_eq!(session.request_exit(), ExitCheck::UnsavedChanges);

    // User decides to keep editing: nothing changes.
    assert!(!session.resolve_exit(ExitDecision::KeepEditing));
    assert_eq!(session.request_exit(), ExitCheck::UnsavedChanges);

    // Commit persists and the editor is clean again.
    let summary = session.commit_schedule(&mut store).unwrap();
    assert_eq!(summary.updated, 2, "entry and portion are both re-sent");
    assert_eq!(session.request_exit(), ExitCheck::Clean);
}

#[test]
fn discard_on_exit_reverts_the_draft() {
    let (mut session, _sink) = session();
    let store = seeded_store();
    session.select_pet("max", Some("D1".into()), &store).unwrap();

    session.draft_mut().toggle_time("a").unwrap();
    assert!(session.resolve_exit(ExitDecision::DiscardAndLeave));
    assert_eq!(session.request_exit(), ExitCheck::Clean);
    assert!(session.draft().times()[0].enabled, "edit was discarded");
}

#[test]
fn commit_without_active_pet_fails() {
    let (mut session, _sink) = session();
    let mut store = MemoryScheduleStore::new();
    assert!(session.commit_schedule(&mut store).is_err());
}

// ── Teardown ─────────────────────────────────────────────────

#[test]
fn shutdown_cancels_pending_and_deferred_commands() {
    let (mut session, mut sink) = session();
    feed_status(&mut session, &mut sink, "D1");

    let mut deferred = session.dispense("D1", 150, at(9, 0, 0)).unwrap();
    session.shutdown();

    let err = deferred.try_outcome().unwrap().unwrap_err();
    assert_eq!(err, Error::Correlation(CorrelationError::Cancelled));
    assert!(session.active_pet().is_none());
}
