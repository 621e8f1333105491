//! Autonomous dispense flow: minute ticks, the dispensed-today ledger,
//! and the interplay with connection state.

use crate::mock_bus::{RecordingBus, RecordingSink, at, on_day};

use fidolink::adapters::memory_store::MemoryScheduleStore;
use fidolink::app::events::SessionEvent;
use fidolink::app::service::DispenserSession;
use fidolink::schedule::{FeedingTime, Period, Portion};
use fidolink::CoordinatorConfig;

fn time(id: &str, hour: u8, minute: u8, period: Period, enabled: bool) -> FeedingTime {
    FeedingTime {
        id: id.into(),
        hour,
        minute,
        period,
        enabled,
        local: false,
    }
}

fn portion(id: &str, grams: u32, selected: bool) -> Portion {
    Portion {
        id: id.into(),
        amount_grams: grams,
        selected,
        local: false,
    }
}

/// Session with a connected dispenser D1 and the pet "max" active.
fn ready_session(
    times: Vec<FeedingTime>,
    portions: Vec<Portion>,
) -> (DispenserSession<RecordingBus>, RecordingSink) {
    let mut sink = RecordingSink::new();
    let mut session = DispenserSession::new(CoordinatorConfig::default(), RecordingBus::new());
    session.on_transport_connected(at(7, 0, 0), &mut sink);

    session.on_message(
        "fido/dispensers/D1/status",
        br#"{"deviceId":"D1","status":"online"}"#,
        at(7, 0, 0),
        &mut sink,
    );
    let _ = session.connect_device("D1", at(7, 0, 1)).unwrap();
    session.on_message(
        "fido/dispensers/D1/response",
        br#"{"command":"connect","result":"success"}"#,
        at(7, 0, 2),
        &mut sink,
    );

    let mut store = MemoryScheduleStore::new();
    store.seed("max", times, portions);
    session.select_pet("max", Some("D1".into()), &store).unwrap();
    (session, sink)
}

fn dispense_count(session: &DispenserSession<RecordingBus>) -> usize {
    session
        .transport()
        .commands_for("D1")
        .iter()
        .filter(|a| a.as_str() == "dispense")
        .count()
}

fn respond_dispense_ok(session: &mut DispenserSession<RecordingBus>, sink: &mut RecordingSink) {
    session.on_message(
        "fido/dispensers/D1/response",
        br#"{"command":"dispense","result":"success"}"#,
        at(8, 0, 30),
        sink,
    );
}

// ── The core idempotence property ────────────────────────────

#[test]
fn slot_fires_once_per_day_and_again_the_next() {
    let (mut session, mut sink) = ready_session(
        vec![time("a", 8, 0, Period::Am, true)],
        vec![portion("p1", 150, true)],
    );

    // 07:59 — not due.
    session.minute_tick(on_day(1, 7, 59, 0), &mut sink);
    assert_eq!(dispense_count(&session), 0);

    // 08:00 — exactly one dispense with the selected portion amount.
    session.minute_tick(on_day(1, 8, 0, 0), &mut sink);
    assert_eq!(dispense_count(&session), 1);
    let doc = session.transport().last_command("D1").unwrap();
    assert_eq!(doc["amount"], 150);

    respond_dispense_ok(&mut session, &mut sink);
    assert!(sink.events.iter().any(|e| matches!(
        e,
        SessionEvent::DispenseCompleted { amount_grams: 150, scheduled: true, .. }
    )));

    // Second tick in the same minute — ledger blocks it.
    session.minute_tick(on_day(1, 8, 0, 30), &mut sink);
    assert_eq!(dispense_count(&session), 1);

    // Next day, same slot — fires exactly once more.
    session.minute_tick(on_day(2, 8, 0, 0), &mut sink);
    assert_eq!(dispense_count(&session), 2);
}

#[test]
fn failed_dispense_leaves_slot_unfired_and_retries_within_minute() {
    let (mut session, mut sink) = ready_session(
        vec![time("a", 8, 0, Period::Am, true)],
        vec![portion("p1", 150, true)],
    );

    session.minute_tick(on_day(1, 8, 0, 0), &mut sink);
    assert_eq!(dispense_count(&session), 1);

    // Device rejects; the ledger stays unmarked.
    session.on_message(
        "fido/dispensers/D1/response",
        br#"{"command":"dispense","result":"error","message":"hopper empty"}"#,
        at(8, 0, 10),
        &mut sink,
    );

    // A tick still inside 08:00 retries the slot.
    session.minute_tick(on_day(1, 8, 0, 30), &mut sink);
    assert_eq!(dispense_count(&session), 2);

    // Once the minute has passed the slot is gone until tomorrow.
    respond_dispense_ok(&mut session, &mut sink);
    session.minute_tick(on_day(1, 8, 1, 0), &mut sink);
    assert_eq!(dispense_count(&session), 2);
}

#[test]
fn disabled_entries_and_missing_portion_suppress_dispensing() {
    let (mut session, mut sink) = ready_session(
        vec![time("a", 8, 0, Period::Am, false)],
        vec![portion("p1", 150, true)],
    );
    session.minute_tick(on_day(1, 8, 0, 0), &mut sink);
    assert_eq!(dispense_count(&session), 0, "disabled entry never fires");

    let (mut session, mut sink) = ready_session(
        vec![time("a", 8, 0, Period::Am, true)],
        vec![portion("p1", 150, false)],
    );
    session.minute_tick(on_day(1, 8, 0, 0), &mut sink);
    assert_eq!(dispense_count(&session), 0, "no selected portion, no dispense");
}

#[test]
fn scheduler_is_dormant_without_pet_or_dispenser() {
    // No dispenser assigned to the pet.
    let mut sink = RecordingSink::new();
    let mut session = DispenserSession::new(CoordinatorConfig::default(), RecordingBus::new());
    session.on_transport_connected(at(7, 0, 0), &mut sink);
    let mut store = MemoryScheduleStore::new();
    store.seed(
        "max",
        vec![time("a", 8, 0, Period::Am, true)],
        vec![portion("p1", 150, true)],
    );
    session.select_pet("max", None, &store).unwrap();
    session.minute_tick(on_day(1, 8, 0, 0), &mut sink);
    assert!(session.transport().commands_for("D1").is_empty());

    // No pet selected at all.
    let (mut session, mut sink) = ready_session(
        vec![time("a", 8, 0, Period::Am, true)],
        vec![portion("p1", 150, true)],
    );
    session.clear_pet();
    session.minute_tick(on_day(1, 8, 0, 0), &mut sink);
    assert_eq!(dispense_count(&session), 0);
}

#[test]
fn scheduled_dispense_auto_connects_an_unauthenticated_device() {
    // Same as ready_session but without the handshake.
    let mut sink = RecordingSink::new();
    let mut session = DispenserSession::new(CoordinatorConfig::default(), RecordingBus::new());
    session.on_transport_connected(at(7, 0, 0), &mut sink);
    session.on_message(
        "fido/dispensers/D1/status",
        br#"{"deviceId":"D1","status":"online"}"#,
        at(7, 0, 0),
        &mut sink,
    );
    let mut store = MemoryScheduleStore::new();
    store.seed(
        "max",
        vec![time("a", 8, 0, Period::Am, true)],
        vec![portion("p1", 150, true)],
    );
    session.select_pet("max", Some("D1".into()), &store).unwrap();

    session.minute_tick(on_day(1, 8, 0, 0), &mut sink);
    assert_eq!(session.transport().commands_for("D1"), vec!["connect"]);

    session.on_message(
        "fido/dispensers/D1/response",
        br#"{"command":"connect","result":"success"}"#,
        at(8, 0, 1),
        &mut sink,
    );
    assert_eq!(session.transport().commands_for("D1"), vec!["connect", "dispense"]);

    respond_dispense_ok(&mut session, &mut sink);

    // The ledger was confirmed despite the indirect path.
    session.minute_tick(on_day(1, 8, 0, 45), &mut sink);
    assert_eq!(dispense_count(&session), 1);
}

#[test]
fn pet_switch_discards_the_ledger() {
    let (mut session, mut sink) = ready_session(
        vec![time("a", 8, 0, Period::Am, true)],
        vec![portion("p1", 150, true)],
    );
    session.minute_tick(on_day(1, 8, 0, 0), &mut sink);
    respond_dispense_ok(&mut session, &mut sink);
    assert_eq!(dispense_count(&session), 1);

    // Re-selecting the pet resets the in-memory ledger, so the same slot
    // can fire again within the day. Storage is the only durable record.
    let mut store = MemoryScheduleStore::new();
    store.seed(
        "max",
        vec![time("a", 8, 0, Period::Am, true)],
        vec![portion("p1", 150, true)],
    );
    session.select_pet("max", Some("D1".into()), &store).unwrap();
    session.minute_tick(on_day(1, 8, 0, 30), &mut sink);
    assert_eq!(dispense_count(&session), 2);
}
