//! Dispense-trigger scheduler.
//!
//! A recurring evaluator that compares the draft schedule against the
//! wall clock once per minute and decides which slots are due. The
//! session drives it:
//!
//! ```text
//! ┌────────────┐ due_slots(now) ┌──────────────────┐ dispense cmd ┌────────────┐
//! │ minute tick│───────────────▶│ DispenseScheduler │─────────────▶│ Correlator │
//! │ (session)  │◀───────────────│  (ledger check)   │◀─────────────│ (response) │
//! └────────────┘  mark_fired()  └──────────────────┘   success     └────────────┘
//! ```
//!
//! The dispensed-today ledger keys on `"{date}_{hour24}:{minute}"`, so a
//! slot fires at most once per calendar day and stale keys expire
//! implicitly — yesterday's keys simply never match again. A slot is
//! confirmed (`mark_fired`) only after the dispense command succeeds; a
//! failed dispense leaves the key unfired, which in practice means the
//! slot is skipped until the next day because the clock has moved past
//! the matching minute by the time the failure surfaces.

use std::collections::HashSet;

use chrono::{NaiveDateTime, Timelike};
use log::debug;

use crate::schedule::FeedingTime;

/// A schedule slot whose time matches the current wall-clock minute and
/// whose ledger key has not fired today.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueSlot {
    /// Ledger key, `"{date}_{hour24}:{minute}"`.
    pub ledger_key: String,
    pub hour24: u8,
    pub minute: u8,
}

/// Idempotent per-day dispense trigger state.
#[derive(Debug, Default)]
pub struct DispenseScheduler {
    fired: HashSet<String>,
}

impl DispenseScheduler {
    pub fn new() -> Self {
        Self {
            fired: HashSet::new(),
        }
    }

    /// Evaluate one tick: every enabled entry whose 24-hour time equals
    /// the current `(hour, minute)` and whose key is unfired. Entries that
    /// collapse to the same key (duplicate times) yield one slot.
    pub fn due_slots(&self, now: NaiveDateTime, times: &[FeedingTime]) -> Vec<DueSlot> {
        let mut due = Vec::new();
        let mut seen = HashSet::new();

        for entry in times.iter().filter(|t| t.enabled) {
            let hour24 = entry.hour24();
            let minute = entry.minute;
            if u32::from(hour24) != now.hour() || u32::from(minute) != now.minute() {
                continue;
            }
            let key = Self::ledger_key(now, hour24, minute);
            if self.fired.contains(&key) || !seen.insert(key.clone()) {
                continue;
            }
            due.push(DueSlot {
                ledger_key: key,
                hour24,
                minute,
            });
        }
        due
    }

    /// Record a slot as dispensed today. Called only after the dispense
    /// command succeeded. Returns false if the key had already fired.
    pub fn mark_fired(&mut self, ledger_key: &str) -> bool {
        let inserted = self.fired.insert(ledger_key.to_string());
        if inserted {
            debug!("scheduler: slot {ledger_key} marked dispensed");
        }
        inserted
    }

    pub fn is_fired(&self, ledger_key: &str) -> bool {
        self.fired.contains(ledger_key)
    }

    /// Discard the ledger (pet teardown). Nothing survives a teardown.
    pub fn reset(&mut self) {
        self.fired.clear();
    }

    fn ledger_key(now: NaiveDateTime, hour24: u8, minute: u8) -> String {
        format!("{}_{}:{}", now.date(), hour24, minute)
    }
}
