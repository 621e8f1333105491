//! Draft/synced schedule reconciler.
//!
//! Holds the user's in-progress edits (`draft`) next to the last value
//! read from the document store (`synced`). Edits never touch storage
//! directly; [`ScheduleDraft::commit_to`] computes the add/update/delete
//! set and applies it through the [`ScheduleStore`] port in one pass.
//!
//! Items created in the draft carry a `local` marker and a `local-N`
//! placeholder id until a commit persists them and swaps in the store's
//! document id.

use log::warn;

use crate::app::ports::ScheduleStore;
use crate::error::ReconcileError;

use super::model::{FeedingTime, Period, Portion};

// ───────────────────────────────────────────────────────────────
// Change sets
// ───────────────────────────────────────────────────────────────

/// Writes needed to reach the draft from the synced state, per collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Diff<T> {
    /// Draft items carrying the local marker.
    pub to_create: Vec<T>,
    /// Draft items that exist in synced by id. Always re-sent, even when
    /// unchanged — no-op updates are not skipped.
    pub to_update: Vec<T>,
    /// Ids present in synced but absent from the draft.
    pub to_delete: Vec<String>,
}

impl<T> Diff<T> {
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }
}

impl<T> Default for Diff<T> {
    fn default() -> Self {
        Self {
            to_create: Vec::new(),
            to_update: Vec::new(),
            to_delete: Vec::new(),
        }
    }
}

/// Full change set across both collections.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub times: Diff<FeedingTime>,
    pub portions: Diff<Portion>,
}

/// Counts reported after a successful commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

// ───────────────────────────────────────────────────────────────
// ScheduleDraft
// ───────────────────────────────────────────────────────────────

/// Draft and synced copies of one pet's schedule.
#[derive(Debug, Default)]
pub struct ScheduleDraft {
    synced_times: Vec<FeedingTime>,
    synced_portions: Vec<Portion>,
    draft_times: Vec<FeedingTime>,
    draft_portions: Vec<Portion>,
    next_local: u32,
}

impl ScheduleDraft {
    pub fn new() -> Self {
        Self {
            next_local: 1,
            ..Self::default()
        }
    }

    // ── Loading ───────────────────────────────────────────────

    /// Replace both sides with a fresh store read (pet switch or initial
    /// load). The draft becomes a deep copy of synced.
    pub fn load_from(&mut self, times: Vec<FeedingTime>, portions: Vec<Portion>) {
        self.draft_times = times.clone();
        self.draft_portions = portions.clone();
        self.synced_times = times;
        self.synced_portions = portions;
    }

    /// Change-notification path: storage moved underneath us. Only the
    /// synced side is replaced; in-progress edits are preserved.
    pub fn refresh_synced(&mut self, times: Vec<FeedingTime>, portions: Vec<Portion>) {
        self.synced_times = times;
        self.synced_portions = portions;
    }

    /// Throw away every draft edit and fall back to the synced state.
    pub fn discard_edits(&mut self) {
        self.draft_times = self.synced_times.clone();
        self.draft_portions = self.synced_portions.clone();
    }

    // ── Draft views ───────────────────────────────────────────

    pub fn times(&self) -> &[FeedingTime] {
        &self.draft_times
    }

    pub fn portions(&self) -> &[Portion] {
        &self.draft_portions
    }

    /// The single selected portion, if any.
    pub fn selected_portion(&self) -> Option<&Portion> {
        self.draft_portions.iter().find(|p| p.selected)
    }

    // ── Draft mutations ───────────────────────────────────────

    pub fn toggle_time(&mut self, id: &str) -> Result<(), ReconcileError> {
        let time = self
            .draft_times
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| ReconcileError::UnknownId(id.to_string()))?;
        time.enabled = !time.enabled;
        Ok(())
    }

    /// Add a feeding time; returns the placeholder id.
    pub fn add_time(
        &mut self,
        hour: u8,
        minute: u8,
        period: Period,
    ) -> Result<String, ReconcileError> {
        FeedingTime::validate(hour, minute)?;
        let id = self.alloc_local_id();
        self.draft_times.push(FeedingTime {
            id: id.clone(),
            hour,
            minute,
            period,
            enabled: true,
            local: true,
        });
        Ok(id)
    }

    pub fn remove_time(&mut self, id: &str) -> Result<(), ReconcileError> {
        let before = self.draft_times.len();
        self.draft_times.retain(|t| t.id != id);
        if self.draft_times.len() == before {
            return Err(ReconcileError::UnknownId(id.to_string()));
        }
        Ok(())
    }

    /// Add a portion; returns the placeholder id. New portions start
    /// unselected.
    pub fn add_portion(&mut self, amount_grams: u32) -> String {
        let id = self.alloc_local_id();
        self.draft_portions.push(Portion {
            id: id.clone(),
            amount_grams,
            selected: false,
            local: true,
        });
        id
    }

    pub fn remove_portion(&mut self, id: &str) -> Result<(), ReconcileError> {
        let before = self.draft_portions.len();
        self.draft_portions.retain(|p| p.id != id);
        if self.draft_portions.len() == before {
            return Err(ReconcileError::UnknownId(id.to_string()));
        }
        Ok(())
    }

    /// Select one portion. The whole selection set is replaced, which is
    /// what keeps the at-most-one-selected invariant.
    pub fn select_portion(&mut self, id: &str) -> Result<(), ReconcileError> {
        if !self.draft_portions.iter().any(|p| p.id == id) {
            return Err(ReconcileError::UnknownId(id.to_string()));
        }
        for portion in &mut self.draft_portions {
            portion.selected = portion.id == id;
        }
        Ok(())
    }

    // ── Unsaved-change detection ──────────────────────────────

    /// True when the non-local subset of the draft differs from synced.
    /// Comparison is order-independent: both sides are sorted by
    /// `time_order` / gram amount before the field-wise compare.
    pub fn has_unsaved_changes(&self) -> bool {
        let mut draft_times: Vec<&FeedingTime> =
            self.draft_times.iter().filter(|t| !t.local).collect();
        let mut synced_times: Vec<&FeedingTime> = self.synced_times.iter().collect();
        if draft_times.len() != synced_times.len() {
            return true;
        }
        draft_times.sort_by_key(|t| t.time_order());
        synced_times.sort_by_key(|t| t.time_order());
        let times_differ = draft_times.iter().zip(&synced_times).any(|(d, s)| {
            d.hour != s.hour || d.minute != s.minute || d.period != s.period || d.enabled != s.enabled
        });
        if times_differ {
            return true;
        }

        let mut draft_portions: Vec<&Portion> =
            self.draft_portions.iter().filter(|p| !p.local).collect();
        let mut synced_portions: Vec<&Portion> = self.synced_portions.iter().collect();
        if draft_portions.len() != synced_portions.len() {
            return true;
        }
        draft_portions.sort_by_key(|p| p.amount_grams);
        synced_portions.sort_by_key(|p| p.amount_grams);
        draft_portions
            .iter()
            .zip(&synced_portions)
            .any(|(d, s)| d.amount_grams != s.amount_grams || d.selected != s.selected)
    }

    // ── Reconciliation ────────────────────────────────────────

    /// Pure diff: the writes a commit would perform right now.
    pub fn changes(&self) -> ChangeSet {
        ChangeSet {
            times: Self::diff(&self.synced_times, &self.draft_times, |t| &t.id, |t| t.local),
            portions: Self::diff(
                &self.synced_portions,
                &self.draft_portions,
                |p| &p.id,
                |p| p.local,
            ),
        }
    }

    /// Apply the current change set through the store port.
    ///
    /// Any individual write failure aborts the remaining writes and leaves
    /// the draft (and its local markers) untouched so the user can retry.
    /// Only after every write succeeds are placeholder ids swapped for
    /// persisted ids and synced replaced by the post-commit draft.
    pub fn commit_to(
        &mut self,
        store: &mut impl ScheduleStore,
        pet_id: &str,
    ) -> Result<CommitSummary, ReconcileError> {
        let set = self.changes();
        let store_err = |e: crate::app::ports::StoreError| {
            warn!("schedule commit aborted for pet {pet_id}: {e}");
            ReconcileError::StoreWrite(e.to_string())
        };

        let mut adopted_time_ids = Vec::new();
        for time in &set.times.to_create {
            let persisted = store.create_feeding_time(pet_id, time).map_err(store_err)?;
            adopted_time_ids.push((time.id.clone(), persisted));
        }
        for time in &set.times.to_update {
            store.update_feeding_time(pet_id, time).map_err(store_err)?;
        }
        for id in &set.times.to_delete {
            store.delete_feeding_time(pet_id, id).map_err(store_err)?;
        }

        let mut adopted_portion_ids = Vec::new();
        for portion in &set.portions.to_create {
            let persisted = store.create_portion(pet_id, portion).map_err(store_err)?;
            adopted_portion_ids.push((portion.id.clone(), persisted));
        }
        for portion in &set.portions.to_update {
            store.update_portion(pet_id, portion).map_err(store_err)?;
        }
        for id in &set.portions.to_delete {
            store.delete_portion(pet_id, id).map_err(store_err)?;
        }

        // All writes landed; the draft becomes the new synced state.
        for (local_id, persisted) in adopted_time_ids {
            if let Some(time) = self.draft_times.iter_mut().find(|t| t.id == local_id) {
                time.id = persisted;
                time.local = false;
            }
        }
        for (local_id, persisted) in adopted_portion_ids {
            if let Some(portion) = self.draft_portions.iter_mut().find(|p| p.id == local_id) {
                portion.id = persisted;
                portion.local = false;
            }
        }
        self.synced_times = self.draft_times.clone();
        self.synced_portions = self.draft_portions.clone();

        Ok(CommitSummary {
            created: set.times.to_create.len() + set.portions.to_create.len(),
            updated: set.times.to_update.len() + set.portions.to_update.len(),
            deleted: set.times.to_delete.len() + set.portions.to_delete.len(),
        })
    }

    // ── Internal ──────────────────────────────────────────────

    fn alloc_local_id(&mut self) -> String {
        let id = format!("local-{}", self.next_local);
        self.next_local += 1;
        id
    }

    fn diff<T: Clone>(
        synced: &[T],
        draft: &[T],
        id: impl Fn(&T) -> &String,
        local: impl Fn(&T) -> bool,
    ) -> Diff<T> {
        let to_create = draft.iter().filter(|t| local(t)).cloned().collect();
        let to_update = draft
            .iter()
            .filter(|d| !local(d) && synced.iter().any(|s| id(s) == id(d)))
            .cloned()
            .collect();
        let to_delete = synced
            .iter()
            .filter(|s| !draft.iter().any(|d| id(d) == id(s)))
            .map(|s| id(s).clone())
            .collect();
        Diff {
            to_create,
            to_update,
            to_delete,
        }
    }
}
