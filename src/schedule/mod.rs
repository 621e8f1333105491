//! Feeding-schedule domain: the data model and the draft/synced reconciler.
//!
//! A pet's schedule is two collections — feeding times and portion sizes.
//! The reconciler keeps the user's in-progress edits (`draft`) alongside
//! the last persisted value (`synced`) and computes the minimal write set
//! to bring storage up to date.

pub mod draft;
pub mod model;

pub use draft::{ChangeSet, CommitSummary, Diff, ScheduleDraft};
pub use model::{FeedingTime, Period, Portion};
