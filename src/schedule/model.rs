//! Schedule data model: feeding times and portions.

use serde::{Deserialize, Serialize};

use crate::error::ReconcileError;

/// Half-day marker for a 12-hour clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Am,
    Pm,
}

/// One slot in a pet's feeding schedule.
///
/// Times are entered on a 12-hour clock with 5-minute resolution. The
/// storage ordering key (`time_order`) is always derived from
/// `(hour, minute, period)`, never stored or edited independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedingTime {
    /// Persisted document id, or a `local-N` placeholder until committed.
    pub id: String,
    /// 1-12.
    pub hour: u8,
    /// 0, 5, 10, … 55.
    pub minute: u8,
    pub period: Period,
    pub enabled: bool,
    /// Created in the draft and not yet persisted.
    #[serde(skip)]
    pub local: bool,
}

impl FeedingTime {
    /// Validate the 12-hour clock fields.
    pub fn validate(hour: u8, minute: u8) -> Result<(), ReconcileError> {
        if (1..=12).contains(&hour) && minute < 60 && minute % 5 == 0 {
            Ok(())
        } else {
            Err(ReconcileError::InvalidTime { hour, minute })
        }
    }

    /// Hour on the 24-hour clock.
    pub fn hour24(&self) -> u8 {
        match (self.period, self.hour) {
            (Period::Am, 12) => 0,
            (Period::Am, h) => h,
            (Period::Pm, 12) => 12,
            (Period::Pm, h) => h + 12,
        }
    }

    /// Minutes since local midnight — the storage ordering key and the
    /// scheduler's time-match key.
    pub fn time_order(&self) -> u16 {
        u16::from(self.hour24()) * 60 + u16::from(self.minute)
    }
}

/// One selectable portion size for a pet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Portion {
    /// Persisted document id, or a `local-N` placeholder until committed.
    pub id: String,
    /// Gram value; shown to the user as e.g. "150 grs".
    pub amount_grams: u32,
    /// At most one portion per pet is selected at a time.
    pub selected: bool,
    #[serde(skip)]
    pub local: bool,
}
