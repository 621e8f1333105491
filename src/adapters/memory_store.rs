//! In-memory schedule store.
//!
//! HashMap-backed implementation of the [`ScheduleStore`] port with
//! sequential document ids. Feeding times are kept ordered by their
//! `time_order` key on load, matching the ordered query the real
//! document store serves.

use std::collections::HashMap;

use crate::app::ports::{ScheduleStore, StoreError};
use crate::schedule::{FeedingTime, Portion};

#[derive(Debug, Default)]
struct PetDocs {
    feeding_times: Vec<FeedingTime>,
    portions: Vec<Portion>,
}

/// HashMap-backed [`ScheduleStore`].
#[derive(Debug, Default)]
pub struct MemoryScheduleStore {
    pets: HashMap<String, PetDocs>,
    next_id: u32,
}

impl MemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a pet's collections directly (test/demo setup).
    pub fn seed(&mut self, pet_id: &str, times: Vec<FeedingTime>, portions: Vec<Portion>) {
        self.pets.insert(
            pet_id.to_string(),
            PetDocs {
                feeding_times: times,
                portions,
            },
        );
    }

    fn fresh_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }
}

impl ScheduleStore for MemoryScheduleStore {
    fn load(&self, pet_id: &str) -> Result<(Vec<FeedingTime>, Vec<Portion>), StoreError> {
        let docs = self.pets.get(pet_id);
        let mut times = docs.map(|d| d.feeding_times.clone()).unwrap_or_default();
        times.sort_by_key(FeedingTime::time_order);
        let portions = docs.map(|d| d.portions.clone()).unwrap_or_default();
        Ok((times, portions))
    }

    fn create_feeding_time(
        &mut self,
        pet_id: &str,
        time: &FeedingTime,
    ) -> Result<String, StoreError> {
        let id = self.fresh_id("ft");
        let mut stored = time.clone();
        stored.id = id.clone();
        stored.local = false;
        self.pets
            .entry(pet_id.to_string())
            .or_default()
            .feeding_times
            .push(stored);
        Ok(id)
    }

    fn update_feeding_time(&mut self, pet_id: &str, time: &FeedingTime) -> Result<(), StoreError> {
        let docs = self.pets.get_mut(pet_id).ok_or(StoreError::NotFound)?;
        let slot = docs
            .feeding_times
            .iter_mut()
            .find(|t| t.id == time.id)
            .ok_or(StoreError::NotFound)?;
        *slot = time.clone();
        Ok(())
    }

    fn delete_feeding_time(&mut self, pet_id: &str, id: &str) -> Result<(), StoreError> {
        let docs = self.pets.get_mut(pet_id).ok_or(StoreError::NotFound)?;
        docs.feeding_times.retain(|t| t.id != id);
        Ok(())
    }

    fn create_portion(&mut self, pet_id: &str, portion: &Portion) -> Result<String, StoreError> {
        let id = self.fresh_id("p");
        let mut stored = portion.clone();
        stored.id = id.clone();
        stored.local = false;
        self.pets
            .entry(pet_id.to_string())
            .or_default()
            .portions
            .push(stored);
        Ok(id)
    }

    fn update_portion(&mut self, pet_id: &str, portion: &Portion) -> Result<(), StoreError> {
        let docs = self.pets.get_mut(pet_id).ok_or(StoreError::NotFound)?;
        let slot = docs
            .portions
            .iter_mut()
            .find(|p| p.id == portion.id)
            .ok_or(StoreError::NotFound)?;
        *slot = portion.clone();
        Ok(())
    }

    fn delete_portion(&mut self, pet_id: &str, id: &str) -> Result<(), StoreError> {
        let docs = self.pets.get_mut(pet_id).ok_or(StoreError::NotFound)?;
        docs.portions.retain(|p| p.id != id);
        Ok(())
    }
}
