//! Slot value type and UTC alignment math.
//!
//! A slot is a fixed-length, UTC-aligned period in which one transmission
//! may occur. All fields are derived from `startMs`; there is no other
//! source of truth for slot identity.

use chrono::{DateTime, TimeZone, Utc};

/// Even/odd parity of a slot's cycle index; determines which operators
/// are allowed to transmit in a given slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Even,
    Odd,
}

impl Phase {
    pub fn from_cycle_index(cycle_index: i64) -> Self {
        if cycle_index.rem_euclid(2) == 0 {
            Phase::Even
        } else {
            Phase::Odd
        }
    }
}

/// A single UTC-aligned slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Slot {
    pub id: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub slot_ms: i64,
    pub cycle_index: i64,
}

impl Slot {
    /// Construct the slot that contains `start_ms`, rounding down to the
    /// nearest `slot_ms` boundary. `start_ms mod slot_ms == 0` holds for
    /// the result by construction.
    pub fn containing(start_ms: i64, slot_ms: i64) -> Self {
        let aligned_start = (start_ms.div_euclid(slot_ms)) * slot_ms;
        Self::at_boundary(aligned_start, slot_ms)
    }

    /// Construct the slot whose `start_ms` is exactly `start_ms`.
    /// `start_ms` must already be a multiple of `slot_ms`.
    pub fn at_boundary(start_ms: i64, slot_ms: i64) -> Self {
        debug_assert_eq!(start_ms % slot_ms, 0, "slot start must be slot-aligned");
        // Computed directly in milliseconds: FT4's 7500ms slot is not a
        // whole number of seconds, so dividing `slot_ms` down to seconds
        // first (as an earlier version of this did) rounds it to 7s and
        // desyncs the even/odd phase parity from the actual slot cadence.
        let cycle_index = start_ms.div_euclid(slot_ms);
        Self {
            id: format_slot_id(start_ms),
            start_ms,
            end_ms: start_ms + slot_ms,
            slot_ms,
            cycle_index,
        }
    }

    pub fn next(&self) -> Self {
        Self::at_boundary(self.end_ms, self.slot_ms)
    }

    pub fn phase(&self) -> Phase {
        Phase::from_cycle_index(self.cycle_index)
    }

    pub fn utc_seconds(&self) -> i64 {
        self.start_ms.div_euclid(1000)
    }

    pub fn contains_ms(&self, wall_ms: i64) -> bool {
        wall_ms >= self.start_ms && wall_ms < self.end_ms
    }
}

fn format_slot_id(start_ms: i64) -> String {
    let dt: DateTime<Utc> = Utc
        .timestamp_millis_opt(start_ms)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().unwrap());
    dt.format("%Y%m%d-%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_is_always_slot_aligned() {
        let slot = Slot::containing(1_700_000_123_456, 15_000);
        assert_eq!(slot.start_ms % 15_000, 0);
        assert!(slot.contains_ms(1_700_000_123_456));
    }

    #[test]
    fn cycle_index_strictly_increases() {
        let first = Slot::containing(0, 15_000);
        let second = first.next();
        assert!(second.cycle_index > first.cycle_index);
        assert_eq!(second.start_ms, first.end_ms);
    }

    #[test]
    fn phase_alternates_each_slot() {
        let first = Slot::at_boundary(0, 15_000);
        let second = first.next();
        assert_ne!(first.phase(), second.phase());
    }

    #[test]
    fn id_is_stable_for_same_start() {
        let a = Slot::at_boundary(1_700_000_000_000, 15_000);
        let b = Slot::at_boundary(1_700_000_000_000, 15_000);
        assert_eq!(a.id, b.id);
    }
}
