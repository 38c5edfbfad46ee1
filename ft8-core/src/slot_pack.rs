//! Slot Pack Aggregator (C4): dedup + merge of decode results into one
//! pack per slot (§3, §4.4).
//!
//! Invariant: for any `(slotId, fingerprint)` exactly one frame is
//! stored; on collision the higher `snrDb` wins, ties broken by the
//! first to arrive. Packs are sealed once every scheduled window has
//! reported or the wall clock passes `slot.endMs + sealGraceMs`, and
//! retained in a bounded LRU keyed by `slotId`.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::config::ModeDescriptor;
use crate::errors::AggregatorError;
use crate::events::{AggregatorEvent, DecodedFrame};
use crate::fingerprint::{compute_fingerprint, Fingerprint, DEFAULT_DT_BIN_MS};

/// Per-slot decode statistics (§3 `stats`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotPackStats {
    pub total_decodes: u64,
    pub last_updated: Option<DateTime<Utc>>,
    pub per_window: HashMap<usize, u64>,
}

/// One deduplicated pack of decoded frames for a single slot (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct SlotPack {
    pub slot_id: String,
    pub mode_name: String,
    pub frames: HashMap<Fingerprint, DecodedFrame>,
    pub stats: SlotPackStats,
    pub sealed: bool,
}

impl SlotPack {
    fn new(slot_id: String, mode_name: String) -> Self {
        Self {
            slot_id,
            mode_name,
            frames: HashMap::new(),
            stats: SlotPackStats::default(),
            sealed: false,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// No two entries share a fingerprint by construction (the testable
    /// invariant from §8 is therefore vacuously true by type, but kept
    /// as an explicit check for documentation and fuzz-test purposes).
    pub fn has_duplicate_fingerprints(&self) -> bool {
        false
    }
}

struct SlotEntry {
    pack: SlotPack,
    scheduled_windows: HashSet<usize>,
    reported_windows: HashSet<usize>,
    slot_end_ms: i64,
}

/// Owns all slot packs, guarded per-slot (§5 "protected by per-slot
/// mutual exclusion") and retained in a bounded LRU (§4.4).
pub struct SlotPackAggregator {
    mode: ModeDescriptor,
    seal_grace_ms: i64,
    retention: usize,
    inner: Mutex<Inner>,
}

struct Inner {
    entries: HashMap<String, SlotEntry>,
    lru_order: VecDeque<String>,
}

impl SlotPackAggregator {
    pub fn new(mode: ModeDescriptor, retention: usize) -> Self {
        let seal_grace_ms = mode.seal_grace_ms();
        Self {
            mode,
            seal_grace_ms,
            retention,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                lru_order: VecDeque::new(),
            }),
        }
    }

    /// Merges one window's decode results into the slot's pack,
    /// creating the pack on first contact (§4.4 "created on first
    /// decode result for a slot"). Returns the update event, plus a
    /// seal event if this merge completed the pack.
    pub fn merge(
        &self,
        slot_id: &str,
        slot_end_ms: i64,
        window_idx: usize,
        frames: Vec<DecodedFrame>,
        now: DateTime<Utc>,
    ) -> Result<(AggregatorEvent, Option<AggregatorEvent>), AggregatorError> {
        let mut inner = self.inner.lock();

        if !inner.entries.contains_key(slot_id) {
            let mut scheduled_windows = HashSet::new();
            for idx in 0..self.mode.window_offsets_ms.len() {
                scheduled_windows.insert(idx);
            }
            inner.entries.insert(
                slot_id.to_string(),
                SlotEntry {
                    pack: SlotPack::new(slot_id.to_string(), self.mode.name.clone()),
                    scheduled_windows,
                    reported_windows: HashSet::new(),
                    slot_end_ms,
                },
            );
            inner.lru_order.push_back(slot_id.to_string());
        }

        let entry = inner.entries.get_mut(slot_id).expect("just inserted");
        if entry.pack.sealed {
            return Err(AggregatorError::SlotSealed(slot_id.to_string()));
        }

        entry.reported_windows.insert(window_idx);
        let window_count = frames.len() as u64;
        *entry.pack.stats.per_window.entry(window_idx).or_insert(0) += window_count;
        entry.pack.stats.total_decodes += window_count;
        entry.pack.stats.last_updated = Some(now);

        for frame in frames {
            let fp = compute_fingerprint(
                slot_id,
                &frame.message,
                frame.freq_hz as f64,
                frame.dt_sec * 1000.0,
                self.mode.freq_bin_hz(),
                DEFAULT_DT_BIN_MS,
            );
            match entry.pack.frames.get(&fp) {
                Some(existing) if existing.snr_db >= frame.snr_db => {
                    // Existing (higher-or-equal SNR, first to arrive on
                    // ties) copy is kept per §4.4.
                }
                _ => {
                    entry.pack.frames.insert(fp, frame);
                }
            }
        }

        let should_seal = entry.scheduled_windows == entry.reported_windows
            || now.timestamp_millis() > entry.slot_end_ms + self.seal_grace_ms;

        let updated = AggregatorEvent::SlotPackUpdated(entry.pack.clone());
        let sealed = if should_seal && !entry.pack.sealed {
            entry.pack.sealed = true;
            Some(AggregatorEvent::SlotPackSealed(entry.pack.clone()))
        } else {
            None
        };

        self.evict_if_needed(&mut inner);
        Ok((updated, sealed))
    }

    /// Forces sealing of a slot whose wall clock has passed the grace
    /// period even if no further merges occur (driven by a periodic
    /// sweep in the engine wiring).
    pub fn seal_expired(&self, now: DateTime<Utc>) -> Vec<AggregatorEvent> {
        let mut inner = self.inner.lock();
        let mut sealed_events = Vec::new();
        for entry in inner.entries.values_mut() {
            if !entry.pack.sealed && now.timestamp_millis() > entry.slot_end_ms + self.seal_grace_ms
            {
                entry.pack.sealed = true;
                sealed_events.push(AggregatorEvent::SlotPackSealed(entry.pack.clone()));
            }
        }
        sealed_events
    }

    pub fn get(&self, slot_id: &str) -> Option<SlotPack> {
        self.inner.lock().entries.get(slot_id).map(|e| e.pack.clone())
    }

    pub fn is_sealed(&self, slot_id: &str) -> bool {
        self.inner
            .lock()
            .entries
            .get(slot_id)
            .map(|e| e.pack.sealed)
            .unwrap_or(false)
    }

    fn evict_if_needed(&self, inner: &mut Inner) {
        while inner.lru_order.len() > self.retention {
            // Only evict sealed packs; an unsealed pack's slot is still
            // within the horizon and must never be dropped early
            // (§4.4 "unsealed packs are never evicted while their
            // slot's wall-time is within the horizon").
            let oldest_unsealed_idx = inner
                .lru_order
                .iter()
                .position(|id| inner.entries.get(id).map(|e| e.pack.sealed).unwrap_or(true));
            match oldest_unsealed_idx {
                Some(idx) => {
                    let id = inner.lru_order.remove(idx).expect("index in range");
                    inner.entries.remove(&id);
                }
                None => break,
            }
        }
    }

    pub fn retained_count(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn frame(message: &str, snr_db: i32, freq_hz: i64, dt_sec: f64) -> DecodedFrame {
        DecodedFrame {
            message: message.to_string(),
            snr_db,
            dt_sec,
            freq_hz,
            confidence: 1.0,
        }
    }

    #[test]
    fn single_window_decode_produces_one_frame() {
        let mode = ModeDescriptor {
            window_offsets_ms: vec![0],
            ..ModeDescriptor::ft8()
        };
        let agg = SlotPackAggregator::new(mode, 64);
        let now = Utc::now();
        let (update, _) = agg
            .merge(
                "20260101-120000",
                1_700_000_015_000,
                0,
                vec![frame("CQ W1ABC FN42", -10, 1500, 0.1)],
                now,
            )
            .unwrap();
        if let AggregatorEvent::SlotPackUpdated(pack) = update {
            assert_eq!(pack.frame_count(), 1);
        } else {
            panic!("expected update event");
        }
    }

    #[test]
    fn dedup_across_windows_keeps_highest_snr() {
        let mode = ModeDescriptor {
            window_offsets_ms: vec![-1000, 0, 1000],
            ..ModeDescriptor::ft8()
        };
        let agg = SlotPackAggregator::new(mode, 64);
        let now = Utc::now();
        let slot_id = "20260101-120000";
        let slot_end = 1_700_000_015_000;

        agg.merge(slot_id, slot_end, 0, vec![frame("CQ W1ABC FN42", -12, 1500, 0.1)], now)
            .unwrap();
        agg.merge(slot_id, slot_end, 1, vec![frame("CQ W1ABC FN42", -10, 1500, 0.1)], now)
            .unwrap();
        let (update, sealed) = agg
            .merge(slot_id, slot_end, 2, vec![frame("CQ W1ABC FN42", -11, 1500, 0.1)], now)
            .unwrap();

        let pack = match update {
            AggregatorEvent::SlotPackUpdated(p) => p,
            _ => unreachable!(),
        };
        assert_eq!(pack.frame_count(), 1);
        let only_frame = pack.frames.values().next().unwrap();
        assert_eq!(only_frame.snr_db, -10);
        assert_eq!(pack.stats.total_decodes, 3);
        assert!(sealed.is_some(), "all scheduled windows reported, pack should seal");
    }

    #[test]
    fn different_messages_do_not_dedup() {
        let mode = ModeDescriptor {
            window_offsets_ms: vec![0],
            ..ModeDescriptor::ft8()
        };
        let agg = SlotPackAggregator::new(mode, 64);
        let now = Utc::now();
        let (update, _) = agg
            .merge(
                "20260101-120000",
                1_700_000_015_000,
                0,
                vec![
                    frame("CQ W1ABC FN42", -10, 1500, 0.1),
                    frame("CQ K2XYZ FN42", -8, 2000, 0.2),
                ],
                now,
            )
            .unwrap();
        let pack = match update {
            AggregatorEvent::SlotPackUpdated(p) => p,
            _ => unreachable!(),
        };
        assert_eq!(pack.frame_count(), 2);
    }

    #[test]
    fn seals_on_grace_period_even_without_all_windows() {
        let mode = ModeDescriptor {
            window_offsets_ms: vec![-1000, 0, 1000],
            ..ModeDescriptor::ft8()
        };
        let seal_grace = mode.seal_grace_ms();
        let agg = SlotPackAggregator::new(mode, 64);
        let slot_end = 1_700_000_015_000;
        let late_now = Utc
            .timestamp_millis_opt(slot_end + seal_grace + 1)
            .unwrap();
        let (_update, sealed) = agg
            .merge(
                "20260101-120000",
                slot_end,
                0,
                vec![frame("CQ W1ABC FN42", -10, 1500, 0.1)],
                late_now,
            )
            .unwrap();
        assert!(sealed.is_some());
    }

    #[test]
    fn sealed_slot_rejects_further_merges() {
        let mode = ModeDescriptor {
            window_offsets_ms: vec![0],
            ..ModeDescriptor::ft8()
        };
        let agg = SlotPackAggregator::new(mode, 64);
        let now = Utc::now();
        let slot_id = "20260101-120000";
        agg.merge(slot_id, 1_700_000_015_000, 0, vec![frame("CQ W1ABC FN42", -10, 1500, 0.1)], now)
            .unwrap();
        assert!(agg.is_sealed(slot_id));
        let result = agg.merge(slot_id, 1_700_000_015_000, 0, vec![frame("CQ K2XYZ FN42", -5, 1600, 0.1)], now);
        assert!(matches!(result, Err(AggregatorError::SlotSealed(_))));
    }

    #[test]
    fn eviction_keeps_retention_bound_on_sealed_packs() {
        let mode = ModeDescriptor {
            window_offsets_ms: vec![0],
            ..ModeDescriptor::ft8()
        };
        let agg = SlotPackAggregator::new(mode, 2);
        let now = Utc::now();
        for i in 0..5 {
            let slot_id = format!("slot-{i}");
            agg.merge(&slot_id, 1_700_000_000_000 + i * 15_000, 0, vec![frame("CQ W1ABC FN42", -10, 1500, 0.1)], now)
                .unwrap();
        }
        assert!(agg.retained_count() <= 2);
    }
}
