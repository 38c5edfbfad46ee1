//! Audio Mixer (C6): assembles up to one mixed PCM buffer per outbound
//! slot from zero or more per-operator encoded waveforms, released at
//! an instant that lets downstream hardware start playback at
//! `targetPlayMs` (§4.6).
//!
//! Invariant (critical, §8): at most one `mixedAudioReady` per
//! `slotId`. Release is serialized in slot order per §5; this module
//! enforces "at most one" with a `released` flag per pending window and
//! leaves slot-order serialization to the caller driving `release_due`
//! in wall-clock order (the clock never schedules two outbound slots
//! concurrently, see engine.rs).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::config::MixerConfig;
use crate::encode_pool::EncodedWaveform;
use crate::errors::MixerError;

/// The mixer's fixed internal sample rate (§9 open question, resolved:
/// 48 kHz per spec.md's explicit choice).
pub const MIXER_SAMPLE_RATE_HZ: u32 = 48_000;

/// One mixed slot's output, ready for the radio lifecycle FSM to play (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct MixedSlotOutput {
    pub slot_id: String,
    pub pcm: Vec<f32>,
    pub sample_rate: u32,
    pub target_play_ms: i64,
    pub contributing_operators: Vec<String>,
}

struct PendingWindow {
    target_play_ms: i64,
    expected_operators: Vec<String>,
    contributions: HashMap<String, EncodedWaveform>,
    released: bool,
}

pub struct AudioMixer {
    config: MixerConfig,
    pending: Mutex<HashMap<String, PendingWindow>>,
    gains: Mutex<HashMap<String, f32>>,
}

impl AudioMixer {
    pub fn new(config: MixerConfig) -> Self {
        Self {
            config,
            pending: Mutex::new(HashMap::new()),
            gains: Mutex::new(HashMap::new()),
        }
    }

    /// Registers which operators are expected to contribute to `slot_id`
    /// before any waveforms arrive, so the mixer can tell "all known
    /// contributors have delivered" apart from "nobody is transmitting
    /// this slot" (§4.6 early-release policy).
    pub fn expect_slot(&self, slot_id: &str, target_play_ms: i64, expected_operators: Vec<String>) {
        let mut pending = self.pending.lock();
        pending.entry(slot_id.to_string()).or_insert(PendingWindow {
            target_play_ms,
            expected_operators,
            contributions: HashMap::new(),
            released: false,
        });
    }

    /// Sets a per-operator gain, clamped-validated to `[0.001, 10.0]` (§4.6).
    pub fn set_gain(&self, operator_id: &str, gain: f32) -> Result<(), MixerError> {
        if !(0.001..=10.0).contains(&gain) {
            return Err(MixerError::GainOutOfRange {
                operator_id: operator_id.to_string(),
                gain,
            });
        }
        self.gains.lock().insert(operator_id.to_string(), gain);
        Ok(())
    }

    fn gain_for(&self, operator_id: &str) -> f32 {
        self.gains
            .lock()
            .get(operator_id)
            .copied()
            .unwrap_or(self.config.per_operator_gain)
    }

    /// Adds an encoded waveform as it arrives from C5 (§4.6 `addAudio`).
    /// A fresh submission for an operator that already contributed to
    /// this slot replaces the prior one, supporting the mid-slot
    /// override described in §4.8/scenario 6.
    pub fn add_audio(&self, waveform: EncodedWaveform) {
        let mut pending = self.pending.lock();
        let entry = pending
            .entry(waveform.slot_id.clone())
            .or_insert_with(|| PendingWindow {
                target_play_ms: waveform.target_play_ms,
                expected_operators: vec![waveform.operator_id.clone()],
                contributions: HashMap::new(),
                released: false,
            });
        entry
            .contributions
            .insert(waveform.operator_id.clone(), waveform);
    }

    /// Evaluates the release policy for `slot_id` against `now` (§4.6):
    /// - before `targetPlayMs - earlyReleaseMs`: release only if every
    ///   expected contributor has already delivered;
    /// - at or after that point: release immediately with whatever has
    ///   arrived;
    /// - at or after `targetPlayMs + playSkipMs`: discard instead.
    ///
    /// Returns `Ok(Some(_))` exactly once per slot (subsequent calls
    /// after release return `Ok(None)`), enforcing the "at most one
    /// mixedAudioReady per slotId" invariant.
    pub fn poll_release(
        &self,
        slot_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<MixedSlotOutput>, MixerError> {
        let mut pending = self.pending.lock();
        let window = match pending.get_mut(slot_id) {
            Some(w) => w,
            None => return Ok(None),
        };
        if window.released {
            return Ok(None);
        }

        let now_ms = now.timestamp_millis();
        let early_threshold = window.target_play_ms - self.config.early_release_ms;
        let skip_threshold = window.target_play_ms + self.config.play_skip_ms;

        if now_ms >= skip_threshold {
            window.released = true;
            return Err(MixerError::TooLate {
                slot_id: slot_id.to_string(),
                target_play_ms: window.target_play_ms,
                now_ms,
                skip_ms: self.config.play_skip_ms,
            });
        }

        let all_arrived = window
            .expected_operators
            .iter()
            .all(|op| window.contributions.contains_key(op));

        let should_release = now_ms >= early_threshold || all_arrived;
        if !should_release {
            return Ok(None);
        }

        window.released = true;
        let mut contributing_operators: Vec<String> =
            window.contributions.keys().cloned().collect();
        contributing_operators.sort();

        let max_len = window
            .contributions
            .values()
            .map(|w| w.pcm.len())
            .max()
            .unwrap_or(0);
        let mut mixed = vec![0.0f32; max_len];
        for op_id in &contributing_operators {
            let waveform = &window.contributions[op_id];
            let gain = self.gain_for(op_id);
            for (i, &s) in waveform.pcm.iter().enumerate() {
                mixed[i] += s * gain;
            }
        }
        for s in mixed.iter_mut() {
            *s = s.tanh();
        }

        Ok(Some(MixedSlotOutput {
            slot_id: slot_id.to_string(),
            pcm: mixed,
            sample_rate: MIXER_SAMPLE_RATE_HZ,
            target_play_ms: window.target_play_ms,
            contributing_operators,
        }))
    }

    pub fn forget_slot(&self, slot_id: &str) {
        self.pending.lock().remove(slot_id);
    }
}
