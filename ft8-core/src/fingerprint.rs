//! Dedup fingerprint key for decoded frames within a slot (§3, §4.4).
//!
//! Two decode results in the same slot that carry the same canonical
//! text and fall within the same coarse time/frequency bin are treated
//! as the same transmission, regardless of which window offset produced
//! each decode.

use crate::protocol::normalize_whitespace;

/// Coarse dedup key: slot identity plus quantized time/frequency/text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub slot_id: String,
    pub freq_bin: i64,
    pub dt_bin: i64,
    pub canonical_text: String,
}

/// Builds the dedup key for a decoded frame.
///
/// `freq_hz` and `dt_ms` are quantized into bins of `freq_bin_hz` and
/// `dt_bin_ms` respectively so that small estimator jitter between
/// windows does not produce spurious duplicate fingerprints.
pub fn compute_fingerprint(
    slot_id: &str,
    text: &str,
    freq_hz: f64,
    dt_ms: f64,
    freq_bin_hz: i64,
    dt_bin_ms: i64,
) -> Fingerprint {
    let canonical_text = normalize_whitespace(text).to_ascii_uppercase();
    let freq_bin = quantize(freq_hz, freq_bin_hz as f64);
    let dt_bin = quantize(dt_ms, dt_bin_ms as f64);
    Fingerprint {
        slot_id: slot_id.to_string(),
        freq_bin,
        dt_bin,
        canonical_text,
    }
}

fn quantize(value: f64, bin_width: f64) -> i64 {
    if bin_width <= 0.0 {
        return value.round() as i64;
    }
    (value / bin_width).round() as i64
}

/// Default dt quantization bin, matching FT8's inter-window tolerance.
pub const DEFAULT_DT_BIN_MS: i64 = 50;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_inputs_produce_identical_fingerprints() {
        let a = compute_fingerprint("20260101-120000", "CQ W1ABC FN42", 1500.2, 120.0, 6, 50);
        let b = compute_fingerprint("20260101-120000", "CQ W1ABC FN42", 1500.2, 120.0, 6, 50);
        assert_eq!(a, b);
    }

    #[test]
    fn small_jitter_within_bin_dedups() {
        let a = compute_fingerprint("20260101-120000", "CQ W1ABC FN42", 1500.2, 118.0, 6, 50);
        let b = compute_fingerprint("20260101-120000", "CQ W1ABC FN42", 1501.8, 121.0, 6, 50);
        assert_eq!(a, b);
    }

    #[test]
    fn different_text_does_not_dedup() {
        let a = compute_fingerprint("20260101-120000", "CQ W1ABC FN42", 1500.0, 120.0, 6, 50);
        let b = compute_fingerprint("20260101-120000", "CQ K2XYZ FN42", 1500.0, 120.0, 6, 50);
        assert_ne!(a, b);
    }

    #[test]
    fn different_slot_does_not_dedup() {
        let a = compute_fingerprint("20260101-120000", "CQ W1ABC FN42", 1500.0, 120.0, 6, 50);
        let b = compute_fingerprint("20260101-120015", "CQ W1ABC FN42", 1500.0, 120.0, 6, 50);
        assert_ne!(a, b);
    }

    #[test]
    fn text_casing_and_whitespace_are_normalized() {
        let a = compute_fingerprint("20260101-120000", "cq  w1abc   fn42", 1500.0, 120.0, 6, 50);
        let b = compute_fingerprint("20260101-120000", "CQ W1ABC FN42", 1500.0, 120.0, 6, 50);
        assert_eq!(a, b);
    }
}
