//! Property-based invariants for the pure value types (§3, §4.1, §4.4),
//! mirroring the teacher's `tests/property_based.rs` convention of a
//! single `proptest!` block per crate covering the math-heavy core.

use proptest::prelude::*;

use ft8_core::fingerprint::compute_fingerprint;
use ft8_core::protocol::{canonicalize_callsign, canonicalize_grid, normalize_whitespace};
use ft8_core::slot::Slot;

proptest! {
    /// `Slot::containing` must always round down onto a slot boundary,
    /// and the constructed slot must actually contain the instant it
    /// was built from (§4.1 wall-clock/sample-index correspondence).
    #[test]
    fn slot_containing_is_always_aligned_and_contains_its_instant(
        start_ms in 0i64..4_000_000_000_000,
        slot_ms in prop::sample::select(vec![7_500i64, 15_000, 6_250]),
    ) {
        let slot = Slot::containing(start_ms, slot_ms);
        prop_assert_eq!(slot.start_ms % slot_ms, 0);
        prop_assert!(slot.contains_ms(start_ms));
        prop_assert_eq!(slot.end_ms - slot.start_ms, slot_ms);
    }

    /// Walking forward with `next()` must strictly increase both the
    /// cycle index and the wall-clock start, with no gap or overlap.
    #[test]
    fn slot_next_is_contiguous_and_monotonic(
        start_ms in 0i64..4_000_000_000_000,
        slot_ms in prop::sample::select(vec![7_500i64, 15_000, 6_250]),
    ) {
        let slot = Slot::containing(start_ms, slot_ms);
        let following = slot.next();
        prop_assert_eq!(following.start_ms, slot.end_ms);
        prop_assert!(following.cycle_index > slot.cycle_index);
        prop_assert_ne!(following.phase(), slot.phase());
    }

    /// Fingerprints are a pure function of their inputs: identical
    /// arguments always produce an identical key (§4.4).
    #[test]
    fn fingerprint_is_deterministic(
        freq_hz in 200.0f64..4000.0,
        dt_ms in -500.0f64..500.0,
        text in "[A-Za-z0-9 ]{1,20}",
    ) {
        let a = compute_fingerprint("20260101-120000", &text, freq_hz, dt_ms, 6, 50);
        let b = compute_fingerprint("20260101-120000", &text, freq_hz, dt_ms, 6, 50);
        prop_assert_eq!(a, b);
    }

    /// Jitter that stays within half a quantization bin on both freq
    /// and dt must never change the fingerprint (the whole point of
    /// quantizing in the first place). The base values are placed
    /// exactly on bin centers so the jitter cannot cross a rounding
    /// boundary regardless of direction.
    #[test]
    fn fingerprint_tolerates_sub_bin_jitter(
        freq_bin_index in 80i64..580,
        dt_bin_index in -10i64..10,
        freq_jitter in -2.9f64..2.9,
        dt_jitter in -24.9f64..24.9,
        text in "[A-Za-z0-9 ]{1,20}",
    ) {
        let freq_hz = (freq_bin_index * 6) as f64;
        let dt_ms = (dt_bin_index * 50) as f64;
        let a = compute_fingerprint("20260101-120000", &text, freq_hz, dt_ms, 6, 50);
        let b = compute_fingerprint(
            "20260101-120000",
            &text,
            freq_hz + freq_jitter,
            dt_ms + dt_jitter,
            6,
            50,
        );
        prop_assert_eq!(a, b);
    }

    /// Canonicalizing a callsign is idempotent: doing it twice is the
    /// same as doing it once.
    #[test]
    fn callsign_canonicalization_is_idempotent(raw in "[A-Za-z0-9/ ]{1,15}") {
        let once = canonicalize_callsign(&raw);
        let twice = canonicalize_callsign(&once);
        prop_assert_eq!(once, twice);
    }

    /// Grid canonicalization is idempotent under the same argument, for
    /// inputs that are valid Maidenhead locators in the first place.
    #[test]
    fn grid_canonicalization_is_idempotent(raw in "[A-Ra-r]{2}[0-9]{2}[A-Xa-x]{0,2}") {
        let once = canonicalize_grid(&raw).expect("generated input is a valid locator");
        let twice = canonicalize_grid(&once).expect("canonicalized output stays valid");
        prop_assert_eq!(once, twice);
    }

    /// Whitespace normalization never increases length and always
    /// collapses runs of whitespace to single spaces with no leading
    /// or trailing space.
    #[test]
    fn whitespace_normalization_has_no_leading_trailing_or_runs(raw in "[A-Za-z0-9 \t]{0,40}") {
        let normalized = normalize_whitespace(&raw);
        prop_assert!(normalized.len() <= raw.len());
        prop_assert!(!normalized.starts_with(' '));
        prop_assert!(!normalized.ends_with(' '));
        prop_assert!(!normalized.contains("  "));
    }
}
