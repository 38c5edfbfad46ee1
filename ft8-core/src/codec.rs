//! Deterministic stand-in for the FT8/FT4 DSP boundary (§6).
//!
//! The real Costas-sync/LDPC decoder and the real multi-tone-FSK encoder
//! are explicitly out of scope (§1 non-goals); `decode`/`encode` are
//! pure-function seams per the spec. This module provides a reference
//! implementation of those seams that is deterministic and invertible —
//! a single-tone-per-symbol keyed codec in the spirit of the teacher's
//! own placeholder FSK telemetry protocol — so the coordination layer
//! (C1-C11) can be driven and tested end-to-end without a real DSP
//! library wired in. A production deployment swaps this out behind the
//! same [`crate::interfaces::Decoder`]/[`crate::interfaces::Encoder`]
//! traits without touching the rest of the crate.

use crate::config::ModeDescriptor;
use crate::events::DecodedFrame;
use crate::interfaces::{Decoder, Encoder};

/// Fixed alphabet covering what the protocol templates (§4.7) actually
/// emit: uppercase letters, digits, space and a handful of punctuation
/// used by signal reports and grid squares.
const ALPHABET: &[u8] = b" ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789+-/";

fn symbol_index(c: u8) -> Option<usize> {
    ALPHABET.iter().position(|&a| a == c)
}

const SYMBOL_MS: f64 = 160.0;
const MAX_CHARS: usize = 22;

/// A tone-keyed [`Encoder`]/[`Decoder`] pair operating at a fixed
/// internal sample rate. Each character of the (uppercased, truncated)
/// input text is mapped to one audio tone spanning [`SYMBOL_MS`]
/// milliseconds, frequency-spaced evenly across the mode's usable audio
/// band so that decoding is a per-symbol dominant-frequency search.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToneKeyedCodec;

impl ToneKeyedCodec {
    pub fn new() -> Self {
        Self
    }

    fn tone_for_symbol(&self, base_freq_hz: u32, idx: usize) -> f64 {
        let spacing = 40.0;
        base_freq_hz as f64 + idx as f64 * spacing
    }
}

impl Encoder for ToneKeyedCodec {
    fn encode(&self, text: &str, mode: &ModeDescriptor, base_freq_hz: u32) -> Vec<f32> {
        let sample_rate = mode.target_sample_rate_hz();
        let samples_per_symbol = ((SYMBOL_MS / 1000.0) * sample_rate as f64).round() as usize;
        let truncated: String = text
            .trim()
            .to_ascii_uppercase()
            .chars()
            .filter(|c| symbol_index(*c as u8).is_some())
            .take(MAX_CHARS)
            .collect();

        let mut out = Vec::with_capacity(truncated.len().max(1) * samples_per_symbol);
        for c in truncated.bytes() {
            let idx = symbol_index(c).unwrap_or(0);
            let freq = self.tone_for_symbol(base_freq_hz, idx);
            for n in 0..samples_per_symbol {
                let t = n as f64 / sample_rate as f64;
                let ramp = raised_cosine_ramp(n, samples_per_symbol);
                out.push((ramp * (2.0 * std::f64::consts::PI * freq * t).sin()) as f32);
            }
        }
        out
    }
}

fn raised_cosine_ramp(n: usize, total: usize) -> f64 {
    let ramp_len = (total / 10).max(1);
    if n < ramp_len {
        0.5 * (1.0 - (std::f64::consts::PI * n as f64 / ramp_len as f64).cos())
    } else if n >= total - ramp_len {
        let k = total - 1 - n;
        0.5 * (1.0 - (std::f64::consts::PI * k as f64 / ramp_len as f64).cos())
    } else {
        1.0
    }
}

impl Decoder for ToneKeyedCodec {
    fn decode(&self, pcm12k: &[f32]) -> Vec<DecodedFrame> {
        let sample_rate = 12_000u32;
        let samples_per_symbol = ((SYMBOL_MS / 1000.0) * sample_rate as f64).round() as usize;
        if samples_per_symbol == 0 || pcm12k.len() < samples_per_symbol {
            return Vec::new();
        }

        let base_freq_hz = 500u32;
        let mut text = String::new();
        let mut total_power = 0.0f64;
        let mut snr_samples = 0usize;
        let mut symbol_count = 0usize;
        let mut chunks = pcm12k.chunks_exact(samples_per_symbol);
        for chunk in &mut chunks {
            let (best_idx, best_power, mean_power) = best_symbol(chunk, sample_rate, base_freq_hz);
            if mean_power <= 0.0 {
                continue;
            }
            symbol_count += 1;
            total_power += best_power / mean_power.max(1e-9);
            snr_samples += 1;
            if best_power < mean_power * 3.0 {
                // Below the detection threshold: treat as end of message.
                break;
            }
            text.push(ALPHABET[best_idx] as char);
        }

        let trimmed = text.trim().to_string();
        if trimmed.is_empty() || symbol_count == 0 {
            return Vec::new();
        }

        let avg_ratio = total_power / snr_samples.max(1) as f64;
        let snr_db = (10.0 * avg_ratio.max(1e-6).log10()).clamp(-30.0, 20.0) as i32;

        vec![DecodedFrame {
            message: trimmed,
            snr_db,
            dt_sec: 0.0,
            freq_hz: base_freq_hz as i64,
            confidence: avg_ratio,
        }]
    }
}

/// Goertzel power at `freq_hz` within `samples`, for cheap single-tone
/// detection without a full FFT.
fn goertzel_power(samples: &[f32], sample_rate: u32, freq_hz: f64) -> f64 {
    let n = samples.len() as f64;
    let k = (0.5 + n * freq_hz / sample_rate as f64).floor();
    let omega = 2.0 * std::f64::consts::PI * k / n;
    let coeff = 2.0 * omega.cos();
    let (mut s_prev, mut s_prev2) = (0.0f64, 0.0f64);
    for &s in samples {
        let s0 = s as f64 + coeff * s_prev - s_prev2;
        s_prev2 = s_prev;
        s_prev = s0;
    }
    s_prev2 * s_prev2 + s_prev * s_prev - coeff * s_prev * s_prev2
}

fn best_symbol(chunk: &[f32], sample_rate: u32, base_freq_hz: u32) -> (usize, f64, f64) {
    let powers: Vec<f64> = (0..ALPHABET.len())
        .map(|idx| {
            let freq = base_freq_hz as f64 + idx as f64 * 40.0;
            goertzel_power(chunk, sample_rate, freq)
        })
        .collect();
    let mean_power = powers.iter().sum::<f64>() / powers.len() as f64;
    let (best_idx, &best_power) = powers
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap())
        .unwrap();
    (best_idx, best_power, mean_power)
}
