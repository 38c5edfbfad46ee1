//! FFT magnitude spectrum over a real-valued audio window, used by the
//! Spectrum Scheduler (C11, §4.11) to produce a waterfall/spectrum feed
//! from C1's captured PCM.

use rustfft::{num_complex::Complex32, FftPlanner};

/// Computes a magnitude spectrum in dB from a window of mono f32 audio
/// samples. The window is Hann-tapered and zero-padded/truncated to
/// `fft_size` before the forward FFT; only the first half of bins
/// (0 Hz .. Nyquist) is returned, since the input is real-valued and
/// the upper half mirrors it.
///
/// Returns an empty vector if fewer than `fft_size / 4` samples are
/// available — too short a window for a meaningful spectrum (§4.11
/// "non-blocking: if the previous FFT has not completed it skips this
/// tick" covers pacing; this covers data sufficiency).
pub fn compute_audio_spectrum_db(samples: &[f32], fft_size: usize) -> Vec<f32> {
    if fft_size == 0 || samples.len() < fft_size / 4 {
        return Vec::new();
    }

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(fft_size);

    let usable = samples.len().min(fft_size);
    let mut buffer: Vec<Complex32> = Vec::with_capacity(fft_size);
    for (i, &s) in samples.iter().take(usable).enumerate() {
        let window = hann_window(i, usable);
        buffer.push(Complex32::new(s * window, 0.0));
    }
    buffer.resize(fft_size, Complex32::new(0.0, 0.0));

    fft.process(&mut buffer);

    let window_power_correction = 2.0; // Hann window coherent power compensation
    let scale = window_power_correction / fft_size as f32;
    buffer[..fft_size / 2]
        .iter()
        .map(|c| {
            let power = c.norm_sqr() * scale * scale;
            if power > 1e-12 {
                10.0 * power.log10()
            } else {
                -120.0
            }
        })
        .collect()
}

fn hann_window(i: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }
    0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / (len as f32 - 1.0)).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_samples_returns_empty() {
        let samples = vec![0.0f32; 10];
        assert!(compute_audio_spectrum_db(&samples, 2048).is_empty());
    }

    #[test]
    fn pure_tone_peaks_near_expected_bin() {
        let sample_rate = 12_000.0f32;
        let fft_size = 2048;
        let freq_hz = 1500.0f32;
        let samples: Vec<f32> = (0..fft_size)
            .map(|i| (2.0 * std::f32::consts::PI * freq_hz * i as f32 / sample_rate).sin())
            .collect();

        let spectrum = compute_audio_spectrum_db(&samples, fft_size);
        assert_eq!(spectrum.len(), fft_size / 2);

        let (peak_bin, _) = spectrum
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap())
            .unwrap();
        let expected_bin = (freq_hz * fft_size as f32 / sample_rate).round() as usize;
        assert!((peak_bin as i64 - expected_bin as i64).abs() <= 2);
    }

    #[test]
    fn silence_has_low_magnitude_everywhere() {
        let samples = vec![0.0f32; 2048];
        let spectrum = compute_audio_spectrum_db(&samples, 2048);
        assert!(spectrum.iter().all(|&db| db <= -60.0));
    }
}
