//! Spectrum analysis support for the Spectrum Scheduler (C11, §4.11).
//!
//! `compute_audio_spectrum_db` is the pure FFT function the scheduler
//! calls off a `tokio::time::interval` tick; the scheduler itself lives
//! in [`crate::spectrum`] and owns the skip-if-busy timing around it.

pub mod spectrum;

pub use spectrum::compute_audio_spectrum_db;
