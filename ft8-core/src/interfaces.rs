//! External-boundary traits (§6): the five narrow interfaces through
//! which the core consumes collaborators that are deliberately out of
//! scope (sound driver, radio transport, FT8/FT4 DSP). A production
//! deployment swaps concrete implementations behind these traits
//! without touching any of C1-C11.

use chrono::{DateTime, Utc};

use crate::config::ModeDescriptor;
use crate::errors::Result;
use crate::events::DecodedFrame;

/// One block of captured audio, with a monotonic capture timestamp so
/// C1 can detect and account for gaps (§6 "any gap must be reported").
#[derive(Debug, Clone)]
pub struct AudioBlock {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub captured_at: DateTime<Utc>,
    pub missing_samples: usize,
}

/// Handle returned by [`AudioSink::play`]; reports completion time.
#[derive(Debug, Clone)]
pub struct PlaybackHandle {
    pub started_at: DateTime<Utc>,
    pub expected_end_at: DateTime<Utc>,
}

/// The sound-card capture side. The only writer into C1's ring buffer.
pub trait AudioSource: Send {
    fn poll(&mut self) -> AudioBlock;
}

/// The sound-card playback side, driven by C9 at the mixer's release instant.
pub trait AudioSink: Send {
    fn play(
        &mut self,
        pcm: &[f32],
        sample_rate: u32,
        start_at: Option<DateTime<Utc>>,
    ) -> Result<PlaybackHandle>;
}

/// PTT / frequency / mode actuator for the physical or emulated radio.
pub trait RadioActuator: Send {
    fn set_ptt(&mut self, on: bool) -> Result<()>;
    fn set_frequency(&mut self, hz: u32) -> Result<()>;
    fn get_frequency(&mut self) -> Result<u32>;
    fn set_mode(&mut self, mode: &str, bandwidth: Option<u32>) -> Result<()>;
    fn get_mode(&mut self) -> Result<String>;
}

/// The FT8/FT4 DSP boundary: a pure function from 12 kHz PCM to frames.
/// Deliberately out of scope per §1; see `ft8_core::codec` for the
/// deterministic stand-in used where no reference DSP is wired in.
pub trait Decoder: Send + Sync {
    fn decode(&self, pcm12k: &[f32]) -> Vec<DecodedFrame>;
}

/// The FT8/FT4 DSP boundary: a pure, deterministic function from text
/// to a waveform at the mode's native sample rate.
pub trait Encoder: Send + Sync {
    fn encode(&self, text: &str, mode: &ModeDescriptor, base_freq_hz: u32) -> Vec<f32>;
}
