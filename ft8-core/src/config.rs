//! Configuration types for the slot engine, covering every key in §6 of
//! the spec: `mode`, `operators[]`, `audioCapture`, `audioPlay`, `radio`,
//! `decodePool`, `encodePool`, `mixer`, `reconnect`, `slotPackRetention`.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::slot::Phase;

/// Immutable, runtime-selected description of a digital mode (FT8/FT4).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModeDescriptor {
    pub name: String,
    pub slot_ms: i64,
    pub tolerance_ms: i64,
    pub window_offsets_ms: Vec<i64>,
    pub transmit_offset_ms: i64,
    pub encode_advance_ms: i64,
}

impl ModeDescriptor {
    /// FT8: 15 s slots, waveform ≈12.64 s, centered around slot start + 780 ms
    /// (scenario 3 of the spec pins `encodeStart` at `T+780ms` and
    /// `transmitStart` at `T+1180ms` for FT8).
    pub fn ft8() -> Self {
        Self {
            name: "FT8".to_string(),
            slot_ms: 15_000,
            tolerance_ms: 200,
            window_offsets_ms: vec![-1500, -1000, -500, 0, 250],
            transmit_offset_ms: 1180,
            encode_advance_ms: 400,
        }
    }

    /// FT4: 7.5 s slots, waveform ≈6.4 s.
    pub fn ft4() -> Self {
        Self {
            name: "FT4".to_string(),
            slot_ms: 7_500,
            tolerance_ms: 100,
            window_offsets_ms: vec![-300, 0],
            transmit_offset_ms: 500,
            encode_advance_ms: 250,
        }
    }

    pub fn by_name(name: &str) -> std::result::Result<Self, ConfigError> {
        match name.to_ascii_uppercase().as_str() {
            "FT8" => Ok(Self::ft8()),
            "FT4" => Ok(Self::ft4()),
            other => Err(ConfigError::UnknownMode(other.to_string())),
        }
    }

    pub fn target_sample_rate_hz(&self) -> u32 {
        12_000
    }

    /// Coarse frequency-bin width used by the fingerprint key (§3/§4.4).
    pub fn freq_bin_hz(&self) -> i64 {
        6
    }

    pub fn seal_grace_ms(&self) -> i64 {
        2_000
    }
}

/// Automatic-behavior toggles for an operator (§3 `autoFlags`).
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AutoFlags {
    #[serde(default)]
    pub reply_to_cq: bool,
    #[serde(default)]
    pub resume_cq_on_fail: bool,
    #[serde(default)]
    pub resume_cq_on_success: bool,
    #[serde(default)]
    pub reply_to_worked: bool,
    #[serde(default)]
    pub prefer_new: bool,
}

/// Serde-friendly mirror of [`Phase`]; the core type intentionally has no
/// serde derive since it is also used as a hash-set key elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatorPhase {
    Even,
    Odd,
}

impl From<OperatorPhase> for Phase {
    fn from(p: OperatorPhase) -> Self {
        match p {
            OperatorPhase::Even => Phase::Even,
            OperatorPhase::Odd => Phase::Odd,
        }
    }
}

/// Per-operator configuration as accepted from `operators[]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperatorConfig {
    pub id: String,
    pub my_callsign: String,
    #[serde(default)]
    pub my_grid: Option<String>,
    pub frequency_hz: i64,
    #[serde(default)]
    pub transmit_phases: Vec<OperatorPhase>,
    #[serde(default)]
    pub auto_flags: AutoFlags,
}

impl OperatorConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !(200..=4000).contains(&self.frequency_hz) {
            return Err(ConfigError::InvalidFrequency {
                hz: self.frequency_hz,
            });
        }
        if self.my_callsign.trim().is_empty() {
            return Err(ConfigError::InvalidOperatorField {
                field: "myCallsign".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn transmit_phase_set(&self) -> HashSet<Phase> {
        self.transmit_phases.iter().map(|&p| p.into()).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioCaptureConfig {
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default = "default_device_sample_rate")]
    pub sample_rate: u32,
}

impl Default for AudioCaptureConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            sample_rate: default_device_sample_rate(),
        }
    }
}

fn default_device_sample_rate() -> u32 {
    48_000
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct AudioPlayConfig {
    #[serde(default)]
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RadioConfig {
    #[serde(default = "default_radio_transport")]
    pub transport: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub baud_rate: Option<u32>,
    #[serde(default)]
    pub address: Option<String>,
}

fn default_radio_transport() -> String {
    "null".to_string()
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            transport: default_radio_transport(),
            endpoint: None,
            baud_rate: None,
            address: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecodePoolConfig {
    #[serde(default = "default_pool_size")]
    pub size: usize,
    #[serde(default = "default_max_backlog")]
    pub max_backlog: usize,
}

impl Default for DecodePoolConfig {
    fn default() -> Self {
        Self {
            size: default_pool_size(),
            max_backlog: default_max_backlog(),
        }
    }
}

fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_max_backlog() -> usize {
    16
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncodePoolConfig {
    #[serde(default = "default_encode_pool_size")]
    pub size: usize,
}

impl Default for EncodePoolConfig {
    fn default() -> Self {
        Self {
            size: default_encode_pool_size(),
        }
    }
}

fn default_encode_pool_size() -> usize {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MixerConfig {
    #[serde(default = "default_early_release_ms")]
    pub early_release_ms: i64,
    #[serde(default = "default_play_skip_ms")]
    pub play_skip_ms: i64,
    #[serde(default = "default_per_operator_gain")]
    pub per_operator_gain: f32,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            early_release_ms: default_early_release_ms(),
            play_skip_ms: default_play_skip_ms(),
            per_operator_gain: default_per_operator_gain(),
        }
    }
}

fn default_early_release_ms() -> i64 {
    50
}

fn default_play_skip_ms() -> i64 {
    100
}

fn default_per_operator_gain() -> f32 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectConfig {
    #[serde(default = "default_delay_base_ms")]
    pub delay_base_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay_base_ms: default_delay_base_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
            health_check_interval_ms: default_health_check_interval_ms(),
        }
    }
}

fn default_delay_base_ms() -> u64 {
    3_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> i32 {
    -1
}

fn default_health_check_interval_ms() -> u64 {
    3_000
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlotPackRetentionConfig {
    #[serde(default = "default_slot_pack_retention")]
    pub count: usize,
}

impl Default for SlotPackRetentionConfig {
    fn default() -> Self {
        Self {
            count: default_slot_pack_retention(),
        }
    }
}

fn default_slot_pack_retention() -> usize {
    64
}

/// The complete configuration tree recognized by the core (§6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    pub mode: ModeDescriptor,
    #[serde(default)]
    pub operators: Vec<OperatorConfig>,
    #[serde(default)]
    pub audio_capture: AudioCaptureConfig,
    #[serde(default)]
    pub audio_play: AudioPlayConfig,
    #[serde(default)]
    pub radio: RadioConfig,
    #[serde(default)]
    pub decode_pool: DecodePoolConfig,
    #[serde(default)]
    pub encode_pool: EncodePoolConfig,
    #[serde(default)]
    pub mixer: MixerConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub slot_pack_retention: SlotPackRetentionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: ModeDescriptor::ft8(),
            operators: Vec::new(),
            audio_capture: AudioCaptureConfig::default(),
            audio_play: AudioPlayConfig::default(),
            radio: RadioConfig::default(),
            decode_pool: DecodePoolConfig::default(),
            encode_pool: EncodePoolConfig::default(),
            mixer: MixerConfig::default(),
            reconnect: ReconnectConfig::default(),
            slot_pack_retention: SlotPackRetentionConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        for op in &self.operators {
            op.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ft8_mode_has_positive_slot_ms() {
        assert_eq!(ModeDescriptor::ft8().slot_ms, 15_000);
        assert_eq!(ModeDescriptor::ft4().slot_ms, 7_500);
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(ModeDescriptor::by_name("JT65").is_err());
    }

    #[test]
    fn operator_frequency_out_of_range_is_rejected() {
        let op = OperatorConfig {
            id: "op1".into(),
            my_callsign: "W1ABC".into(),
            my_grid: None,
            frequency_hz: 5000,
            transmit_phases: vec![],
            auto_flags: AutoFlags::default(),
        };
        assert!(op.validate().is_err());
    }

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }
}
