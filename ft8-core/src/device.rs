//! Audio device and radio actuator implementations (§6).
//!
//! `CpalAudioSource`/`CpalAudioSink` are the only hardware-backed
//! implementations of [`AudioSource`]/[`AudioSink`] this crate ships;
//! everything else talks to the narrow trait, never to `cpal` directly.
//! `NullRadio`/`FaultInjectingRadio` are the only [`RadioActuator`]
//! implementations shipped — both in-memory stubs, since a real
//! CAT/rig-control transport is out of scope (§1).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};

use crate::errors::{AudioIoError, EngineError, RadioError, Result};
use crate::interfaces::{AudioBlock, AudioSink, AudioSource, PlaybackHandle, RadioActuator};

/// Lists every input device name the default host reports, for the
/// `ft8-cli devices` subcommand.
pub fn list_input_devices() -> Vec<String> {
    enumerate_devices(|d| d.default_input_config().is_ok())
}

pub fn list_output_devices() -> Vec<String> {
    enumerate_devices(|d| d.default_output_config().is_ok())
}

fn enumerate_devices(supports: impl Fn(&cpal::Device) -> bool) -> Vec<String> {
    let host = cpal::default_host();
    host.devices()
        .map(|devices| devices.filter(supports).filter_map(|d| d.name().ok()).collect())
        .unwrap_or_default()
}

fn select_input_device(host: &cpal::Host, device_id: Option<&str>) -> Result<cpal::Device> {
    select_device(host, device_id, true)
}

fn select_output_device(host: &cpal::Host, device_id: Option<&str>) -> Result<cpal::Device> {
    select_device(host, device_id, false)
}

fn select_device(host: &cpal::Host, device_id: Option<&str>, input: bool) -> Result<cpal::Device> {
    if let Some(name) = device_id {
        let mut devices = host
            .devices()
            .map_err(|e| AudioIoError::Device(e.to_string()))?;
        return devices
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| AudioIoError::Device(format!("no audio device named '{name}'")).into());
    }
    let device = if input {
        host.default_input_device()
    } else {
        host.default_output_device()
    };
    device.ok_or_else(|| AudioIoError::NoDevice.into())
}

struct CaptureState {
    samples: VecDeque<f32>,
    missing: usize,
}

/// Real-time capture device. Accumulates samples on `cpal`'s audio
/// callback thread into a lock-guarded ring; [`AudioSource::poll`]
/// drains whatever has arrived since the previous call.
pub struct CpalAudioSource {
    _stream: Stream,
    state: Arc<Mutex<CaptureState>>,
    sample_rate: u32,
}

impl CpalAudioSource {
    pub fn new(device_id: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();
        let device = select_input_device(&host, device_id)?;
        let supported = device
            .default_input_config()
            .map_err(|e| AudioIoError::Device(e.to_string()))?;
        let sample_format = supported.sample_format();
        let mut config: StreamConfig = supported.into();
        config.channels = 1;

        let state = Arc::new(Mutex::new(CaptureState {
            samples: VecDeque::new(),
            missing: 0,
        }));
        let callback_state = Arc::clone(&state);
        let err_fn = |err| eprintln!("audio capture stream error: {err}");

        let stream = match sample_format {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _| {
                    callback_state.lock().unwrap().samples.extend(data.iter().copied());
                },
                err_fn,
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _| {
                    callback_state
                        .lock()
                        .unwrap()
                        .samples
                        .extend(data.iter().map(|&s| s as f32 / i16::MAX as f32));
                },
                err_fn,
                None,
            ),
            SampleFormat::U16 => device.build_input_stream(
                &config,
                move |data: &[u16], _| {
                    callback_state
                        .lock()
                        .unwrap()
                        .samples
                        .extend(data.iter().map(|&s| (s as f32 - 32_768.0) / 32_768.0));
                },
                err_fn,
                None,
            ),
            other => return Err(AudioIoError::Device(format!("unsupported input sample format: {other:?}")).into()),
        }
        .map_err(|e| AudioIoError::Device(e.to_string()))?;

        stream.play().map_err(|e| AudioIoError::Device(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            state,
            sample_rate: config.sample_rate.0,
        })
    }
}

impl AudioSource for CpalAudioSource {
    fn poll(&mut self) -> AudioBlock {
        let mut state = self.state.lock().unwrap();
        let samples: Vec<f32> = state.samples.drain(..).collect();
        let missing_samples = std::mem::take(&mut state.missing);
        AudioBlock {
            samples,
            sample_rate: self.sample_rate,
            captured_at: Utc::now(),
            missing_samples,
        }
    }
}

/// Real-time playback device.
pub struct CpalAudioSink {
    device: cpal::Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    // Each `play` call opens a short-lived output stream; kept alive here
    // for as long as the sink exists since cpal stops a stream on drop.
    active_streams: Mutex<Vec<Stream>>,
}

impl CpalAudioSink {
    pub fn new(device_id: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();
        let device = select_output_device(&host, device_id)?;
        let supported = device
            .default_output_config()
            .map_err(|e| AudioIoError::Device(e.to_string()))?;
        let sample_format = supported.sample_format();
        let mut config: StreamConfig = supported.into();
        config.channels = 1;
        Ok(Self {
            device,
            config,
            sample_format,
            active_streams: Mutex::new(Vec::new()),
        })
    }
}

impl AudioSink for CpalAudioSink {
    fn play(
        &mut self,
        pcm: &[f32],
        sample_rate: u32,
        start_at: Option<DateTime<Utc>>,
    ) -> Result<PlaybackHandle> {
        let target_rate = self.config.sample_rate.0;
        let pcm = if sample_rate == target_rate {
            pcm.to_vec()
        } else {
            crate::external_audio::resample_mono(pcm, sample_rate, target_rate)?
        };

        let started_at = start_at.unwrap_or_else(Utc::now);
        let duration_ms = (pcm.len() as i64 * 1000) / target_rate.max(1) as i64;
        let expected_end_at = started_at + chrono::Duration::milliseconds(duration_ms);

        let mut remaining = pcm.into_iter();
        let err_fn = |err| eprintln!("audio playback stream error: {err}");

        let stream = match self.sample_format {
            SampleFormat::F32 => self.device.build_output_stream(
                &self.config,
                move |data: &mut [f32], _| {
                    for sample in data.iter_mut() {
                        *sample = remaining.next().unwrap_or(0.0);
                    }
                },
                err_fn,
                None,
            ),
            SampleFormat::I16 => self.device.build_output_stream(
                &self.config,
                move |data: &mut [i16], _| {
                    for sample in data.iter_mut() {
                        let s = remaining.next().unwrap_or(0.0);
                        *sample = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                    }
                },
                err_fn,
                None,
            ),
            other => return Err(AudioIoError::Device(format!("unsupported output sample format: {other:?}")).into()),
        }
        .map_err(|e| AudioIoError::Device(e.to_string()))?;

        stream.play().map_err(|e| AudioIoError::Device(e.to_string()))?;
        self.active_streams.lock().unwrap().push(stream);

        Ok(PlaybackHandle {
            started_at,
            expected_end_at,
        })
    }
}

/// Always-succeeds radio actuator (§6 "a CAT-like in-memory stub
/// transport"). Suitable for local development or any deployment whose
/// transmitter is keyed by other means.
#[derive(Debug)]
pub struct NullRadio {
    ptt: bool,
    frequency_hz: u32,
    mode: String,
}

impl NullRadio {
    pub fn new() -> Self {
        Self {
            ptt: false,
            frequency_hz: 14_074_000,
            mode: "USB".to_string(),
        }
    }
}

impl Default for NullRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl RadioActuator for NullRadio {
    fn set_ptt(&mut self, on: bool) -> Result<()> {
        self.ptt = on;
        Ok(())
    }

    fn set_frequency(&mut self, hz: u32) -> Result<()> {
        self.frequency_hz = hz;
        Ok(())
    }

    fn get_frequency(&mut self) -> Result<u32> {
        Ok(self.frequency_hz)
    }

    fn set_mode(&mut self, mode: &str, _bandwidth: Option<u32>) -> Result<()> {
        self.mode = mode.to_string();
        Ok(())
    }

    fn get_mode(&mut self) -> Result<String> {
        Ok(self.mode.clone())
    }
}

/// Wraps another [`RadioActuator`] and injects deterministic transport
/// failures on the next `n` calls to [`get_frequency`](RadioActuator::get_frequency),
/// the method the engine uses as its connect/health-check probe.
/// Exercises C9's reconnect/backoff path (§4.9, scenario 4) without a
/// real rig.
pub struct FaultInjectingRadio<R: RadioActuator> {
    inner: R,
    fail_remaining: usize,
}

impl<R: RadioActuator> FaultInjectingRadio<R> {
    pub fn new(inner: R, fail_next_n_probes: usize) -> Self {
        Self {
            inner,
            fail_remaining: fail_next_n_probes,
        }
    }
}

impl<R: RadioActuator> RadioActuator for FaultInjectingRadio<R> {
    fn set_ptt(&mut self, on: bool) -> Result<()> {
        self.inner.set_ptt(on)
    }

    fn set_frequency(&mut self, hz: u32) -> Result<()> {
        self.inner.set_frequency(hz)
    }

    fn get_frequency(&mut self) -> Result<u32> {
        if self.fail_remaining > 0 {
            self.fail_remaining -= 1;
            return Err(EngineError::from(RadioError::Transport("injected fault".to_string())));
        }
        self.inner.get_frequency()
    }

    fn set_mode(&mut self, mode: &str, bandwidth: Option<u32>) -> Result<()> {
        self.inner.set_mode(mode, bandwidth)
    }

    fn get_mode(&mut self) -> Result<String> {
        self.inner.get_mode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_radio_round_trips_frequency_and_mode() {
        let mut radio = NullRadio::new();
        radio.set_frequency(7_074_000).unwrap();
        assert_eq!(radio.get_frequency().unwrap(), 7_074_000);
        radio.set_mode("USB", None).unwrap();
        assert_eq!(radio.get_mode().unwrap(), "USB");
    }

    #[test]
    fn fault_injecting_radio_fails_then_recovers() {
        let mut radio = FaultInjectingRadio::new(NullRadio::new(), 2);
        assert!(radio.get_frequency().is_err());
        assert!(radio.get_frequency().is_err());
        assert!(radio.get_frequency().is_ok());
    }

    #[test]
    fn fault_injecting_radio_passes_through_ptt() {
        let mut radio = FaultInjectingRadio::new(NullRadio::new(), 0);
        assert!(radio.set_ptt(true).is_ok());
    }
}
