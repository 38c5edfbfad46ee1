//! File audio loading and sample-rate conversion at the audio boundary
//! (§6). Bridges arbitrary-format recordings (WAV, FLAC, MP3, AAC) and
//! arbitrary device sample rates onto the fixed rates the rest of the
//! crate assumes: 12 kHz into the decoder, 48 kHz at the mixer.
//!
//! `resample_mono` is the one function C3/C5 actually call at runtime
//! (device rate -> 12 kHz for decode, mode-native rate -> 48 kHz for
//! encode). `load_audio_file` exists for offline development and the
//! `ft8-cli decode-wav` subcommand, where there is no live capture
//! device to read from.

use std::fs::File;
use std::path::Path;

use rubato::{FastFixedIn, Resampler};
use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::errors::AudioIoError;

/// Resamples mono f32 PCM from `source_rate` to `target_rate`. A no-op
/// copy when the rates already match.
pub fn resample_mono(
    samples: &[f32],
    source_rate: u32,
    target_rate: u32,
) -> Result<Vec<f32>, AudioIoError> {
    if samples.is_empty() || source_rate == target_rate {
        return Ok(samples.to_vec());
    }

    let chunk_size = source_rate as usize;
    let mut resampler = FastFixedIn::<f32>::new(
        target_rate as f64 / source_rate as f64,
        1.0,
        rubato::PolynomialDegree::Linear,
        chunk_size,
        1,
    )
    .map_err(|e| AudioIoError::Resample {
        source_rate,
        target_rate,
        reason: e.to_string(),
    })?;

    let mut output = Vec::new();
    let mut input_buf = vec![Vec::new()];
    for chunk in samples.chunks(chunk_size) {
        input_buf[0].clear();
        input_buf[0].extend_from_slice(chunk);
        if input_buf[0].len() < chunk_size {
            input_buf[0].resize(chunk_size, 0.0);
        }
        let out = resampler
            .process(&input_buf, None)
            .map_err(|e| AudioIoError::Resample {
                source_rate,
                target_rate,
                reason: e.to_string(),
            })?;
        output.extend_from_slice(&out[0]);
    }
    Ok(output)
}

/// Loads an audio file (WAV/FLAC/MP3/AAC, anything `symphonia` probes),
/// mixes it down to mono, and resamples it to `target_sample_rate`.
pub fn load_audio_file(path: &Path, target_sample_rate: u32) -> Result<Vec<f32>, AudioIoError> {
    let file = File::open(path).map_err(|e| AudioIoError::Load {
        path: path.to_string_lossy().into_owned(),
        reason: format!("failed to open file: {e}"),
    })?;

    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| AudioIoError::Load {
            path: path.to_string_lossy().into_owned(),
            reason: format!("failed to probe format: {e}"),
        })?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| AudioIoError::Load {
            path: path.to_string_lossy().into_owned(),
            reason: "no audio track found".to_string(),
        })?;
    let track_id = track.id;
    let source_sample_rate = track.codec_params.sample_rate.ok_or_else(|| AudioIoError::Load {
        path: path.to_string_lossy().into_owned(),
        reason: "unknown sample rate".to_string(),
    })?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AudioIoError::Load {
            path: path.to_string_lossy().into_owned(),
            reason: format!("failed to create decoder: {e}"),
        })?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(_) => break,
        };
        if packet.track_id() != track_id {
            continue;
        }
        if let Ok(decoded) = decoder.decode(&packet) {
            samples.extend_from_slice(&downmix_to_mono_f32(&decoded));
        }
    }

    if samples.is_empty() {
        return Err(AudioIoError::Load {
            path: path.to_string_lossy().into_owned(),
            reason: "no audio samples decoded".to_string(),
        });
    }

    resample_mono(&samples, source_sample_rate, target_sample_rate)
}

fn downmix_to_mono_f32(buffer: &AudioBufferRef) -> Vec<f32> {
    macro_rules! downmix {
        ($buf:ident, $to_f32:expr) => {{
            let channels = $buf.spec().channels.count();
            let frames = $buf.frames();
            let mut mono = Vec::with_capacity(frames);
            for i in 0..frames {
                let mut sum = 0.0f32;
                for ch in 0..channels {
                    let sample = $buf.chan(ch)[i];
                    sum += $to_f32(sample);
                }
                mono.push(sum / channels as f32);
            }
            mono
        }};
    }

    match buffer {
        AudioBufferRef::F32(buf) => downmix!(buf, |s: f32| s),
        AudioBufferRef::F64(buf) => downmix!(buf, |s: f64| s as f32),
        AudioBufferRef::U8(buf) => downmix!(buf, |s: u8| (s as f32 - 128.0) / 128.0),
        AudioBufferRef::U16(buf) => downmix!(buf, |s: u16| (s as f32 - 32768.0) / 32768.0),
        AudioBufferRef::U24(buf) => {
            downmix!(buf, |s: symphonia::core::sample::u24| {
                (s.inner() as i32 - 8_388_608) as f32 / 8_388_608.0
            })
        }
        AudioBufferRef::U32(buf) => downmix!(buf, |s: u32| (s as f64 - 2_147_483_648.0) as f32 / 2_147_483_648.0),
        AudioBufferRef::S8(buf) => downmix!(buf, |s: i8| s as f32 / 128.0),
        AudioBufferRef::S16(buf) => downmix!(buf, |s: i16| s as f32 / 32_768.0),
        AudioBufferRef::S24(buf) => {
            downmix!(buf, |s: symphonia::core::sample::i24| s.inner() as f32 / 8_388_608.0)
        }
        AudioBufferRef::S32(buf) => downmix!(buf, |s: i32| s as f64 as f32 / 2_147_483_648.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_no_op_when_rates_match() {
        let samples = vec![0.1, 0.2, 0.3];
        let out = resample_mono(&samples, 48_000, 48_000).unwrap();
        assert_eq!(out, samples);
    }

    #[test]
    fn resample_empty_is_empty() {
        let out = resample_mono(&[], 48_000, 12_000).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn downsampling_shrinks_sample_count() {
        let samples = vec![0.0f32; 48_000];
        let out = resample_mono(&samples, 48_000, 12_000).unwrap();
        assert!(out.len() < samples.len());
    }
}
