//! Encode Work Pool (C5): same shape as C3 but inverted — text plus
//! frequency goes in, a float32 waveform at the mixer's sample rate
//! comes out (§4.5).
//!
//! The external encoder natively produces audio at the mode's internal
//! rate (12 kHz); this pool upsamples to the mixer's 48 kHz before
//! returning, so C6 never has to reason about per-operator sample
//! rates (§9 open question: "an implementation may choose otherwise as
//! long as inputs to C6 share a rate" — here every output leaving this
//! pool already shares the mixer's rate).

use std::sync::Arc;

use crate::config::{EncodePoolConfig, ModeDescriptor};
use crate::errors::PoolError;
use crate::events::TransmitRequest;
use crate::interfaces::Encoder;
use crate::mixer::MIXER_SAMPLE_RATE_HZ;

/// One unit of encode work, derived from an operator's [`TransmitRequest`].
pub struct EncodeTask {
    pub operator_id: String,
    pub slot_id: String,
    pub text: String,
    pub frequency_hz: i64,
    pub target_play_ms: i64,
}

impl From<TransmitRequest> for EncodeTask {
    fn from(req: TransmitRequest) -> Self {
        Self {
            operator_id: req.operator_id,
            slot_id: req.slot_id,
            text: req.text,
            frequency_hz: req.frequency_hz,
            target_play_ms: req.target_play_ms,
        }
    }
}

/// An encoded waveform ready for the mixer (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedWaveform {
    pub operator_id: String,
    pub slot_id: String,
    pub pcm: Vec<f32>,
    pub sample_rate: u32,
    pub duration_ms: i64,
    pub target_play_ms: i64,
}

pub struct EncodePool {
    pool: rayon::ThreadPool,
    encoder: Arc<dyn Encoder>,
}

impl EncodePool {
    pub fn new(config: &EncodePoolConfig, encoder: Arc<dyn Encoder>) -> Result<Self, PoolError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.size.max(1))
            .thread_name(|i| format!("encode-worker-{i}"))
            .build()
            .map_err(|e| PoolError::EncodeFailed {
                operator_id: String::new(),
                slot_id: String::new(),
                message: format!("failed to build encode pool: {e}"),
            })?;
        Ok(Self { pool, encoder })
    }

    pub async fn submit(
        &self,
        task: EncodeTask,
        mode: &ModeDescriptor,
    ) -> Result<EncodedWaveform, PoolError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let encoder = Arc::clone(&self.encoder);
        let mode = mode.clone();

        self.pool.spawn(move || {
            let result = (|| {
                let base_freq_hz = task.frequency_hz.clamp(200, 4000) as u32;
                let pcm12k = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    encoder.encode(&task.text, &mode, base_freq_hz)
                }))
                .map_err(|_| PoolError::EncodeFailed {
                    operator_id: task.operator_id.clone(),
                    slot_id: task.slot_id.clone(),
                    message: "encoder panicked".to_string(),
                })?;

                let native_rate = mode.target_sample_rate_hz();
                let pcm = if native_rate == MIXER_SAMPLE_RATE_HZ {
                    pcm12k
                } else {
                    crate::external_audio::resample_mono(&pcm12k, native_rate, MIXER_SAMPLE_RATE_HZ)
                        .map_err(|e| PoolError::EncodeFailed {
                            operator_id: task.operator_id.clone(),
                            slot_id: task.slot_id.clone(),
                            message: e.to_string(),
                        })?
                };

                let duration_ms = (pcm.len() as i64 * 1000) / MIXER_SAMPLE_RATE_HZ as i64;
                Ok(EncodedWaveform {
                    operator_id: task.operator_id.clone(),
                    slot_id: task.slot_id.clone(),
                    pcm,
                    sample_rate: MIXER_SAMPLE_RATE_HZ,
                    duration_ms,
                    target_play_ms: task.target_play_ms,
                })
            })();
            let _ = tx.send(result);
        });

        rx.await.unwrap_or(Err(PoolError::ShuttingDown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ToneKeyedCodec;

    #[tokio::test]
    async fn submit_upsamples_to_mixer_rate() {
        let config = EncodePoolConfig { size: 1 };
        let encoder = Arc::new(ToneKeyedCodec::new());
        let pool = EncodePool::new(&config, encoder).unwrap();
        let mode = ModeDescriptor::ft8();
        let task = EncodeTask {
            operator_id: "op1".to_string(),
            slot_id: "slot".to_string(),
            text: "CQ W1ABC FN42".to_string(),
            frequency_hz: 1500,
            target_play_ms: 1_000,
        };
        let waveform = pool.submit(task, &mode).await.unwrap();
        assert_eq!(waveform.sample_rate, MIXER_SAMPLE_RATE_HZ);
        assert!(!waveform.pcm.is_empty());
    }
}
