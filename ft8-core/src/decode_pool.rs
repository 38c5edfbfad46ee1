//! Decode Work Pool (C3): resamples captured audio to the mode's target
//! sample rate and runs the external [`crate::interfaces::Decoder`] on a
//! fixed-size worker pool (§4.3).
//!
//! Built on a `rayon::ThreadPool`; each submission is paired with a
//! `oneshot` channel so async callers can `.await` a result without
//! blocking a pool thread. Results
//! from different windows of the same slot may arrive out of order — C4
//! tolerates this by construction. Backpressure never blocks the clock:
//! once the pending queue holds `maxBacklog` tasks, the *oldest* one is
//! evicted (its awaiter receives `PoolError::Dropped`) and the newly
//! submitted task proceeds (§4.3).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::audio_buffer::RingAudioBuffer;
use crate::config::{DecodePoolConfig, ModeDescriptor};
use crate::errors::PoolError;
use crate::events::{DecodeResult, DecodedFrame};
use crate::interfaces::Decoder;

/// One unit of decode work: a captured slot window ready to resample
/// and hand to the external decoder.
pub struct DecodeTask {
    pub slot_id: String,
    pub window_idx: usize,
    pub capture_start_ms: i64,
    pub device_pcm: Vec<f32>,
    pub device_sample_rate: u32,
}

/// A task that has been submitted but not yet resolved: tracked so the
/// oldest entry can be evicted under backpressure (§4.3) regardless of
/// whether the eviction or the worker's own completion reaches it first.
struct PendingTask {
    id: u64,
    slot_id: String,
    window_idx: usize,
    sender: Mutex<Option<tokio::sync::oneshot::Sender<Result<DecodeResult, PoolError>>>>,
}

impl PendingTask {
    /// Resolves the awaiting `submit()` call exactly once; a second
    /// caller (eviction racing completion, or vice versa) is a no-op.
    fn resolve(&self, result: Result<DecodeResult, PoolError>) {
        if let Some(tx) = self.sender.lock().take() {
            let _ = tx.send(result);
        }
    }
}

/// Fixed-size worker pool running the external decoder (§4.3).
pub struct DecodePool {
    pool: rayon::ThreadPool,
    decoder: Arc<dyn Decoder>,
    max_backlog: usize,
    next_id: AtomicU64,
    pending: Arc<Mutex<VecDeque<Arc<PendingTask>>>>,
    cancelled_slots: Arc<parking_lot::Mutex<std::collections::HashSet<String>>>,
}

impl DecodePool {
    pub fn new(config: &DecodePoolConfig, decoder: Arc<dyn Decoder>) -> Result<Self, PoolError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.size.max(1))
            .thread_name(|i| format!("decode-worker-{i}"))
            .build()
            .map_err(|e| PoolError::DecodeFailed {
                slot_id: String::new(),
                window_idx: 0,
                message: format!("failed to build decode pool: {e}"),
            })?;
        Ok(Self {
            pool,
            decoder,
            max_backlog: config.max_backlog,
            next_id: AtomicU64::new(0),
            pending: Arc::new(Mutex::new(VecDeque::new())),
            cancelled_slots: Arc::new(parking_lot::Mutex::new(std::collections::HashSet::new())),
        })
    }

    /// Marks a slot's outstanding tasks as cancellable; workers check
    /// this before doing expensive work, per §4.3 "a task may be
    /// cancelled when its slot is sealed".
    pub fn cancel_slot(&self, slot_id: &str) {
        self.cancelled_slots.lock().insert(slot_id.to_string());
    }

    /// Submits a task, resampling to `mode`'s target sample rate and
    /// invoking the decoder on the pool. Returns a future resolving to
    /// the decode result. Never rejects the new submission: if the
    /// pending queue is already at `maxBacklog`, the oldest pending task
    /// is evicted with `PoolError::Dropped` to make room (§4.3).
    pub async fn submit(
        &self,
        task: DecodeTask,
        mode: &ModeDescriptor,
    ) -> Result<DecodeResult, PoolError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let entry = Arc::new(PendingTask {
            id,
            slot_id: task.slot_id.clone(),
            window_idx: task.window_idx,
            sender: Mutex::new(Some(tx)),
        });

        {
            let mut pending = self.pending.lock();
            if pending.len() >= self.max_backlog {
                if let Some(oldest) = pending.pop_front() {
                    oldest.resolve(Err(PoolError::Dropped {
                        slot_id: oldest.slot_id.clone(),
                        window_idx: oldest.window_idx,
                        max_backlog: self.max_backlog,
                    }));
                }
            }
            pending.push_back(Arc::clone(&entry));
        }

        let decoder = Arc::clone(&self.decoder);
        let target_rate = mode.target_sample_rate_hz();
        let cancelled = Arc::clone(&self.cancelled_slots);
        let pending_queue = Arc::clone(&self.pending);
        let slot_id = task.slot_id.clone();
        let window_idx = task.window_idx;
        let entry_for_worker = Arc::clone(&entry);

        self.pool.spawn(move || {
            let result = (|| {
                if cancelled.lock().contains(&slot_id) {
                    return Err(PoolError::Cancelled);
                }
                let resampled = crate::external_audio::resample_mono(
                    &task.device_pcm,
                    task.device_sample_rate,
                    target_rate,
                )
                .map_err(|e| PoolError::DecodeFailed {
                    slot_id: slot_id.clone(),
                    window_idx,
                    message: e.to_string(),
                })?;
                let frames: Vec<DecodedFrame> = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    decoder.decode(&resampled)
                }))
                .map_err(|_| PoolError::DecodeFailed {
                    slot_id: slot_id.clone(),
                    window_idx,
                    message: "decoder panicked".to_string(),
                })?;
                Ok(DecodeResult {
                    slot_id: slot_id.clone(),
                    window_idx,
                    frames,
                })
            })();
            pending_queue.lock().retain(|e| e.id != entry_for_worker.id);
            entry_for_worker.resolve(result);
        });

        rx.await.unwrap_or(Err(PoolError::ShuttingDown))
    }

    /// Current pending-queue depth (submitted but not yet resolved).
    pub fn in_flight(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Reads the PCM range a `subWindow` event requests directly from C1,
/// producing a ready-to-submit [`DecodeTask`]. Stale requests (§3
/// "requests with captureStartMs < now - buffer_capacity_ms are dropped
/// as stale") surface as an `Err` rather than panicking.
pub fn prepare_task(
    buffer: &RingAudioBuffer,
    slot_id: &str,
    window_idx: usize,
    capture_start_ms: i64,
    capture_duration_ms: i64,
) -> Result<DecodeTask, PoolError> {
    let device_pcm = buffer
        .read(capture_start_ms, capture_duration_ms)
        .map_err(|e| PoolError::DecodeFailed {
            slot_id: slot_id.to_string(),
            window_idx,
            message: e.to_string(),
        })?;
    Ok(DecodeTask {
        slot_id: slot_id.to_string(),
        window_idx,
        capture_start_ms,
        device_pcm,
        device_sample_rate: buffer.sample_rate(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::DecodedFrame as Frame;

    struct StubDecoder {
        message: String,
    }

    impl Decoder for StubDecoder {
        fn decode(&self, pcm12k: &[f32]) -> Vec<Frame> {
            if pcm12k.is_empty() {
                return Vec::new();
            }
            vec![Frame {
                message: self.message.clone(),
                snr_db: -5,
                dt_sec: 0.0,
                freq_hz: 1000,
                confidence: 1.0,
            }]
        }
    }

    #[tokio::test]
    async fn submit_runs_decoder_and_returns_result() {
        let config = DecodePoolConfig {
            size: 2,
            max_backlog: 4,
        };
        let decoder = Arc::new(StubDecoder {
            message: "CQ W1ABC FN42".to_string(),
        });
        let pool = DecodePool::new(&config, decoder).unwrap();
        let mode = ModeDescriptor::ft8();
        let task = DecodeTask {
            slot_id: "slot".to_string(),
            window_idx: 0,
            capture_start_ms: 0,
            device_pcm: vec![0.1f32; 48_000],
            device_sample_rate: 48_000,
        };
        let result = pool.submit(task, &mode).await.unwrap();
        assert_eq!(result.frames.len(), 1);
        assert_eq!(result.frames[0].message, "CQ W1ABC FN42");
    }

    struct BlockingDecoder {
        release: Arc<std::sync::Mutex<bool>>,
        condvar: Arc<std::sync::Condvar>,
    }

    impl Decoder for BlockingDecoder {
        fn decode(&self, _pcm12k: &[f32]) -> Vec<Frame> {
            let mut released = self.release.lock().unwrap();
            while !*released {
                let (guard, _) = self
                    .condvar
                    .wait_timeout(released, std::time::Duration::from_millis(500))
                    .unwrap();
                released = guard;
            }
            Vec::new()
        }
    }

    fn make_task(slot_id: &str) -> DecodeTask {
        DecodeTask {
            slot_id: slot_id.to_string(),
            window_idx: 0,
            capture_start_ms: 0,
            device_pcm: vec![0.0f32; 100],
            device_sample_rate: 48_000,
        }
    }

    /// Backpressure must drop the *oldest* pending task with
    /// `PoolError::Dropped` and let the new submission proceed, never
    /// the other way around (§4.3).
    #[tokio::test]
    async fn oldest_pending_task_is_dropped_under_backpressure() {
        let config = DecodePoolConfig {
            size: 1,
            max_backlog: 1,
        };
        let release = Arc::new(std::sync::Mutex::new(false));
        let condvar = Arc::new(std::sync::Condvar::new());
        let decoder = Arc::new(BlockingDecoder {
            release: Arc::clone(&release),
            condvar: Arc::clone(&condvar),
        });
        let pool = Arc::new(DecodePool::new(&config, decoder).unwrap());
        let mode = ModeDescriptor::ft8();

        let task_a = {
            let pool = Arc::clone(&pool);
            let mode = mode.clone();
            tokio::spawn(async move { pool.submit(make_task("a"), &mode).await })
        };
        // Let the single worker thread pick up task A and start blocking
        // inside `decode()` before task B is submitted.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let task_b = {
            let pool = Arc::clone(&pool);
            let mode = mode.clone();
            tokio::spawn(async move { pool.submit(make_task("b"), &mode).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        *release.lock().unwrap() = true;
        condvar.notify_all();

        let result_a = task_a.await.unwrap();
        let result_b = task_b.await.unwrap();
        assert!(
            matches!(result_a, Err(PoolError::Dropped { .. })),
            "the oldest pending task must be evicted, got {result_a:?}"
        );
        assert!(result_b.is_ok(), "the new submission must proceed, got {result_b:?}");
    }

    #[tokio::test]
    async fn cancelled_slot_is_reported_as_cancelled() {
        let config = DecodePoolConfig {
            size: 1,
            max_backlog: 4,
        };
        let decoder = Arc::new(StubDecoder {
            message: "X".to_string(),
        });
        let pool = DecodePool::new(&config, decoder).unwrap();
        pool.cancel_slot("slot");
        let mode = ModeDescriptor::ft8();
        let task = DecodeTask {
            slot_id: "slot".to_string(),
            window_idx: 0,
            capture_start_ms: 0,
            device_pcm: vec![0.0f32; 48_000],
            device_sample_rate: 48_000,
        };
        let result = pool.submit(task, &mode).await;
        assert!(matches!(result, Err(PoolError::Cancelled)));
    }
}
