//! Spectrum Scheduler (C11): periodic FFT feed from C1 for monitoring /
//! waterfall display, independent of the decode pipeline (§4.11).
//!
//! Ticks on a fixed `tokio::time::interval`; each tick reads the most
//! recent window of PCM straight off the ring buffer and computes a
//! magnitude spectrum on the blocking thread pool. If the previous
//! tick's FFT has not finished by the time the next tick fires, the new
//! tick is skipped rather than queued (§4.11 "non-blocking").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Duration;

use crate::audio_buffer::RingAudioBuffer;
use crate::events::EngineEvent;
use crate::signal_processing::compute_audio_spectrum_db;

pub const DEFAULT_FFT_SIZE: usize = 2048;
pub const DEFAULT_INTERVAL_MS: u64 = 100;

/// Drives the periodic spectrum feed described in §4.11.
pub struct SpectrumScheduler {
    buffer: Arc<RingAudioBuffer>,
    fft_size: usize,
    interval: Duration,
    busy: Arc<AtomicBool>,
    tx: mpsc::Sender<EngineEvent>,
}

impl SpectrumScheduler {
    pub fn new(buffer: Arc<RingAudioBuffer>, tx: mpsc::Sender<EngineEvent>) -> Self {
        Self::with_params(buffer, tx, DEFAULT_FFT_SIZE, DEFAULT_INTERVAL_MS)
    }

    pub fn with_params(
        buffer: Arc<RingAudioBuffer>,
        tx: mpsc::Sender<EngineEvent>,
        fft_size: usize,
        interval_ms: u64,
    ) -> Self {
        Self {
            buffer,
            fft_size,
            interval: Duration::from_millis(interval_ms.max(1)),
            busy: Arc::new(AtomicBool::new(false)),
            tx,
        }
    }

    /// Runs the scheduler loop forever. Intended to be spawned as its
    /// own task alongside the slot clock.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;

            if self.busy.swap(true, Ordering::SeqCst) {
                continue;
            }

            let buffer = Arc::clone(&self.buffer);
            let busy = Arc::clone(&self.busy);
            let tx = self.tx.clone();
            let fft_size = self.fft_size;

            tokio::spawn(async move {
                let samples = buffer.read_next_chunk(fft_size);
                let magnitudes_db =
                    tokio::task::spawn_blocking(move || compute_audio_spectrum_db(&samples, fft_size))
                        .await
                        .unwrap_or_default();
                busy.store(false, Ordering::SeqCst);

                if !magnitudes_db.is_empty() {
                    let _ = tx
                        .send(EngineEvent::SpectrumData {
                            timestamp: Utc::now(),
                            magnitudes_db,
                        })
                        .await;
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn skips_emission_when_buffer_too_short() {
        let buffer = Arc::new(RingAudioBuffer::new(12_000, 5_000));
        let (tx, mut rx) = mpsc::channel(4);
        let scheduler = SpectrumScheduler::with_params(buffer, tx, 2048, 20);
        tokio::spawn(async move { scheduler.run().await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn emits_once_enough_samples_are_buffered() {
        let buffer = Arc::new(RingAudioBuffer::new(12_000, 5_000));
        buffer.write(&vec![0.2f32; 4096]);
        let (tx, mut rx) = mpsc::channel(4);
        let scheduler = SpectrumScheduler::with_params(buffer, tx, 2048, 20);
        tokio::spawn(async move { scheduler.run().await });
        let event = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, EngineEvent::SpectrumData { .. }));
    }
}
