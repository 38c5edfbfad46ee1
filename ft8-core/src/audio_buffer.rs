//! Ring Audio Buffer (C1): a single-writer, many-reader bounded store of
//! PCM samples indexed by wall-clock time.
//!
//! Only the capture driver writes; every other component reads by time
//! range. Overflowing samples are silently dropped from the horizon —
//! readers must expect `BufferEvicted` for anything older than
//! `uptime - horizon`.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::errors::BufferError;

/// Bounded ring of mono f32 PCM, timestamp-indexed.
pub struct RingAudioBuffer {
    sample_rate: u32,
    horizon_ms: i64,
    inner: RwLock<Inner>,
}

struct Inner {
    samples: Vec<f32>,
    capacity: usize,
    write_pos: usize,
    total_samples_written: u64,
    start_timestamp: Option<DateTime<Utc>>,
}

impl RingAudioBuffer {
    /// `horizon_ms` must cover at least `2 * slotMs` plus one full window
    /// span per §4.1; the caller is responsible for sizing it.
    pub fn new(sample_rate: u32, horizon_ms: i64) -> Self {
        let capacity = ((horizon_ms as i64 * sample_rate as i64) / 1000).max(1) as usize;
        Self {
            sample_rate,
            horizon_ms,
            inner: RwLock::new(Inner {
                samples: vec![0.0; capacity],
                capacity,
                write_pos: 0,
                total_samples_written: 0,
                start_timestamp: None,
            }),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn horizon_ms(&self) -> i64 {
        self.horizon_ms
    }

    /// Appends newly captured samples, overwriting the oldest on overflow.
    pub fn write(&self, samples: &[f32]) {
        let mut inner = self.inner.write();
        if inner.start_timestamp.is_none() {
            inner.start_timestamp = Some(Utc::now());
        }
        let capacity = inner.capacity;
        for &s in samples {
            let pos = inner.write_pos;
            inner.samples[pos] = s;
            inner.write_pos = (pos + 1) % capacity;
        }
        inner.total_samples_written += samples.len() as u64;
    }

    /// Reads `[start_ms, start_ms + duration_ms)` of absolute wall-clock
    /// time (the same UTC-epoch-ms timeline as [`crate::slot::Slot`]),
    /// silence-padding any portion that is within the horizon but not
    /// yet written.
    pub fn read(&self, start_ms: i64, duration_ms: i64) -> Result<Vec<f32>, BufferError> {
        let inner = self.inner.read();
        let start_timestamp = match inner.start_timestamp {
            Some(t) => t,
            None => {
                return Err(BufferError::Underrun {
                    requested_ms: start_ms,
                    horizon_ms: 0,
                })
            }
        };

        // `start_ms` arrives as an absolute epoch-ms wall-clock instant
        // (per §4.1 "wall-clock position of sample index i is
        // startTimestamp + i*1000/sampleRate"); convert it into an
        // offset from the buffer's own start before indexing.
        let start_timestamp_ms = start_timestamp.timestamp_millis();
        let now_ms = Utc::now().timestamp_millis();
        let offset_ms = start_ms - start_timestamp_ms;
        let now_offset_ms = now_ms - start_timestamp_ms;

        let total_written = inner.total_samples_written;
        let oldest_valid_sample = total_written.saturating_sub(inner.capacity as u64);
        let oldest_valid_ms = (oldest_valid_sample as i64 * 1000) / self.sample_rate as i64;

        // Only reject outright when the *whole* requested range predates
        // the horizon; a range that merely starts before it but extends
        // into valid territory comes back silence-padded for its stale
        // portion via the per-sample loop below (spec.md:77).
        let end_offset_ms = offset_ms + duration_ms;
        if end_offset_ms <= oldest_valid_ms {
            return Err(BufferError::Evicted {
                requested_ms: start_ms,
                oldest_ms: start_timestamp_ms + oldest_valid_ms,
            });
        }
        if offset_ms > now_offset_ms {
            return Err(BufferError::Underrun {
                requested_ms: start_ms,
                horizon_ms: now_ms,
            });
        }

        let num_samples = ((duration_ms as i64 * self.sample_rate as i64) / 1000).max(0) as usize;
        let mut out = vec![0.0f32; num_samples];

        let start_sample = (offset_ms * self.sample_rate as i64) / 1000;
        for (i, slot) in out.iter_mut().enumerate() {
            let sample_index = start_sample + i as i64;
            if sample_index < 0 || sample_index as u64 >= total_written {
                continue;
            }
            if (sample_index as u64) < oldest_valid_sample {
                continue;
            }
            let ring_pos = (sample_index as u64 % inner.capacity as u64) as usize;
            *slot = inner.samples[ring_pos];
        }
        Ok(out)
    }

    /// Reads the most recently written `n` samples, for monitors (e.g.
    /// the spectrum scheduler) that do not care about absolute timing.
    pub fn read_next_chunk(&self, n: usize) -> Vec<f32> {
        let inner = self.inner.read();
        let n = n.min(inner.capacity);
        let total_written = inner.total_samples_written;
        let available = total_written.min(inner.capacity as u64) as usize;
        let n = n.min(available);
        let mut out = Vec::with_capacity(n);
        let start = total_written.saturating_sub(n as u64);
        for i in 0..n {
            let ring_pos = ((start + i as u64) % inner.capacity as u64) as usize;
            out.push(inner.samples[ring_pos]);
        }
        out
    }

    pub fn total_samples_written(&self) -> u64 {
        self.inner.read().total_samples_written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_before_any_write_is_underrun() {
        let buf = RingAudioBuffer::new(12_000, 30_000);
        assert!(matches!(buf.read(0, 100), Err(BufferError::Underrun { .. })));
    }

    #[test]
    fn written_samples_are_readable() {
        let buf = RingAudioBuffer::new(1000, 10_000);
        buf.write(&[1.0; 1000]);
        let chunk = buf.read_next_chunk(500);
        assert_eq!(chunk.len(), 500);
        assert!(chunk.iter().all(|&s| s == 1.0));
    }

    /// `read` takes the same absolute epoch-ms wall clock that
    /// `Slot::start_ms`/`end_ms` use, not an offset from buffer
    /// construction (§4.1).
    #[test]
    fn read_accepts_absolute_epoch_ms_matching_slot_timestamps() {
        let buf = RingAudioBuffer::new(1000, 10_000);
        let write_at = Utc::now();
        buf.write(&[0.7; 1000]);
        let epoch_ms = write_at.timestamp_millis();
        let result = buf.read(epoch_ms, 500).unwrap();
        assert_eq!(result.len(), 500);
        assert!(result.iter().any(|&s| s != 0.0));
    }

    /// A read that starts before the horizon but extends into valid
    /// territory must come back silence-padded, not as a hard error
    /// (spec.md:77 "partially covered" case).
    #[test]
    fn partially_evicted_range_is_silence_padded_not_rejected() {
        let buf = RingAudioBuffer::new(1000, 1_000);
        let write_at = Utc::now();
        for _ in 0..5 {
            buf.write(&[0.9; 1000]);
        }
        let epoch_ms = write_at.timestamp_millis();
        // The buffer only holds the most recent 1000ms; asking for a
        // window starting 600ms before the oldest valid sample overlaps
        // both the evicted past and the still-valid present.
        let result = buf.read(epoch_ms - 600, 1200).unwrap();
        assert_eq!(result.len(), 1200);
        assert!(result.iter().any(|&s| s == 0.9), "valid tail must be audible");
    }

    /// A read entirely older than the horizon must still be rejected.
    #[test]
    fn fully_evicted_range_is_rejected() {
        let buf = RingAudioBuffer::new(1000, 1_000);
        let write_at = Utc::now();
        for _ in 0..5 {
            buf.write(&[0.9; 1000]);
        }
        let epoch_ms = write_at.timestamp_millis();
        let result = buf.read(epoch_ms - 5_000, 200);
        assert!(matches!(result, Err(BufferError::Evicted { .. })));
    }

    #[test]
    fn overflow_wraps_without_panicking() {
        let buf = RingAudioBuffer::new(100, 1000);
        for _ in 0..20 {
            buf.write(&[0.5; 100]);
        }
        assert_eq!(buf.total_samples_written(), 2000);
        let chunk = buf.read_next_chunk(100);
        assert_eq!(chunk.len(), 100);
    }
}
