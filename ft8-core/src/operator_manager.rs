//! Operator Manager (C8): owns every [`OperatorContext`], drives each on
//! `encodeStart`, and is the sole writer into the mixer (§4.8 "C7 never
//! touches C6").
//!
//! Every encode dispatched for a given slot carries that slot's exact
//! `slotStartMs`, taken once from the triggering clock event, so a
//! mid-slot override's re-encode lines up with the original (§4.8).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::{EncodePoolConfig, ModeDescriptor, OperatorConfig};
use crate::encode_pool::{EncodePool, EncodeTask};
use crate::errors::PoolError;
use crate::events::{OperatorEvent, OperatorStimulus, TransmitRequest};
use crate::mixer::AudioMixer;
use crate::operator::OperatorContext;
use crate::protocol::parse_message;
use crate::slot::{Phase, Slot};

pub struct OperatorManager {
    operators: RwLock<HashMap<String, OperatorContext>>,
    encode_pool: Arc<EncodePool>,
    mixer: Arc<AudioMixer>,
    mode: ModeDescriptor,
}

impl OperatorManager {
    pub fn new(
        configs: &[OperatorConfig],
        encode_pool: Arc<EncodePool>,
        mixer: Arc<AudioMixer>,
        mode: ModeDescriptor,
    ) -> Self {
        let operators = configs
            .iter()
            .map(|c| (c.id.clone(), OperatorContext::from_config(c)))
            .collect();
        Self {
            operators: RwLock::new(operators),
            encode_pool,
            mixer,
            mode,
        }
    }

    /// Registers the operators expected to transmit in `slot` with C6,
    /// so the mixer's early-release policy can tell "everyone has
    /// arrived" from "nobody transmitted" (§4.6, §4.8).
    pub fn on_slot_start(&self, slot: &Slot) {
        let target_play_ms = slot.start_ms + self.mode.transmit_offset_ms;
        let expected: Vec<String> = self
            .operators
            .read()
            .iter()
            .filter(|(_, op)| op.is_transmit_cycle(slot))
            .map(|(id, _)| id.clone())
            .collect();
        if !expected.is_empty() {
            self.mixer
                .expect_slot(&slot.id, target_play_ms, expected);
        }
    }

    /// Collects transmit requests from every operator in a transmit
    /// cycle for `slot`, then dispatches them in one pass to the encode
    /// pool (§4.8). Returns the per-operator encode outcomes so callers
    /// can surface failures without losing track of which operator they
    /// belong to.
    pub async fn on_encode_start(&self, slot: &Slot) -> Vec<(String, Result<(), PoolError>)> {
        let requests = self.collect_transmit_requests(slot);
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            let operator_id = request.operator_id.clone();
            let outcome = self.dispatch(request).await;
            results.push((operator_id, outcome));
        }
        results
    }

    fn collect_transmit_requests(&self, slot: &Slot) -> Vec<TransmitRequest> {
        let target_play_ms = slot.start_ms + self.mode.transmit_offset_ms;
        self.operators
            .read()
            .values()
            .filter_map(|op| {
                op.on_encode_start(slot).map(|mut req| {
                    req.target_play_ms = target_play_ms;
                    req
                })
            })
            .collect()
    }

    async fn dispatch(&self, request: TransmitRequest) -> Result<(), PoolError> {
        let task: EncodeTask = request.into();
        let waveform = self.encode_pool.submit(task, &self.mode).await?;
        self.mixer.add_audio(waveform);
        Ok(())
    }

    /// Handles a mid-slot user override (template edit, phase change,
    /// manual call): if the operator is still in a transmit cycle for
    /// `slot` and there is time budget left before
    /// `targetPlayMs + playSkipMs`, issues a fresh encode that will
    /// replace the pending mix for that slot (§4.8).
    pub async fn request_override(
        &self,
        operator_id: &str,
        slot: &Slot,
        now_ms: i64,
        play_skip_ms: i64,
    ) -> Option<Result<(), PoolError>> {
        let target_play_ms = slot.start_ms + self.mode.transmit_offset_ms;
        if now_ms >= target_play_ms + play_skip_ms {
            return None;
        }
        let request = {
            let operators = self.operators.read();
            let op = operators.get(operator_id)?;
            let mut req = op.on_encode_start(slot)?;
            req.target_play_ms = target_play_ms;
            req
        };
        Some(self.dispatch(request).await)
    }

    /// Routes a decoded frame's text and SNR to every operator, each of
    /// which independently decides via its own state and addressed-to-me
    /// check whether the message is relevant (§4.7). `snr_db` is the
    /// decode's measured SNR, carried so `reportSent` can be derived from
    /// it rather than a report field the grammar never produces.
    pub fn dispatch_rx(&self, message_text: &str, snr_db: i32) -> Vec<OperatorEvent> {
        let parsed = parse_message(message_text);
        let mut operators = self.operators.write();
        operators
            .values_mut()
            .flat_map(|op| {
                op.apply(OperatorStimulus::Rx {
                    message: parsed.clone(),
                    snr_db,
                })
            })
            .collect()
    }

    pub fn start_cq(&self, operator_id: &str) -> Vec<OperatorEvent> {
        let mut operators = self.operators.write();
        operators
            .get_mut(operator_id)
            .map(|op| op.apply(OperatorStimulus::StartCq))
            .unwrap_or_default()
    }

    pub fn reset(&self, operator_id: &str) -> Vec<OperatorEvent> {
        let mut operators = self.operators.write();
        operators
            .get_mut(operator_id)
            .map(|op| op.apply(OperatorStimulus::Reset))
            .unwrap_or_default()
    }

    pub fn snapshot_state(&self, operator_id: &str) -> Option<crate::operator::OperatorState> {
        self.operators.read().get(operator_id).map(|op| op.state)
    }

    /// Every configured operator id, for commands that apply to the
    /// whole roster at once (§6 `setVolumeGain`).
    pub fn operator_ids(&self) -> Vec<String> {
        self.operators.read().keys().cloned().collect()
    }

    /// Adds or removes a transmit-phase membership for `operator_id` (§6
    /// `setOperatorSlot`).
    pub fn set_transmit_phase(&self, operator_id: &str, phase: Phase, enabled: bool) {
        let mut operators = self.operators.write();
        if let Some(op) = operators.get_mut(operator_id) {
            if enabled {
                op.transmit_phases.insert(phase);
            } else {
                op.transmit_phases.remove(&phase);
            }
        }
    }

    /// Points the operator at a specific callsign directly, bypassing the
    /// normal RX-discovery path (§6 `operatorRequestCall`).
    pub fn request_call(&self, operator_id: &str, callsign: &str) {
        let mut operators = self.operators.write();
        if let Some(op) = operators.get_mut(operator_id) {
            op.target_callsign = Some(callsign.to_string());
            op.state = crate::operator::OperatorState::Replying;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ToneKeyedCodec;
    use crate::config::{AutoFlags, MixerConfig, OperatorPhase};
    use crate::mixer::MIXER_SAMPLE_RATE_HZ;
    use chrono::TimeZone;

    fn make_manager(transmit_phases: Vec<OperatorPhase>) -> OperatorManager {
        let config = OperatorConfig {
            id: "op1".to_string(),
            my_callsign: "W1ABC".to_string(),
            my_grid: Some("FN42".to_string()),
            frequency_hz: 1500,
            transmit_phases,
            auto_flags: AutoFlags::default(),
        };
        let encode_pool = Arc::new(
            EncodePool::new(&EncodePoolConfig { size: 1 }, Arc::new(ToneKeyedCodec::new())).unwrap(),
        );
        let mixer = Arc::new(AudioMixer::new(MixerConfig::default()));
        OperatorManager::new(&[config], encode_pool, mixer, ModeDescriptor::ft8())
    }

    #[tokio::test]
    async fn encode_start_dispatches_only_in_transmit_phase() {
        let manager = make_manager(vec![OperatorPhase::Even]);
        let even_slot = Slot::at_boundary(0, 15_000);
        let odd_slot = even_slot.next();

        manager.on_slot_start(&even_slot);
        let results = manager.on_encode_start(&even_slot).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].1.is_ok());

        let results = manager.on_encode_start(&odd_slot).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn encoded_waveform_reaches_mixer() {
        let manager = make_manager(vec![OperatorPhase::Even]);
        let slot = Slot::at_boundary(0, 15_000);
        manager.on_slot_start(&slot);
        manager.on_encode_start(&slot).await;

        let target_play_ms = slot.start_ms + ModeDescriptor::ft8().transmit_offset_ms;
        let now = chrono::Utc.timestamp_millis_opt(target_play_ms).unwrap();
        let released = manager.mixer.poll_release(&slot.id, now).unwrap();
        assert!(released.is_some());
        let released = released.unwrap();
        assert_eq!(released.sample_rate, MIXER_SAMPLE_RATE_HZ);
    }

    #[tokio::test]
    async fn override_rejected_after_skip_threshold() {
        let manager = make_manager(vec![OperatorPhase::Even]);
        let slot = Slot::at_boundary(0, 15_000);
        let target_play_ms = slot.start_ms + ModeDescriptor::ft8().transmit_offset_ms;
        let outcome = manager
            .request_override("op1", &slot, target_play_ms + 1000, 100)
            .await;
        assert!(outcome.is_none());
    }

    #[test]
    fn start_cq_transitions_named_operator() {
        let manager = make_manager(vec![]);
        let events = manager.start_cq("op1");
        assert!(!events.is_empty());
        assert_eq!(
            manager.snapshot_state("op1"),
            Some(crate::operator::OperatorState::CallingCq)
        );
    }

    #[test]
    fn dispatch_rx_reaches_idle_operator() {
        let manager = make_manager(vec![]);
        let events = manager.dispatch_rx("W1ABC K2XYZ FN42", -10);
        assert!(!events.is_empty());
        assert_eq!(
            manager.snapshot_state("op1"),
            Some(crate::operator::OperatorState::Replying)
        );
    }
}
