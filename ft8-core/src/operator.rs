//! Operator State Machine (C7): a per-operator QSO FSM producing
//! transmission text (§3, §4.7).
//!
//! Transitions are expressed as a pure `fn transition(state, stimulus)
//! -> (state, Vec<effect>)` over explicit enums, per §9's redesign note
//! that ad-hoc dynamic dispatch becomes tagged enums with exhaustive
//! matches. The machine never suspends and never changes state as a
//! side effect of transmit scheduling (§4.7); only incoming decoded
//! frames, timeouts, and explicit resets drive it.

use std::collections::HashSet;

use crate::config::OperatorConfig;
use crate::events::{OperatorEvent, OperatorStimulus, TransmitRequest};
use crate::protocol::{self, MessageKind, ParsedMessage};
use crate::slot::{Phase, Slot};

/// QSO progress, mirroring §3's `strategyState` enumeration exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorState {
    Idle,
    CallingCq,
    Replying,
    ExchangingReport,
    Confirming,
    Completed,
    Failed,
}

impl OperatorState {
    fn label(self) -> &'static str {
        match self {
            OperatorState::Idle => "idle",
            OperatorState::CallingCq => "callingCQ",
            OperatorState::Replying => "replying",
            OperatorState::ExchangingReport => "exchangingReport",
            OperatorState::Confirming => "confirming",
            OperatorState::Completed => "completed",
            OperatorState::Failed => "failed",
        }
    }
}

/// Mutable per-operator context (§3 "Operator context").
#[derive(Debug, Clone)]
pub struct OperatorContext {
    pub id: String,
    pub my_callsign: String,
    pub my_grid: Option<String>,
    pub target_callsign: Option<String>,
    pub target_grid: Option<String>,
    pub frequency_hz: i64,
    pub report_sent: Option<i32>,
    pub report_received: Option<i32>,
    pub transmit_phases: HashSet<Phase>,
    pub state: OperatorState,
    pub cycles_idle: u32,
}

/// The number of idle CQ cycles before re-emitting CQ (§4.7 `Cmax`).
const CMAX_IDLE_CYCLES: u32 = 2;

impl OperatorContext {
    pub fn from_config(config: &OperatorConfig) -> Self {
        Self {
            id: config.id.clone(),
            my_callsign: config.my_callsign.clone(),
            my_grid: config.my_grid.clone(),
            target_callsign: None,
            target_grid: None,
            frequency_hz: config.frequency_hz,
            report_sent: None,
            report_received: None,
            transmit_phases: config.transmit_phase_set(),
            state: OperatorState::Idle,
            cycles_idle: 0,
        }
    }

    /// TX1-TX6 templates, deterministically re-derived from context on
    /// every state entry (§3 invariant).
    pub fn slot_templates(&self) -> [String; 6] {
        let my = self.my_callsign.as_str();
        let their = self.target_callsign.as_deref().unwrap_or("");
        let my_grid = self.my_grid.as_deref();
        [
            protocol::tx1_cq(my, my_grid),
            my_grid
                .map(|g| protocol::tx2_grid_reply(their, my, g))
                .unwrap_or_default(),
            protocol::tx3_signal_report(their, my, self.report_sent.unwrap_or(0)),
            protocol::tx4_roger_report(their, my, self.report_sent.unwrap_or(0)),
            protocol::tx5_rr73(their, my),
            protocol::tx6_seventy3(their, my),
        ]
    }

    fn reset_targeting(&mut self) {
        self.target_callsign = None;
        self.target_grid = None;
        self.report_sent = None;
        self.report_received = None;
        self.cycles_idle = 0;
    }

    /// Applies one stimulus, returning any effects (§4.7's transition
    /// table, expressed exhaustively below). Unmatched combinations are
    /// a documented no-op (§4.7 "an event with no matching transition
    /// is a no-op with a diagnostic").
    pub fn apply(&mut self, stimulus: OperatorStimulus) -> Vec<OperatorEvent> {
        match (self.state, stimulus) {
            (OperatorState::Idle, OperatorStimulus::StartCq) => {
                self.state = OperatorState::CallingCq;
                self.cycles_idle = 0;
                vec![self.state_changed_event()]
            }
            (_, OperatorStimulus::Rx { message, snr_db }) => self.handle_rx(message, snr_db),
            (OperatorState::CallingCq, OperatorStimulus::TimeoutCyclesIdle(n)) => {
                self.cycles_idle = n;
                if n >= CMAX_IDLE_CYCLES {
                    self.cycles_idle = 0;
                    vec![self.state_changed_event()]
                } else {
                    Vec::new()
                }
            }
            (_, OperatorStimulus::Reset) => {
                self.reset_targeting();
                self.state = OperatorState::Idle;
                vec![self.state_changed_event()]
            }
            _ => Vec::new(),
        }
    }

    fn handle_rx(&mut self, raw: ParsedMessage, snr_db: i32) -> Vec<OperatorEvent> {
        let addressed_to_me = protocol::is_addressed_to_me(&raw, &self.my_callsign);
        let from_target = self
            .target_callsign
            .as_deref()
            .map(|t| protocol::is_from_target(&raw, t))
            .unwrap_or(false);

        match self.state {
            OperatorState::Idle if addressed_to_me => {
                if let Some(from) = &raw.from_callsign {
                    self.target_callsign = Some(from.clone());
                    self.target_grid = raw.grid.clone();
                }
                self.state = OperatorState::Replying;
                vec![self.state_changed_event()]
            }
            OperatorState::CallingCq if addressed_to_me && matches!(raw.kind, MessageKind::GridCall) => {
                self.target_callsign = raw.from_callsign.clone();
                self.target_grid = raw.grid.clone();
                // §4.7 "derive reportSent from SNR": the grid/call
                // grammar carries no report field, so the outgoing
                // report is the measured SNR of the rx that triggered
                // this transition, not anything embedded in `raw`.
                self.report_sent = Some(snr_db);
                self.state = OperatorState::ExchangingReport;
                vec![self.state_changed_event()]
            }
            OperatorState::Replying if from_target && raw.report.is_some() => {
                self.report_received = raw.report.map(|r| r.db);
                self.state = OperatorState::ExchangingReport;
                vec![self.state_changed_event()]
            }
            OperatorState::ExchangingReport
                if from_target && matches!(raw.kind, MessageKind::RogerReport | MessageKind::RogerRoger) =>
            {
                self.state = OperatorState::Confirming;
                vec![self.state_changed_event()]
            }
            OperatorState::Confirming if from_target && matches!(raw.kind, MessageKind::Seventy3) => {
                self.state = OperatorState::Completed;
                vec![
                    self.state_changed_event(),
                    OperatorEvent::QsoFinalized {
                        operator_id: self.id.clone(),
                    },
                ]
            }
            _ if !from_target && self.target_callsign.is_some() && !addressed_to_me => {
                // rxMismatchTarget: ignored per §4.7's "any -> unchanged".
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn state_changed_event(&self) -> OperatorEvent {
        OperatorEvent::StateChanged {
            operator_id: self.id.clone(),
            state: self.state.label().to_string(),
        }
    }

    /// The transmit-cycle predicate (§4.7, pure function):
    /// `isTransmitCycle(slot, operator) = slot.phase in operator.transmitPhases`.
    pub fn is_transmit_cycle(&self, slot: &Slot) -> bool {
        self.transmit_phases.contains(&slot.phase())
    }

    /// Evaluated by the operator manager on `encodeStart`; emits a
    /// transmit request carrying text from the current slot templates
    /// if this is a transmit cycle, otherwise stays silent (§4.7).
    pub fn on_encode_start(&self, slot: &Slot) -> Option<TransmitRequest> {
        if !self.is_transmit_cycle(slot) {
            return None;
        }
        let text = self.text_for_state();
        Some(TransmitRequest {
            operator_id: self.id.clone(),
            slot_id: slot.id.clone(),
            slot_start_ms: slot.start_ms,
            text,
            frequency_hz: self.frequency_hz,
            target_play_ms: 0, // filled in by the caller from the mode descriptor.
        })
    }

    fn text_for_state(&self) -> String {
        let templates = self.slot_templates();
        match self.state {
            OperatorState::Idle | OperatorState::CallingCq => templates[0].clone(),
            OperatorState::Replying => templates[1].clone(),
            OperatorState::ExchangingReport => templates[3].clone(),
            OperatorState::Confirming => templates[4].clone(),
            OperatorState::Completed => templates[5].clone(),
            OperatorState::Failed => templates[0].clone(),
        }
    }
}
