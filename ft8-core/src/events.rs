//! Tagged event and command enums, exhaustively matched at every
//! subscriber (§9 "dynamic dispatch becomes tagged enums").
//!
//! Internal component events (`ClockEvent`, `AggregatorEvent`, ...) carry
//! the cross-component payloads described in §3/§4; `EngineEvent` and
//! `EngineCommand` are the outward-facing boundary listed in §6.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::errors::{LifecycleError, PoolError, RadioError};
use crate::protocol::ParsedMessage;
use crate::slot::Slot;

/// Events emitted by the slot clock (C2).
#[derive(Debug, Clone, PartialEq)]
pub enum ClockEvent {
    SlotStart(Slot),
    SubWindow {
        slot: Slot,
        window_idx: usize,
        capture_start_ms: i64,
    },
    EncodeStart(Slot),
    TransmitStart(Slot),
}

/// A single decoded frame, as produced by the external [`crate::interfaces::Decoder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedFrame {
    pub message: String,
    pub snr_db: i32,
    pub dt_sec: f64,
    pub freq_hz: i64,
    pub confidence: f64,
}

/// Results flowing from C3 into C4.
#[derive(Debug, Clone)]
pub struct DecodeResult {
    pub slot_id: String,
    pub window_idx: usize,
    pub frames: Vec<DecodedFrame>,
}

/// Events emitted by the aggregator (C4).
#[derive(Debug, Clone)]
pub enum AggregatorEvent {
    SlotPackUpdated(crate::slot_pack::SlotPack),
    SlotPackSealed(crate::slot_pack::SlotPack),
}

/// Events emitted by the operator state machine (C7).
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorEvent {
    TransmitRequest(TransmitRequest),
    QsoFinalized { operator_id: String },
    StateChanged { operator_id: String, state: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransmitRequest {
    pub operator_id: String,
    pub slot_id: String,
    pub slot_start_ms: i64,
    pub text: String,
    pub frequency_hz: i64,
    pub target_play_ms: i64,
}

/// Inbound stimuli driving the operator FSM (§4.7).
#[derive(Debug, Clone)]
pub enum OperatorStimulus {
    StartCq,
    /// A decoded frame addressed to the operator's callsign space.
    /// `snr_db` carries the decode's measured SNR so `reportSent` can be
    /// derived from it on the `callingCQ` + `rxReplyToMe` transition
    /// (§4.7) — the grammar never populates a report field on the
    /// grid/call message this transition fires on, so the value must
    /// come from the decode itself rather than the parsed message.
    Rx { message: ParsedMessage, snr_db: i32 },
    TimeoutCyclesIdle(u32),
    Reset,
}

/// Events emitted by the audio mixer (C6).
#[derive(Debug, Clone)]
pub enum MixerEvent {
    MixedAudioReady(crate::mixer::MixedSlotOutput),
    MixDiscarded { slot_id: String, reason: String },
}

/// Events driving/emitted by the radio lifecycle FSM (C9), per §4.9.
#[derive(Debug, Clone)]
pub enum RadioFsmEvent {
    Connect,
    Disconnect(String),
    ConnectSuccess,
    ConnectFailure(RadioError),
    ConnectionLost(String),
    HealthCheckFailed(RadioError),
    StopReconnecting,
    Reset,
    Reconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RadioFsmState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

/// Events driving the engine lifecycle FSM (C10).
#[derive(Debug, Clone)]
pub enum EngineFsmEvent {
    Start,
    ResourceStarted(String),
    ResourceFailed(String, LifecycleError),
    Stop,
    ResourceStopped(String),
    ResourceStopTimedOut(String, u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineFsmState {
    Idle,
    Starting,
    Running,
    Stopping,
    Error,
}

/// Outbound events to the surrounding system (§6, verbatim list).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    ModeChanged {
        mode_name: String,
    },
    SlotStart {
        slot_id: String,
        start_ms: i64,
    },
    SubWindow {
        slot_id: String,
        window_idx: usize,
    },
    SlotPackUpdated {
        slot_id: String,
        total_decodes: u64,
    },
    SpectrumData {
        timestamp: DateTime<Utc>,
        magnitudes_db: Vec<f32>,
    },
    DecodeError {
        slot_id: String,
        window_idx: usize,
        message: String,
    },
    SystemStatus {
        engine_state: EngineFsmState,
    },
    TransmissionLog {
        operator_id: String,
        slot_id: String,
        text: String,
    },
    OperatorStatusUpdate {
        operator_id: String,
        state: String,
    },
    RadioStatusChanged {
        state: RadioFsmState,
    },
    PttStatusChanged {
        on: bool,
    },
}

/// Inbound commands accepted from the surrounding system (§6, verbatim list).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum EngineCommand {
    StartEngine,
    StopEngine,
    SetMode { mode_name: String },
    GetStatus,
    StartOperator { id: String },
    StopOperator { id: String },
    SetOperatorContext { id: String, config: Box<EngineConfig> },
    SetOperatorSlot { id: String, slot_key: String },
    SetClientEnabledOperators { ids: Vec<String> },
    OperatorRequestCall { id: String, callsign: String },
    SetVolumeGain { gain: f32 },
    ForceStopTransmission,
}

/// Errors surfaced through the event stream rather than returned directly,
/// matching §7's "reported via event stream; never crash the pool".
#[derive(Debug, Clone)]
pub enum SurfacedError {
    Pool(PoolError),
    Radio(RadioError),
    Lifecycle(LifecycleError),
}
