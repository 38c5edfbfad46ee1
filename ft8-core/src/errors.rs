//! Engine error types, one granular enum per subsystem.

use thiserror::Error;

/// Top-level error type for all engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("audio buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("decode/encode pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("slot pack error: {0}")]
    Aggregator(#[from] AggregatorError),

    #[error("mixer error: {0}")]
    Mixer(#[from] MixerError),

    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("radio actuator error: {0}")]
    Radio(#[from] RadioError),

    #[error("audio io error: {0}")]
    AudioIo(#[from] AudioIoError),
}

/// Ring audio buffer errors (C1).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BufferError {
    #[error("buffer underrun: requested range starts at {requested_ms} ms but buffer horizon ends at {horizon_ms} ms")]
    Underrun { requested_ms: i64, horizon_ms: i64 },

    #[error("buffer evicted: requested range starts at {requested_ms} ms but oldest retained sample is at {oldest_ms} ms")]
    Evicted { requested_ms: i64, oldest_ms: i64 },
}

/// Decode/encode work pool errors (C3/C5).
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("decode failed for slot {slot_id} window {window_idx}: {message}")]
    DecodeFailed {
        slot_id: String,
        window_idx: usize,
        message: String,
    },

    #[error("encode failed for operator {operator_id} slot {slot_id}: {message}")]
    EncodeFailed {
        operator_id: String,
        slot_id: String,
        message: String,
    },

    #[error("decodeDropped: slot {slot_id} window {window_idx} evicted, queue backlog exceeded maxBacklog {max_backlog}")]
    Dropped {
        slot_id: String,
        window_idx: usize,
        max_backlog: usize,
    },

    #[error("task was cancelled before it ran")]
    Cancelled,

    #[error("worker pool is shutting down")]
    ShuttingDown,
}

/// Slot pack aggregator errors (C4).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AggregatorError {
    #[error("slot {0} is sealed and no longer accepts decode results")]
    SlotSealed(String),
}

/// Audio mixer errors (C6).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MixerError {
    #[error("gain {gain} out of range [0.001, 10.0] for operator {operator_id}")]
    GainOutOfRange { operator_id: String, gain: f32 },

    #[error("a mixedAudioReady event was already emitted for slot {0}")]
    DuplicateRelease(String),

    #[error("waveform for slot {slot_id} arrived too late (target {target_play_ms}, now {now_ms}, skip threshold {skip_ms} ms)")]
    TooLate {
        slot_id: String,
        target_play_ms: i64,
        now_ms: i64,
        skip_ms: i64,
    },
}

/// Engine/radio lifecycle errors (C9/C10).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LifecycleError {
    #[error("circular dependency detected among resources: {0:?}")]
    CircularDependency(Vec<String>),

    #[error("resource {0} failed to start: {1}")]
    StartFailed(String, String),

    #[error("resource {0} failed to stop within {1} ms")]
    StopTimeout(String, u64),

    #[error("reconnect attempts exhausted after {0} tries")]
    ReconnectExhausted(u32),

    #[error("operation not permitted in state {0}")]
    InvalidState(String),

    #[error("unknown resource: {0}")]
    UnknownResource(String),
}

/// Configuration errors, surfaced at startup.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("unknown mode: {0}")]
    UnknownMode(String),

    #[error("invalid operator field {field}: {reason}")]
    InvalidOperatorField { field: String, reason: String },

    #[error("invalid frequency {hz} Hz (must be within [200, 4000])")]
    InvalidFrequency { hz: i64 },
}

/// Radio actuator transport errors (external boundary, C9's events carry these).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RadioError {
    #[error("transport timeout")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("PTT operation attempted while not connected")]
    NotConnected,
}

/// File/device audio IO errors, used by the [`crate::external_audio`]
/// `AudioSource`/`AudioSink` implementations at the audio boundary.
#[derive(Debug, Error)]
pub enum AudioIoError {
    #[error("failed to load audio file {path}: {reason}")]
    Load { path: String, reason: String },

    #[error("failed to resample from {source_rate} Hz to {target_rate} Hz: {reason}")]
    Resample {
        source_rate: u32,
        target_rate: u32,
        reason: String,
    },

    #[error("no audio output device available")]
    NoDevice,

    #[error("device error: {0}")]
    Device(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
