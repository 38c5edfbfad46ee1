//! Radio Lifecycle FSM (C9): connect / disconnect / reconnect with
//! exponential backoff and health probes (§4.9).
//!
//! A plain synchronous `match (state, event)` function, same shape as
//! C7 and C10: suspension (the reconnect timer, the health-check
//! interval) lives in the *driver* that owns a [`RadioFsm`], never
//! inside the transition itself (§5 "pure state-machine transitions
//! never suspend").

use crate::config::ReconnectConfig;
use crate::errors::RadioError;
use crate::events::{RadioFsmEvent, RadioFsmState};

/// Side effects the driver must carry out after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioFsmEffect {
    /// Call into the [`crate::interfaces::RadioActuator`] to connect.
    AttemptConnect,
    /// Wait `delay_ms` then send [`RadioFsmEvent::Reconnect`]; `attempt`
    /// is the 1-based attempt number this delay was computed for.
    ScheduleReconnect { delay_ms: u64, attempt: u32 },
    /// Reconnection attempts are exhausted; the FSM has moved to `error`.
    ReconnectExhausted,
}

pub struct RadioFsm {
    state: RadioFsmState,
    attempt: u32,
    config: ReconnectConfig,
    last_error: Option<RadioError>,
}

impl RadioFsm {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            state: RadioFsmState::Disconnected,
            attempt: 0,
            config,
            last_error: None,
        }
    }

    pub fn state(&self) -> RadioFsmState {
        self.state
    }

    pub fn last_error(&self) -> Option<&RadioError> {
        self.last_error.as_ref()
    }

    /// The configured health-probe cadence (§4.9 `healthCheckInterval`).
    pub fn health_check_interval_ms(&self) -> u64 {
        self.config.health_check_interval_ms
    }

    /// PTT is only ever legal in `connected` (§4.9).
    pub fn can_assert_ptt(&self) -> bool {
        matches!(self.state, RadioFsmState::Connected)
    }

    /// Exponential backoff `min(B * 2^(n-1), maxDelayMs)` for the
    /// `n`-th (1-based) reconnect attempt (§4.9).
    pub fn backoff_delay_ms(&self, attempt: u32) -> u64 {
        let shift = attempt.saturating_sub(1).min(32);
        let scaled = self.config.delay_base_ms.saturating_mul(1u64 << shift);
        scaled.min(self.config.max_delay_ms)
    }

    fn attempts_exhausted(&self) -> bool {
        self.config.max_attempts >= 0 && self.attempt >= self.config.max_attempts as u32
    }

    pub fn apply(&mut self, event: RadioFsmEvent) -> Vec<RadioFsmEffect> {
        use RadioFsmEvent::*;
        use RadioFsmState::*;

        match (self.state, event) {
            (_, Reset) => {
                self.state = Disconnected;
                self.attempt = 0;
                self.last_error = None;
                Vec::new()
            }
            (_, Disconnect(_)) => {
                self.state = Disconnected;
                self.attempt = 0;
                self.last_error = None;
                Vec::new()
            }
            (Disconnected, Connect) => {
                self.state = Connecting;
                vec![RadioFsmEffect::AttemptConnect]
            }
            (Connecting, ConnectSuccess) => {
                self.state = Connected;
                self.attempt = 0;
                self.last_error = None;
                Vec::new()
            }
            (Connecting, ConnectFailure(err)) | (Reconnecting, ConnectFailure(err)) => {
                self.last_error = Some(err);
                self.attempt += 1;
                if self.attempts_exhausted() {
                    self.state = Error;
                    vec![RadioFsmEffect::ReconnectExhausted]
                } else {
                    self.state = Reconnecting;
                    vec![RadioFsmEffect::ScheduleReconnect {
                        delay_ms: self.backoff_delay_ms(self.attempt),
                        attempt: self.attempt,
                    }]
                }
            }
            (Connected, ConnectionLost(_)) | (Connected, HealthCheckFailed(_)) => {
                self.attempt += 1;
                if self.attempts_exhausted() {
                    self.state = Error;
                    vec![RadioFsmEffect::ReconnectExhausted]
                } else {
                    self.state = Reconnecting;
                    vec![RadioFsmEffect::ScheduleReconnect {
                        delay_ms: self.backoff_delay_ms(self.attempt),
                        attempt: self.attempt,
                    }]
                }
            }
            (Reconnecting, Reconnect) => {
                self.state = Connecting;
                vec![RadioFsmEffect::AttemptConnect]
            }
            (Reconnecting, StopReconnecting) => {
                self.state = Disconnected;
                self.attempt = 0;
                Vec::new()
            }
            _ => Vec::new(),
        }
    }
}
