//! Structured logging for engine events, generalized from the teacher's
//! telemetry/frame-decode logger to `ft8_core::events::EngineEvent`.

use chrono::{DateTime, Utc};
use color_eyre::eyre::{eyre, Result};
use ft8_core::events::EngineEvent;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufWriter, Write};

use crate::config::{LogFormat, LogTarget, LoggingConfig};

/// Structured log event types the CLI emits, on top of the engine's own
/// outward-facing events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEvent {
    /// An event relayed verbatim from the running engine.
    Engine(EngineEvent),
    Info { message: String },
    Warn { message: String },
    Error { message: String, details: Option<String> },
}

/// Logger that fans a stream of [`LogEvent`]s out to stdout/stderr/file
/// in one of three textual shapes.
pub struct StructuredLogger {
    config: LoggingConfig,
    writer: Box<dyn Write + Send>,
    start_time: DateTime<Utc>,
}

impl StructuredLogger {
    pub fn new(config: LoggingConfig) -> Result<Self> {
        let writer: Box<dyn Write + Send> = match &config.target {
            LogTarget::Stdout => Box::new(io::stdout()),
            LogTarget::Stderr => Box::new(io::stderr()),
            LogTarget::File => {
                let path = config
                    .file_path
                    .as_ref()
                    .ok_or_else(|| eyre!("file path required for file logging"))?;
                Box::new(BufWriter::new(File::create(path)?))
            }
        };

        Ok(Self {
            config,
            writer,
            start_time: Utc::now(),
        })
    }

    pub fn log(&mut self, event: LogEvent) -> Result<()> {
        let output = match self.config.format {
            LogFormat::Json => self.format_json(&event)?,
            LogFormat::Logfmt => self.format_logfmt(&event),
            LogFormat::Pretty => self.format_pretty(&event),
        };

        writeln!(self.writer, "{output}")?;
        self.writer.flush()?;
        Ok(())
    }

    fn format_json(&self, event: &LogEvent) -> Result<String> {
        Ok(serde_json::to_string(event)?)
    }

    fn format_logfmt(&self, event: &LogEvent) -> String {
        let ts = Utc::now().to_rfc3339();
        match event {
            LogEvent::Engine(e) => format!("ts=\"{ts}\" type=engine {}", engine_event_logfmt(e)),
            LogEvent::Info { message } => format!("ts=\"{ts}\" level=info msg=\"{message}\""),
            LogEvent::Warn { message } => format!("ts=\"{ts}\" level=warn msg=\"{message}\""),
            LogEvent::Error { message, details } => match details {
                Some(d) => format!("ts=\"{ts}\" level=error msg=\"{message}\" details=\"{d}\""),
                None => format!("ts=\"{ts}\" level=error msg=\"{message}\""),
            },
        }
    }

    fn format_pretty(&self, event: &LogEvent) -> String {
        let ts = Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");
        match event {
            LogEvent::Engine(e) => format!("[{ts}] {}", engine_event_pretty(e)),
            LogEvent::Info { message } => format!("[{ts}] INFO: {message}"),
            LogEvent::Warn { message } => format!("[{ts}] WARN: {message}"),
            LogEvent::Error { message, details } => match details {
                Some(d) => format!("[{ts}] ERROR: {message} | {d}"),
                None => format!("[{ts}] ERROR: {message}"),
            },
        }
    }

    pub fn elapsed(&self) -> f64 {
        (Utc::now() - self.start_time).num_milliseconds() as f64 / 1000.0
    }
}

fn engine_event_logfmt(event: &EngineEvent) -> String {
    match event {
        EngineEvent::SlotStart { slot_id, start_ms } => {
            format!("event=slot_start slot={slot_id} start_ms={start_ms}")
        }
        EngineEvent::SlotPackUpdated { slot_id, total_decodes } => {
            format!("event=slot_pack_updated slot={slot_id} total_decodes={total_decodes}")
        }
        EngineEvent::DecodeError { slot_id, window_idx, message } => {
            format!("event=decode_error slot={slot_id} window={window_idx} message=\"{message}\"")
        }
        EngineEvent::TransmissionLog { operator_id, slot_id, text } => {
            format!("event=transmission operator={operator_id} slot={slot_id} text=\"{text}\"")
        }
        EngineEvent::OperatorStatusUpdate { operator_id, state } => {
            format!("event=operator_status operator={operator_id} state={state}")
        }
        EngineEvent::RadioStatusChanged { state } => {
            format!("event=radio_status state={state:?}")
        }
        EngineEvent::SystemStatus { engine_state } => {
            format!("event=system_status state={engine_state:?}")
        }
        EngineEvent::PttStatusChanged { on } => format!("event=ptt on={on}"),
        other => format!("event={other:?}"),
    }
}

fn engine_event_pretty(event: &EngineEvent) -> String {
    match event {
        EngineEvent::SlotStart { slot_id, start_ms } => format!("SLOT START {slot_id} (t={start_ms}ms)"),
        EngineEvent::SlotPackUpdated { slot_id, total_decodes } => {
            format!("SLOT PACK {slot_id}: {total_decodes} decode(s)")
        }
        EngineEvent::DecodeError { slot_id, window_idx, message } => {
            format!("DECODE ERROR {slot_id}[{window_idx}]: {message}")
        }
        EngineEvent::TransmissionLog { operator_id, slot_id, text } => {
            format!("TX [{operator_id}] {slot_id}: {text}")
        }
        EngineEvent::OperatorStatusUpdate { operator_id, state } => {
            format!("OPERATOR {operator_id} -> {state}")
        }
        EngineEvent::RadioStatusChanged { state } => format!("RADIO -> {state:?}"),
        EngineEvent::SystemStatus { engine_state } => format!("ENGINE -> {engine_state:?}"),
        EngineEvent::PttStatusChanged { on } => {
            format!("PTT {}", if *on { "ON" } else { "OFF" })
        }
        other => format!("{other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pretty_formats_slot_start() {
        let event = EngineEvent::SlotStart {
            slot_id: "20260101-120000".to_string(),
            start_ms: 1_000,
        };
        let msg = engine_event_pretty(&event);
        assert!(msg.contains("SLOT START"));
    }

    #[test]
    fn logfmt_falls_back_to_debug_for_uncommon_variants() {
        let event = EngineEvent::ModeChanged { mode_name: "FT4".to_string() };
        let msg = engine_event_logfmt(&event);
        assert!(msg.starts_with("event="));
    }
}
