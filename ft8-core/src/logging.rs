//! Unified structured logging for the engine, shared by the core and the
//! CLI frontend.

use std::fmt;

/// Log level for filtering messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "TRACE"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Logging configuration: a minimum level plus per-subsystem toggles so
/// noisy components (the clock, the mixer) can be silenced independently.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: LogLevel,
    pub enable_clock: bool,
    pub enable_pools: bool,
    pub enable_aggregator: bool,
    pub enable_mixer: bool,
    pub enable_lifecycle: bool,
    pub max_entries: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            enable_clock: true,
            enable_pools: true,
            enable_aggregator: true,
            enable_mixer: true,
            enable_lifecycle: true,
            max_entries: 1000,
        }
    }
}

impl LogConfig {
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            max_entries: 5000,
            ..Default::default()
        }
    }

    pub fn quiet() -> Self {
        Self {
            level: LogLevel::Warn,
            enable_clock: false,
            enable_pools: false,
            enable_aggregator: false,
            enable_mixer: false,
            max_entries: 100,
            ..Default::default()
        }
    }

    pub fn disabled() -> Self {
        Self {
            level: LogLevel::Error,
            enable_clock: false,
            enable_pools: false,
            enable_aggregator: false,
            enable_mixer: false,
            enable_lifecycle: false,
            max_entries: 0,
        }
    }
}

/// A single log entry.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub subsystem: &'static str,
    pub message: String,
}

/// Ring-bounded logger that collects structured entries in-process; the
/// CLI's `StructuredLogger` additionally fans these out to stdout/stderr/file.
#[derive(Debug, Clone)]
pub struct EngineLogger {
    config: LogConfig,
    entries: Vec<LogEntry>,
}

impl EngineLogger {
    pub fn new(config: LogConfig) -> Self {
        let capacity = config.max_entries.min(1000);
        Self {
            config,
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn log(&mut self, level: LogLevel, subsystem: &'static str, message: impl fmt::Display) {
        if level < self.config.level {
            return;
        }

        let enabled = match subsystem {
            "CLOCK" => self.config.enable_clock,
            "DECODE_POOL" | "ENCODE_POOL" => self.config.enable_pools,
            "AGGREGATOR" => self.config.enable_aggregator,
            "MIXER" => self.config.enable_mixer,
            "LIFECYCLE" | "RADIO" => self.config.enable_lifecycle,
            _ => true,
        };
        if !enabled {
            return;
        }

        let entry = LogEntry {
            level,
            subsystem,
            message: message.to_string(),
        };

        if self.config.max_entries > 0 {
            if self.entries.len() >= self.config.max_entries {
                self.entries.remove(0);
            }
            self.entries.push(entry);
        }

        #[cfg(any(test, debug_assertions))]
        {
            eprintln!("[{}] {}: {}", level, subsystem, message);
        }
    }

    pub fn trace(&mut self, subsystem: &'static str, message: impl fmt::Display) {
        self.log(LogLevel::Trace, subsystem, message);
    }

    pub fn debug(&mut self, subsystem: &'static str, message: impl fmt::Display) {
        self.log(LogLevel::Debug, subsystem, message);
    }

    pub fn info(&mut self, subsystem: &'static str, message: impl fmt::Display) {
        self.log(LogLevel::Info, subsystem, message);
    }

    pub fn warn(&mut self, subsystem: &'static str, message: impl fmt::Display) {
        self.log(LogLevel::Warn, subsystem, message);
    }

    pub fn error(&mut self, subsystem: &'static str, message: impl fmt::Display) {
        self.log(LogLevel::Error, subsystem, message);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn entries_for_subsystem(&self, subsystem: &str) -> Vec<&LogEntry> {
        self.entries.iter().filter(|e| e.subsystem == subsystem).collect()
    }

    pub fn entries_at_level(&self, level: LogLevel) -> Vec<&LogEntry> {
        self.entries.iter().filter(|e| e.level >= level).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for EngineLogger {
    fn default() -> Self {
        Self::new(LogConfig::default())
    }
}

impl fmt::Display for EngineLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "[{}] {}: {}", entry.level, entry.subsystem, entry.message)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_by_level() {
        let mut logger = EngineLogger::new(LogConfig {
            level: LogLevel::Info,
            ..Default::default()
        });
        logger.trace("CLOCK", "trace message");
        logger.debug("CLOCK", "debug message");
        logger.info("CLOCK", "info message");
        logger.warn("CLOCK", "warn message");
        assert_eq!(logger.entries().len(), 2);
    }

    #[test]
    fn filters_by_subsystem() {
        let mut logger = EngineLogger::new(LogConfig {
            level: LogLevel::Debug,
            enable_clock: false,
            ..Default::default()
        });
        logger.info("CLOCK", "clock message");
        logger.info("MIXER", "mixer message");
        assert_eq!(logger.entries().len(), 1);
        assert_eq!(logger.entries()[0].subsystem, "MIXER");
    }

    #[test]
    fn caps_entries_at_max() {
        let mut logger = EngineLogger::new(LogConfig {
            level: LogLevel::Debug,
            max_entries: 3,
            ..Default::default()
        });
        for i in 1..=4 {
            logger.info("CLOCK", format!("message {i}"));
        }
        assert_eq!(logger.entries().len(), 3);
        assert!(logger.entries()[0].message.contains("message 2"));
    }
}
