use crate::error::{Error, Result};
use std::str::FromStr;

/// Minimum severity a [`Logger`] lets through. `Off` silences everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    #[default]
    Fatal,
    Off,
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "fatal" => Ok(LogLevel::Fatal),
            "off" => Ok(LogLevel::Off),
            _ => Err(Error::Configuration(format!("Log level \"{}\" is invalid.", s))),
        }
    }
}

/// Schema-scoped logger forwarding to `tracing` under target `rust_mapper`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Logger {
    level: LogLevel,
}

impl Logger {
    pub fn new(level: LogLevel) -> Self {
        Self { level }
    }

    /// Parse an optional level name; `None` means the default (`fatal`).
    pub fn from_config(level: Option<&str>) -> Result<Self> {
        let level = level.map(str::parse::<LogLevel>).transpose()?.unwrap_or_default();
        Ok(Self::new(level))
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        level != LogLevel::Off && level >= self.level
    }

    fn log(&self, level: LogLevel, message: &str) -> bool {
        if !self.enabled(level) {
            return false;
        }
        match level {
            LogLevel::Trace => tracing::trace!(target: "rust_mapper", "{}", message),
            LogLevel::Debug => tracing::debug!(target: "rust_mapper", "{}", message),
            LogLevel::Info => tracing::info!(target: "rust_mapper", "{}", message),
            LogLevel::Warn => tracing::warn!(target: "rust_mapper", "{}", message),
            LogLevel::Error => tracing::error!(target: "rust_mapper", "{}", message),
            LogLevel::Fatal => tracing::error!(target: "rust_mapper", fatal = true, "{}", message),
            LogLevel::Off => {}
        }
        true
    }

    pub fn trace(&self, message: impl AsRef<str>) -> bool {
        self.log(LogLevel::Trace, message.as_ref())
    }

    pub fn debug(&self, message: impl AsRef<str>) -> bool {
        self.log(LogLevel::Debug, message.as_ref())
    }

    pub fn info(&self, message: impl AsRef<str>) -> bool {
        self.log(LogLevel::Info, message.as_ref())
    }

    pub fn warn(&self, message: impl AsRef<str>) -> bool {
        self.log(LogLevel::Warn, message.as_ref())
    }

    pub fn error(&self, message: impl AsRef<str>) -> bool {
        self.log(LogLevel::Error, message.as_ref())
    }

    pub fn fatal(&self, message: impl AsRef<str>) -> bool {
        self.log(LogLevel::Fatal, message.as_ref())
    }
}
