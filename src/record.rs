use serde::Serialize;
use std::fmt;

/// Severity of a [`LogRecord`], ordered from most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&tracing::Level> for Level {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE => Level::Trace,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// A single log record captured from the host log framework.
///
/// Records are immutable once built: the layer creates them at the moment
/// of logging, the buffer owns them until the next drain, and the
/// formatter only reads them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    pub level: Level,
    pub logger: String,
    pub thread: String,
    pub message: Option<String>,
    /// Formatted error trace, one entry per line.
    pub trace: Option<Vec<String>>,
}

impl LogRecord {
    pub fn new(
        timestamp_ms: i64,
        level: Level,
        logger: impl Into<String>,
        thread: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp_ms,
            level,
            logger: logger.into(),
            thread: thread.into(),
            message: Some(message.into()),
            trace: None,
        }
    }

    pub fn with_trace(mut self, trace: Vec<String>) -> Self {
        self.trace = Some(trace);
        self
    }

    /// True when the record carries neither a message nor a trace.
    pub fn is_noise(&self) -> bool {
        let blank_message = self.message.as_deref().map_or(true, str::is_empty);
        blank_message && self.trace.is_none()
    }
}
