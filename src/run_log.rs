//! Append-only event log scoped to a single relay run.
//!
//! A [`RunLog`] is handed to the engine and to every endpoint it opens. Each
//! entry is forwarded to `tracing` as it is recorded, and the accumulated
//! entries back the error report sent when a run fails.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local};
use parking_lot::Mutex;

/// Severity of a recorded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventLevel {
    Info,
    Warning,
    Error,
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERRO"),
        }
    }
}

/// One entry in the run log.
#[derive(Debug, Clone)]
pub struct RunEvent {
    pub at: DateTime<Local>,
    pub level: EventLevel,
    pub message: String,
}

impl fmt::Display for RunEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} - {}",
            self.at.format("%Y-%m-%d %H:%M:%S"),
            self.level,
            self.message
        )
    }
}

/// Cloneable handle to the events of one run.
#[derive(Debug, Clone, Default)]
pub struct RunLog {
    events: Arc<Mutex<Vec<RunEvent>>>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{message}");
        self.push(EventLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{message}");
        self.push(EventLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("{message}");
        self.push(EventLevel::Error, message);
    }

    fn push(&self, level: EventLevel, message: String) {
        self.events.lock().push(RunEvent {
            at: Local::now(),
            level,
            message,
        });
    }

    /// Snapshot of all events recorded so far.
    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().clone()
    }

    /// Messages of the error-level events, oldest first.
    pub fn errors(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.level == EventLevel::Error)
            .map(|e| e.message.clone())
            .collect()
    }

    pub fn has_errors(&self) -> bool {
        self.events
            .lock()
            .iter()
            .any(|e| e.level == EventLevel::Error)
    }

    /// The whole log rendered one event per line.
    pub fn transcript(&self) -> String {
        self.events
            .lock()
            .iter()
            .map(|e| format!("{e}\n"))
            .collect()
    }
}
