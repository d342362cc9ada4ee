//! Firewall event notifications.
//!
//! The core never knows where events end up: it is handed an [`EventSink`]
//! and writes timestamped lines to it. Which sinks are wired together is
//! decided by the caller.

use std::collections::VecDeque;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Local};
use log::error;
use serde::Serialize;
use thiserror::Error;

use crate::utils::format_event_line;

/// Errors that can occur while setting up an event sink
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to open event log {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Receiver of human-readable firewall event lines
#[cfg_attr(test, mockall::automock)]
pub trait EventSink: Send + Sync {
    fn log_event(&self, line: &str);
}

/// Events produced by the detection core
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FirewallEvent {
    Blocked { source: String, rps: u64 },
    Unblocked { source: String },
    CaptureFailure { reason: String },
}

impl fmt::Display for FirewallEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FirewallEvent::Blocked { source, rps } => write!(f, "Blocked {} (rps={})", source, rps),
            FirewallEvent::Unblocked { source } => write!(f, "Unblocked {}", source),
            FirewallEvent::CaptureFailure { reason } => write!(f, "Packet capture error: {}", reason),
        }
    }
}

impl FirewallEvent {
    pub fn to_log_line(&self, at: &DateTime<Local>) -> String {
        format_event_line(at, &self.to_string())
    }
}

/// Stamp `event` with the current local time and hand it to `sink`
pub fn emit(sink: &dyn EventSink, event: &FirewallEvent) {
    sink.log_event(&event.to_log_line(&Local::now()));
}

/// Writes event lines to standard output
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn log_event(&self, line: &str) {
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{}", line) {
            error!("Failed to write firewall event to stdout: {}", e);
        }
    }
}

/// Appends event lines to a file
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| SinkError::Open { path: path.clone(), source })?;
        Ok(Self { path, file: Mutex::new(file) })
    }
}

impl EventSink for FileSink {
    fn log_event(&self, line: &str) {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(file, "{}", line) {
            error!("Failed to append firewall event to {}: {}", self.path.display(), e);
        }
    }
}

/// Keeps the most recent event lines in memory
#[derive(Debug)]
pub struct RecentEvents {
    capacity: usize,
    lines: Mutex<VecDeque<String>>,
}

impl RecentEvents {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Retained lines, oldest first
    pub fn recent(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

impl EventSink for RecentEvents {
    fn log_event(&self, line: &str) {
        if self.capacity == 0 {
            return;
        }
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.to_owned());
    }
}

/// Forwards every line to each of its sinks in order
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn log_event(&self, line: &str) {
        for sink in &self.sinks {
            sink.log_event(line);
        }
    }
}
