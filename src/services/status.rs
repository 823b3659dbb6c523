//! Status sinks: append-only, human-readable pipeline milestones

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};

/// Append-only log of pipeline milestones
///
/// Appends are fire-and-forget and must preserve call order.
pub trait StatusSink: Send + Sync {
    fn append(&self, message: &str);
}

/// Emits each status line as a `tracing` info event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStatusSink;

impl StatusSink for TracingStatusSink {
    fn append(&self, message: &str) {
        tracing::info!(target: "rmbg::status", "{}", message);
    }
}

/// Discards every status line
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpStatusSink;

impl StatusSink for NoOpStatusSink {
    fn append(&self, _message: &str) {}
}

/// A timestamped status line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Keeps every status line in memory; clones share the same log
#[derive(Debug, Default, Clone)]
pub struct MemoryStatusSink {
    entries: Arc<Mutex<Vec<StatusEntry>>>,
}

impl MemoryStatusSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages in append order
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .map(|entry| entry.message)
            .collect()
    }

    #[must_use]
    pub fn entries(&self) -> Vec<StatusEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// True if any message contains `needle`
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.entries().iter().any(|entry| entry.message.contains(needle))
    }
}

impl StatusSink for MemoryStatusSink {
    fn append(&self, message: &str) {
        let entry = StatusEntry {
            at: Utc::now(),
            message: message.to_string(),
        };
        match self.entries.lock() {
            Ok(mut entries) => entries.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}
