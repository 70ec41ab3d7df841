//! Progress reporting for sync runs.
//!
//! The engine writes coarse progress to a [`ProgressSink`] after every unit
//! of work. [`ProgressSlot`] is a shared slot a poller can read at any
//! time; its lock is held only for the copy in or out.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// One progress sample
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub current: usize,
    pub total: usize,
    /// 0..=100
    pub percentage: u8,
    pub message: String,
    /// Unix seconds
    pub timestamp: i64,
}

impl ProgressUpdate {
    pub fn new(current: usize, total: usize, message: impl Into<String>) -> Self {
        let percentage = if total == 0 {
            0
        } else {
            (current.saturating_mul(100) / total).min(100) as u8
        };
        Self {
            current,
            total,
            percentage,
            message: message.into(),
            timestamp: Utc::now().timestamp(),
        }
    }
}

/// Receives progress from a running sync.
pub trait ProgressSink: Send + Sync {
    fn report(&self, update: ProgressUpdate);

    /// Called once when the run ends, successful or not
    fn clear(&self) {}
}

/// Discards all progress
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _update: ProgressUpdate) {}
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    fn report(&self, update: ProgressUpdate) {
        self(update)
    }
}

/// Shared slot holding the latest update, readable from another task.
#[derive(Debug, Clone, Default)]
pub struct ProgressSlot {
    inner: Arc<Mutex<Option<ProgressUpdate>>>,
}

impl ProgressSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<ProgressUpdate>> {
        // A panicked writer leaves a complete value behind; keep serving it
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Latest update, or `None` when no run is in progress
    pub fn snapshot(&self) -> Option<ProgressUpdate> {
        self.lock().clone()
    }
}

impl ProgressSink for ProgressSlot {
    fn report(&self, update: ProgressUpdate) {
        *self.lock() = Some(update);
    }

    fn clear(&self) {
        *self.lock() = None;
    }
}

/// Step counter for one run
pub(crate) struct ProgressTracker<'a> {
    sink: &'a dyn ProgressSink,
    current: usize,
    total: usize,
}

impl<'a> ProgressTracker<'a> {
    pub(crate) fn new(sink: &'a dyn ProgressSink, total: usize) -> Self {
        Self {
            sink,
            current: 0,
            total,
        }
    }

    /// Report without advancing
    pub(crate) fn announce(&self, message: impl Into<String>) {
        self.sink
            .report(ProgressUpdate::new(self.current, self.total, message));
    }

    /// Advance one unit and report
    pub(crate) fn step(&mut self, message: impl Into<String>) {
        self.current += 1;
        if self.current > self.total {
            self.total = self.current;
        }
        self.announce(message);
    }

    pub(crate) fn extend_total(&mut self, extra: usize) {
        self.total += extra;
    }
}
