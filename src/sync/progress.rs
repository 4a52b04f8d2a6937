//! Utilities to track the progression of a sync pass

use std::fmt::{Display, Formatter};

use chrono::{DateTime, FixedOffset};

/// What a presentation layer gets to see of a sync worker.
///
/// Deliberately coarse: a tray widget needs "is it running", "did the last pass fail" and
/// "when did it last succeed"; error details belong to the logs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WorkerStatus {
    pub running: bool,
    pub error: bool,
    pub last_sync: Option<DateTime<FixedOffset>>,
}

impl Display for WorkerStatus {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        if self.running {
            return write!(f, "Syncing...");
        }
        match (self.error, &self.last_sync) {
            (true, _) => write!(f, "Error"),
            (false, Some(t)) => write!(f, "OK (last sync: {})", t.format("%d/%m/%Y %H:%M:%S")),
            (false, None) => write!(f, "OK (never synced)"),
        }
    }
}

/// See [`status_channel`]
pub type StatusSender = tokio::sync::watch::Sender<WorkerStatus>;
/// See [`status_channel`]
pub type StatusReceiver = tokio::sync::watch::Receiver<WorkerStatus>;

/// Create a status channel, that a presentation layer can watch while a scheduler runs.
pub fn status_channel() -> (StatusSender, StatusReceiver) {
    tokio::sync::watch::channel(WorkerStatus::default())
}

/// What one pass did to the sink.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub created: u32,
    pub updated: u32,
    pub deleted: u32,
}

impl PassSummary {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl Display for PassSummary {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "nothing to sync");
        }
        let mut parts = Vec::new();
        if self.created > 0 {
            parts.push(format!("{} created", self.created));
        }
        if self.updated > 0 {
            parts.push(format!("{} updated", self.updated));
        }
        if self.deleted > 0 {
            parts.push(format!("{} deleted", self.deleted));
        }
        write!(f, "{}", parts.join(", "))
    }
}

/// A structure that tracks the progression of one pass and counts what it applied.
pub struct SyncProgress {
    summary: PassSummary,
}

impl SyncProgress {
    pub fn new() -> Self {
        Self { summary: PassSummary::default() }
    }

    pub fn record_created(&mut self) {
        self.summary.created += 1;
    }
    pub fn record_updated(&mut self) {
        self.summary.updated += 1;
    }
    pub fn record_deleted(&mut self) {
        self.summary.deleted += 1;
    }

    pub fn summary(&self) -> PassSummary {
        self.summary
    }

    /// Log an info message
    pub fn info(&self, text: &str) {
        log::info!("{}", text);
    }
    /// Log a debug message
    pub fn debug(&self, text: &str) {
        log::debug!("{}", text);
    }
}
