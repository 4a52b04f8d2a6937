//! Reconciliation of the host calendar against the sink

use std::error::Error;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::settings::SyncSettings;
use crate::sync::progress::{PassSummary, SyncProgress};
use crate::sync::PassStatus;
use crate::traits::{CalendarSource, EventSink, SyncHandler};

const ACTIVITY: &str = "calendar";

/// Syncs calendar events, one way: host calendar → sink.
///
/// One pass enumerates the events created or modified since the last checkpoint (recurring
/// series expanded into occurrences), upserts them into the sink, then removes the sink
/// pages of events deleted since the checkpoint. The checkpoint only moves when the whole
/// pass succeeded.
pub struct CalendarReconciler<C: CalendarSource, S: EventSink> {
    source: C,
    sink: S,
    settings: SyncSettings,
    checkpoints: Arc<Mutex<CheckpointStore>>,

    last_sync: Option<DateTime<FixedOffset>>,
    status: PassStatus,
    last_error: Option<String>,
}

impl<C: CalendarSource, S: EventSink> CalendarReconciler<C, S> {
    pub fn new(
        source: C,
        sink: S,
        settings: SyncSettings,
        checkpoints: Arc<Mutex<CheckpointStore>>,
    ) -> Self {
        let last_sync = checkpoints.lock().unwrap().load(ACTIVITY).map(|c| c.last_sync);
        match &last_sync {
            Some(t) => log::info!("Last calendar sync: {}", t.format("%d/%m/%Y %H:%M:%S")),
            None => log::info!("Last calendar sync: never"),
        }

        Self {
            source,
            sink,
            settings,
            checkpoints,
            last_sync,
            status: PassStatus::NotStarted,
            last_error: None,
        }
    }

    pub fn status(&self) -> PassStatus {
        self.status
    }

    /// The error that failed the most recent pass, for inspection
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    async fn run_pass(&mut self, progress: &mut SyncProgress) -> Result<(), Box<dyn Error>> {
        // The host session is thread-affine: acquired fresh for this pass, and released
        // when the guard drops, error or not
        let _session = self.source.acquire_session()?;

        let (from, to) = self.settings.window();
        let modified_since = self.last_sync.map(|t| t.with_timezone(&Utc));

        let events = self.source.events_between(from, to, modified_since).await?;
        for event in events {
            if self.settings.is_ignored(event.subject()) {
                progress.info(&format!("Skipping event: {}", event.subject()));
                continue;
            }

            progress.info(&format!(
                "Syncing event: {} ({})",
                event.subject(),
                event.start().format("%d/%m/%Y")
            ));

            let existing = self.sink.find_event(event.id()).await?;
            match existing {
                Some(internal_id) => {
                    progress.debug("Event already exists in the sink, updating it");
                    self.sink.update_event(&internal_id, &event).await?;
                    progress.record_updated();
                }
                None => {
                    progress.debug("Event does not exist in the sink, creating it");
                    self.sink.create_event(&event).await?;
                    progress.record_created();
                }
            }
        }

        let deleted = self.source.deleted_events(modified_since).await?;
        for event in deleted {
            if self.settings.is_ignored(event.subject()) {
                progress.info(&format!("Skipping event: {}", event.subject()));
                continue;
            }

            let existing = self.sink.find_event(event.id()).await?;
            match existing {
                Some(internal_id) => {
                    progress.info(&format!("Deleting event: {}", event.subject()));
                    self.sink.delete_event(&internal_id).await?;
                    progress.record_deleted();
                }
                None => {
                    progress.debug(&format!("Deleted event {} is not in the sink, skipping", event.subject()));
                }
            }
        }

        let now = self.settings.now_in_zone();
        self.checkpoints
            .lock()
            .unwrap()
            .save(ACTIVITY, Checkpoint { last_sync: now, sync_token: None })?;
        self.last_sync = Some(now);

        Ok(())
    }
}

#[async_trait]
impl<C, S> SyncHandler for CalendarReconciler<C, S>
where
    C: CalendarSource + Send + Sync,
    S: EventSink + Send + Sync,
{
    fn activity(&self) -> &str {
        ACTIVITY
    }

    fn last_sync(&self) -> Option<DateTime<FixedOffset>> {
        self.last_sync
    }

    async fn run_one_pass(&mut self) -> Result<PassSummary, Box<dyn Error>> {
        let mut progress = SyncProgress::new();

        match self.run_pass(&mut progress).await {
            Ok(()) => {
                log::info!("Calendar sync successful: {}", progress.summary());
                self.status = PassStatus::Success;
                self.last_error = None;
                Ok(progress.summary())
            }
            Err(err) => {
                log::error!("Calendar sync failed: {}", err);
                self.status = PassStatus::Failed;
                self.last_error = Some(err.to_string());
                Err(err)
            }
        }
    }
}
