//! The seams between the sync core and the three external systems
//!
//! The reconcilers in [`crate::sync`] are generic over these traits, so integration tests
//! can swap the real REST/host-store clients for in-memory mocks (see [`crate::mocks`]).

use std::error::Error;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};

use crate::event::Event;
use crate::sync::progress::PassSummary;
use crate::task::{SinkTask, Task};

/// A source of calendar events (the host calendar store).
#[async_trait]
pub trait CalendarSource {
    /// A handle on the host's thread-affine session.
    ///
    /// Such sessions cannot cross threads, so a reconciler acquires one fresh at the start
    /// of every pass and holds it for the duration of the pass; dropping the guard releases
    /// the session, whether the pass succeeded or not.
    type Session: Send;

    fn acquire_session(&self) -> Result<Self::Session, Box<dyn Error>>;

    /// Enumerate events within `[from, to]`, recurring series expanded into occurrences.
    /// When `modified_since` is set, only events modified at or after it are returned.
    async fn events_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        modified_since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Event>, Box<dyn Error>>;

    /// Enumerate deleted events, including tombstoned occurrences of recurring series
    /// discovered by the last [`events_between`](CalendarSource::events_between) call.
    async fn deleted_events(
        &self,
        modified_since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Event>, Box<dyn Error>>;
}

/// A remote todo service supporting token-based incremental reads.
#[async_trait]
pub trait TaskSource {
    /// Read the tasks changed since `sync_token` (everything on `None`), plus the completed
    /// items since `since`. Returns the changes and the token to resume from next time.
    async fn read_delta(
        &self,
        sync_token: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<(Vec<Task>, String), Box<dyn Error>>;

    /// Create a task remotely; returns the id the service assigned to it.
    async fn create(&self, task: &Task) -> Result<String, Box<dyn Error>>;

    async fn update(&self, task: &Task) -> Result<(), Box<dyn Error>>;

    async fn exists(&self, id: &str) -> Result<bool, Box<dyn Error>>;
}

/// The event side of the sink (one page per event).
///
/// `find_*` methods map an external id to the sink's own page id; all mutations address
/// pages by that internal id. Every create in the reconcilers is preceded by a `find`, so
/// re-running a half-finished pass never double-creates.
#[async_trait]
pub trait EventSink {
    async fn find_event(&self, id: &str) -> Result<Option<String>, Box<dyn Error>>;
    async fn create_event(&self, event: &Event) -> Result<(), Box<dyn Error>>;
    async fn update_event(&self, internal_id: &str, event: &Event) -> Result<(), Box<dyn Error>>;
    async fn delete_event(&self, internal_id: &str) -> Result<(), Box<dyn Error>>;
}

/// The task side of the sink.
#[async_trait]
pub trait TaskSink {
    async fn find_task(&self, id: &str) -> Result<Option<String>, Box<dyn Error>>;
    async fn create_task(&self, task: &Task) -> Result<(), Box<dyn Error>>;
    async fn update_task(&self, internal_id: &str, task: &Task) -> Result<(), Box<dyn Error>>;
    async fn delete_task(&self, internal_id: &str) -> Result<(), Box<dyn Error>>;

    /// Write a freshly assigned remote id onto a sink page (tasks created in the sink get
    /// their remote id only once the push phase has created them remotely).
    async fn update_task_id(&self, internal_id: &str, new_id: &str) -> Result<(), Box<dyn Error>>;

    /// The tasks edited in the sink within `[from, to)`, for the push phase.
    ///
    /// Archived/deleted pages are invisible to this query, which is why sink-side deletions
    /// are not propagated back to the todo service.
    async fn tasks_edited_between(
        &self,
        from: Option<DateTime<Utc>>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SinkTask>, Box<dyn Error>>;
}

/// One synced activity, as the scheduler sees it.
///
/// Both reconcilers implement this; the scheduler only needs "run one pass and tell me how
/// it went", plus enough state to report to a presentation layer.
#[async_trait]
pub trait SyncHandler {
    /// The checkpoint key of this activity ("calendar", "todoist"...)
    fn activity(&self) -> &str;

    /// When this activity last completed a successful pass (`None`: never)
    fn last_sync(&self) -> Option<DateTime<FixedOffset>>;

    /// Run a single sync pass to completion. An `Err` means the pass aborted and its
    /// checkpoint was left untouched; the caller decides whether and when to retry.
    async fn run_one_pass(&mut self) -> Result<PassSummary, Box<dyn Error>>;
}
