//! To-do tasks

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A to-do task, normalized from the remote todo service (or read back from the sink).
///
/// `id` is the todo service's identifier. It is immutable across edits, but a task that was
/// first created in the sink does not have one until the push phase of a sync pass creates
/// it remotely and backfills the newly assigned id (see [`SinkTask`]).
///
/// `priority` ranges over 1..=4, where 1 is normal and 4 is urgent. This is the todo
/// service's convention; the sink displays the inverted scale and the conversion happens at
/// that boundary only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    id: String,
    content: String,
    description: String,
    priority: u8,
    due: Option<NaiveDate>,
    project: Option<String>,
    labels: Vec<String>,
    checked: bool,
    is_deleted: bool,
    /// Human-readable recurrence rule ("every monday"), opaque to the sync
    recurrence: Option<String>,
}

impl Task {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        content: String,
        description: String,
        priority: u8,
        due: Option<NaiveDate>,
        project: Option<String>,
        labels: Vec<String>,
        checked: bool,
        is_deleted: bool,
        recurrence: Option<String>,
    ) -> Self {
        Self {
            id,
            content,
            description,
            priority,
            due,
            project,
            labels,
            checked,
            is_deleted,
            recurrence,
        }
    }

    /// A minimal record for an entry of the completed-items feed.
    ///
    /// The feed only reports id and content; the sink upsert just checks the "done" box.
    pub fn completed(id: String, content: String) -> Self {
        Self::new(id, content, String::new(), 1, None, None, Vec::new(), true, false, None)
    }

    pub fn id(&self) -> &str { &self.id }
    pub fn content(&self) -> &str { &self.content }
    pub fn description(&self) -> &str { &self.description }
    pub fn priority(&self) -> u8 { self.priority }
    pub fn due(&self) -> Option<NaiveDate> { self.due }
    pub fn project(&self) -> Option<&str> { self.project.as_deref() }
    pub fn labels(&self) -> &[String] { &self.labels }
    pub fn checked(&self) -> bool { self.checked }
    pub fn is_deleted(&self) -> bool { self.is_deleted }
    pub fn recurrence(&self) -> Option<&str> { self.recurrence.as_deref() }

    pub fn set_id(&mut self, id: String) {
        self.id = id;
    }
}

/// A task as stored in the sink, read back for the push phase of a sync pass.
///
/// `internal_id` is the sink's own page identifier (needed to address updates and the id
/// backfill). `remote_id` is the todo service's id, or `None` for a task that was created
/// in the sink and has never been pushed.
#[derive(Clone, Debug, PartialEq)]
pub struct SinkTask {
    internal_id: String,
    remote_id: Option<String>,
    task: Task,
}

impl SinkTask {
    pub fn new(internal_id: String, remote_id: Option<String>, task: Task) -> Self {
        Self { internal_id, remote_id, task }
    }

    pub fn internal_id(&self) -> &str { &self.internal_id }
    pub fn remote_id(&self) -> Option<&str> { self.remote_id.as_deref() }
    pub fn task(&self) -> &Task { &self.task }
}
