//! Calendar events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Build the canonical identifier of one occurrence of a recurring series.
///
/// A series contributes one event per occurrence; the suffix is the occurrence index within
/// the series, so the identifier is stable across runs and a re-sync recognizes occurrences
/// it has already created.
pub fn occurrence_id(series_id: &str, index: u32) -> String {
    format!("{}_{}", series_id, index)
}

/// A calendar event, normalized from the host calendar store.
///
/// `id` is the host's stable identifier for the appointment. Occurrences of a recurring
/// series carry a per-occurrence suffix (see [`occurrence_id`]), so each occurrence is
/// unique in the sink.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    id: String,
    subject: String,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    location: String,
    /// The host's category, used as the project name in the sink
    project: Option<String>,
    organizer: String,
    body: String,
    /// The last time this event was modified in the host store
    last_modified: DateTime<Utc>,
}

impl Event {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        subject: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        location: String,
        project: Option<String>,
        organizer: String,
        body: String,
        last_modified: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            subject,
            start,
            end,
            location,
            project,
            organizer,
            body,
            last_modified,
        }
    }

    pub fn id(&self) -> &str { &self.id }
    pub fn subject(&self) -> &str { &self.subject }
    pub fn start(&self) -> &DateTime<Utc> { &self.start }
    pub fn end(&self) -> &DateTime<Utc> { &self.end }
    pub fn location(&self) -> &str { &self.location }
    pub fn project(&self) -> Option<&str> { self.project.as_deref() }
    pub fn organizer(&self) -> &str { &self.organizer }
    pub fn body(&self) -> &str { &self.body }
    pub fn last_modified(&self) -> &DateTime<Utc> { &self.last_modified }

    /// The event duration, in fractional hours (the sink tracks time spent per project)
    pub fn duration_hours(&self) -> f64 {
        (self.end - self.start).num_seconds() as f64 / 3600.0
    }
}
