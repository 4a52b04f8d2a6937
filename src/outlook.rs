//! The host calendar source (an Outlook-style desktop store)
//!
//! The raw store is reached through [`AppointmentStore`], a narrow contract over the
//! host automation interface: enumerate appointments, resolve one occurrence of a series,
//! open a session. Everything above that line lives here: normalizing raw appointments
//! into canonical [`Event`]s, expanding recurring series (see [`crate::recurrence`]), and
//! buffering the tombstones of deleted occurrences so the deleted-items pass can replay
//! them.

use std::convert::TryFrom;
use std::error::Error;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::event::{occurrence_id, Event};
use crate::recurrence::{
    expand, Exception, Expanded, Occurrence, OccurrenceLookupError, OccurrenceSource,
    RecurrenceKind, Series,
};
use crate::traits::CalendarSource;

/// An appointment as the host store hands it out, before normalization.
#[derive(Clone, Debug, PartialEq)]
pub struct RawAppointment {
    /// The host's globally unique appointment id
    pub id: String,
    pub subject: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub location: String,
    /// The host's category field, mapped to a project in the sink
    pub categories: Option<String>,
    pub organizer: String,
    pub body: String,
    pub last_modified: DateTime<Utc>,
    /// Present when this appointment is a recurring series
    pub recurrence: Option<RawRecurrence>,
}

/// The recurrence pattern of a raw appointment.
#[derive(Clone, Debug, PartialEq)]
pub struct RawRecurrence {
    /// The host's numeric recurrence type (see [`RecurrenceKind`])
    pub kind_code: i32,
    /// The last date the pattern covers
    pub pattern_end: DateTime<Utc>,
    pub exceptions: Vec<Exception>,
}

/// The raw contract with the host calendar store.
///
/// Implementations wrap the host automation interface; the in-memory one in
/// [`crate::mocks`] backs the integration tests. Methods are synchronous because the host
/// interface is a blocking, thread-affine one.
pub trait AppointmentStore {
    /// See [`CalendarSource::Session`]
    type Session: Send;

    fn open_session(&self) -> Result<Self::Session, Box<dyn Error>>;

    /// Appointments (single or series) within `[from, to]`, filtered by `modified_since`
    fn appointments_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        modified_since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawAppointment>, Box<dyn Error>>;

    /// Appointments sitting in the host's deleted-items folder
    fn deleted_appointments(
        &self,
        modified_since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawAppointment>, Box<dyn Error>>;

    /// The concrete occurrence of series `series_id` on `date`
    fn occurrence_on(
        &self,
        series_id: &str,
        date: NaiveDate,
    ) -> Result<Occurrence, OccurrenceLookupError>;
}

/// [`OccurrenceSource`] view of one series of an [`AppointmentStore`]
struct StoreOccurrences<'a, S: AppointmentStore> {
    store: &'a S,
    series_id: &'a str,
}

impl<'a, S: AppointmentStore> OccurrenceSource for StoreOccurrences<'a, S> {
    fn occurrence_on(&self, date: NaiveDate) -> Result<Occurrence, OccurrenceLookupError> {
        self.store.occurrence_on(self.series_id, date)
    }
}

/// A calendar source backed by an [`AppointmentStore`].
pub struct OutlookCalendar<S: AppointmentStore> {
    store: S,
    /// Deleted occurrences discovered while expanding live series, waiting for the
    /// deleted-items pass to pick them up
    pending_tombstones: Mutex<Vec<Event>>,
}

impl<S: AppointmentStore> OutlookCalendar<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            pending_tombstones: Mutex::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Expand one recurring series, collecting live events and buffering tombstones.
    fn expand_series(
        &self,
        raw: &RawAppointment,
        recurrence: &RawRecurrence,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        modified_since: Option<DateTime<Utc>>,
        out: &mut Vec<Event>,
    ) {
        let kind = match RecurrenceKind::try_from(recurrence.kind_code) {
            Ok(kind) => kind,
            Err(err) => {
                // Unexpandable pattern: give up on this series, not on the whole pass
                log::error!("Cannot expand series {:?}: {}", raw.subject, err);
                return;
            }
        };

        let series = Series::new(raw.start, recurrence.pattern_end, kind, recurrence.exceptions.clone());
        let lookup = StoreOccurrences { store: &self.store, series_id: &raw.id };

        for expanded in expand(&series, &lookup, from, to, modified_since) {
            match expanded {
                Expanded::Occurrence { index, occurrence } => {
                    out.push(occurrence_event(raw, index, &occurrence));
                }
                Expanded::Tombstone { index, date } => {
                    log::debug!(
                        "Occurrence {} of {:?} was deleted, keeping it for the deleted-items pass",
                        index, raw.subject
                    );
                    self.pending_tombstones
                        .lock()
                        .unwrap()
                        .push(tombstone_event(raw, index, date));
                }
            }
        }
    }
}

#[async_trait]
impl<S: AppointmentStore + Sync + Send> CalendarSource for OutlookCalendar<S> {
    type Session = S::Session;

    fn acquire_session(&self) -> Result<Self::Session, Box<dyn Error>> {
        self.store.open_session()
    }

    async fn events_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        modified_since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Event>, Box<dyn Error>> {
        let mut events = Vec::new();

        for raw in self.store.appointments_between(from, to, modified_since)? {
            log::debug!("Appointment {:?}, starting {}", raw.subject, raw.start);
            match &raw.recurrence {
                None => events.push(event_from_raw(&raw)),
                Some(recurrence) => {
                    self.expand_series(&raw, recurrence, from, to, modified_since, &mut events)
                }
            }
        }

        Ok(events)
    }

    async fn deleted_events(
        &self,
        modified_since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Event>, Box<dyn Error>> {
        let mut events = Vec::new();

        for raw in self.store.deleted_appointments(modified_since)? {
            log::debug!("Deleted appointment {:?}", raw.subject);
            if let Some(recurrence) = &raw.recurrence {
                // A deleted series takes all its occurrences with it
                self.expand_series(&raw, recurrence, raw.start, recurrence.pattern_end, modified_since, &mut events);
            }
            events.push(event_from_raw(&raw));
        }

        events.extend(self.pending_tombstones.lock().unwrap().drain(..));

        Ok(events)
    }
}

/// Normalize a single (non-expanded) appointment.
fn event_from_raw(raw: &RawAppointment) -> Event {
    Event::new(
        raw.id.clone(),
        raw.subject.clone(),
        raw.start,
        raw.end,
        raw.location.clone(),
        raw.categories.clone(),
        raw.organizer.clone(),
        raw.body.clone(),
        raw.last_modified,
    )
}

/// Normalize one expanded occurrence of a series. The timing comes from the occurrence,
/// everything else from the series.
fn occurrence_event(raw: &RawAppointment, index: u32, occurrence: &Occurrence) -> Event {
    Event::new(
        occurrence_id(&raw.id, index),
        raw.subject.clone(),
        occurrence.start,
        occurrence.end,
        raw.location.clone(),
        raw.categories.clone(),
        raw.organizer.clone(),
        raw.body.clone(),
        occurrence.last_modified,
    )
}

/// Synthesize the event record of a deleted occurrence: the pattern's computed start, plus
/// the series' base duration.
fn tombstone_event(raw: &RawAppointment, index: u32, date: DateTime<Utc>) -> Event {
    Event::new(
        occurrence_id(&raw.id, index),
        raw.subject.clone(),
        date,
        date + (raw.end - raw.start),
        raw.location.clone(),
        raw.categories.clone(),
        raw.organizer.clone(),
        raw.body.clone(),
        raw.last_modified,
    )
}
