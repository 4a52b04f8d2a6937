//! In-memory stand-ins for the three external systems
//!
//! Integration tests sync a [`MemoryAppointmentStore`] or a [`MemoryTaskService`] against
//! a [`MemoryWorkspace`], which can be wired to a
//! [`MockBehaviour`](crate::mock_behaviour::MockBehaviour) to make chosen operations fail.
//! The workspace counts its mutations, so idempotence tests can assert that a repeated
//! pass applied nothing.
//!
//! All three are cheap handles over shared state: clones see the same data, so a test can
//! hand one clone to a reconciler and keep another for seeding and assertions.
#![cfg(feature = "mock_sources")]

use std::collections::{HashMap, HashSet, VecDeque};
use std::error::Error;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Timelike, Utc};

use crate::event::Event;
use crate::mock_behaviour::MockBehaviour;
use crate::outlook::{AppointmentStore, RawAppointment};
use crate::recurrence::{Occurrence, OccurrenceLookupError};
use crate::task::{SinkTask, Task};
use crate::traits::{EventSink, TaskSink, TaskSource};

/// An in-memory appointment store.
#[derive(Clone, Default)]
pub struct MemoryAppointmentStore {
    appointments: Arc<Mutex<Vec<RawAppointment>>>,
    deleted: Arc<Mutex<Vec<RawAppointment>>>,
    /// Occurrence lookups that must fail, as the host does when the fixed-step walk lands
    /// on a date it has no occurrence for
    failing_occurrences: Arc<Mutex<HashSet<(String, NaiveDate)>>>,
    active_sessions: Arc<AtomicI32>,
}

impl MemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_appointment(&self, appointment: RawAppointment) {
        self.appointments.lock().unwrap().push(appointment);
    }

    pub fn add_deleted(&self, appointment: RawAppointment) {
        self.deleted.lock().unwrap().push(appointment);
    }

    pub fn fail_occurrence_on(&self, series_id: &str, date: NaiveDate) {
        self.failing_occurrences
            .lock()
            .unwrap()
            .insert((series_id.to_string(), date));
    }

    /// How many sessions are currently open (0, unless a pass is mid-flight)
    pub fn active_sessions(&self) -> i32 {
        self.active_sessions.load(Ordering::SeqCst)
    }
}

/// A session guard of the mocked store; releases its slot on drop.
pub struct MemorySession {
    active: Arc<AtomicI32>,
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AppointmentStore for MemoryAppointmentStore {
    type Session = MemorySession;

    fn open_session(&self) -> Result<MemorySession, Box<dyn Error>> {
        self.active_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(MemorySession { active: self.active_sessions.clone() })
    }

    fn appointments_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        modified_since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawAppointment>, Box<dyn Error>> {
        Ok(self
            .appointments
            .lock()
            .unwrap()
            .iter()
            .filter(|a| {
                let fresh = modified_since.map(|s| a.last_modified >= s).unwrap_or(true);
                // A series is always handed out; the expansion clamps it to the window
                let in_window = a.recurrence.is_some() || (a.start <= to && a.end >= from);
                fresh && in_window
            })
            .cloned()
            .collect())
    }

    fn deleted_appointments(
        &self,
        modified_since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RawAppointment>, Box<dyn Error>> {
        Ok(self
            .deleted
            .lock()
            .unwrap()
            .iter()
            .filter(|a| modified_since.map(|s| a.last_modified >= s).unwrap_or(true))
            .cloned()
            .collect())
    }

    fn occurrence_on(&self, series_id: &str, date: NaiveDate) -> Result<Occurrence, OccurrenceLookupError> {
        if self.failing_occurrences.lock().unwrap().contains(&(series_id.to_string(), date)) {
            return Err(OccurrenceLookupError {
                date,
                reason: "the host store has no occurrence there".to_string(),
            });
        }

        let appointments = self.appointments.lock().unwrap();
        let deleted = self.deleted.lock().unwrap();
        let series = appointments
            .iter()
            .chain(deleted.iter())
            .find(|a| a.id == series_id)
            .ok_or_else(|| OccurrenceLookupError {
                date,
                reason: format!("unknown series {}", series_id),
            })?;

        let start = Utc.from_utc_datetime(&date.and_time(series.start.time()));
        Ok(Occurrence {
            start,
            end: start + (series.end - series.start),
            last_modified: series.last_modified,
        })
    }
}

/// An in-memory todo service. Tests queue up deltas; reads pop them in order.
#[derive(Clone, Default)]
pub struct MemoryTaskService {
    deltas: Arc<Mutex<VecDeque<(Vec<Task>, String)>>>,
    remote_ids: Arc<Mutex<HashSet<String>>>,
    created: Arc<Mutex<Vec<Task>>>,
    updated: Arc<Mutex<Vec<Task>>>,
    next_id: Arc<AtomicU32>,
}

impl MemoryTaskService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the changes (and the token) the next delta read will return
    pub fn push_delta(&self, tasks: Vec<Task>, token: &str) {
        self.deltas.lock().unwrap().push_back((tasks, token.to_string()));
    }

    /// Make `id` known to the service, so `exists(id)` holds
    pub fn add_remote_id(&self, id: &str) {
        self.remote_ids.lock().unwrap().insert(id.to_string());
    }

    /// The tasks created through the service, in order
    pub fn created_tasks(&self) -> Vec<Task> {
        self.created.lock().unwrap().clone()
    }

    /// The tasks updated through the service, in order
    pub fn updated_tasks(&self) -> Vec<Task> {
        self.updated.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskSource for MemoryTaskService {
    async fn read_delta(
        &self,
        _sync_token: Option<&str>,
        _since: Option<DateTime<Utc>>,
    ) -> Result<(Vec<Task>, String), Box<dyn Error>> {
        Ok(self
            .deltas
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| (Vec::new(), "token-idle".to_string())))
    }

    async fn create(&self, task: &Task) -> Result<String, Box<dyn Error>> {
        let id = format!("remote-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.remote_ids.lock().unwrap().insert(id.clone());
        self.created.lock().unwrap().push(task.clone());
        Ok(id)
    }

    async fn update(&self, task: &Task) -> Result<(), Box<dyn Error>> {
        if self.remote_ids.lock().unwrap().contains(task.id()) == false {
            return Err(format!("Cannot update unknown task {}", task.id()).into());
        }
        self.updated.lock().unwrap().push(task.clone());
        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool, Box<dyn Error>> {
        Ok(self.remote_ids.lock().unwrap().contains(id))
    }
}

struct StoredTask {
    remote_id: Option<String>,
    task: Task,
    edited: DateTime<Utc>,
    archived: bool,
}

/// An in-memory workspace, standing in for the sink.
#[derive(Clone, Default)]
pub struct MemoryWorkspace {
    events: Arc<Mutex<HashMap<String, Event>>>,
    tasks: Arc<Mutex<HashMap<String, StoredTask>>>,
    /// Total create/update/delete operations applied (existence checks not included)
    mutations: Arc<AtomicU32>,
    mock_behaviour: Option<Arc<Mutex<MockBehaviour>>>,
}

impl MemoryWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mock_behaviour(behaviour: Arc<Mutex<MockBehaviour>>) -> Self {
        Self {
            mock_behaviour: Some(behaviour),
            ..Self::default()
        }
    }

    fn new_page_id() -> String {
        uuid::Uuid::new_v4().to_hyphenated().to_string()
    }

    /// The sink rounds last-edited times down to the minute, so an edit made by the pull
    /// phase of a pass can land before the pass start in the delta query. The real sink
    /// does this too; it is the reason the reconciler tracks what it just modified.
    fn edited_now() -> DateTime<Utc> {
        let now = Utc::now();
        now.with_second(0).unwrap().with_nanosecond(0).unwrap()
    }

    /// Put an event in the workspace without counting it as a sync mutation
    pub fn seed_event(&self, event: Event) -> String {
        let internal_id = Self::new_page_id();
        self.events.lock().unwrap().insert(internal_id.clone(), event);
        internal_id
    }

    /// Put a task page in the workspace without counting it as a sync mutation
    pub fn seed_task(&self, remote_id: Option<&str>, task: Task, edited: DateTime<Utc>) -> String {
        let internal_id = Self::new_page_id();
        self.tasks.lock().unwrap().insert(
            internal_id.clone(),
            StoredTask {
                remote_id: remote_id.map(String::from),
                task,
                edited,
                archived: false,
            },
        );
        internal_id
    }

    /// Archive a task page (the sink's delta query will not see it anymore)
    pub fn archive_task(&self, internal_id: &str) {
        if let Some(stored) = self.tasks.lock().unwrap().get_mut(internal_id) {
            stored.archived = true;
        }
    }

    pub fn mutation_count(&self) -> u32 {
        self.mutations.load(Ordering::SeqCst)
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn event_by_external_id(&self, id: &str) -> Option<Event> {
        self.events.lock().unwrap().values().find(|e| e.id() == id).cloned()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn task_by_remote_id(&self, id: &str) -> Option<Task> {
        self.tasks
            .lock()
            .unwrap()
            .values()
            .find(|stored| stored.remote_id.as_deref() == Some(id))
            .map(|stored| stored.task.clone())
    }

    pub fn remote_id_of(&self, internal_id: &str) -> Option<String> {
        self.tasks
            .lock()
            .unwrap()
            .get(internal_id)
            .and_then(|stored| stored.remote_id.clone())
    }
}

#[async_trait]
impl EventSink for MemoryWorkspace {
    async fn find_event(&self, id: &str) -> Result<Option<String>, Box<dyn Error>> {
        if let Some(behaviour) = &self.mock_behaviour {
            behaviour.lock().unwrap().can_find_event()?;
        }
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .find(|(_, event)| event.id() == id)
            .map(|(internal_id, _)| internal_id.clone()))
    }

    async fn create_event(&self, event: &Event) -> Result<(), Box<dyn Error>> {
        if let Some(behaviour) = &self.mock_behaviour {
            behaviour.lock().unwrap().can_create_event()?;
        }
        self.mutations.fetch_add(1, Ordering::SeqCst);
        self.events.lock().unwrap().insert(Self::new_page_id(), event.clone());
        Ok(())
    }

    async fn update_event(&self, internal_id: &str, event: &Event) -> Result<(), Box<dyn Error>> {
        if let Some(behaviour) = &self.mock_behaviour {
            behaviour.lock().unwrap().can_update_event()?;
        }
        let mut events = self.events.lock().unwrap();
        match events.get_mut(internal_id) {
            None => Err(format!("No page {} to update", internal_id).into()),
            Some(stored) => {
                self.mutations.fetch_add(1, Ordering::SeqCst);
                *stored = event.clone();
                Ok(())
            }
        }
    }

    async fn delete_event(&self, internal_id: &str) -> Result<(), Box<dyn Error>> {
        if let Some(behaviour) = &self.mock_behaviour {
            behaviour.lock().unwrap().can_delete_event()?;
        }
        match self.events.lock().unwrap().remove(internal_id) {
            None => Err(format!("No page {} to delete", internal_id).into()),
            Some(_) => {
                self.mutations.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl TaskSink for MemoryWorkspace {
    async fn find_task(&self, id: &str) -> Result<Option<String>, Box<dyn Error>> {
        if let Some(behaviour) = &self.mock_behaviour {
            behaviour.lock().unwrap().can_find_task()?;
        }
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .iter()
            .find(|(_, stored)| stored.remote_id.as_deref() == Some(id))
            .map(|(internal_id, _)| internal_id.clone()))
    }

    async fn create_task(&self, task: &Task) -> Result<(), Box<dyn Error>> {
        if let Some(behaviour) = &self.mock_behaviour {
            behaviour.lock().unwrap().can_create_task()?;
        }
        self.mutations.fetch_add(1, Ordering::SeqCst);
        self.tasks.lock().unwrap().insert(
            Self::new_page_id(),
            StoredTask {
                remote_id: Some(task.id().to_string()),
                task: task.clone(),
                edited: Self::edited_now(),
                archived: false,
            },
        );
        Ok(())
    }

    async fn update_task(&self, internal_id: &str, task: &Task) -> Result<(), Box<dyn Error>> {
        if let Some(behaviour) = &self.mock_behaviour {
            behaviour.lock().unwrap().can_update_task()?;
        }
        let mut tasks = self.tasks.lock().unwrap();
        match tasks.get_mut(internal_id) {
            None => Err(format!("No page {} to update", internal_id).into()),
            Some(stored) => {
                self.mutations.fetch_add(1, Ordering::SeqCst);
                stored.task = task.clone();
                stored.edited = Self::edited_now();
                Ok(())
            }
        }
    }

    async fn delete_task(&self, internal_id: &str) -> Result<(), Box<dyn Error>> {
        if let Some(behaviour) = &self.mock_behaviour {
            behaviour.lock().unwrap().can_delete_task()?;
        }
        match self.tasks.lock().unwrap().remove(internal_id) {
            None => Err(format!("No page {} to delete", internal_id).into()),
            Some(_) => {
                self.mutations.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    async fn update_task_id(&self, internal_id: &str, new_id: &str) -> Result<(), Box<dyn Error>> {
        if let Some(behaviour) = &self.mock_behaviour {
            behaviour.lock().unwrap().can_update_task_id()?;
        }
        let mut tasks = self.tasks.lock().unwrap();
        match tasks.get_mut(internal_id) {
            None => Err(format!("No page {} to update", internal_id).into()),
            Some(stored) => {
                self.mutations.fetch_add(1, Ordering::SeqCst);
                stored.remote_id = Some(new_id.to_string());
                stored.task.set_id(new_id.to_string());
                Ok(())
            }
        }
    }

    async fn tasks_edited_between(
        &self,
        from: Option<DateTime<Utc>>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SinkTask>, Box<dyn Error>> {
        if let Some(behaviour) = &self.mock_behaviour {
            behaviour.lock().unwrap().can_list_edited_tasks()?;
        }
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .iter()
            // Archived pages are invisible to the sink's delta query
            .filter(|(_, stored)| stored.archived == false)
            .filter(|(_, stored)| stored.edited < to && from.map(|f| stored.edited >= f).unwrap_or(true))
            .map(|(internal_id, stored)| {
                SinkTask::new(internal_id.clone(), stored.remote_id.clone(), stored.task.clone())
            })
            .collect())
    }
}
