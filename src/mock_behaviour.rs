//! This module provides ways to tweak the mocked workspace, so that it can return errors
//! on some tests
#![cfg(feature = "mock_sources")]

use std::error::Error;

/// This stores some behaviour tweaks, that describe how a mocked instance will behave
/// during a given test
///
/// So that a function fails _n_ times after _m_ initial successes, set `(m, n)` for the
/// suited parameter
#[derive(Default, Clone, Debug)]
pub struct MockBehaviour {
    /// If this is true, every action will be allowed
    pub is_suspended: bool,

    // From the EventSink trait
    pub find_event_behaviour: (u32, u32),
    pub create_event_behaviour: (u32, u32),
    pub update_event_behaviour: (u32, u32),
    pub delete_event_behaviour: (u32, u32),

    // From the TaskSink trait
    pub find_task_behaviour: (u32, u32),
    pub create_task_behaviour: (u32, u32),
    pub update_task_behaviour: (u32, u32),
    pub delete_task_behaviour: (u32, u32),
    pub update_task_id_behaviour: (u32, u32),
    pub tasks_edited_behaviour: (u32, u32),
}

impl MockBehaviour {
    pub fn new() -> Self {
        Self::default()
    }

    /// All items will fail at once, for `n_fails` times
    pub fn fail_now(n_fails: u32) -> Self {
        Self {
            is_suspended: false,
            find_event_behaviour: (0, n_fails),
            create_event_behaviour: (0, n_fails),
            update_event_behaviour: (0, n_fails),
            delete_event_behaviour: (0, n_fails),
            find_task_behaviour: (0, n_fails),
            create_task_behaviour: (0, n_fails),
            update_task_behaviour: (0, n_fails),
            delete_task_behaviour: (0, n_fails),
            update_task_id_behaviour: (0, n_fails),
            tasks_edited_behaviour: (0, n_fails),
        }
    }

    /// Suspend this mock behaviour until you call `resume`
    pub fn suspend(&mut self) {
        self.is_suspended = true;
    }
    /// Make this behaviour active again
    pub fn resume(&mut self) {
        self.is_suspended = false;
    }

    pub fn can_find_event(&mut self) -> Result<(), Box<dyn Error>> {
        if self.is_suspended { return Ok(()) }
        decrement(&mut self.find_event_behaviour, "find_event")
    }
    pub fn can_create_event(&mut self) -> Result<(), Box<dyn Error>> {
        if self.is_suspended { return Ok(()) }
        decrement(&mut self.create_event_behaviour, "create_event")
    }
    pub fn can_update_event(&mut self) -> Result<(), Box<dyn Error>> {
        if self.is_suspended { return Ok(()) }
        decrement(&mut self.update_event_behaviour, "update_event")
    }
    pub fn can_delete_event(&mut self) -> Result<(), Box<dyn Error>> {
        if self.is_suspended { return Ok(()) }
        decrement(&mut self.delete_event_behaviour, "delete_event")
    }
    pub fn can_find_task(&mut self) -> Result<(), Box<dyn Error>> {
        if self.is_suspended { return Ok(()) }
        decrement(&mut self.find_task_behaviour, "find_task")
    }
    pub fn can_create_task(&mut self) -> Result<(), Box<dyn Error>> {
        if self.is_suspended { return Ok(()) }
        decrement(&mut self.create_task_behaviour, "create_task")
    }
    pub fn can_update_task(&mut self) -> Result<(), Box<dyn Error>> {
        if self.is_suspended { return Ok(()) }
        decrement(&mut self.update_task_behaviour, "update_task")
    }
    pub fn can_delete_task(&mut self) -> Result<(), Box<dyn Error>> {
        if self.is_suspended { return Ok(()) }
        decrement(&mut self.delete_task_behaviour, "delete_task")
    }
    pub fn can_update_task_id(&mut self) -> Result<(), Box<dyn Error>> {
        if self.is_suspended { return Ok(()) }
        decrement(&mut self.update_task_id_behaviour, "update_task_id")
    }
    pub fn can_list_edited_tasks(&mut self) -> Result<(), Box<dyn Error>> {
        if self.is_suspended { return Ok(()) }
        decrement(&mut self.tasks_edited_behaviour, "tasks_edited_between")
    }
}

/// Return Ok(()) in case the value is `(1+, _)` or `(_, 0)`, or return Err and decrement
/// otherwise
fn decrement(value: &mut (u32, u32), descr: &str) -> Result<(), Box<dyn Error>> {
    let remaining_successes = value.0;
    let remaining_failures = value.1;

    if remaining_successes > 0 {
        value.0 = value.0 - 1;
        log::debug!("Mock behaviour: allowing a {} ({:?})", descr, value);
        Ok(())
    } else {
        if remaining_failures > 0 {
            value.1 = value.1 - 1;
            log::debug!("Mock behaviour: failing a {} ({:?})", descr, value);
            Err(format!("Mocked behaviour requires this {} to fail this time. ({:?})", descr, value).into())
        } else {
            log::debug!("Mock behaviour: allowing a {} ({:?})", descr, value);
            Ok(())
        }
    }
}
