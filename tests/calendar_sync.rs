//! Sync scenarios between a mocked host calendar and a mocked workspace
#![cfg(feature = "mock_sources")]


use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};

use desk_courier::checkpoint::CheckpointStore;
use desk_courier::mock_behaviour::MockBehaviour;
use desk_courier::mocks::{MemoryAppointmentStore, MemoryWorkspace};
use desk_courier::outlook::OutlookCalendar;
use desk_courier::recurrence::Exception;
use desk_courier::sync::PassStatus;
use desk_courier::traits::SyncHandler;
use desk_courier::{CalendarReconciler, Event};

fn reconciler(
    store: &MemoryAppointmentStore,
    workspace: &MemoryWorkspace,
    ignore: &[&str],
    checkpoints: Arc<Mutex<CheckpointStore>>,
) -> CalendarReconciler<OutlookCalendar<MemoryAppointmentStore>, MemoryWorkspace> {
    CalendarReconciler::new(
        OutlookCalendar::new(store.clone()),
        workspace.clone(),
        scenarii::settings(ignore),
        checkpoints,
    )
}

fn seeded_event(id: &str, subject: &str) -> Event {
    let start = Utc::now() + Duration::hours(1);
    Event::new(
        id.to_string(),
        subject.to_string(),
        start,
        start + Duration::hours(1),
        String::new(),
        None,
        "Ada".to_string(),
        String::new(),
        Utc::now() - Duration::days(1),
    )
}

#[tokio::test]
async fn first_sync_creates_non_ignored_events() {
    let _ = env_logger::builder().is_test(true).try_init();

    let store = MemoryAppointmentStore::new();
    store.add_appointment(scenarii::single_appointment("evt-1", "Design review", 1));
    store.add_appointment(scenarii::single_appointment("evt-2", "Daily Standup", 2));

    let workspace = MemoryWorkspace::new();
    let (checkpoints, path) = scenarii::fresh_checkpoints("calendar-first");

    let mut reconciler = reconciler(&store, &workspace, &["Daily*"], checkpoints.clone());
    let summary = reconciler.run_one_pass().await.unwrap();

    assert_eq!(summary.created, 1);
    assert_eq!(summary.updated, 0);
    assert!(workspace.event_by_external_id("evt-1").is_some());
    assert!(workspace.event_by_external_id("evt-2").is_none());

    // The pass completed, so the checkpoint moved and the session was released
    assert!(checkpoints.lock().unwrap().load("calendar").is_some());
    assert_eq!(store.active_sessions(), 0);
    assert_eq!(reconciler.status(), PassStatus::Success);

    scenarii::cleanup(&path);
}

#[tokio::test]
async fn repeating_a_pass_with_an_unmoved_checkpoint_does_not_double_create() {
    let _ = env_logger::builder().is_test(true).try_init();

    let store = MemoryAppointmentStore::new();
    store.add_appointment(scenarii::single_appointment("evt-1", "Design review", 1));

    let workspace = MemoryWorkspace::new();

    let (checkpoints, path_a) = scenarii::fresh_checkpoints("calendar-idem-a");
    let mut first = reconciler(&store, &workspace, &[], checkpoints);
    let summary = first.run_one_pass().await.unwrap();
    assert_eq!(summary.created, 1);
    assert_eq!(workspace.event_count(), 1);
    assert_eq!(workspace.mutation_count(), 1);
    let after_first = workspace.event_by_external_id("evt-1").unwrap();

    // Same source, same sink, but a checkpoint that did not move: the event is found by
    // the existence check and updated in place
    let (checkpoints, path_b) = scenarii::fresh_checkpoints("calendar-idem-b");
    let mut second = reconciler(&store, &workspace, &[], checkpoints);
    let summary = second.run_one_pass().await.unwrap();

    assert_eq!(summary.created, 0);
    assert_eq!(summary.updated, 1);
    assert_eq!(workspace.event_count(), 1);
    // The only extra mutation is the in-place update; the sink state converged
    assert_eq!(workspace.mutation_count(), 2);
    assert_eq!(workspace.event_by_external_id("evt-1").unwrap(), after_first);

    scenarii::cleanup(&path_a);
    scenarii::cleanup(&path_b);
}

#[tokio::test]
async fn only_events_modified_since_the_checkpoint_are_synced() {
    let _ = env_logger::builder().is_test(true).try_init();

    let store = MemoryAppointmentStore::new();
    store.add_appointment(scenarii::single_appointment("evt-fresh", "Planning", 1));
    let mut stale = scenarii::single_appointment("evt-stale", "Retrospective", 2);
    stale.last_modified = Utc::now() - Duration::hours(2);
    store.add_appointment(stale);

    let workspace = MemoryWorkspace::new();
    let (checkpoints, path) = scenarii::fresh_checkpoints("calendar-since");
    scenarii::seed_checkpoint(&checkpoints, "calendar", 1, None);

    let mut reconciler = reconciler(&store, &workspace, &[], checkpoints);
    let summary = reconciler.run_one_pass().await.unwrap();

    assert_eq!(summary.created, 1);
    assert!(workspace.event_by_external_id("evt-fresh").is_some());
    assert!(workspace.event_by_external_id("evt-stale").is_none());

    scenarii::cleanup(&path);
}

#[tokio::test]
async fn deleted_events_are_removed_when_present_and_ignored_when_absent() {
    let _ = env_logger::builder().is_test(true).try_init();

    let store = MemoryAppointmentStore::new();
    store.add_deleted(scenarii::single_appointment("evt-gone", "Cancelled meeting", 3));
    store.add_deleted(scenarii::single_appointment("evt-never-synced", "Unknown meeting", 4));

    let workspace = MemoryWorkspace::new();
    workspace.seed_event(seeded_event("evt-gone", "Cancelled meeting"));

    let (checkpoints, path) = scenarii::fresh_checkpoints("calendar-del");
    let mut reconciler = reconciler(&store, &workspace, &[], checkpoints);
    let summary = reconciler.run_one_pass().await.unwrap();

    // One delete for the page that existed, a silent no-op for the other
    assert_eq!(summary.deleted, 1);
    assert!(workspace.event_by_external_id("evt-gone").is_none());
    assert_eq!(workspace.event_count(), 0);

    scenarii::cleanup(&path);
}

#[tokio::test]
async fn ignored_subjects_are_never_touched_not_even_for_deletion() {
    let _ = env_logger::builder().is_test(true).try_init();

    let store = MemoryAppointmentStore::new();
    store.add_deleted(scenarii::single_appointment("evt-standup", "Daily Standup", 1));

    let workspace = MemoryWorkspace::new();
    workspace.seed_event(seeded_event("evt-standup", "Daily Standup"));

    let (checkpoints, path) = scenarii::fresh_checkpoints("calendar-ignore-del");
    let mut reconciler = reconciler(&store, &workspace, &["Daily*"], checkpoints);
    let summary = reconciler.run_one_pass().await.unwrap();

    assert_eq!(summary.deleted, 0);
    assert!(workspace.event_by_external_id("evt-standup").is_some());

    scenarii::cleanup(&path);
}

#[tokio::test]
async fn recurring_series_expand_and_tombstones_delete_their_occurrence() {
    let _ = env_logger::builder().is_test(true).try_init();

    let store = MemoryAppointmentStore::new();
    // The occurrence of tomorrow (index 3) was deleted from the series
    store.add_appointment(scenarii::daily_series(
        "series-1",
        "Morning check-in",
        vec![Exception {
            original_date: scenarii::series_date(1),
            deleted: true,
            replacement: None,
        }],
    ));

    let workspace = MemoryWorkspace::new();
    // A previous sync had created tomorrow's occurrence already
    workspace.seed_event(seeded_event("series-1_3", "Morning check-in"));

    let (checkpoints, path) = scenarii::fresh_checkpoints("calendar-series");
    let mut reconciler = reconciler(&store, &workspace, &[], checkpoints);
    let summary = reconciler.run_one_pass().await.unwrap();

    // Live occurrences landed, each under its stable suffixed id
    assert!(workspace.event_by_external_id("series-1_2").is_some());
    assert!(workspace.event_by_external_id("series-1_4").is_some());
    // The tombstone was replayed by the deleted-items half of the same pass
    assert!(workspace.event_by_external_id("series-1_3").is_none());
    assert_eq!(summary.deleted, 1);

    scenarii::cleanup(&path);
}

#[tokio::test]
async fn an_unknown_recurrence_pattern_gives_up_on_the_series_only() {
    let _ = env_logger::builder().is_test(true).try_init();

    let store = MemoryAppointmentStore::new();
    let mut weird = scenarii::daily_series("series-weird", "Exotic pattern", vec![]);
    weird.recurrence.as_mut().unwrap().kind_code = 12;
    store.add_appointment(weird);
    store.add_appointment(scenarii::single_appointment("evt-1", "Design review", 1));

    let workspace = MemoryWorkspace::new();
    let (checkpoints, path) = scenarii::fresh_checkpoints("calendar-unknown-kind");
    let mut reconciler = reconciler(&store, &workspace, &[], checkpoints);

    // The pass itself succeeds; only the series was dropped
    let summary = reconciler.run_one_pass().await.unwrap();
    assert_eq!(summary.created, 1);
    assert!(workspace.event_by_external_id("evt-1").is_some());
    assert!(workspace.event_by_external_id("series-weird_2").is_none());

    scenarii::cleanup(&path);
}

#[tokio::test]
async fn a_failed_occurrence_lookup_skips_that_occurrence_only() {
    let _ = env_logger::builder().is_test(true).try_init();

    let store = MemoryAppointmentStore::new();
    store.add_appointment(scenarii::daily_series("series-2", "Morning check-in", vec![]));
    store.fail_occurrence_on("series-2", scenarii::series_date(1));

    let workspace = MemoryWorkspace::new();
    let (checkpoints, path) = scenarii::fresh_checkpoints("calendar-lookup");
    let mut reconciler = reconciler(&store, &workspace, &[], checkpoints);

    let summary = reconciler.run_one_pass().await.unwrap();
    assert!(summary.created > 0);
    assert!(workspace.event_by_external_id("series-2_2").is_some());
    assert!(workspace.event_by_external_id("series-2_3").is_none());

    scenarii::cleanup(&path);
}

#[tokio::test]
async fn a_failed_pass_leaves_the_checkpoint_byte_identical() {
    let _ = env_logger::builder().is_test(true).try_init();

    let store = MemoryAppointmentStore::new();
    store.add_appointment(scenarii::single_appointment("evt-1", "Design review", 1));

    let behaviour = Arc::new(Mutex::new(MockBehaviour {
        create_event_behaviour: (0, 1),
        ..MockBehaviour::default()
    }));
    let workspace = MemoryWorkspace::with_mock_behaviour(behaviour.clone());

    let (checkpoints, path) = scenarii::fresh_checkpoints("calendar-failed");
    scenarii::seed_checkpoint(&checkpoints, "calendar", 1, None);
    let bytes_before = std::fs::read(&path).unwrap();

    let mut reconciler = reconciler(&store, &workspace, &[], checkpoints.clone());

    assert!(reconciler.run_one_pass().await.is_err());
    assert_eq!(reconciler.status(), PassStatus::Failed);
    assert!(reconciler.last_error().is_some());
    assert_eq!(workspace.mutation_count(), 0);
    // The checkpoint did not move, and the session guard was still released
    assert_eq!(std::fs::read(&path).unwrap(), bytes_before);
    assert_eq!(store.active_sessions(), 0);

    // The mocked error is gone: the retry covers the same window and succeeds
    behaviour.lock().unwrap().suspend();
    let summary = reconciler.run_one_pass().await.unwrap();
    assert_eq!(summary.created, 1);
    assert_eq!(reconciler.status(), PassStatus::Success);
    assert_ne!(std::fs::read(&path).unwrap(), bytes_before);

    scenarii::cleanup(&path);
}
