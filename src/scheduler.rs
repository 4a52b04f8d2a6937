//! Background scheduling of sync passes
//!
//! One worker per synced activity: a loop of "run one pass, then wait for the configured
//! interval". The wait is sliced at one-second granularity, so pause, stop and manual
//! triggers are honored quickly; a pass that is already running is never interrupted, it
//! finishes (or fails) before any request takes effect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::sync::progress::{status_channel, StatusReceiver, StatusSender, WorkerStatus};
use crate::traits::SyncHandler;

/// Granularity of the interruptible wait between two passes
const WAIT_SLICE: Duration = Duration::from_secs(1);

/// Runs a [`SyncHandler`] repeatedly on an interval.
pub struct Scheduler<H: SyncHandler> {
    handler: H,
    interval: Duration,
}

impl<H: SyncHandler + Send + 'static> Scheduler<H> {
    pub fn new(handler: H, interval: Duration) -> Self {
        Self { handler, interval }
    }

    /// Spawn the worker. The first pass runs immediately.
    pub fn start(self) -> SchedulerHandle {
        let shared = Arc::new(Shared {
            paused: AtomicBool::new(false),
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            triggered: AtomicBool::new(false),
            wake: Notify::new(),
        });
        let (status_tx, status_rx) = status_channel();

        let handle = tokio::spawn(worker_loop(self.handler, self.interval, shared.clone(), status_tx));

        SchedulerHandle {
            shared,
            status: status_rx,
            handle,
        }
    }
}

/// State shared between a worker loop and its handle
struct Shared {
    paused: AtomicBool,
    running: AtomicBool,
    stopped: AtomicBool,
    /// A manual pass was requested; consumed by the worker at the top of its loop
    triggered: AtomicBool,
    /// Wakes the worker out of its inter-pass wait
    wake: Notify,
}

/// Controls a running scheduler and exposes its status to a presentation layer.
pub struct SchedulerHandle {
    shared: Arc<Shared>,
    status: StatusReceiver,
    handle: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop running scheduled passes. A pass already in flight completes normally.
    pub fn pause(&self) {
        log::info!("Sync paused");
        self.shared.paused.store(true, Ordering::SeqCst);
        self.shared.wake.notify_one();
    }

    /// Resume scheduled passes, starting with one right away.
    pub fn resume(&self) {
        log::info!("Sync resumed");
        self.shared.paused.store(false, Ordering::SeqCst);
        self.shared.triggered.store(true, Ordering::SeqCst);
        self.shared.wake.notify_one();
    }

    /// Request a pass now instead of waiting for the interval.
    ///
    /// A no-op while a pass is already running (there is nothing meaningful to trigger:
    /// the running pass is already reading the freshest data).
    pub fn sync_now(&self) {
        if self.shared.running.load(Ordering::SeqCst) {
            log::debug!("Manual sync requested while a pass is running, ignoring it");
            return;
        }
        log::info!("Manual sync");
        self.shared.triggered.store(true, Ordering::SeqCst);
        self.shared.wake.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// A watchable view of the worker: running / error / last sync time.
    pub fn status(&self) -> StatusReceiver {
        self.status.clone()
    }

    /// Stop the worker for good and wait for it to wind down.
    pub async fn stop(self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        self.shared.wake.notify_one();
        let _ = self.handle.await;
    }
}

async fn worker_loop<H: SyncHandler>(
    mut handler: H,
    interval: Duration,
    shared: Arc<Shared>,
    status: StatusSender,
) {
    log::info!("Starting the {} sync worker", handler.activity());
    let mut error = false;

    loop {
        if shared.stopped.load(Ordering::SeqCst) {
            break;
        }

        let triggered = shared.triggered.swap(false, Ordering::SeqCst);
        if triggered || shared.paused.load(Ordering::SeqCst) == false {
            shared.running.store(true, Ordering::SeqCst);
            let _ = status.send(WorkerStatus {
                running: true,
                error,
                last_sync: handler.last_sync(),
            });

            // Errors were already logged by the handler; the worker only keeps the boolean
            // and goes back to sleep, the next pass retries from the unmoved checkpoint
            error = handler.run_one_pass().await.is_err();

            let _ = status.send(WorkerStatus {
                running: false,
                error,
                last_sync: handler.last_sync(),
            });
            shared.running.store(false, Ordering::SeqCst);
        }

        // The interruptible wait: sleep in slices, so pause/stop/trigger are noticed
        // within a second
        let mut remaining = interval;
        while remaining > Duration::ZERO {
            if shared.stopped.load(Ordering::SeqCst) {
                return;
            }
            if shared.triggered.load(Ordering::SeqCst) {
                break;
            }

            let slice = WAIT_SLICE.min(remaining);
            tokio::select! {
                _ = tokio::time::sleep(slice) => { remaining -= slice; }
                _ = shared.wake.notified() => {}
            }
        }
    }

    log::info!("Stopped the {} sync worker", handler.activity());
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::error::Error;
    use std::sync::atomic::AtomicU32;

    use async_trait::async_trait;
    use chrono::{DateTime, FixedOffset, TimeZone, Utc};

    use crate::sync::progress::PassSummary;

    /// A handler that counts its passes and can be told to fail
    struct CountingHandler {
        passes: Arc<AtomicU32>,
        fail: bool,
        last_sync: Option<DateTime<FixedOffset>>,
    }

    impl CountingHandler {
        fn new(passes: Arc<AtomicU32>, fail: bool) -> Self {
            Self { passes, fail, last_sync: None }
        }
    }

    #[async_trait]
    impl SyncHandler for CountingHandler {
        fn activity(&self) -> &str {
            "counting"
        }

        fn last_sync(&self) -> Option<DateTime<FixedOffset>> {
            self.last_sync
        }

        async fn run_one_pass(&mut self) -> Result<PassSummary, Box<dyn Error>> {
            self.passes.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err("mocked pass failure".into());
            }
            self.last_sync = Some(Utc.with_ymd_and_hms(2024, 3, 1, 18, 0, 0).unwrap().into());
            Ok(PassSummary::default())
        }
    }

    /// Wait until the worker has completed at least `n` passes and gone back to idle
    async fn wait_for_passes(handle: &SchedulerHandle, passes: &Arc<AtomicU32>, n: u32) {
        for _ in 0..500 {
            if passes.load(Ordering::SeqCst) >= n && handle.is_running() == false {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("worker did not complete {} passes in time", n);
    }

    #[tokio::test]
    async fn first_pass_runs_immediately_and_reports_status() {
        let passes = Arc::new(AtomicU32::new(0));
        let scheduler = Scheduler::new(
            CountingHandler::new(passes.clone(), false),
            Duration::from_secs(600),
        );

        let handle = scheduler.start();
        wait_for_passes(&handle, &passes, 1).await;

        let status = handle.status().borrow().clone();
        assert!(status.error == false);
        assert!(status.last_sync.is_some());

        handle.stop().await;
        assert_eq!(passes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn manual_trigger_cancels_the_wait() {
        let passes = Arc::new(AtomicU32::new(0));
        let scheduler = Scheduler::new(
            CountingHandler::new(passes.clone(), false),
            Duration::from_secs(600),
        );

        let handle = scheduler.start();
        wait_for_passes(&handle, &passes, 1).await;

        // The interval is 10 minutes: a second pass can only come from the trigger
        handle.sync_now();
        wait_for_passes(&handle, &passes, 2).await;

        handle.stop().await;
    }

    #[tokio::test]
    async fn a_failing_pass_sets_the_error_flag_but_keeps_the_worker_alive() {
        let passes = Arc::new(AtomicU32::new(0));
        let scheduler = Scheduler::new(
            CountingHandler::new(passes.clone(), true),
            Duration::from_secs(600),
        );

        let handle = scheduler.start();
        wait_for_passes(&handle, &passes, 1).await;

        let status = handle.status().borrow().clone();
        assert!(status.error);
        assert_eq!(status.last_sync, None);

        // The worker survived and still takes manual triggers
        handle.sync_now();
        wait_for_passes(&handle, &passes, 2).await;

        handle.stop().await;
    }

    #[tokio::test]
    async fn paused_scheduler_skips_scheduled_passes_until_resumed() {
        let passes = Arc::new(AtomicU32::new(0));
        let scheduler = Scheduler::new(
            CountingHandler::new(passes.clone(), false),
            Duration::from_millis(50),
        );

        let handle = scheduler.start();
        wait_for_passes(&handle, &passes, 1).await;

        handle.pause();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let after_pause = passes.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(passes.load(Ordering::SeqCst), after_pause);

        // Resuming triggers a pass right away
        handle.resume();
        wait_for_passes(&handle, &passes, after_pause + 1).await;

        handle.stop().await;
    }
}
