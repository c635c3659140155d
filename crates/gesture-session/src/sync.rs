//! Background reconciliation with the training service.
//!
//! Polls statistics every second while collecting and every three seconds
//! otherwise. Polls never overlap: the next period starts only after the
//! previous response was applied. A change of the collecting flag restarts
//! the wait with the new period.

use std::time::Duration;

use gesture_backend::TrainingService;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::Config;
use crate::coordinator::Coordinator;

/// Poll periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncIntervals {
    /// Period while a class is being collected.
    pub collecting: Duration,
    /// Period otherwise.
    pub idle: Duration,
}

impl SyncIntervals {
    /// Period for the current collecting state.
    #[must_use]
    pub const fn period(&self, collecting: bool) -> Duration {
        if collecting {
            self.collecting
        } else {
            self.idle
        }
    }
}

impl Default for SyncIntervals {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SyncIntervals {
    fn from(config: &Config) -> Self {
        Self {
            collecting: config.poll_interval_collecting(),
            idle: config.poll_interval_idle(),
        }
    }
}

/// Spawns the polling task.
pub struct SyncScheduler;

impl SyncScheduler {
    /// Runs an initial fetch, then polls until stopped.
    #[must_use]
    pub fn spawn<B: TrainingService>(
        coordinator: Coordinator<B>,
        intervals: SyncIntervals,
    ) -> SyncHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(coordinator, intervals, shutdown_rx));
        SyncHandle {
            shutdown,
            task: Some(task),
        }
    }
}

async fn run<B: TrainingService>(
    coordinator: Coordinator<B>,
    intervals: SyncIntervals,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut collecting = coordinator.collecting_watch();
    let mut polls: u64 = 0;

    if coordinator.reconcile().await.is_ok() {
        polls += 1;
    }
    info!(
        collecting_ms = intervals.collecting.as_millis(),
        idle_ms = intervals.idle.as_millis(),
        "Sync scheduler started"
    );

    loop {
        let period = intervals.period(*collecting.borrow_and_update());
        tokio::select! {
            _ = shutdown.changed() => break,
            changed = collecting.changed() => {
                if changed.is_err() {
                    break;
                }
                debug!(collecting = *collecting.borrow(), "Poll interval switched");
            }
            () = tokio::time::sleep(period) => {
                // failures are logged by the coordinator; the next tick retries
                if coordinator.reconcile().await.is_ok() {
                    polls += 1;
                }
            }
        }
        if *shutdown.borrow() {
            break;
        }
    }
    info!(polls, "Sync scheduler stopped");
}

/// Stops the scheduler when told to or when dropped.
#[derive(Debug)]
pub struct SyncHandle {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SyncHandle {
    /// Stops polling. A poll already in progress is allowed to finish.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    /// Stops polling and waits for the task to end.
    pub async fn join(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
