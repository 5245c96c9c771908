//! Background purge of expired persistent entries.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::domain::errors::CacheResult;
use crate::domain::ports::{ClockPort, PersistentStorePort};

/// Default interval between sweeps (24 hours).
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Runs one sweep: deletes entries written at or before `now - window`.
///
/// # Errors
/// Returns the store's error if the deletion fails.
pub async fn sweep_once(
    store: &dyn PersistentStorePort,
    clock: &dyn ClockPort,
    window: chrono::Duration,
) -> CacheResult<usize> {
    let cutoff = clock.now() - window;
    let removed = store.delete_older_than(cutoff).await?;
    if removed > 0 {
        info!(removed = removed, cutoff = %cutoff, "Swept expired image cache entries");
    } else {
        debug!(cutoff = %cutoff, "Sweep found no expired entries");
    }
    Ok(removed)
}

/// Periodic sweep task. The first sweep runs immediately on start.
///
/// A failed sweep is logged and counted; the schedule continues. The task
/// stops on `stop`, `shutdown`, or drop.
pub struct MaintenanceSweeper {
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    runs: Arc<AtomicU64>,
    failures: Arc<AtomicU64>,
}

impl MaintenanceSweeper {
    /// Spawns the sweep loop on the current runtime.
    #[must_use]
    pub fn start(
        store: Arc<dyn PersistentStorePort>,
        clock: Arc<dyn ClockPort>,
        window: chrono::Duration,
        interval: Duration,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let runs = Arc::new(AtomicU64::new(0));
        let failures = Arc::new(AtomicU64::new(0));
        let period = interval.max(Duration::from_millis(1));

        let task_runs = runs.clone();
        let task_failures = failures.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = sweep_once(store.as_ref(), clock.as_ref(), window).await {
                            task_failures.fetch_add(1, Ordering::SeqCst);
                            warn!(error = %e, "Image cache sweep failed");
                        }
                        task_runs.fetch_add(1, Ordering::SeqCst);
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            debug!("Sweep loop stopped");
        });

        debug!(interval = ?period, window = %window, "Started image cache sweeper");

        Self {
            shutdown_tx,
            task: Mutex::new(Some(task)),
            runs,
            failures,
        }
    }

    /// Number of completed sweeps, successful or not.
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }

    /// Number of sweeps that failed.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    /// Signals the loop to stop without waiting for it.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stops the loop and waits for it to exit.
    pub async fn shutdown(&self) {
        self.stop();
        let task = self.task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(error = %e, "Sweep task ended abnormally");
        }
    }

    /// Returns true while the loop is running.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for MaintenanceSweeper {
    fn drop(&mut self) {
        self.stop();
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}
