//! Handle to a scheduler loop running in the background.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch};

use crate::core::{AllocationScheduler, SchedulerError, Spawn};

/// Controls a spawned scheduler loop.
pub struct SchedulerHandle {
    scheduler: Arc<AllocationScheduler>,
    shutdown: watch::Sender<bool>,
    done: oneshot::Receiver<()>,
}

/// Spawn `scheduler.run()` on `spawner` and return a handle to stop it.
pub fn spawn_scheduler<S: Spawn>(scheduler: Arc<AllocationScheduler>, spawner: &S) -> SchedulerHandle {
    let (shutdown, shutdown_rx) = watch::channel(false);
    let (done_tx, done) = oneshot::channel();
    let task = Arc::clone(&scheduler);
    spawner.spawn(async move {
        task.run(shutdown_rx).await;
        let _ = done_tx.send(());
    });
    SchedulerHandle {
        scheduler,
        shutdown,
        done,
    }
}

impl SchedulerHandle {
    /// The scheduler being driven.
    pub const fn scheduler(&self) -> &Arc<AllocationScheduler> {
        &self.scheduler
    }

    /// Request an out-of-cycle recompute.
    pub fn trigger(&self) {
        self.scheduler.request_recompute();
    }

    /// Signal shutdown and wait up to `timeout` for the loop to exit.
    pub async fn stop(self, timeout: Duration) -> Result<(), SchedulerError> {
        let _ = self.shutdown.send(true);
        match tokio::time::timeout(timeout, self.done).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SchedulerError::Backend(
                "scheduler task ended without completing".into(),
            )),
            Err(_) => Err(SchedulerError::Timeout {
                operation: "scheduler shutdown",
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}
