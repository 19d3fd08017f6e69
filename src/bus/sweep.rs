//! Periodic unsent-record sweep.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::BusInner;

/// Handle to the running sweep task.
pub(crate) struct SweepHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweepHandle {
    /// Signal the task to stop and wait for it, up to `timeout`.
    pub(crate) async fn stop(self, timeout: Duration) {
        let _ = self.cancel.send(true);
        let abort = self.task.abort_handle();
        if tokio::time::timeout(timeout, self.task).await.is_err() {
            warn!("Unsent sweep did not stop in time, aborting");
            abort.abort();
        }
    }
}

/// Spawn a task that re-sends unsent records every `interval`.
///
/// The task holds only a weak reference, so dropping the bus ends it.
pub(crate) fn spawn_sweep(bus: Weak<BusInner>, interval: Duration) -> SweepHandle {
    let (cancel_tx, mut cancel_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        info!(
            interval_ms = interval.as_millis() as u64,
            "Unsent event sweep started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let Some(bus) = bus.upgrade() else {
                        debug!("Event bus dropped, sweep exiting");
                        break;
                    };
                    match bus.retry_unsent().await {
                        Ok(0) => {}
                        Ok(count) => debug!(count = count, "Re-sent unsent event records"),
                        Err(e) => error!(error = %e, "Unsent event sweep failed"),
                    }
                }
                changed = cancel_rx.changed() => {
                    if changed.is_err() || *cancel_rx.borrow() {
                        info!("Unsent event sweep stopped");
                        break;
                    }
                }
            }
        }
    });

    SweepHandle {
        cancel: cancel_tx,
        task,
    }
}
