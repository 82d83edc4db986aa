//! Periodic deadlock detection

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::service::Coordinator;

/// Run a deadlock check every `interval` until `shutdown` is cancelled
///
/// The first check happens one full interval after the task starts.
pub fn spawn_deadlock_monitor(
    coordinator: Arc<Coordinator>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        run_deadlock_monitor(coordinator, interval, shutdown).await;
    })
}

pub async fn run_deadlock_monitor(
    coordinator: Arc<Coordinator>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // interval() fires immediately; skip that tick
    ticker.tick().await;

    info!(interval_ms = interval.as_millis() as u64, "Deadlock monitor started");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Deadlock monitor stopped");
                return;
            }
            _ = ticker.tick() => {
                debug!("Checking for deadlocks");
                coordinator.run_deadlock_check().await;
            }
        }
    }
}
