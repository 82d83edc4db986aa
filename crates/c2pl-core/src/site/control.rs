//! Shared state between a site's agent loop and its notification endpoint

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time;
use tracing::{debug, info, warn};

use crate::domain::transaction::{Operation, SiteId};
use crate::protocol::{ProtocolResult, SiteEndpoint};

/// Execution state of a site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteState {
    /// Executing operations
    Running,
    /// Waiting for a lock to be granted
    Blocked,
    /// Dropping the current transaction after an abort
    Aborting,
    /// Transaction queue exhausted
    Idle,
}

impl SiteState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Blocked => "blocked",
            Self::Aborting => "aborting",
            Self::Idle => "idle",
        }
    }
}

impl fmt::Display for SiteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// State channel plus abort flag of one site
///
/// The agent loop writes the state; the coordinator's `unblock` and `abort`
/// calls land here and wake the loop through the watch channel.
#[derive(Debug)]
pub struct SiteControl {
    site_id: SiteId,
    state: watch::Sender<SiteState>,
    abort_requested: AtomicBool,
}

impl SiteControl {
    pub fn new(site_id: SiteId) -> Self {
        let (state, _) = watch::channel(SiteState::Running);
        Self {
            site_id,
            state,
            abort_requested: AtomicBool::new(false),
        }
    }

    pub fn site_id(&self) -> SiteId {
        self.site_id
    }

    pub fn state(&self) -> SiteState {
        *self.state.borrow()
    }

    pub fn set_state(&self, state: SiteState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(site_id = self.site_id, from = %previous, to = %state, "Site state changed");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SiteState> {
        self.state.subscribe()
    }

    pub fn request_abort(&self) {
        self.abort_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_abort_requested(&self) -> bool {
        self.abort_requested.load(Ordering::SeqCst)
    }

    /// Read and clear the abort flag
    pub fn take_abort(&self) -> bool {
        self.abort_requested.swap(false, Ordering::SeqCst)
    }

    /// Move a blocked site back to running. Other states are left alone.
    pub fn release_block(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == SiteState::Blocked {
                *state = SiteState::Running;
                true
            } else {
                false
            }
        })
    }

    /// Wait until the site leaves `Blocked`, logging every `heartbeat`
    pub async fn wait_until_unblocked(&self, operation: &Operation, heartbeat: Duration) {
        let mut state = self.subscribe();
        let mut ticker = time::interval(heartbeat);
        ticker.tick().await;

        loop {
            tokio::select! {
                changed = state.wait_for(|s| *s != SiteState::Blocked) => {
                    if changed.is_err() {
                        warn!(site_id = self.site_id, "Site state channel closed while blocked");
                    }
                    return;
                }
                _ = ticker.tick() => {
                    info!(
                        site_id = self.site_id,
                        transaction_id = operation.transaction_id(),
                        item = operation.item(),
                        "Still blocked"
                    );
                }
            }
        }
    }
}

#[async_trait]
impl SiteEndpoint for SiteControl {
    async fn abort(&self) -> ProtocolResult<()> {
        info!(site_id = self.site_id, "Abort requested by coordinator");
        self.request_abort();
        self.unblock().await
    }

    async fn unblock(&self) -> ProtocolResult<()> {
        let woke = self.release_block();
        debug!(site_id = self.site_id, woke, "Unblock received");
        Ok(())
    }

    async fn write(&self) -> ProtocolResult<()> {
        info!(site_id = self.site_id, state = %self.state(), "Lock granted after release");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_unblock_only_leaves_blocked() {
        let control = SiteControl::new(1);
        control.set_state(SiteState::Idle);
        control.unblock().await.unwrap();
        assert_eq!(control.state(), SiteState::Idle);

        control.set_state(SiteState::Blocked);
        control.unblock().await.unwrap();
        assert_eq!(control.state(), SiteState::Running);
    }

    #[tokio::test]
    async fn test_abort_sets_flag_and_wakes() {
        let control = SiteControl::new(1);
        control.set_state(SiteState::Blocked);
        control.abort().await.unwrap();

        assert_eq!(control.state(), SiteState::Running);
        assert!(control.is_abort_requested());
        assert!(control.take_abort());
        assert!(!control.take_abort());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_unblocked_wakes_on_unblock() {
        let control = Arc::new(SiteControl::new(2));
        control.set_state(SiteState::Blocked);

        let waiter = {
            let control = control.clone();
            tokio::spawn(async move {
                let op = Operation::write(20001, "x");
                control
                    .wait_until_unblocked(&op, Duration::from_millis(10))
                    .await;
            })
        };

        // Let a few heartbeats pass before waking the waiter
        time::sleep(Duration::from_millis(35)).await;
        assert!(!waiter.is_finished());

        control.unblock().await.unwrap();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_already_running() {
        let control = SiteControl::new(3);
        let op = Operation::read(30001, "x");
        control
            .wait_until_unblocked(&op, Duration::from_secs(60))
            .await;
    }
}
