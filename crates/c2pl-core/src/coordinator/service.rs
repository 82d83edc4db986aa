//! Coordinator service
//!
//! Wraps the lock manager in one async mutex so that lock requests, releases
//! and deadlock checks from every site are serialized. Sites are notified
//! only after the mutex has been released.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::deadlock::{DeadlockResolution, check_deadlocks};
use crate::domain::locking::{LockManager, LockTableSnapshot};
use crate::domain::transaction::{Operation, SiteId, Transaction, TransactionId};
use crate::protocol::{
    CoordinatorEndpoint, ProtocolError, ProtocolResult, SiteEndpoint, SiteRegistry,
};

/// Counters reported by [`Coordinator::stats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorStats {
    /// Site ids handed out so far
    pub registered_sites: u32,

    /// Sites the coordinator knows how to reach
    pub bound_sites: usize,

    pub deadlocks_found: u64,
    pub checks_run: u64,
}

#[derive(Debug)]
struct CoordinatorState {
    locks: LockManager,
    next_site_id: SiteId,
    deadlocks_found: u64,
    checks_run: u64,
}

/// The central lock authority
#[derive(Debug)]
pub struct Coordinator {
    state: Mutex<CoordinatorState>,
    sites: SiteRegistry,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl Coordinator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CoordinatorState {
                locks: LockManager::new(),
                next_site_id: 1,
                deadlocks_found: 0,
                checks_run: 0,
            }),
            sites: SiteRegistry::new(),
        }
    }

    /// Hand out the next site id (the first is 1)
    pub async fn register_site(&self) -> SiteId {
        let mut state = self.state.lock().await;
        let site_id = state.next_site_id;
        state.next_site_id += 1;
        info!(site_id, "Registered site");
        site_id
    }

    /// Record how to reach an already registered site
    pub async fn bind_site(
        &self,
        site_id: SiteId,
        endpoint: Arc<dyn SiteEndpoint>,
    ) -> ProtocolResult<()> {
        let known = {
            let state = self.state.lock().await;
            site_id >= 1 && site_id < state.next_site_id
        };
        if !known {
            return Err(ProtocolError::SiteNotRegistered(site_id));
        }
        self.sites.bind(site_id, endpoint).await;
        Ok(())
    }

    /// Grant or queue the lock for `operation`
    ///
    /// Lock errors are logged and reported as not granted.
    pub async fn request_lock(&self, operation: &Operation) -> bool {
        let mut state = self.state.lock().await;
        match state.locks.request_lock(operation) {
            Ok(granted) => {
                debug!(
                    transaction_id = operation.transaction_id(),
                    item = operation.item(),
                    granted,
                    "Lock request"
                );
                granted
            }
            Err(e) => {
                warn!(
                    transaction_id = operation.transaction_id(),
                    error = %e,
                    code = e.code(),
                    "Lock request failed"
                );
                false
            }
        }
    }

    /// Release every lock of `transaction_id` and wake the sites it unblocked
    pub async fn release_transaction(&self, transaction_id: TransactionId) -> BTreeSet<SiteId> {
        let unblocked = {
            let mut state = self.state.lock().await;
            state.locks.release_locks(transaction_id)
        };
        info!(transaction_id, unblocked = ?unblocked, "Released locks");

        for &site_id in &unblocked {
            self.notify(site_id, Notification::Write).await;
            self.notify(site_id, Notification::Unblock).await;
        }
        unblocked
    }

    /// One detection pass; notifies the victim's site and the unblocked sites
    pub async fn run_deadlock_check(&self) -> Option<DeadlockResolution> {
        let resolution = {
            let mut state = self.state.lock().await;
            state.checks_run += 1;
            let resolution = check_deadlocks(&mut state.locks);
            if resolution.is_some() {
                state.deadlocks_found += 1;
            }
            resolution
        };

        let Some(resolution) = resolution else {
            debug!("No deadlock found");
            return None;
        };

        info!(
            victim = resolution.victim,
            site_id = resolution.victim_site,
            unblocked = ?resolution.unblocked_sites,
            "Resolved deadlock"
        );
        self.notify(resolution.victim_site, Notification::Abort).await;
        for &site_id in &resolution.unblocked_sites {
            self.notify(site_id, Notification::Unblock).await;
        }
        Some(resolution)
    }

    pub async fn snapshot(&self) -> LockTableSnapshot {
        self.state.lock().await.locks.snapshot()
    }

    pub async fn stats(&self) -> CoordinatorStats {
        let (registered_sites, deadlocks_found, checks_run) = {
            let state = self.state.lock().await;
            (
                state.next_site_id - 1,
                state.deadlocks_found,
                state.checks_run,
            )
        };
        CoordinatorStats {
            registered_sites,
            bound_sites: self.sites.len().await,
            deadlocks_found,
            checks_run,
        }
    }

    pub fn sites(&self) -> &SiteRegistry {
        &self.sites
    }

    /// Deliver one notification; failures are logged and the site is skipped
    async fn notify(&self, site_id: SiteId, notification: Notification) {
        let endpoint = match self.sites.lookup(site_id).await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!(site_id, error = %e, "Cannot notify site");
                return;
            }
        };

        let result = match notification {
            Notification::Abort => endpoint.abort().await,
            Notification::Unblock => endpoint.unblock().await,
            Notification::Write => endpoint.write().await,
        };
        if let Err(e) = result {
            warn!(
                site_id,
                notification = notification.as_str(),
                error = %e,
                code = e.code(),
                "Site notification failed"
            );
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Notification {
    Abort,
    Unblock,
    Write,
}

impl Notification {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Abort => "abort",
            Self::Unblock => "unblock",
            Self::Write => "write",
        }
    }
}

#[async_trait]
impl CoordinatorEndpoint for Coordinator {
    async fn register_site(&self) -> ProtocolResult<SiteId> {
        Ok(Coordinator::register_site(self).await)
    }

    async fn request_lock(&self, operation: &Operation) -> ProtocolResult<bool> {
        Ok(Coordinator::request_lock(self, operation).await)
    }

    async fn release_lock(&self, transaction: &Transaction) -> ProtocolResult<()> {
        self.release_transaction(transaction.id()).await;
        Ok(())
    }
}
