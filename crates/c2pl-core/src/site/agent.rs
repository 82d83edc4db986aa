//! Sequential transaction executor of one site

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::control::{SiteControl, SiteState};
use crate::config::SiteConfig;
use crate::domain::transaction::{Operation, SiteId, Transaction, TransactionId, TransactionQueue};
use crate::error::Error;
use crate::protocol::{CoordinatorEndpoint, ProtocolError};
use crate::storage::ItemStore;

/// Timing knobs of the agent loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentSettings {
    /// Pause after each executed operation
    pub operation_delay: Duration,

    /// How often a blocked site logs that it is still waiting
    pub blocked_log_interval: Duration,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            operation_delay: Duration::from_millis(100),
            blocked_log_interval: Duration::from_millis(1000),
        }
    }
}

impl From<&SiteConfig> for AgentSettings {
    fn from(config: &SiteConfig) -> Self {
        Self {
            operation_delay: Duration::from_millis(config.operation_delay_ms),
            blocked_log_interval: Duration::from_millis(config.blocked_log_interval_ms),
        }
    }
}

/// How a transaction ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionOutcome {
    /// Committed to storage and locks released
    Committed,
    /// Chosen as a deadlock victim
    Aborted,
    /// Stopped by an execution, storage or transport error
    Failed,
}

/// Summary of one pass over the transaction queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteReport {
    pub site_id: SiteId,
    pub committed: Vec<TransactionId>,
    pub aborted: Vec<TransactionId>,
    pub failed: Vec<TransactionId>,
}

impl SiteReport {
    fn record(&mut self, transaction_id: TransactionId, outcome: TransactionOutcome) {
        match outcome {
            TransactionOutcome::Committed => self.committed.push(transaction_id),
            TransactionOutcome::Aborted => self.aborted.push(transaction_id),
            TransactionOutcome::Failed => self.failed.push(transaction_id),
        }
    }

    pub fn total(&self) -> usize {
        self.committed.len() + self.aborted.len() + self.failed.len()
    }
}

impl fmt::Display for SiteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "site {}: {} committed, {} aborted, {} failed",
            self.site_id,
            self.committed.len(),
            self.aborted.len(),
            self.failed.len()
        )
    }
}

/// Runs a site's transactions one at a time under the coordinator's locks
pub struct SiteAgent {
    coordinator: Arc<dyn CoordinatorEndpoint>,
    store: Arc<dyn ItemStore>,
    control: Arc<SiteControl>,
    settings: AgentSettings,
}

impl SiteAgent {
    pub fn new(
        coordinator: Arc<dyn CoordinatorEndpoint>,
        store: Arc<dyn ItemStore>,
        control: Arc<SiteControl>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            coordinator,
            store,
            control,
            settings,
        }
    }

    pub fn site_id(&self) -> SiteId {
        self.control.site_id()
    }

    pub fn control(&self) -> &Arc<SiteControl> {
        &self.control
    }

    /// Run every queued transaction, then go idle
    pub async fn run(&self, mut queue: TransactionQueue) -> SiteReport {
        let site_id = self.site_id();
        let mut report = SiteReport {
            site_id,
            ..Default::default()
        };
        info!(site_id, transactions = queue.len(), "Site agent started");

        while let Some(transaction) = queue.pop() {
            let transaction_id = transaction.id();
            let outcome = self.run_transaction(transaction).await;
            report.record(transaction_id, outcome);
        }

        self.control.set_state(SiteState::Idle);
        info!(site_id, summary = %report, "Transaction queue exhausted");
        report
    }

    /// Run one transaction to commit, abort or failure
    pub async fn run_transaction(&self, mut transaction: Transaction) -> TransactionOutcome {
        let site_id = self.site_id();
        let transaction_id = transaction.id();

        if self.control.take_abort() {
            debug!(site_id, transaction_id, "Discarded stale abort request");
        }
        self.control.set_state(SiteState::Running);
        info!(site_id, transaction_id, "Starting transaction {}", transaction);

        let operations = transaction.operations().to_vec();
        for operation in &operations {
            if self.control.take_abort() {
                return self.abandon_aborted(transaction_id);
            }

            if operation.requires_lock() {
                if let Err(e) = self.acquire(operation).await {
                    warn!(
                        site_id,
                        transaction_id,
                        item = operation.item(),
                        error = %e,
                        code = e.code(),
                        "Lock request failed, abandoning transaction"
                    );
                    return TransactionOutcome::Failed;
                }
                if self.control.take_abort() {
                    return self.abandon_aborted(transaction_id);
                }
            }

            if let Err(e) = transaction.execute(operation, self.store.as_ref()).await {
                return self.fail(&transaction, e).await;
            }
            debug!(site_id, transaction_id, "Executed {}", operation);

            if !self.settings.operation_delay.is_zero() {
                tokio::time::sleep(self.settings.operation_delay).await;
            }
        }

        if self.control.take_abort() {
            return self.abandon_aborted(transaction_id);
        }

        match transaction.commit(self.store.as_ref()).await {
            Ok(written) => info!(site_id, transaction_id, written, "Committed transaction"),
            Err(e) => return self.fail(&transaction, e).await,
        }
        self.release(&transaction).await;
        TransactionOutcome::Committed
    }

    /// Request the lock for `operation`, waiting while it is queued
    async fn acquire(&self, operation: &Operation) -> Result<(), ProtocolError> {
        // Blocked before the call so an unblock racing the reply is not lost
        self.control.set_state(SiteState::Blocked);

        let granted = match self.coordinator.request_lock(operation).await {
            Ok(granted) => granted,
            Err(e) => {
                self.control.set_state(SiteState::Running);
                return Err(e);
            }
        };

        if granted {
            self.control.set_state(SiteState::Running);
            return Ok(());
        }

        info!(
            site_id = self.site_id(),
            transaction_id = operation.transaction_id(),
            item = operation.item(),
            "Lock denied, waiting"
        );
        self.control
            .wait_until_unblocked(operation, self.settings.blocked_log_interval)
            .await;
        Ok(())
    }

    fn abandon_aborted(&self, transaction_id: TransactionId) -> TransactionOutcome {
        self.control.set_state(SiteState::Aborting);
        warn!(site_id = self.site_id(), transaction_id, "Transaction aborted by coordinator");
        self.control.set_state(SiteState::Running);
        TransactionOutcome::Aborted
    }

    async fn fail(&self, transaction: &Transaction, error: Error) -> TransactionOutcome {
        let stage = if error.is_execution_failure() {
            "execution"
        } else {
            "storage"
        };
        warn!(
            site_id = self.site_id(),
            transaction_id = transaction.id(),
            stage,
            error = %error,
            code = error.code(),
            "Transaction failed, not committing"
        );
        self.release(transaction).await;
        TransactionOutcome::Failed
    }

    async fn release(&self, transaction: &Transaction) {
        if let Err(e) = self.coordinator.release_lock(transaction).await {
            warn!(
                site_id = self.site_id(),
                transaction_id = transaction.id(),
                error = %e,
                code = e.code(),
                "Failed to release locks"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::Coordinator;
    use crate::domain::transaction::{Expression, OperationKind, Operator};
    use crate::protocol::ProtocolResult;
    use crate::storage::MemoryItemStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast() -> AgentSettings {
        AgentSettings {
            operation_delay: Duration::ZERO,
            blocked_log_interval: Duration::from_secs(1),
        }
    }

    fn increment(id: TransactionId, item: &str, by: &str) -> Transaction {
        let mut tx = Transaction::new(id);
        tx.push(OperationKind::Read, item);
        tx.push(
            OperationKind::Compute(Expression::new(item, Operator::Add, by)),
            item,
        );
        tx.push(OperationKind::Write, item);
        tx
    }

    async fn agent_for(coordinator: &Arc<Coordinator>, store: Arc<MemoryItemStore>) -> SiteAgent {
        let site_id = coordinator.register_site().await;
        let control = Arc::new(SiteControl::new(site_id));
        coordinator.bind_site(site_id, control.clone()).await.unwrap();
        SiteAgent::new(coordinator.clone(), store, control, fast())
    }

    #[tokio::test]
    async fn test_commits_and_releases() {
        let coordinator = Arc::new(Coordinator::new());
        let store = Arc::new(MemoryItemStore::with_items([("x", 1)]));
        let agent = agent_for(&coordinator, store.clone()).await;

        let queue = TransactionQueue::from(vec![
            increment(10001, "x", "2"),
            increment(10002, "x", "3"),
        ]);
        let report = agent.run(queue).await;

        assert_eq!(report.committed, vec![10001, 10002]);
        assert_eq!(store.read("x").await.unwrap(), 6);
        assert_eq!(agent.control().state(), SiteState::Idle);
        assert!(coordinator.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_execution_failure_releases_locks() {
        let coordinator = Arc::new(Coordinator::new());
        let store = Arc::new(MemoryItemStore::with_items([("x", 1)]));
        let agent = agent_for(&coordinator, store.clone()).await;

        let mut broken = Transaction::new(10001);
        broken.push(OperationKind::Read, "x");
        broken.push(OperationKind::Write, "x");

        let outcome = agent.run_transaction(broken).await;
        assert_eq!(outcome, TransactionOutcome::Failed);
        assert_eq!(store.read("x").await.unwrap(), 1);
        assert!(coordinator.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_stale_abort_is_discarded_on_start() {
        let coordinator = Arc::new(Coordinator::new());
        let store = Arc::new(MemoryItemStore::with_items([("x", 1)]));
        let agent = agent_for(&coordinator, store.clone()).await;

        agent.control().request_abort();
        let outcome = agent.run_transaction(increment(10001, "x", "1")).await;
        assert_eq!(outcome, TransactionOutcome::Committed);
        assert!(!agent.control().is_abort_requested());
        assert_eq!(store.read("x").await.unwrap(), 2);
    }

    /// Coordinator that cannot be reached for the first `failures` lock requests
    struct FlakyCoordinator {
        inner: Arc<Coordinator>,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl CoordinatorEndpoint for FlakyCoordinator {
        async fn register_site(&self) -> ProtocolResult<SiteId> {
            Ok(self.inner.register_site().await)
        }

        async fn request_lock(&self, operation: &Operation) -> ProtocolResult<bool> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(ProtocolError::Connect {
                    address: "127.0.0.1:1099".to_string(),
                    message: "connection refused".to_string(),
                });
            }
            Ok(self.inner.request_lock(operation).await)
        }

        async fn release_lock(&self, transaction: &Transaction) -> ProtocolResult<()> {
            self.inner.release_transaction(transaction.id()).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_transport_failure_abandons_transaction_and_continues() {
        let inner = Arc::new(Coordinator::new());
        let site_id = inner.register_site().await;
        let control = Arc::new(SiteControl::new(site_id));
        inner.bind_site(site_id, control.clone()).await.unwrap();

        let coordinator = Arc::new(FlakyCoordinator {
            inner: inner.clone(),
            failures: AtomicUsize::new(1),
        });
        let store = Arc::new(MemoryItemStore::with_items([("x", 1)]));
        let agent = SiteAgent::new(coordinator, store.clone(), control, fast());

        let queue = TransactionQueue::from(vec![
            increment(10001, "x", "10"),
            increment(10002, "x", "2"),
        ]);
        let report = agent.run(queue).await;

        assert_eq!(report.failed, vec![10001]);
        assert_eq!(report.committed, vec![10002]);
        assert!(report.aborted.is_empty());
        assert_eq!(store.read("x").await.unwrap(), 3);
        assert_eq!(agent.control().state(), SiteState::Idle);
        assert!(inner.snapshot().await.is_empty());
    }

    #[test]
    fn test_report_display() {
        let mut report = SiteReport {
            site_id: 2,
            ..Default::default()
        };
        report.record(20001, TransactionOutcome::Committed);
        report.record(20002, TransactionOutcome::Aborted);
        assert_eq!(report.total(), 2);
        assert_eq!(report.to_string(), "site 2: 1 committed, 1 aborted, 0 failed");
    }
}
