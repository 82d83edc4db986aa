//! Lock manager owning the lock table and the wait queue
//!
//! The manager is a plain state machine with no interior locking. The
//! coordinator keeps it behind a single async mutex, which makes every call
//! here one atomic step of the protocol.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::Utc;
use tracing::{debug, info, warn};

use super::types::{Lock, LockError, LockResult, LockTableSnapshot, LockType};
use crate::domain::transaction::{Operation, SiteId, TransactionId, site_id_of};

/// Granted locks per item
pub type LockTable = BTreeMap<String, Vec<Lock>>;

/// Denied operations per item, head first
pub type WaitQueue = BTreeMap<String, VecDeque<Operation>>;

/// Central lock manager
///
/// Invariant: on any item, a write or read/write lock is never held next to
/// a lock of another transaction, and a transaction holds at most one lock
/// per item. Items with no locks (or no waiters) have no entry.
#[derive(Debug, Default)]
pub struct LockManager {
    locks: LockTable,
    waiting: WaitQueue,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant the lock `operation` needs, or queue the operation
    ///
    /// Returns `Ok(true)` when the lock was inserted or upgraded and
    /// `Ok(false)` when the operation now waits on the item.
    pub fn request_lock(&mut self, operation: &Operation) -> LockResult<bool> {
        let lock = operation.lock().ok_or_else(|| LockError::NotLockable {
            transaction_id: operation.transaction_id(),
            kind: operation.kind().as_str().to_string(),
        })?;

        let granted = if self.is_compatible(&lock) {
            self.grant(lock);
            true
        } else {
            debug!(
                transaction_id = operation.transaction_id(),
                item = operation.item(),
                lock_type = %lock.lock_type(),
                "Lock denied, queueing operation"
            );
            self.waiting
                .entry(operation.item().to_string())
                .or_default()
                .push_back(operation.clone());
            false
        };

        debug!(state = %self.snapshot(), "Lock table after request");
        Ok(granted)
    }

    /// Whether `lock` can be granted right now. Unrequestable types fail closed.
    pub fn is_compatible(&self, lock: &Lock) -> bool {
        match self.check_compatible(lock) {
            Ok(compatible) => compatible,
            Err(e) => {
                warn!(error = %e, code = e.code(), "Rejecting lock request");
                false
            }
        }
    }

    /// Compatibility check that reports unrequestable lock types as errors
    ///
    /// `ReadWrite` only arises from an upgrade and is rejected on every item,
    /// free or not.
    pub fn check_compatible(&self, lock: &Lock) -> LockResult<bool> {
        if lock.lock_type() == LockType::ReadWrite {
            return Err(LockError::InvalidLockType {
                item: lock.item().to_string(),
                transaction_id: lock.owner(),
                lock_type: lock.lock_type(),
            });
        }

        let Some(held) = self.locks.get(lock.item()) else {
            return Ok(true);
        };

        let mut others = held.iter().filter(|h| h.owner() != lock.owner());
        match lock.lock_type() {
            LockType::Read => Ok(!others.any(|h| h.lock_type().is_exclusive())),
            LockType::Write | LockType::ReadWrite => Ok(others.next().is_none()),
        }
    }

    /// Release every lock of `transaction_id`, promoting queue heads that fit
    ///
    /// Returns the sites whose transactions were promoted. Only the head of a
    /// queue is ever considered; an incompatible head blocks those behind it.
    pub fn release_locks(&mut self, transaction_id: TransactionId) -> BTreeSet<SiteId> {
        let mut unblocked = BTreeSet::new();

        for lock in self.find_locks(transaction_id) {
            let item = lock.item();
            if let Some(held) = self.locks.get_mut(item) {
                held.retain(|h| h.owner() != transaction_id);
                if held.is_empty() {
                    self.locks.remove(item);
                }
            }
            debug!(transaction_id, item, lock_type = %lock.lock_type(), "Released lock");

            if let Some(site_id) = self.promote_head(item) {
                unblocked.insert(site_id);
            }
        }

        debug!(state = %self.snapshot(), "Lock table after release");
        unblocked
    }

    /// Drop every queued operation of `transaction_id`
    pub fn remove_blocked_operations(&mut self, transaction_id: TransactionId) {
        self.waiting.retain(|_, queue| {
            queue.retain(|op| op.transaction_id() != transaction_id);
            !queue.is_empty()
        });
    }

    /// Purge the queued operations of `transaction_id`, then release its locks
    pub fn abort_transaction(&mut self, transaction_id: TransactionId) -> BTreeSet<SiteId> {
        info!(transaction_id, site_id = site_id_of(transaction_id), "Aborting transaction");
        self.remove_blocked_operations(transaction_id);
        self.release_locks(transaction_id)
    }

    pub fn find_lock(&self, transaction_id: TransactionId, item: &str) -> Option<&Lock> {
        self.locks
            .get(item)?
            .iter()
            .find(|lock| lock.owner() == transaction_id)
    }

    /// All locks held by `transaction_id`, in item order
    pub fn find_locks(&self, transaction_id: TransactionId) -> Vec<Lock> {
        self.locks
            .values()
            .flatten()
            .filter(|lock| lock.owner() == transaction_id)
            .cloned()
            .collect()
    }

    /// Operations of `transaction_id` still waiting, in item order
    pub fn queued_operations(&self, transaction_id: TransactionId) -> Vec<Operation> {
        self.waiting
            .values()
            .flatten()
            .filter(|op| op.transaction_id() == transaction_id)
            .cloned()
            .collect()
    }

    pub fn lock_table(&self) -> &LockTable {
        &self.locks
    }

    pub fn wait_queue(&self) -> &WaitQueue {
        &self.waiting
    }

    pub fn snapshot(&self) -> LockTableSnapshot {
        LockTableSnapshot {
            taken_at: Utc::now(),
            locks: self.locks.clone(),
            waiting: self
                .waiting
                .iter()
                .map(|(item, queue)| (item.clone(), queue.iter().cloned().collect()))
                .collect(),
        }
    }

    /// Insert `lock`, or upgrade the owner's existing lock on the item
    fn grant(&mut self, lock: Lock) {
        let held = self.locks.entry(lock.item().to_string()).or_default();
        if let Some(existing) = held.iter_mut().find(|h| h.owner() == lock.owner()) {
            existing.upgrade(lock.lock_type());
            return;
        }
        held.push(lock);
    }

    /// Grant the head of `item`'s queue if it is now compatible
    fn promote_head(&mut self, item: &str) -> Option<SiteId> {
        let head = self.waiting.get(item)?.front()?.lock()?;
        if !self.is_compatible(&head) {
            return None;
        }

        if let Some(queue) = self.waiting.get_mut(item) {
            queue.pop_front();
            if queue.is_empty() {
                self.waiting.remove(item);
            }
        }

        let owner = head.owner();
        debug!(
            transaction_id = owner,
            item,
            lock_type = %head.lock_type(),
            "Promoted queued operation"
        );
        self.grant(head);
        Some(site_id_of(owner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::transaction::Expression;

    const T1: TransactionId = 10001;
    const T2: TransactionId = 20001;
    const T3: TransactionId = 30001;

    #[test]
    fn test_write_excludes_other_transactions() {
        let mut manager = LockManager::new();
        assert!(manager.request_lock(&Operation::write(T1, "x")).unwrap());
        assert!(!manager.request_lock(&Operation::read(T2, "x")).unwrap());
        assert!(!manager.request_lock(&Operation::write(T3, "x")).unwrap());

        assert_eq!(manager.lock_table()["x"].len(), 1);
        assert_eq!(manager.wait_queue()["x"].len(), 2);
    }

    #[test]
    fn test_reads_share() {
        let mut manager = LockManager::new();
        assert!(manager.request_lock(&Operation::read(T1, "x")).unwrap());
        assert!(manager.request_lock(&Operation::read(T2, "x")).unwrap());
        assert_eq!(manager.lock_table()["x"].len(), 2);
        assert!(manager.wait_queue().is_empty());

        // A writer has to wait for both readers
        assert!(!manager.request_lock(&Operation::write(T3, "x")).unwrap());
    }

    #[test]
    fn test_read_then_write_upgrades_in_place() {
        let mut manager = LockManager::new();
        assert!(manager.request_lock(&Operation::read(T1, "x")).unwrap());
        assert!(manager.request_lock(&Operation::write(T1, "x")).unwrap());

        let held = &manager.lock_table()["x"];
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].lock_type(), LockType::ReadWrite);

        // Same type again is a no-op
        assert!(manager.request_lock(&Operation::write(T1, "x")).unwrap());
        assert_eq!(manager.find_lock(T1, "x").unwrap().lock_type(), LockType::ReadWrite);
        assert_eq!(manager.lock_table()["x"].len(), 1);
    }

    #[test]
    fn test_upgrade_blocked_by_other_reader() {
        let mut manager = LockManager::new();
        manager.request_lock(&Operation::read(T1, "x")).unwrap();
        manager.request_lock(&Operation::read(T2, "x")).unwrap();

        assert!(!manager.request_lock(&Operation::write(T1, "x")).unwrap());
        assert_eq!(manager.find_lock(T1, "x").unwrap().lock_type(), LockType::Read);
    }

    #[test]
    fn test_compute_cannot_lock() {
        let mut manager = LockManager::new();
        let op = Operation::compute(T1, "x", Expression::unary("1"));
        let err = manager.request_lock(&op).unwrap_err();
        assert_eq!(err.code(), "E300");
        assert!(manager.lock_table().is_empty());
    }

    #[test]
    fn test_read_write_request_fails_closed() {
        let mut manager = LockManager::new();
        let lock = Lock::new(LockType::ReadWrite, "x", T1);
        assert!(!manager.is_compatible(&lock));
        assert!(matches!(
            manager.check_compatible(&lock),
            Err(LockError::InvalidLockType { .. })
        ));

        // Same answer once the item is held, even by the requester itself
        manager.request_lock(&Operation::read(T1, "x")).unwrap();
        let err = manager.check_compatible(&lock).unwrap_err();
        assert_eq!(err.code(), "E301");
        assert!(!manager.is_compatible(&lock));
    }

    #[test]
    fn test_release_promotes_head() {
        let mut manager = LockManager::new();
        manager.request_lock(&Operation::write(T1, "x")).unwrap();
        manager.request_lock(&Operation::write(T2, "x")).unwrap();

        let unblocked = manager.release_locks(T1);
        assert_eq!(unblocked, BTreeSet::from([2]));
        assert_eq!(manager.find_lock(T2, "x").unwrap().lock_type(), LockType::Write);
        assert!(manager.find_lock(T1, "x").is_none());
        assert!(manager.wait_queue().is_empty());
    }

    #[test]
    fn test_incompatible_head_blocks_the_rest() {
        let mut manager = LockManager::new();
        manager.request_lock(&Operation::read(T1, "x")).unwrap();
        manager.request_lock(&Operation::read(T2, "x")).unwrap();
        // Two writers queue behind the readers
        manager.request_lock(&Operation::write(T3, "x")).unwrap();
        manager.request_lock(&Operation::write(40001, "x")).unwrap();

        // T2 still reads, so the writer at the head stays queued
        let unblocked = manager.release_locks(T1);
        assert!(unblocked.is_empty());
        assert_eq!(manager.wait_queue()["x"].len(), 2);
        assert_eq!(manager.wait_queue()["x"][0].transaction_id(), T3);
    }

    #[test]
    fn test_one_promotion_per_released_lock() {
        let mut manager = LockManager::new();
        manager.request_lock(&Operation::write(T1, "x")).unwrap();
        manager.request_lock(&Operation::read(T2, "x")).unwrap();
        manager.request_lock(&Operation::read(T3, "x")).unwrap();

        let unblocked = manager.release_locks(T1);
        assert_eq!(unblocked, BTreeSet::from([2]));
        assert!(manager.find_lock(T2, "x").is_some());
        assert!(manager.find_lock(T3, "x").is_none());
        assert_eq!(manager.queued_operations(T3).len(), 1);
    }

    #[test]
    fn test_promoted_waiter_upgrades_existing_lock() {
        let mut manager = LockManager::new();
        manager.request_lock(&Operation::read(T1, "x")).unwrap();
        manager.request_lock(&Operation::read(T2, "x")).unwrap();
        manager.request_lock(&Operation::write(T2, "x")).unwrap();

        let unblocked = manager.release_locks(T1);
        assert_eq!(unblocked, BTreeSet::from([2]));
        assert_eq!(manager.lock_table()["x"].len(), 1);
        assert_eq!(manager.find_lock(T2, "x").unwrap().lock_type(), LockType::ReadWrite);
    }

    #[test]
    fn test_abort_purges_queue_and_releases() {
        let mut manager = LockManager::new();
        manager.request_lock(&Operation::write(T1, "x")).unwrap();
        manager.request_lock(&Operation::write(T2, "y")).unwrap();
        manager.request_lock(&Operation::write(T1, "y")).unwrap();
        manager.request_lock(&Operation::write(T2, "x")).unwrap();

        let unblocked = manager.abort_transaction(T1);
        assert_eq!(unblocked, BTreeSet::from([2]));
        assert!(manager.find_locks(T1).is_empty());
        assert!(manager.queued_operations(T1).is_empty());
        assert!(manager.find_lock(T2, "x").is_some());
        assert!(manager.find_lock(T2, "y").is_some());
    }

    #[test]
    fn test_round_trip_leaves_no_entries() {
        let mut manager = LockManager::new();
        manager.request_lock(&Operation::read(T1, "x")).unwrap();
        manager.request_lock(&Operation::write(T1, "x")).unwrap();
        manager.request_lock(&Operation::write(T1, "y")).unwrap();
        manager.request_lock(&Operation::read(T2, "y")).unwrap();

        manager.release_locks(T1);
        manager.release_locks(T2);

        assert!(manager.lock_table().is_empty());
        assert!(manager.wait_queue().is_empty());
        assert!(manager.snapshot().is_empty());
    }

    #[test]
    fn test_remove_blocked_operations_drops_empty_queues() {
        let mut manager = LockManager::new();
        manager.request_lock(&Operation::write(T1, "x")).unwrap();
        manager.request_lock(&Operation::read(T2, "x")).unwrap();

        manager.remove_blocked_operations(T2);
        assert!(manager.wait_queue().is_empty());
        assert_eq!(manager.lock_table()["x"].len(), 1);
    }

    #[test]
    fn test_snapshot_counts() {
        let mut manager = LockManager::new();
        manager.request_lock(&Operation::write(T1, "x")).unwrap();
        manager.request_lock(&Operation::read(T2, "x")).unwrap();

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.lock_count(), 1);
        assert_eq!(snapshot.waiting_count(), 1);
        let text = snapshot.to_string();
        assert!(text.contains("[x, write, transaction 10001, site 1]"));
        assert!(text.contains("READ(x) [transaction 20001, site 2]"));
    }
}
