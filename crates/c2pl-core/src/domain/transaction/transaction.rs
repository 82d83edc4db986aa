//! Transaction execution against the item store

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use super::operation::{Expression, Operation, OperationKind, Operator};
use super::{SiteId, TransactionId, site_id_of};
use crate::error::{Error, Result};
use crate::storage::ItemStore;

/// An ordered list of operations plus the values staged while running them
///
/// Reads land in `pre_commit`, computes in `pre_write`, and a write moves the
/// computed value of its item from `pre_write` into `pre_commit`. Nothing
/// reaches the store until [`Transaction::commit`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    id: TransactionId,
    operations: Vec<Operation>,
    #[serde(skip)]
    pre_commit: BTreeMap<String, i64>,
    #[serde(skip)]
    pre_write: BTreeMap<String, i64>,
}

impl Transaction {
    pub fn new(id: TransactionId) -> Self {
        Self {
            id,
            operations: Vec::new(),
            pre_commit: BTreeMap::new(),
            pre_write: BTreeMap::new(),
        }
    }

    /// Append an operation owned by this transaction
    pub fn push(&mut self, kind: OperationKind, item: impl Into<String>) -> &Operation {
        self.operations.push(Operation::new(self.id, kind, item));
        &self.operations[self.operations.len() - 1]
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn site_id(&self) -> SiteId {
        site_id_of(self.id)
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn pre_commit(&self) -> &BTreeMap<String, i64> {
        &self.pre_commit
    }

    pub fn pre_write(&self) -> &BTreeMap<String, i64> {
        &self.pre_write
    }

    /// Run one operation. Locks must already be held by the caller.
    pub async fn execute(&mut self, operation: &Operation, store: &dyn ItemStore) -> Result<()> {
        let item = operation.item();
        match operation.kind() {
            OperationKind::Read => {
                let value = store.read(item).await?;
                debug!(transaction_id = self.id, item, value, "Read item");
                self.pre_commit.insert(item.to_string(), value);
            }
            OperationKind::Write => {
                let value = self.pre_write.get(item).copied().ok_or_else(|| {
                    Error::MissingWriteValue {
                        transaction_id: self.id,
                        item: item.to_string(),
                    }
                })?;
                debug!(transaction_id = self.id, item, value, "Staged write");
                self.pre_commit.insert(item.to_string(), value);
            }
            OperationKind::Compute(expression) => {
                let value = self.evaluate(item, expression)?;
                debug!(transaction_id = self.id, item, value, "Computed value");
                self.pre_write.insert(item.to_string(), value);
            }
        }
        Ok(())
    }

    /// Flush every staged value to the store. Returns the number of items written.
    pub async fn commit(&self, store: &dyn ItemStore) -> Result<usize> {
        for (item, value) in &self.pre_commit {
            store.write(item, *value).await?;
        }
        Ok(self.pre_commit.len())
    }

    fn evaluate(&self, item: &str, expression: &Expression) -> Result<i64> {
        let lhs = self.operand_value(&expression.operand1)?;
        let rhs = self.operand_value(&expression.operand2)?;

        expression.operator.apply(lhs, rhs).ok_or_else(|| {
            if rhs == 0 && expression.operator == Operator::Divide {
                Error::DivisionByZero {
                    transaction_id: self.id,
                    item: item.to_string(),
                }
            } else {
                Error::Overflow {
                    transaction_id: self.id,
                    item: item.to_string(),
                }
            }
        })
    }

    fn operand_value(&self, operand: &str) -> Result<i64> {
        if !operand.is_empty() && operand.bytes().all(|b| b.is_ascii_digit()) {
            return operand.parse::<i64>().map_err(|_| Error::Overflow {
                transaction_id: self.id,
                item: operand.to_string(),
            });
        }

        self.pre_commit
            .get(operand)
            .copied()
            .ok_or_else(|| Error::UnknownOperand {
                transaction_id: self.id,
                operand: operand.to_string(),
            })
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{} (site {}):", self.id, self.site_id())?;
        for operation in &self.operations {
            match operation.kind() {
                OperationKind::Read => write!(f, " r({});", operation.item())?,
                OperationKind::Write => write!(f, " w({});", operation.item())?,
                OperationKind::Compute(expr) => write!(f, " m {} = {};", operation.item(), expr)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryItemStore;

    fn increment_transaction(id: TransactionId) -> Transaction {
        let mut tx = Transaction::new(id);
        tx.push(OperationKind::Read, "x");
        tx.push(
            OperationKind::Compute(Expression::new("x", Operator::Add, "5")),
            "x",
        );
        tx.push(OperationKind::Write, "x");
        tx
    }

    async fn run_all(tx: &mut Transaction, store: &MemoryItemStore) -> Result<()> {
        let operations = tx.operations().to_vec();
        for op in &operations {
            tx.execute(op, store).await?;
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_read_compute_write_commit() {
        let store = MemoryItemStore::with_items([("x", 10)]);
        let mut tx = increment_transaction(10001);

        run_all(&mut tx, &store).await.unwrap();
        assert_eq!(tx.pre_write().get("x"), Some(&15));
        assert_eq!(tx.pre_commit().get("x"), Some(&15));

        // Nothing reaches the store before commit
        assert_eq!(store.read("x").await.unwrap(), 10);

        let written = tx.commit(&store).await.unwrap();
        assert_eq!(written, 1);
        assert_eq!(store.read("x").await.unwrap(), 15);
    }

    #[tokio::test]
    async fn test_absent_item_reads_as_zero() {
        let store = MemoryItemStore::new();
        let mut tx = increment_transaction(10001);
        run_all(&mut tx, &store).await.unwrap();
        assert_eq!(tx.pre_commit().get("x"), Some(&5));
    }

    #[tokio::test]
    async fn test_write_without_compute_fails() {
        let store = MemoryItemStore::new();
        let mut tx = Transaction::new(10002);
        tx.push(OperationKind::Read, "y");
        tx.push(OperationKind::Write, "y");

        let err = run_all(&mut tx, &store).await.unwrap_err();
        assert!(matches!(err, Error::MissingWriteValue { transaction_id: 10002, .. }));
    }

    #[tokio::test]
    async fn test_unknown_operand_fails() {
        let store = MemoryItemStore::new();
        let mut tx = Transaction::new(10003);
        tx.push(
            OperationKind::Compute(Expression::new("z", Operator::Add, "1")),
            "x",
        );

        let err = run_all(&mut tx, &store).await.unwrap_err();
        assert!(matches!(err, Error::UnknownOperand { ref operand, .. } if operand == "z"));
    }

    #[tokio::test]
    async fn test_division_by_zero_fails() {
        let store = MemoryItemStore::new();
        let mut tx = Transaction::new(10004);
        tx.push(
            OperationKind::Compute(Expression::new("4", Operator::Divide, "0")),
            "x",
        );

        let err = run_all(&mut tx, &store).await.unwrap_err();
        assert!(matches!(err, Error::DivisionByZero { .. }));
    }

    #[test]
    fn test_push_assigns_owner() {
        let mut tx = Transaction::new(30007);
        let op = tx.push(OperationKind::Read, "a");
        assert_eq!(op.transaction_id(), 30007);
        assert_eq!(tx.site_id(), 3);
    }

    #[test]
    fn test_display() {
        let tx = increment_transaction(10001);
        assert_eq!(tx.to_string(), "T10001 (site 1): r(x); m x = x + 5; w(x);");
    }
}
