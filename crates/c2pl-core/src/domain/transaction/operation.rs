//! Operations issued by transactions

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{TransactionId, site_id_of};
use crate::domain::locking::{Lock, LockType};

/// Arithmetic operator of a compute operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl Operator {
    /// Parse an operator from its script symbol
    pub fn from_symbol(symbol: char) -> Option<Self> {
        match symbol {
            '+' => Some(Self::Add),
            '-' => Some(Self::Subtract),
            '*' => Some(Self::Multiply),
            '/' => Some(Self::Divide),
            _ => None,
        }
    }

    /// The symbol used in transaction scripts
    pub fn symbol(&self) -> char {
        match self {
            Self::Add => '+',
            Self::Subtract => '-',
            Self::Multiply => '*',
            Self::Divide => '/',
        }
    }

    /// Apply the operator. `None` on overflow or division by zero.
    pub fn apply(&self, lhs: i64, rhs: i64) -> Option<i64> {
        match self {
            Self::Add => lhs.checked_add(rhs),
            Self::Subtract => lhs.checked_sub(rhs),
            Self::Multiply => lhs.checked_mul(rhs),
            Self::Divide => lhs.checked_div(rhs),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// Right-hand side of a compute operation: `operand1 operator operand2`
///
/// Operands are either unsigned integer literals or names of items the
/// transaction has already read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expression {
    pub operand1: String,
    pub operator: Operator,
    pub operand2: String,
}

impl Expression {
    pub fn new(
        operand1: impl Into<String>,
        operator: Operator,
        operand2: impl Into<String>,
    ) -> Self {
        Self {
            operand1: operand1.into(),
            operator,
            operand2: operand2.into(),
        }
    }

    /// `m x = a` is shorthand for `m x = a + 0`
    pub fn unary(operand: impl Into<String>) -> Self {
        Self::new(operand, Operator::Add, "0")
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.operand1, self.operator, self.operand2)
    }
}

/// What an operation does
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Read the committed value of the item
    Read,
    /// Stage the computed value of the item for commit
    Write,
    /// Compute a new value for the item locally; never locked
    Compute(Expression),
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Compute(_) => "compute",
        }
    }
}

/// A single step of a transaction. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    transaction_id: TransactionId,
    item: String,
    kind: OperationKind,
}

impl Operation {
    pub fn new(
        transaction_id: TransactionId,
        kind: OperationKind,
        item: impl Into<String>,
    ) -> Self {
        Self {
            transaction_id,
            item: item.into(),
            kind,
        }
    }

    pub fn read(transaction_id: TransactionId, item: impl Into<String>) -> Self {
        Self::new(transaction_id, OperationKind::Read, item)
    }

    pub fn write(transaction_id: TransactionId, item: impl Into<String>) -> Self {
        Self::new(transaction_id, OperationKind::Write, item)
    }

    pub fn compute(
        transaction_id: TransactionId,
        item: impl Into<String>,
        expression: Expression,
    ) -> Self {
        Self::new(transaction_id, OperationKind::Compute(expression), item)
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    pub fn item(&self) -> &str {
        &self.item
    }

    pub fn kind(&self) -> &OperationKind {
        &self.kind
    }

    /// Whether the operation has to be granted a lock before it runs
    pub fn requires_lock(&self) -> bool {
        !matches!(self.kind, OperationKind::Compute(_))
    }

    /// The lock this operation needs, if any
    pub fn lock(&self) -> Option<Lock> {
        let lock_type = match self.kind {
            OperationKind::Read => LockType::Read,
            OperationKind::Write => LockType::Write,
            OperationKind::Compute(_) => return None,
        };
        Some(Lock::new(lock_type, self.item.clone(), self.transaction_id))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            OperationKind::Read => write!(f, "READ({})", self.item)?,
            OperationKind::Write => write!(f, "WRITE({})", self.item)?,
            OperationKind::Compute(expr) => write!(f, "COMPUTE({} = {})", self.item, expr)?,
        }
        write!(
            f,
            " [transaction {}, site {}]",
            self.transaction_id,
            site_id_of(self.transaction_id)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_apply() {
        assert_eq!(Operator::Add.apply(2, 3), Some(5));
        assert_eq!(Operator::Subtract.apply(2, 3), Some(-1));
        assert_eq!(Operator::Multiply.apply(4, 3), Some(12));
        assert_eq!(Operator::Divide.apply(7, 2), Some(3));
        assert_eq!(Operator::Divide.apply(7, 0), None);
        assert_eq!(Operator::Add.apply(i64::MAX, 1), None);
    }

    #[test]
    fn test_operator_symbols() {
        for symbol in ['+', '-', '*', '/'] {
            let op = Operator::from_symbol(symbol).unwrap();
            assert_eq!(op.symbol(), symbol);
        }
        assert!(Operator::from_symbol('%').is_none());
    }

    #[test]
    fn test_lock_derivation() {
        let read = Operation::read(10001, "x");
        let lock = read.lock().unwrap();
        assert_eq!(lock.lock_type(), LockType::Read);
        assert_eq!(lock.item(), "x");
        assert_eq!(lock.owner(), 10001);

        let write = Operation::write(10001, "x");
        assert_eq!(write.lock().unwrap().lock_type(), LockType::Write);

        let compute = Operation::compute(10001, "x", Expression::unary("5"));
        assert!(compute.lock().is_none());
        assert!(!compute.requires_lock());
    }

    #[test]
    fn test_display() {
        let op = Operation::compute(20003, "y", Expression::new("x", Operator::Multiply, "2"));
        assert_eq!(op.to_string(), "COMPUTE(y = x * 2) [transaction 20003, site 2]");
    }

    #[test]
    fn test_serde_shape() {
        let op = Operation::read(10001, "x");
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["kind"], "read");
        assert_eq!(json["item"], "x");

        let back: Operation = serde_json::from_value(json).unwrap();
        assert_eq!(back, op);
    }
}
