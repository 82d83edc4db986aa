//! Transactions and the operations they are made of
//!
//! A transaction id encodes the site that created it:
//! `id = site_id * TRANSACTION_ID_OFFSET + local_sequence`. The coordinator
//! relies on this to route abort and unblock notifications without keeping a
//! transaction-to-site table.

pub mod operation;
pub mod script;
#[allow(clippy::module_inception)]
pub mod transaction;

pub use operation::{Expression, Operation, OperationKind, Operator};
pub use script::{TransactionIdGenerator, TransactionQueue, load_script, parse_script};
pub use transaction::Transaction;

/// Globally unique transaction identifier
pub type TransactionId = u32;

/// Identifier handed out to a site by the coordinator (first site is 1)
pub type SiteId = u32;

/// Multiplier separating the site part of a transaction id from its local sequence
pub const TRANSACTION_ID_OFFSET: TransactionId = 10_000;

/// The site that created the given transaction
pub fn site_id_of(transaction_id: TransactionId) -> SiteId {
    transaction_id / TRANSACTION_ID_OFFSET
}
