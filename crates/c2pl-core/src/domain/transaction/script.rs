//! Transaction script parsing
//!
//! Scripts are line oriented:
//!
//! ```text
//! transaction
//! r(x)
//! m x = x + 1
//! w(x)
//! transaction
//! r(y)
//! m z = y
//! w(z)
//! ```
//!
//! A `transaction` line starts a new transaction. `m item = a OP b` computes a
//! value (OP is one of `+ - * /`) and `m item = a` is shorthand for `a + 0`.
//! A trailing `;` is accepted on compute lines. Blank lines and lines starting
//! with `#` are ignored.

use std::collections::VecDeque;
use std::path::Path;

use super::operation::{Expression, OperationKind, Operator};
use super::transaction::Transaction;
use super::{SiteId, TRANSACTION_ID_OFFSET, TransactionId};
use crate::error::{Error, Result};

/// Hands out `site_id * OFFSET + n` ids, starting at `n = 1`
#[derive(Debug, Clone)]
pub struct TransactionIdGenerator {
    site_id: SiteId,
    next_sequence: TransactionId,
}

impl TransactionIdGenerator {
    pub fn new(site_id: SiteId) -> Self {
        Self {
            site_id,
            next_sequence: 1,
        }
    }

    pub fn site_id(&self) -> SiteId {
        self.site_id
    }

    /// Next id for this site
    ///
    /// Fails once the local sequence would spill into the next site's range,
    /// or when the site id itself is too large to encode.
    pub fn next_id(&mut self) -> Result<TransactionId> {
        let exhausted = || Error::TransactionIdsExhausted {
            site_id: self.site_id,
        };
        if self.next_sequence >= TRANSACTION_ID_OFFSET {
            return Err(exhausted());
        }
        let id = self
            .site_id
            .checked_mul(TRANSACTION_ID_OFFSET)
            .and_then(|base| base.checked_add(self.next_sequence))
            .ok_or_else(exhausted)?;
        self.next_sequence += 1;
        Ok(id)
    }
}

/// FIFO of transactions waiting to be run by a site
#[derive(Debug, Default)]
pub struct TransactionQueue {
    pending: VecDeque<Transaction>,
}

impl TransactionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, transaction: Transaction) {
        self.pending.push_back(transaction);
    }

    /// Take the next transaction to run, if any
    pub fn pop(&mut self) -> Option<Transaction> {
        self.pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transaction> {
        self.pending.iter()
    }
}

impl From<Vec<Transaction>> for TransactionQueue {
    fn from(transactions: Vec<Transaction>) -> Self {
        Self {
            pending: transactions.into(),
        }
    }
}

/// Read a script file and build the queue of transactions for `site_id`
pub fn load_script(path: impl AsRef<Path>, site_id: SiteId) -> Result<TransactionQueue> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| Error::ScriptFile {
        path: path.to_path_buf(),
        source,
    })?;

    let mut ids = TransactionIdGenerator::new(site_id);
    Ok(parse_script(&contents, &mut ids)?.into())
}

/// Parse script text into transactions, numbering them with `ids`
pub fn parse_script(contents: &str, ids: &mut TransactionIdGenerator) -> Result<Vec<Transaction>> {
    let mut transactions = Vec::new();
    let mut current: Option<Transaction> = None;

    for (index, raw) in contents.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line.to_ascii_lowercase().starts_with("transaction") {
            if let Some(done) = current.take() {
                transactions.push(done);
            }
            let id = ids
                .next_id()
                .map_err(|e| script_error(line_no, e.to_string()))?;
            current = Some(Transaction::new(id));
            continue;
        }

        let Some(transaction) = current.as_mut() else {
            return Err(script_error(
                line_no,
                format!("operation '{}' appears before any `transaction` line", line),
            ));
        };

        let (kind, item) = parse_operation(line).map_err(|message| script_error(line_no, message))?;
        transaction.push(kind, item);
    }

    if let Some(done) = current {
        transactions.push(done);
    }

    Ok(transactions)
}

fn script_error(line: usize, message: String) -> Error {
    Error::Script { line, message }
}

fn parse_operation(line: &str) -> std::result::Result<(OperationKind, String), String> {
    match line.chars().next() {
        Some('r') => parse_item_call(line).map(|item| (OperationKind::Read, item)),
        Some('w') => parse_item_call(line).map(|item| (OperationKind::Write, item)),
        Some('m') => parse_compute(&line[1..])
            .map(|(item, expr)| (OperationKind::Compute(expr), item))
            .ok_or_else(|| format!("compute operation '{}' has wrong format", line)),
        _ => Err(format!("undefined operation '{}'", line)),
    }
}

/// `r(item)` / `w(item)`
fn parse_item_call(line: &str) -> std::result::Result<String, String> {
    let open = line.find('(');
    let close = line.rfind(')');
    match (open, close) {
        (Some(open), Some(close)) if close > open + 1 => {
            let item = line[open + 1..close].trim();
            if item.is_empty() {
                Err(format!("operation '{}' names no item", line))
            } else {
                Ok(item.to_string())
            }
        }
        _ => Err(format!("operation '{}' has wrong format", line)),
    }
}

/// ` item = a OP b;` or ` item = a;` (leading `m` already stripped)
fn parse_compute(rest: &str) -> Option<(String, Expression)> {
    let rest = rest.trim().trim_end_matches(';').trim();
    let (item, expr) = rest.split_once('=')?;
    let item = item.trim();
    let expr = expr.trim();
    if item.is_empty() || expr.is_empty() {
        return None;
    }

    // Operands are names or unsigned literals, so the first operator symbol
    // after the first character splits the expression.
    let split = expr
        .char_indices()
        .skip(1)
        .find_map(|(i, c)| Operator::from_symbol(c).map(|op| (i, op)));

    let expression = match split {
        Some((i, operator)) => {
            let operand1 = expr[..i].trim();
            let operand2 = expr[i + 1..].trim();
            if operand1.is_empty() || operand2.is_empty() {
                return None;
            }
            Expression::new(operand1, operator, operand2)
        }
        None => Expression::unary(expr),
    };

    Some((item.to_string(), expression))
}
