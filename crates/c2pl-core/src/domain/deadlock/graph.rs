//! Wait-for graph
//!
//! Edges point from a lock holder to a transaction waiting on the same item.
//! Any holder on an item with a non-empty queue is assumed to block every
//! waiter on that item, even when the two requests would be compatible.

use std::collections::{BTreeMap, BTreeSet};

use crate::domain::locking::{LockTable, WaitQueue};
use crate::domain::transaction::TransactionId;

/// Directed graph over transaction ids, rebuilt for every detection cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaitForGraph {
    edges: BTreeMap<TransactionId, BTreeSet<TransactionId>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    White,
    Grey,
    Black,
}

impl WaitForGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vertex(&mut self, vertex: TransactionId) {
        self.edges.entry(vertex).or_default();
    }

    /// Add `holder -> waiter`. Self edges are ignored.
    pub fn add_edge(&mut self, holder: TransactionId, waiter: TransactionId) {
        if holder == waiter {
            return;
        }
        self.add_vertex(waiter);
        self.edges.entry(holder).or_default().insert(waiter);
    }

    pub fn vertices(&self) -> impl Iterator<Item = TransactionId> + '_ {
        self.edges.keys().copied()
    }

    pub fn has_edge(&self, from: TransactionId, to: TransactionId) -> bool {
        self.edges.get(&from).is_some_and(|out| out.contains(&to))
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// First back edge `(from, to)` found by a depth-first search started
    /// from each unvisited vertex in ascending order
    pub fn detect_cycle(&self) -> Option<(TransactionId, TransactionId)> {
        let mut marks: BTreeMap<TransactionId, Mark> =
            self.vertices().map(|v| (v, Mark::White)).collect();

        for start in self.vertices() {
            if marks.get(&start) != Some(&Mark::White) {
                continue;
            }
            if let Some(edge) = self.visit(start, &mut marks) {
                return Some(edge);
            }
        }
        None
    }

    fn visit(
        &self,
        vertex: TransactionId,
        marks: &mut BTreeMap<TransactionId, Mark>,
    ) -> Option<(TransactionId, TransactionId)> {
        marks.insert(vertex, Mark::Grey);

        for &next in self.edges.get(&vertex).into_iter().flatten() {
            match marks.get(&next).copied().unwrap_or(Mark::White) {
                Mark::Grey => return Some((vertex, next)),
                Mark::White => {
                    if let Some(edge) = self.visit(next, marks) {
                        return Some(edge);
                    }
                }
                Mark::Black => {}
            }
        }

        marks.insert(vertex, Mark::Black);
        None
    }
}

/// Build the wait-for graph of the current lock state
pub fn build_graph(locks: &LockTable, waiting: &WaitQueue) -> WaitForGraph {
    let mut graph = WaitForGraph::new();

    for lock in locks.values().flatten() {
        graph.add_vertex(lock.owner());
    }
    for op in waiting.values().flatten() {
        graph.add_vertex(op.transaction_id());
    }

    for (item, held) in locks {
        let Some(queue) = waiting.get(item) else {
            continue;
        };
        for holder in held {
            for waiter in queue {
                graph.add_edge(holder.owner(), waiter.transaction_id());
            }
        }
    }

    graph
}
