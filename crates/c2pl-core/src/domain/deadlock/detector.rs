//! Deadlock detection and victim selection

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::graph::build_graph;
use crate::domain::locking::LockManager;
use crate::domain::transaction::{SiteId, TransactionId, site_id_of};

/// Outcome of a detection pass that found a cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlockResolution {
    /// The aborted transaction
    pub victim: TransactionId,

    /// The site that owns the victim
    pub victim_site: SiteId,

    /// Sites whose queued operations were granted by the abort
    pub unblocked_sites: BTreeSet<SiteId>,
}

/// Look for a cycle and abort its victim
///
/// The victim is the target of the back edge the search reports, i.e. the
/// waiter on the edge that closed the cycle.
pub fn check_deadlocks(manager: &mut LockManager) -> Option<DeadlockResolution> {
    let graph = build_graph(manager.lock_table(), manager.wait_queue());
    debug!(
        vertices = graph.vertices().count(),
        edges = graph.edge_count(),
        "Built wait-for graph"
    );

    let (from, victim) = graph.detect_cycle()?;
    let victim_site = site_id_of(victim);
    warn!(
        holder = from,
        victim,
        site_id = victim_site,
        "Deadlock detected, aborting victim"
    );

    let unblocked_sites = manager.abort_transaction(victim);
    Some(DeadlockResolution {
        victim,
        victim_site,
        unblocked_sites,
    })
}
