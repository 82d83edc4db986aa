//! Site id to endpoint table

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use super::{ProtocolError, ProtocolResult, SiteEndpoint};
use crate::domain::transaction::SiteId;

/// How the coordinator reaches each registered site
#[derive(Default)]
pub struct SiteRegistry {
    sites: RwLock<BTreeMap<SiteId, Arc<dyn SiteEndpoint>>>,
}

impl SiteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or replace) the endpoint of `site_id`
    pub async fn bind(&self, site_id: SiteId, endpoint: Arc<dyn SiteEndpoint>) {
        let replaced = self.sites.write().await.insert(site_id, endpoint).is_some();
        debug!(site_id, replaced, "Bound site endpoint");
    }

    pub async fn unbind(&self, site_id: SiteId) -> bool {
        self.sites.write().await.remove(&site_id).is_some()
    }

    pub async fn lookup(&self, site_id: SiteId) -> ProtocolResult<Arc<dyn SiteEndpoint>> {
        self.sites
            .read()
            .await
            .get(&site_id)
            .cloned()
            .ok_or(ProtocolError::SiteNotRegistered(site_id))
    }

    pub async fn site_ids(&self) -> Vec<SiteId> {
        self.sites.read().await.keys().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.sites.read().await.len()
    }
}

impl fmt::Debug for SiteRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteRegistry").finish_non_exhaustive()
    }
}
