//! In-memory item store

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::ItemStore;
use crate::error::Result;

/// Item store kept in a map, for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryItemStore {
    items: RwLock<BTreeMap<String, i64>>,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `items`
    pub fn with_items<I, K>(items: I) -> Self
    where
        I: IntoIterator<Item = (K, i64)>,
        K: Into<String>,
    {
        Self {
            items: RwLock::new(items.into_iter().map(|(k, v)| (k.into(), v)).collect()),
        }
    }
}

#[async_trait]
impl ItemStore for MemoryItemStore {
    async fn read(&self, item: &str) -> Result<i64> {
        Ok(self.items.read().await.get(item).copied().unwrap_or(0))
    }

    async fn write(&self, item: &str, value: i64) -> Result<()> {
        self.items.write().await.insert(item.to_string(), value);
        Ok(())
    }

    async fn items(&self) -> Result<Vec<(String, i64)>> {
        Ok(self
            .items
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect())
    }
}
