use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{ItemSource, StoreError};
use crate::model::{ItemFilter, ItemPatch, ReviewItem, SourceId};

/// In-memory source for tests and local runs. Clones share the same
/// underlying maps, so one store can sit behind several engines.
#[derive(Clone)]
pub struct MemorySource {
    id: SourceId,
    items: Arc<RwLock<HashMap<String, ReviewItem>>>,
    config: Arc<RwLock<HashMap<String, serde_json::Value>>>,
}

impl MemorySource {
    pub fn new(id: impl Into<SourceId>) -> Self {
        Self {
            id: id.into(),
            items: Arc::new(RwLock::new(HashMap::new())),
            config: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn with_items(id: impl Into<SourceId>, items: Vec<ReviewItem>) -> Self {
        let source = Self::new(id);
        for item in items {
            source.insert(item);
        }
        source
    }

    /// Stores one item, stamping it with this source's id.
    pub fn insert(&self, mut item: ReviewItem) {
        item.source_id = self.id.clone();
        self.items.write().insert(item.id.clone(), item);
    }

    pub fn get(&self, item_id: &str) -> Option<ReviewItem> {
        self.items.read().get(item_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

#[async_trait]
impl ItemSource for MemorySource {
    fn id(&self) -> &SourceId {
        &self.id
    }

    async fn query_items(&self, filter: ItemFilter) -> Result<Vec<ReviewItem>, StoreError> {
        Ok(self
            .items
            .read()
            .values()
            .filter(|item| filter.matches(item))
            .cloned()
            .collect())
    }

    async fn fetch_item(&self, item_id: &str) -> Result<ReviewItem, StoreError> {
        self.get(item_id)
            .ok_or_else(|| StoreError::NotFound(item_id.to_string()))
    }

    async fn update_item(&self, item_id: &str, patch: ItemPatch) -> Result<(), StoreError> {
        let mut items = self.items.write();
        match items.get_mut(item_id) {
            Some(item) => {
                item.apply_patch(&patch);
                Ok(())
            }
            None => Err(StoreError::NotFound(item_id.to_string())),
        }
    }

    async fn count_all(&self) -> Result<u64, StoreError> {
        Ok(self.items.read().len() as u64)
    }

    async fn load_config(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        Ok(self.config.read().get(key).cloned())
    }

    async fn save_config(&self, key: &str, value: serde_json::Value) -> Result<(), StoreError> {
        self.config.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn describe(&self) -> Result<String, StoreError> {
        Ok(format!(
            "in-memory source '{}' ({} items)",
            self.id,
            self.items.read().len()
        ))
    }
}
