pub mod memory;
pub mod notion;
pub mod retry;

use async_trait::async_trait;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::ConfigError;
use crate::model::{ItemFilter, ItemPatch, ReviewItem, SourceId};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Network, timeout or rate-limit failure. Safe to retry.
    #[error("transient store failure: {0}")]
    Transient(String),
    /// Malformed record, auth failure or any other non-retryable response.
    #[error("permanent store failure: {0}")]
    Permanent(String),
    #[error("item not found: {0}")]
    NotFound(String),
    /// A transient failure that survived the whole retry budget.
    #[error("store unavailable after {attempts} attempts: {last}")]
    Unavailable { attempts: u32, last: String },
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Capability contract required of one store partition. Implementations are
/// responsible for mapping their native failures onto the transient and
/// permanent sides of [`StoreError`]; retry policy is layered on top.
#[async_trait]
pub trait ItemSource: Send + Sync {
    fn id(&self) -> &SourceId;

    async fn query_items(&self, filter: ItemFilter) -> Result<Vec<ReviewItem>, StoreError>;

    async fn fetch_item(&self, item_id: &str) -> Result<ReviewItem, StoreError>;

    async fn update_item(&self, item_id: &str, patch: ItemPatch) -> Result<(), StoreError>;

    async fn count_all(&self) -> Result<u64, StoreError>;

    async fn load_config(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError>;

    async fn save_config(&self, key: &str, value: serde_json::Value) -> Result<(), StoreError>;

    /// Human-readable description of the connected partition, used by the
    /// startup connection check.
    async fn describe(&self) -> Result<String, StoreError>;
}

/// One source plus its access gate. Batch selection holds the gate shared
/// while querying; grading holds it exclusive so a write never interleaves
/// with an in-flight read of the same source.
pub struct SourceHandle {
    source: Box<dyn ItemSource>,
    gate: RwLock<()>,
}

impl SourceHandle {
    fn new(source: Box<dyn ItemSource>) -> Self {
        Self {
            source,
            gate: RwLock::new(()),
        }
    }

    pub fn source(&self) -> &dyn ItemSource {
        self.source.as_ref()
    }

    pub async fn read_guard(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read().await
    }

    pub async fn write_guard(&self) -> RwLockWriteGuard<'_, ()> {
        self.gate.write().await
    }
}

/// The configured sources in priority order. The first entry is the primary
/// source, which also holds the persisted schedule document.
pub struct SourceSet {
    handles: Vec<SourceHandle>,
}

impl SourceSet {
    pub fn new(sources: Vec<Box<dyn ItemSource>>) -> Result<Self, ConfigError> {
        if sources.is_empty() {
            return Err(ConfigError::NoSources);
        }
        Ok(Self {
            handles: sources.into_iter().map(SourceHandle::new).collect(),
        })
    }

    pub fn handles(&self) -> &[SourceHandle] {
        &self.handles
    }

    pub fn primary(&self) -> &SourceHandle {
        &self.handles[0]
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn get(&self, id: &SourceId) -> Option<&SourceHandle> {
        self.handles.iter().find(|h| h.source.id() == id)
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemorySource;
    use super::*;

    #[test]
    fn test_source_set_rejects_empty() {
        assert!(matches!(
            SourceSet::new(Vec::new()),
            Err(ConfigError::NoSources)
        ));
    }

    #[test]
    fn test_source_set_keeps_order() {
        let set = SourceSet::new(vec![
            Box::new(MemorySource::new("primary")) as Box<dyn ItemSource>,
            Box::new(MemorySource::new("extra")) as Box<dyn ItemSource>,
        ])
        .unwrap();

        assert_eq!(set.len(), 2);
        assert_eq!(set.primary().source().id().as_str(), "primary");
        assert_eq!(set.handles()[1].source().id().as_str(), "extra");
        assert!(set.get(&SourceId::new("extra")).is_some());
        assert!(set.get(&SourceId::new("missing")).is_none());
    }

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::Transient("timeout".into()).is_transient());
        assert!(!StoreError::Permanent("bad record".into()).is_transient());
        assert!(!StoreError::NotFound("x".into()).is_transient());
        assert!(!StoreError::Unavailable {
            attempts: 3,
            last: "timeout".into()
        }
        .is_transient());
    }
}
