#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;

use vocab_review_engine::model::{BatchResult, ItemFilter, ItemPatch, ReviewItem, SourceId};
use vocab_review_engine::sink::{BatchSink, SinkError};
use vocab_review_engine::store::memory::MemorySource;
use vocab_review_engine::store::{ItemSource, StoreError};

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub struct ItemBuilder {
    item: ReviewItem,
}

impl ItemBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            item: ReviewItem {
                id: id.to_string(),
                source_id: SourceId::new("unset"),
                label: None,
                review_count: 0,
                next_review_date: None,
                last_reviewed_date: None,
                date_added: date(2026, 1, 1),
                mastered: false,
            },
        }
    }

    pub fn review_count(mut self, count: u32) -> Self {
        self.item.review_count = count;
        self
    }

    pub fn next_review(mut self, day: NaiveDate) -> Self {
        self.item.next_review_date = Some(day);
        self
    }

    pub fn last_reviewed(mut self, day: NaiveDate) -> Self {
        self.item.last_reviewed_date = Some(day);
        self
    }

    pub fn added(mut self, day: NaiveDate) -> Self {
        self.item.date_added = day;
        self
    }

    pub fn label(mut self, label: &str) -> Self {
        self.item.label = Some(label.to_string());
        self
    }

    pub fn mastered(mut self) -> Self {
        self.item.mastered = true;
        self
    }

    pub fn build(self) -> ReviewItem {
        self.item
    }
}

/// Wraps a [`MemorySource`] and fails the first `failures` store calls with
/// a transient error before behaving normally. `u32::MAX` means the source
/// never recovers.
pub struct FlakySource {
    inner: MemorySource,
    failures_remaining: AtomicU32,
}

impl FlakySource {
    pub fn new(inner: MemorySource, failures: u32) -> Self {
        Self {
            inner,
            failures_remaining: AtomicU32::new(failures),
        }
    }

    fn check(&self) -> Result<(), StoreError> {
        let outcome = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match outcome {
            Ok(_) => Err(StoreError::Transient("simulated timeout".to_string())),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl ItemSource for FlakySource {
    fn id(&self) -> &SourceId {
        self.inner.id()
    }

    async fn query_items(&self, filter: ItemFilter) -> Result<Vec<ReviewItem>, StoreError> {
        self.check()?;
        self.inner.query_items(filter).await
    }

    async fn fetch_item(&self, item_id: &str) -> Result<ReviewItem, StoreError> {
        self.check()?;
        self.inner.fetch_item(item_id).await
    }

    async fn update_item(&self, item_id: &str, patch: ItemPatch) -> Result<(), StoreError> {
        self.check()?;
        self.inner.update_item(item_id, patch).await
    }

    async fn count_all(&self) -> Result<u64, StoreError> {
        self.check()?;
        self.inner.count_all().await
    }

    async fn load_config(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        self.check()?;
        self.inner.load_config(key).await
    }

    async fn save_config(&self, key: &str, value: serde_json::Value) -> Result<(), StoreError> {
        self.check()?;
        self.inner.save_config(key, value).await
    }

    async fn describe(&self) -> Result<String, StoreError> {
        self.check()?;
        self.inner.describe().await
    }
}

/// Records every delivered batch for later inspection.
#[derive(Default)]
pub struct CollectingSink {
    batches: Mutex<Vec<BatchResult>>,
}

impl CollectingSink {
    pub fn batches(&self) -> Vec<BatchResult> {
        self.batches.lock().clone()
    }
}

#[async_trait]
impl BatchSink for CollectingSink {
    async fn deliver(&self, batch: &BatchResult) -> Result<(), SinkError> {
        self.batches.lock().push(batch.clone());
        Ok(())
    }
}

/// Always refuses delivery.
pub struct FailingSink;

#[async_trait]
impl BatchSink for FailingSink {
    async fn deliver(&self, _batch: &BatchResult) -> Result<(), SinkError> {
        Err(SinkError::Delivery("sink offline".to_string()))
    }
}
