use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::model::BatchResult;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("batch delivery failed: {0}")]
    Delivery(String),
}

/// Receives each completed batch. Delivery is best-effort: the engine logs
/// a sink failure and still returns the batch to its caller.
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn deliver(&self, batch: &BatchResult) -> Result<(), SinkError>;
}

/// Default sink, one log line per selected item.
pub struct LogSink;

#[async_trait]
impl BatchSink for LogSink {
    async fn deliver(&self, batch: &BatchResult) -> Result<(), SinkError> {
        if batch.items.is_empty() {
            info!("nothing due for review");
            return Ok(());
        }

        for (position, ranked) in batch.items.iter().enumerate() {
            let label = ranked.item.label.as_deref().unwrap_or(&ranked.item.id);
            info!(
                rank = position + 1,
                score = ranked.score,
                source = %ranked.item.source_id,
                reviews = ranked.item.review_count,
                "due for review: {label}"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BatchItem, ReviewItem, SourceId};
    use chrono::NaiveDate;

    #[tokio::test]
    async fn test_log_sink_accepts_batches() {
        let sink = LogSink;

        let empty = BatchResult {
            items: Vec::new(),
            failed_sources: Vec::new(),
        };
        assert!(sink.deliver(&empty).await.is_ok());

        let item = ReviewItem {
            id: "item-1".to_string(),
            source_id: SourceId::new("main"),
            label: Some("ephemeral".to_string()),
            review_count: 2,
            next_review_date: None,
            last_reviewed_date: None,
            date_added: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            mastered: false,
        };
        let filled = BatchResult {
            items: vec![BatchItem { item, score: 160 }],
            failed_sources: Vec::new(),
        };
        assert!(sink.deliver(&filled).await.is_ok());
    }
}
