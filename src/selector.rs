use chrono::NaiveDate;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::mastery;
use crate::model::{BatchItem, BatchResult, ItemFilter, SourceFailure};
use crate::scoring;
use crate::store::SourceSet;

/// Queries every source concurrently, merges the survivors into one ranked
/// batch and truncates to `batch_size`. Sources that fail after exhausting
/// their retries are excluded and reported in the result rather than
/// failing the whole selection.
pub async fn select_batch(sources: &SourceSet, batch_size: usize, today: NaiveDate) -> BatchResult {
    let filter = ItemFilter::due_or_new(today);

    let queries = sources.handles().iter().map(|handle| async move {
        let _guard = handle.read_guard().await;
        let outcome = handle.source().query_items(filter).await;
        (handle.source().id().clone(), outcome)
    });

    let mut candidates = Vec::new();
    let mut failed_sources = Vec::new();
    for (source_id, outcome) in join_all(queries).await {
        match outcome {
            Ok(items) => {
                debug!(source = %source_id, count = items.len(), "source returned candidates");
                candidates.extend(items);
            }
            Err(err) => {
                warn!(source = %source_id, error = %err, "source excluded from batch");
                failed_sources.push(SourceFailure {
                    source_id,
                    error: err.to_string(),
                });
            }
        }
    }

    let mut ranked: Vec<BatchItem> = mastery::filter_candidates(candidates)
        .into_iter()
        .map(|item| {
            let score = scoring::priority_score(&item, today);
            BatchItem { item, score }
        })
        .collect();

    ranked.sort_by(scoring::compare_ranked);
    ranked.truncate(batch_size);

    BatchResult {
        items: ranked,
        failed_sources,
    }
}
