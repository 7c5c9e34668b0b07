use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDate, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{
    validate_batch_size, validate_hours, ConfigError, EngineConfig, ScheduleConfig,
    SCHEDULE_CONFIG_KEY,
};
use crate::grading::{self, Grade};
use crate::model::{BatchResult, DueStats, ItemFilter, ReviewItem, SourceFailure};
use crate::selector;
use crate::sink::BatchSink;
use crate::store::{SourceSet, StoreError};

#[derive(Debug, Error)]
pub enum TickError {
    #[error("all {} sources failed during batch selection", .failures.len())]
    AllSourcesFailed { failures: Vec<SourceFailure> },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("item not found in any source: {0}")]
    ItemNotFound(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("tick error: {0}")]
    Tick(#[from] TickError),
}

/// What one scheduled tick did. Paused ticks are counted as handled, not
/// as failures.
#[derive(Debug)]
pub enum TickOutcome {
    Completed(BatchResult),
    Paused,
}

/// Orchestrates selection, grading and schedule management over a set of
/// item sources. One instance owns its pause flag and its view of the
/// runtime schedule; nothing here is process-global.
pub struct ReviewEngine {
    sources: SourceSet,
    sink: Arc<dyn BatchSink>,
    config: EngineConfig,
    schedule: RwLock<ScheduleConfig>,
    paused: AtomicBool,
}

impl ReviewEngine {
    pub fn new(sources: SourceSet, sink: Arc<dyn BatchSink>, config: EngineConfig) -> Self {
        let schedule = RwLock::new(config.default_schedule());
        Self {
            sources,
            sink,
            config,
            schedule,
            paused: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Calendar date in the engine's configured timezone. All due
    /// comparisons and grading intervals are anchored here.
    fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.config.timezone).date_naive()
    }

    /// Entry point for cron ticks. Skips the batch when paused; manual runs
    /// go through [`Self::run_batch_now`] and ignore the pause flag.
    pub async fn run_scheduled_batch(&self) -> Result<TickOutcome, TickError> {
        if self.paused.load(Ordering::SeqCst) {
            info!("engine paused, skipping scheduled batch");
            return Ok(TickOutcome::Paused);
        }

        let batch = self.run_batch_now().await?;
        Ok(TickOutcome::Completed(batch))
    }

    pub async fn run_batch_now(&self) -> Result<BatchResult, TickError> {
        let tick_id = Uuid::new_v4();
        let started = Instant::now();
        let today = self.today();
        let batch_size = self.schedule.read().await.batch_size;

        info!(%tick_id, %today, batch_size, "starting review batch");

        let batch = selector::select_batch(&self.sources, batch_size, today).await;

        if batch.failed_sources.len() == self.sources.len() {
            error!(%tick_id, failed = batch.failed_sources.len(), "no source delivered any items");
            return Err(TickError::AllSourcesFailed {
                failures: batch.failed_sources,
            });
        }
        for failure in &batch.failed_sources {
            warn!(%tick_id, source = %failure.source_id, error = %failure.error, "partial batch: source skipped");
        }

        if let Err(err) = self.sink.deliver(&batch).await {
            warn!(%tick_id, error = %err, "batch delivery failed");
        }

        info!(
            %tick_id,
            items = batch.items.len(),
            failed_sources = batch.failed_sources.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "review batch complete"
        );
        Ok(batch)
    }

    /// Applies one grade to one item and writes the resulting scheduling
    /// fields back to the owning source. Sources are probed in
    /// configuration order until one knows the item.
    pub async fn grade_item(&self, item_id: &str, grade: Grade) -> Result<ReviewItem, EngineError> {
        let today = self.today();

        for handle in self.sources.handles() {
            let _guard = handle.write_guard().await;
            let source = handle.source();

            let mut item = match source.fetch_item(item_id).await {
                Ok(item) => item,
                Err(StoreError::NotFound(_)) => continue,
                Err(err) => return Err(EngineError::Store(err)),
            };

            let patch = grading::apply_grade(
                &item,
                grade,
                today,
                self.config.interval_cap_days,
                self.config.mastery_threshold,
            );
            source.update_item(item_id, patch).await?;
            item.apply_patch(&patch);

            info!(
                item = item_id,
                source = %item.source_id,
                grade = ?grade,
                review_count = item.review_count,
                next_review = %patch.next_review_date,
                mastered = item.mastered,
                "item graded"
            );
            return Ok(item);
        }

        Err(EngineError::ItemNotFound(item_id.to_string()))
    }

    /// Due/new/overdue breakdown across all sources. The total comes from
    /// the source count so records the parser skipped still show up in it.
    pub async fn due_stats(&self) -> Result<DueStats, EngineError> {
        let today = self.today();
        let mut stats = DueStats::default();

        for handle in self.sources.handles() {
            let _guard = handle.read_guard().await;
            let source = handle.source();

            let items = source.query_items(ItemFilter::all(today)).await?;
            stats.total += source.count_all().await?;

            for item in items {
                if item.mastered {
                    stats.mastered += 1;
                } else if item.is_new() {
                    stats.new_items += 1;
                } else if let Some(due) = item.next_review_date {
                    if due < today {
                        stats.overdue += 1;
                    } else if due == today {
                        stats.due_today += 1;
                    }
                }
            }
        }

        Ok(stats)
    }

    pub async fn schedule(&self) -> ScheduleConfig {
        self.schedule.read().await.clone()
    }

    /// Reads the persisted schedule from the primary source, falling back
    /// field by field to the configured defaults when the stored document
    /// is missing or partially invalid.
    pub async fn load_schedule(&self) -> ScheduleConfig {
        let primary = self.sources.primary();
        let loaded = {
            let _guard = primary.read_guard().await;
            primary.source().load_config(SCHEDULE_CONFIG_KEY).await
        };

        let schedule = match loaded {
            Ok(Some(value)) => self.merge_schedule(value),
            Ok(None) => {
                info!("no persisted schedule, using defaults");
                self.config.default_schedule()
            }
            Err(err) => {
                warn!(error = %err, "failed to load persisted schedule, using defaults");
                self.config.default_schedule()
            }
        };

        *self.schedule.write().await = schedule.clone();
        schedule
    }

    /// Validates and persists a new schedule to the primary source, then
    /// makes it the active one.
    pub async fn save_schedule(
        &self,
        schedule: ScheduleConfig,
    ) -> Result<ScheduleConfig, EngineError> {
        let schedule = ScheduleConfig {
            review_hours: validate_hours(schedule.review_hours)?,
            batch_size: validate_batch_size(schedule.batch_size)?,
        };

        let value = serde_json::to_value(&schedule).map_err(|e| {
            EngineError::Store(StoreError::Permanent(format!(
                "schedule not serializable: {e}"
            )))
        })?;

        let primary = self.sources.primary();
        {
            let _guard = primary.write_guard().await;
            primary
                .source()
                .save_config(SCHEDULE_CONFIG_KEY, value)
                .await?;
        }

        *self.schedule.write().await = schedule.clone();
        info!(hours = ?schedule.review_hours, batch_size = schedule.batch_size, "schedule saved");
        Ok(schedule)
    }

    fn merge_schedule(&self, value: serde_json::Value) -> ScheduleConfig {
        let mut schedule = self.config.default_schedule();

        if let Some(raw) = value.get("review_hours") {
            let parsed = serde_json::from_value::<Vec<u32>>(raw.clone())
                .map_err(|e| e.to_string())
                .and_then(|hours| validate_hours(hours).map_err(|e| e.to_string()));
            match parsed {
                Ok(hours) => schedule.review_hours = hours,
                Err(err) => {
                    warn!(error = %err, "persisted review hours invalid, keeping defaults")
                }
            }
        }

        if let Some(raw) = value.get("words_per_batch") {
            let parsed = serde_json::from_value::<usize>(raw.clone())
                .map_err(|e| e.to_string())
                .and_then(|size| validate_batch_size(size).map_err(|e| e.to_string()));
            match parsed {
                Ok(size) => schedule.batch_size = size,
                Err(err) => {
                    warn!(error = %err, "persisted batch size invalid, keeping defaults")
                }
            }
        }

        schedule
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        info!("review ticks paused");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        info!("review ticks resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Probes every source once at startup so connection problems surface
    /// in the log before the first tick.
    pub async fn check_sources(&self) {
        for handle in self.sources.handles() {
            let source = handle.source();
            match source.describe().await {
                Ok(description) => info!(source = %source.id(), "connected to {description}"),
                Err(err) => warn!(source = %source.id(), error = %err, "source check failed"),
            }
        }
    }
}
