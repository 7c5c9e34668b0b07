use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ScheduleConfig;
use crate::engine::{EngineError, ReviewEngine};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler error: {0}")]
    Scheduler(#[from] JobSchedulerError),
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Runs the engine's scheduled batches as cron jobs, one per configured
/// review hour, evaluated in the engine's timezone. Replacing the schedule
/// at runtime swaps the job set without restarting the process.
pub struct ReviewScheduler {
    scheduler: Mutex<JobScheduler>,
    shutdown_tx: broadcast::Sender<()>,
    engine: Arc<ReviewEngine>,
    timezone: Tz,
    job_ids: Mutex<Vec<Uuid>>,
}

impl ReviewScheduler {
    pub async fn new(engine: Arc<ReviewEngine>) -> Result<Self, SchedulerError> {
        let scheduler = JobScheduler::new().await.map_err(SchedulerError::Scheduler)?;
        let (shutdown_tx, _) = broadcast::channel(1);
        let timezone = engine.config().timezone;

        Ok(Self {
            scheduler: Mutex::new(scheduler),
            shutdown_tx,
            engine,
            timezone,
            job_ids: Mutex::new(Vec::new()),
        })
    }

    /// Loads the persisted schedule, registers its jobs and starts ticking.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        let schedule = self.engine.load_schedule().await;
        self.register_jobs(&schedule.review_hours).await?;

        self.scheduler
            .lock()
            .await
            .start()
            .await
            .map_err(SchedulerError::Scheduler)?;

        info!(hours = ?schedule.review_hours, timezone = %self.timezone, "review scheduler started");
        Ok(())
    }

    /// Persists a new schedule through the engine and swaps the cron jobs
    /// over to it.
    pub async fn apply_schedule(
        &self,
        schedule: ScheduleConfig,
    ) -> Result<ScheduleConfig, SchedulerError> {
        let applied = self.engine.save_schedule(schedule).await?;
        self.register_jobs(&applied.review_hours).await?;

        if let Some(next) = self.next_run_time().await {
            info!(next_run = %next, "schedule applied");
        }
        Ok(applied)
    }

    async fn register_jobs(&self, hours: &[u32]) -> Result<(), SchedulerError> {
        let scheduler = self.scheduler.lock().await;
        let mut job_ids = self.job_ids.lock().await;

        for job_id in job_ids.drain(..) {
            if let Err(err) = scheduler.remove(&job_id).await {
                warn!(%job_id, error = %err, "failed to remove stale review job");
            }
        }

        for &hour in hours {
            let expression = format!("0 0 {hour} * * *");
            let engine = Arc::clone(&self.engine);
            let shutdown_tx = self.shutdown_tx.clone();

            let job = Job::new_async_tz(expression.as_str(), self.timezone, move |_uuid, _lock| {
                let engine = Arc::clone(&engine);
                let mut shutdown_rx = shutdown_tx.subscribe();
                Box::pin(async move {
                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            debug!("review job interrupted by shutdown");
                        }
                        result = engine.run_scheduled_batch() => {
                            if let Err(err) = result {
                                error!(error = %err, "scheduled review batch failed");
                            }
                        }
                    }
                })
            })
            .map_err(SchedulerError::Scheduler)?;

            let job_id = scheduler.add(job).await.map_err(SchedulerError::Scheduler)?;
            job_ids.push(job_id);
            info!(hour, %job_id, cron = %expression, "review job registered");
        }

        Ok(())
    }

    /// Earliest upcoming tick across all registered jobs, in the engine's
    /// timezone.
    pub async fn next_run_time(&self) -> Option<DateTime<Tz>> {
        let mut scheduler = self.scheduler.lock().await;
        let job_ids = self.job_ids.lock().await;

        let mut next: Option<DateTime<Utc>> = None;
        for job_id in job_ids.iter() {
            if let Ok(Some(tick)) = scheduler.next_tick_for_job(*job_id).await {
                next = Some(match next {
                    Some(current) if current <= tick => current,
                    _ => tick,
                });
            }
        }

        next.map(|utc| utc.with_timezone(&self.timezone))
    }

    pub async fn stop(&self) {
        info!("stopping review scheduler");
        let _ = self.shutdown_tx.send(());

        let mut scheduler = self.scheduler.lock().await;
        if let Err(err) = scheduler.shutdown().await {
            warn!(error = %err, "scheduler shutdown error");
        }
    }
}
