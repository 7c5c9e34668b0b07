use std::sync::Arc;

use vocab_review_engine::config::{ConfigError, EngineConfig};
use vocab_review_engine::engine::ReviewEngine;
use vocab_review_engine::logging;
use vocab_review_engine::scheduler::ReviewScheduler;
use vocab_review_engine::sink::LogSink;
use vocab_review_engine::store::notion::NotionSource;
use vocab_review_engine::store::retry::{RetryPolicy, RetryingSource};
use vocab_review_engine::store::{ItemSource, SourceSet};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            std::process::exit(1);
        }
    };

    let _log_guard = logging::init_tracing(&config.log_level);

    let sources = match build_sources() {
        Ok(sources) => sources,
        Err(err) => {
            tracing::error!(error = %err, "no usable item sources");
            std::process::exit(1);
        }
    };

    let engine = Arc::new(ReviewEngine::new(sources, Arc::new(LogSink), config));
    engine.check_sources().await;

    let scheduler = match ReviewScheduler::new(Arc::clone(&engine)).await {
        Ok(scheduler) => scheduler,
        Err(err) => {
            tracing::error!(error = %err, "failed to create scheduler");
            std::process::exit(1);
        }
    };

    if let Err(err) = scheduler.start().await {
        tracing::error!(error = %err, "failed to start scheduler");
        std::process::exit(1);
    }

    if let Some(next) = scheduler.next_run_time().await {
        tracing::info!(next_run = %next, "waiting for first review tick");
    }

    shutdown_signal().await;

    tracing::info!("shutdown signal received");
    scheduler.stop().await;
    tracing::info!("graceful shutdown complete");
}

/// Every configured database becomes one source, each wrapped in the
/// shared retry policy.
fn build_sources() -> Result<SourceSet, ConfigError> {
    let policy = RetryPolicy::default();
    let sources: Vec<Box<dyn ItemSource>> = NotionSource::from_env()?
        .into_iter()
        .map(|source| {
            Box::new(RetryingSource::new(Box::new(source), policy.clone())) as Box<dyn ItemSource>
        })
        .collect();
    SourceSet::new(sources)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
