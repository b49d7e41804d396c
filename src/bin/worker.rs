use std::sync::Arc;

use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use aurum_score::config::AppConfig;
use aurum_score::services::{queue::QueueStore, repository::JobRepository, scorer::Scorer};
use aurum_score::worker::{run_sweeper, run_worker};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting scoring worker pool");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Initialize the queue store and job repository
    tracing::info!("Connecting to Redis queue store");
    let store = QueueStore::new(&config.redis_url, &config.queue_prefix)
        .expect("Failed to initialize queue store");
    let repo = Arc::new(JobRepository::new(
        store,
        config.max_attempts,
        config.processing_timeout(),
    ));

    let scorer = Arc::new(Scorer::from_config(config.scorer_url.as_deref()));
    if config.scorer_url.is_none() {
        tracing::warn!("SCORER_URL not set, using the deterministic stub scorer");
    }

    let (shutdown_tx, _) = broadcast::channel(1);
    let mut handles = Vec::new();

    tracing::info!(worker_count = config.worker_count, "starting workers");
    for worker_id in 0..config.worker_count {
        handles.push(tokio::spawn(run_worker(
            worker_id,
            repo.clone(),
            scorer.clone(),
            config.poll_interval(),
            config.processing_timeout(),
            shutdown_tx.subscribe(),
        )));
    }
    handles.push(tokio::spawn(run_sweeper(
        repo.clone(),
        config.sweep_interval(),
        shutdown_tx.subscribe(),
    )));

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for shutdown signal");

    tracing::info!("Shutdown signal received, draining workers");
    let _ = shutdown_tx.send(());

    for handle in handles {
        let _ = handle.await;
    }

    tracing::info!("Worker pool stopped");
}
