use std::sync::Arc;

use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use aurum_score::app_state::AppState;
use aurum_score::config::AppConfig;
use aurum_score::routes;
use aurum_score::services::{queue::QueueStore, repository::JobRepository};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing aurum-score server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!("scoring_jobs_total", "Total scoring jobs submitted");
    metrics::describe_counter!("scoring_jobs_completed", "Total scoring jobs completed");
    metrics::describe_counter!(
        "scoring_jobs_failed",
        "Total scoring jobs that failed permanently"
    );
    metrics::describe_counter!(
        "scoring_jobs_retried",
        "Total scoring jobs sent back to waiting for another attempt"
    );
    metrics::describe_counter!(
        "scoring_stale_claims",
        "Total finishing writes discarded because the claim had expired"
    );
    metrics::describe_gauge!(
        "scoring_queue_depth",
        "Current number of pending jobs in the queue"
    );
    metrics::describe_histogram!(
        "scoring_processing_seconds",
        "Time to score one job"
    );

    // Initialize the Redis queue store and job repository
    tracing::info!("Connecting to Redis queue store");
    let store = QueueStore::new(&config.redis_url, &config.queue_prefix)
        .expect("Failed to initialize queue store");
    let repo = JobRepository::new(store, config.max_attempts, config.processing_timeout());

    let state = AppState::new(repo);

    // Build API routes
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/score", post(routes::score::enqueue_score))
        .route("/api/status/{job_id}", get(routes::score::job_status))
        .route("/api/result/{job_id}", get(routes::score::job_result))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(10 * 1024 * 1024)); // 10 MB limit

    tracing::info!("Starting aurum-score on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
