use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};
use uuid::Uuid;

use crate::services::queue::StoreError;
use crate::services::repository::{FailOutcome, JobError, JobRepository};
use crate::services::scorer::Scorer;

/// Ceiling for the claim loop's error backoff.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// One worker: claim the next job, score it under a deadline, record the
/// outcome. Runs until the shutdown signal arrives; a job in hand is always
/// finished first.
pub async fn run_worker(
    worker_id: usize,
    repo: Arc<JobRepository>,
    scorer: Arc<Scorer>,
    poll_interval: Duration,
    scoring_timeout: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    tracing::info!(worker_id, "worker started");
    let mut backoff = poll_interval;

    loop {
        if shutdown.try_recv().is_ok() {
            break;
        }

        match process_next_job(worker_id, &repo, &scorer, scoring_timeout).await {
            Ok(true) => {
                backoff = poll_interval;
            }
            Ok(false) => {
                backoff = poll_interval;
                sleep(poll_interval).await;
            }
            Err(e) => {
                tracing::error!(worker_id, error = %e, "claim loop error, backing off");
                sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }

    tracing::info!(worker_id, "worker stopped");
}

/// Process the next job from the queue.
/// Returns Ok(true) if the queue made progress, Ok(false) if it was empty.
async fn process_next_job(
    worker_id: usize,
    repo: &JobRepository,
    scorer: &Scorer,
    scoring_timeout: Duration,
) -> Result<bool, JobError> {
    let claimed = match repo.claim_next().await {
        Ok(Some(claimed)) => claimed,
        Ok(None) => return Ok(false),
        Err(JobError::InvalidStateTransition { id, state }) => {
            // A pending entry referenced a record that was no longer
            // claimable. The record is untouched; drop the entry and move on.
            tracing::warn!(worker_id, job_id = %id, state = %state, "popped job was not claimable, skipping");
            return Ok(true);
        }
        Err(e) => return Err(e),
    };

    let job_id = claimed.job.id;
    tracing::info!(
        worker_id,
        job_id = %job_id,
        attempt = claimed.job.attempts,
        "processing scoring job"
    );

    let start = Instant::now();
    match timeout(scoring_timeout, scorer.score(&claimed.job.payload)).await {
        Ok(Ok(output)) => {
            let result = serde_json::to_value(&output).map_err(StoreError::Serialize)?;
            if repo.complete(job_id, claimed.token, &result).await? {
                metrics::counter!("scoring_jobs_completed").increment(1);
                metrics::histogram!("scoring_processing_seconds")
                    .record(start.elapsed().as_secs_f64());
                tracing::info!(
                    worker_id,
                    job_id = %job_id,
                    score = output.score,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "job completed"
                );
            } else {
                record_stale_claim(worker_id, job_id);
            }
        }
        Ok(Err(e)) => {
            fail_job(worker_id, repo, job_id, claimed.token, &format!("scoring failed: {e}"))
                .await?;
        }
        Err(_) => {
            fail_job(
                worker_id,
                repo,
                job_id,
                claimed.token,
                &format!("scoring timed out after {}s", scoring_timeout.as_secs()),
            )
            .await?;
        }
    }

    Ok(true)
}

async fn fail_job(
    worker_id: usize,
    repo: &JobRepository,
    job_id: Uuid,
    token: Uuid,
    error: &str,
) -> Result<(), JobError> {
    match repo.fail(job_id, token, error).await? {
        FailOutcome::Retried => {
            metrics::counter!("scoring_jobs_retried").increment(1);
            tracing::info!(worker_id, job_id = %job_id, error = %error, "job re-queued for retry");
        }
        FailOutcome::Terminal => {
            metrics::counter!("scoring_jobs_failed").increment(1);
            tracing::warn!(worker_id, job_id = %job_id, error = %error, "job failed permanently");
        }
        FailOutcome::StaleClaim => {
            record_stale_claim(worker_id, job_id);
        }
    }
    Ok(())
}

fn record_stale_claim(worker_id: usize, job_id: Uuid) {
    metrics::counter!("scoring_stale_claims").increment(1);
    tracing::warn!(
        worker_id,
        job_id = %job_id,
        "claim expired before the write landed, outcome discarded"
    );
}

/// Staleness sweep: periodically reclaims jobs whose worker went quiet and
/// refreshes the queue depth gauge.
pub async fn run_sweeper(
    repo: Arc<JobRepository>,
    sweep_interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    tracing::info!("staleness sweeper started");

    loop {
        if shutdown.try_recv().is_ok() {
            break;
        }

        match repo.reap_stale().await {
            Ok(stats) if stats.requeued > 0 || stats.failed > 0 => {
                metrics::counter!("scoring_jobs_retried").increment(stats.requeued as u64);
                metrics::counter!("scoring_jobs_failed").increment(stats.failed as u64);
                tracing::warn!(
                    requeued = stats.requeued,
                    failed = stats.failed,
                    "reclaimed stale claims"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "staleness sweep failed");
            }
        }

        match repo.queue_depth().await {
            Ok(depth) => metrics::gauge!("scoring_queue_depth").set(depth as f64),
            Err(e) => tracing::debug!(error = %e, "queue depth probe failed"),
        }

        sleep(sweep_interval).await;
    }

    tracing::info!("staleness sweeper stopped");
}
