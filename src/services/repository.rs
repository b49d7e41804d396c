use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::models::job::{Job, JobState};
use crate::services::queue::{ClaimOutcome, QueueStore, ReapOutcome, StoreError};

/// Error taxonomy for the scoring pipeline.
///
/// `NotReady` and `JobFailed` are expected caller-facing conditions;
/// `InvalidStateTransition` signals a programming or race defect and is
/// logged where it surfaces.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("job not found")]
    NotFound,

    #[error("job is not ready (status: {status})")]
    NotReady { status: JobState },

    #[error("job failed: {error}")]
    JobFailed { error: String },

    #[error("invalid state transition: job {id} is '{state}', expected 'waiting'")]
    InvalidStateTransition { id: String, state: String },

    #[error("queue store unavailable: {0}")]
    Store(#[from] StoreError),
}

/// A job claimed for processing. The token fences the finishing write: if
/// the claim is reaped meanwhile, a write carrying this token is discarded.
#[derive(Debug)]
pub struct ClaimedJob {
    pub job: Job,
    pub token: Uuid,
}

/// What happened to a job the worker reported as failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Sent back to waiting; attempts remain.
    Retried,
    /// Attempt budget exhausted; the failure is permanent.
    Terminal,
    /// The claim token was stale; the record was left untouched.
    StaleClaim,
}

/// Counts from one staleness sweep.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReapStats {
    pub requeued: u32,
    pub failed: u32,
}

/// Mapping from job identifier to job record; owns every state transition.
///
/// All mutation funnels through the store's atomic scripts, so concurrency
/// control is scoped to the claim operation and to individual records.
pub struct JobRepository {
    store: QueueStore,
    max_attempts: u32,
    processing_timeout: Duration,
}

impl JobRepository {
    pub fn new(store: QueueStore, max_attempts: u32, processing_timeout: Duration) -> Self {
        Self {
            store,
            max_attempts,
            processing_timeout,
        }
    }

    /// Create a job in `waiting` state and append it to the pending order.
    /// Returns immediately; processing happens out-of-band.
    pub async fn create(&self, payload: String) -> Result<Job, JobError> {
        let job = Job::new(payload);
        self.store.put_job(&job).await?;
        Ok(job)
    }

    /// Load a job record by id.
    pub async fn get(&self, id: Uuid) -> Result<Job, JobError> {
        self.store.get_job(id).await?.ok_or(JobError::NotFound)
    }

    /// Current state only; never blocks on completion.
    pub async fn status(&self, id: Uuid) -> Result<JobState, JobError> {
        Ok(self.get(id).await?.state)
    }

    /// The stored result, only once the job has completed.
    pub async fn result(&self, id: Uuid) -> Result<serde_json::Value, JobError> {
        let job = self.get(id).await?;
        match job.state {
            JobState::Completed => job.result.ok_or_else(|| {
                StoreError::Record(format!("completed job {id} has no result")).into()
            }),
            JobState::Failed => Err(JobError::JobFailed {
                error: job
                    .error
                    .unwrap_or_else(|| "unknown failure".to_string()),
            }),
            status => Err(JobError::NotReady { status }),
        }
    }

    /// Atomically claim the next waiting job (waiting -> active), or None if
    /// the queue is empty.
    pub async fn claim_next(&self) -> Result<Option<ClaimedJob>, JobError> {
        let token = Uuid::new_v4();
        match self.store.claim_next(Utc::now(), token).await? {
            ClaimOutcome::Empty => Ok(None),
            ClaimOutcome::Claimed { id, token } => {
                let job = self.get(id).await?;
                Ok(Some(ClaimedJob { job, token }))
            }
            ClaimOutcome::NotClaimable { id, state } => {
                Err(JobError::InvalidStateTransition { id, state })
            }
        }
    }

    /// Record a successful scoring run (active -> completed). Returns false
    /// if the claim token was stale and the result was discarded.
    pub async fn complete(
        &self,
        id: Uuid,
        token: Uuid,
        result: &serde_json::Value,
    ) -> Result<bool, JobError> {
        let result_json = serde_json::to_string(result).map_err(StoreError::Serialize)?;
        Ok(self
            .store
            .complete(id, token, &result_json, Utc::now())
            .await?)
    }

    /// Record a scoring failure (active -> failed) and, while attempts
    /// remain, send the job back to waiting at the rear of the queue.
    pub async fn fail(&self, id: Uuid, token: Uuid, error: &str) -> Result<FailOutcome, JobError> {
        if !self.store.fail(id, token, error, Utc::now()).await? {
            return Ok(FailOutcome::StaleClaim);
        }
        if self.store.retry(id, self.max_attempts).await? {
            Ok(FailOutcome::Retried)
        } else {
            Ok(FailOutcome::Terminal)
        }
    }

    /// Reclaim jobs whose worker disappeared mid-processing: any active claim
    /// older than the processing timeout is revoked and retried or failed.
    pub async fn reap_stale(&self) -> Result<ReapStats, JobError> {
        let now = Utc::now();
        let timeout_ms = self.processing_timeout.as_millis() as i64;
        let mut stats = ReapStats::default();

        for id in self.store.active_ids().await? {
            match self
                .store
                .reap(&id, now, timeout_ms, self.max_attempts)
                .await?
            {
                ReapOutcome::Requeued => stats.requeued += 1,
                ReapOutcome::Failed => stats.failed += 1,
                ReapOutcome::Fresh | ReapOutcome::Skipped => {}
            }
        }
        Ok(stats)
    }

    /// Current number of pending jobs.
    pub async fn queue_depth(&self) -> Result<u64, JobError> {
        Ok(self.store.queue_depth().await?)
    }

    /// Store connectivity check, for health endpoints.
    pub async fn health_check(&self) -> Result<(), JobError> {
        Ok(self.store.health_check().await?)
    }
}
