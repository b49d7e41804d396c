use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::job::JobState;
use crate::models::score::{EnqueueResponse, ErrorResponse, ScoreRequest, StatusResponse};
use crate::services::repository::JobError;

/// POST /api/score — enqueue a photo for scoring.
///
/// Validates the payload, persists the job in `waiting` state, and returns
/// its identifier immediately. Never blocks on processing.
pub async fn enqueue_score(
    State(state): State<AppState>,
    Json(request): Json<ScoreRequest>,
) -> Result<(StatusCode, Json<EnqueueResponse>), ApiError> {
    request
        .validate()
        .map_err(|e| JobError::Validation(e.to_string()))?;
    let image = request
        .image
        .ok_or_else(|| JobError::Validation("image field is required".to_string()))?;

    let job = state.repo.create(image).await?;

    metrics::counter!("scoring_jobs_total").increment(1);
    tracing::info!(job_id = %job.id, "scoring job enqueued");

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse { job_id: job.id }),
    ))
}

/// GET /api/status/{job_id} — current job state, without blocking.
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let id = parse_job_id(&job_id)?;
    let status = state.repo.status(id).await?;
    Ok(Json(StatusResponse { status }))
}

/// GET /api/result/{job_id} — the stored result, only once completed.
pub async fn job_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = parse_job_id(&job_id)?;
    let result = state.repo.result(id).await?;
    Ok(Json(result))
}

// An identifier that does not parse cannot name a job.
fn parse_job_id(raw: &str) -> Result<Uuid, JobError> {
    Uuid::parse_str(raw).map_err(|_| JobError::NotFound)
}

/// Maps the job error taxonomy onto HTTP responses.
pub struct ApiError(JobError);

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, body) = match self.0 {
            JobError::Validation(message) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    status: None,
                    error: Some(message),
                },
            ),
            JobError::NotFound => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    status: None,
                    error: Some("job not found".to_string()),
                },
            ),
            JobError::NotReady { status } => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    status: Some(status),
                    error: None,
                },
            ),
            JobError::JobFailed { error } => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    status: Some(JobState::Failed),
                    error: Some(error),
                },
            ),
            JobError::InvalidStateTransition { ref id, ref state } => {
                tracing::error!(job_id = %id, state = %state, "invalid state transition surfaced to the API");
                (
                    StatusCode::CONFLICT,
                    ErrorResponse {
                        status: None,
                        error: Some("invalid state transition".to_string()),
                    },
                )
            }
            JobError::Store(e) => {
                tracing::error!(error = %e, "queue store unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ErrorResponse {
                        status: None,
                        error: Some("queue store unavailable".to_string()),
                    },
                )
            }
        };

        (code, Json(body)).into_response()
    }
}
