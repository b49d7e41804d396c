use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::JobState;

/// Request to score a photo (JSON body of `POST /api/score`).
///
/// The image data is opaque to the pipeline: it is validated for presence
/// and size here, stored as-is, and handed to the scorer unchanged.
#[derive(Debug, Deserialize, Validate)]
pub struct ScoreRequest {
    #[garde(inner(length(min = 1, max = 10_000_000)))]
    pub image: Option<String>,
}

/// Response after enqueueing a scoring job.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueResponse {
    pub job_id: Uuid,
}

/// Response for querying job status.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: JobState,
}

/// Error body returned by the API. `status` carries the job's current state
/// when a result is requested before completion.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_response_uses_camel_case() {
        let id = Uuid::new_v4();
        let body = serde_json::to_value(EnqueueResponse { job_id: id }).unwrap();
        assert_eq!(body, serde_json::json!({ "jobId": id.to_string() }));
    }

    #[test]
    fn test_status_response_shape() {
        let body = serde_json::to_value(StatusResponse {
            status: JobState::Waiting,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({ "status": "waiting" }));
    }

    #[test]
    fn test_error_response_omits_absent_fields() {
        let body = serde_json::to_value(ErrorResponse {
            status: Some(JobState::Active),
            error: None,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({ "status": "active" }));
    }

    #[test]
    fn test_missing_image_passes_garde_but_is_rejected_upstream() {
        // Presence is checked by the handler; garde only bounds the value.
        let req: ScoreRequest = serde_json::from_str("{}").unwrap();
        assert!(req.image.is_none());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_empty_image_fails_validation() {
        let req: ScoreRequest = serde_json::from_str(r#"{"image": ""}"#).unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_nonempty_image_passes_validation() {
        let req: ScoreRequest = serde_json::from_str(r#"{"image": "data"}"#).unwrap();
        assert!(req.validate().is_ok());
        assert_eq!(req.image.as_deref(), Some("data"));
    }
}
