use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Lifecycle state of a scoring job in the async queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobState {
    /// Terminal states keep their result or error permanently, absent an
    /// explicit retry.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Whether the state machine permits `self -> next`. The store scripts
    /// enforce these rules atomically; this is the reference table.
    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Waiting, JobState::Active)
                | (JobState::Active, JobState::Completed)
                | (JobState::Active, JobState::Failed)
                | (JobState::Failed, JobState::Waiting)
        )
    }
}

/// A scoring job and its lifecycle record.
///
/// `result` is present only when completed, `error` only when failed; both
/// are absent while the job is waiting or active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub state: JobState,
    pub payload: String,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl Job {
    /// A fresh job in `waiting` state with a new identifier.
    pub fn new(payload: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: JobState::Waiting,
            payload,
            attempts: 0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_wire_names() {
        assert_eq!(JobState::Waiting.to_string(), "waiting");
        assert_eq!(JobState::Active.to_string(), "active");
        assert_eq!(JobState::Completed.to_string(), "completed");
        assert_eq!(JobState::Failed.to_string(), "failed");

        assert_eq!("waiting".parse::<JobState>().unwrap(), JobState::Waiting);
        assert_eq!("failed".parse::<JobState>().unwrap(), JobState::Failed);
        assert!("pending".parse::<JobState>().is_err());
    }

    #[test]
    fn test_permitted_transitions() {
        assert!(JobState::Waiting.can_transition_to(JobState::Active));
        assert!(JobState::Active.can_transition_to(JobState::Completed));
        assert!(JobState::Active.can_transition_to(JobState::Failed));
        assert!(JobState::Failed.can_transition_to(JobState::Waiting));
    }

    #[test]
    fn test_forbidden_transitions() {
        // No skipping ahead, no reviving a finished job.
        assert!(!JobState::Waiting.can_transition_to(JobState::Completed));
        assert!(!JobState::Waiting.can_transition_to(JobState::Failed));
        assert!(!JobState::Active.can_transition_to(JobState::Waiting));
        assert!(!JobState::Completed.can_transition_to(JobState::Waiting));
        assert!(!JobState::Completed.can_transition_to(JobState::Failed));
        assert!(!JobState::Failed.can_transition_to(JobState::Active));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobState::Waiting.is_terminal());
        assert!(!JobState::Active.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
    }

    #[test]
    fn test_new_job_is_waiting() {
        let job = Job::new("imagedata".to_string());
        assert_eq!(job.state, JobState::Waiting);
        assert_eq!(job.attempts, 0);
        assert!(job.result.is_none());
        assert!(job.error.is_none());
        assert!(job.started_at.is_none());
    }
}
