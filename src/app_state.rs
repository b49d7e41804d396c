use std::sync::Arc;

use crate::services::repository::JobRepository;

/// Shared application state passed to all route handlers.
///
/// Constructed once at process start; there is no ambient global queue.
/// Workers receive the repository and scorer directly from their binary.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<JobRepository>,
}

impl AppState {
    pub fn new(repo: JobRepository) -> Self {
        Self {
            repo: Arc::new(repo),
        }
    }
}
