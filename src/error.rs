use thiserror::Error;
use uuid::Uuid;

use crate::registry::JobState;

#[derive(Debug, Error)]
pub enum IntakeError {
    /// Malformed or empty upload. Rejected before any job exists.
    #[error("Invalid upload: {0}")]
    Validation(String),

    /// Transient storage failure. Callers retry with bounded backoff.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    /// State machine violation. Always a bug in the caller, never a job failure.
    #[error("Invalid transition for job {id}: {from} -> {to}")]
    InvalidTransition { id: Uuid, from: JobState, to: JobState },

    /// The claim presented by a worker is no longer the job's current claim.
    #[error("Job {id} attempt {attempt} was superseded (job is now {state})")]
    Superseded { id: Uuid, attempt: u32, state: JobState },

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl IntakeError {
    /// Whether retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, IntakeError::StorageUnavailable(_))
    }
}

pub type Result<T, E = IntakeError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_display() {
        let id = Uuid::nil();
        let err = IntakeError::InvalidTransition {
            id,
            from: JobState::Completed,
            to: JobState::Running,
        };
        assert_eq!(
            err.to_string(),
            format!("Invalid transition for job {id}: completed -> running")
        );
    }

    #[test]
    fn only_storage_errors_are_retryable() {
        assert!(IntakeError::StorageUnavailable("disk full".into()).is_retryable());
        assert!(!IntakeError::Validation("empty".into()).is_retryable());
        assert!(!IntakeError::JobNotFound(Uuid::nil()).is_retryable());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<IntakeError>();
    }
}
