use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::IntakeError;
use crate::registry::JobState;

/// Seconds a client should wait before retrying after a storage outage.
const STORAGE_RETRY_AFTER_SECS: &str = "5";

/// Error type for HTTP handlers.
///
/// Wraps [`IntakeError`] for domain errors and adds the outcomes of a result
/// fetch that are not successes. Renders as `{"error": ..., "code": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Intake(#[from] IntakeError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Upload exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: usize },

    /// The job has not reached a terminal state yet.
    #[error("Job is still {0}")]
    Pending(JobState),

    /// The job failed; carries the failure reason.
    #[error("{0}")]
    JobFailed(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let (status, code, message) = match &self {
            AppError::Intake(err) => match err {
                IntakeError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message),
                IntakeError::JobNotFound(_) | IntakeError::ArtifactNotFound(_) => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND", message)
                }
                IntakeError::StorageUnavailable(detail) => {
                    tracing::error!(error = %detail, "Storage unavailable");
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        "SERVICE_UNAVAILABLE",
                        "Storage is temporarily unavailable, retry later".to_string(),
                    )
                }
                other => {
                    tracing::error!(error = %other, "Internal error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
            },
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", message),
            AppError::PayloadTooLarge { .. } => {
                (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", message)
            }
            AppError::Pending(state) => {
                let body = json!({
                    "error": message,
                    "code": "PENDING",
                    "state": state,
                });
                return (StatusCode::CONFLICT, axum::Json(body)).into_response();
            }
            AppError::JobFailed(_) => (StatusCode::UNPROCESSABLE_ENTITY, "JOB_FAILED", message),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        let mut response = (status, axum::Json(body)).into_response();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from_static(STORAGE_RETRY_AFTER_SECS),
            );
        }
        response
    }
}
