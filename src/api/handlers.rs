use axum::Json;
use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Path, Query, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use super::AppState;
use super::error::{AppError, AppResult};
use crate::intake::FetchOutcome;
use crate::registry::{JobCounts, JobId, JobState, JobSummary};

// ---------------------------------------------------------------------------
// POST /jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SubmitQuery {
    pub filename: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
}

/// Accept an upload, either as the raw request body or as the `file` field
/// of a multipart form, and queue a job for it.
pub async fn submit_job(
    State(state): State<AppState>,
    Query(query): Query<SubmitQuery>,
    request: Request,
) -> AppResult<(StatusCode, Json<SubmitResponse>)> {
    let limit = state.intake.max_upload_bytes();
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"));

    let (bytes, filename) = if is_multipart {
        read_multipart(request, &state, limit).await?
    } else {
        let bytes = Bytes::from_request(request, &state)
            .await
            .map_err(|rejection| {
                if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                    AppError::PayloadTooLarge { limit }
                } else {
                    AppError::BadRequest(rejection.body_text())
                }
            })?;
        (bytes, query.filename)
    };

    if bytes.len() > limit {
        return Err(AppError::PayloadTooLarge { limit });
    }

    let job_id = state.intake.submit(&bytes, filename).await?;
    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { job_id })))
}

async fn read_multipart(
    request: Request,
    state: &AppState,
    limit: usize,
) -> AppResult<(Bytes, Option<String>)> {
    let multipart_error = |e: axum::extract::multipart::MultipartError| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge { limit }
        } else {
            AppError::BadRequest(e.body_text())
        }
    };

    let mut multipart = Multipart::from_request(request, state)
        .await
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().map(str::to_string);
        let bytes = field.bytes().await.map_err(multipart_error)?;
        return Ok((bytes, filename));
    }

    Err(AppError::BadRequest(
        "multipart upload has no 'file' field".to_string(),
    ))
}

// ---------------------------------------------------------------------------
// GET /jobs, GET /jobs/{id}
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub state: Option<JobState>,
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<JobSummary>> {
    Json(state.intake.list(query.state))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<Json<JobSummary>> {
    Ok(Json(state.intake.status(id)?))
}

// ---------------------------------------------------------------------------
// GET /jobs/{id}/result
// ---------------------------------------------------------------------------

pub async fn get_result(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<Response> {
    match state.intake.fetch_result(id).await? {
        FetchOutcome::Ready { bytes, filename } => {
            let mut headers = HeaderMap::new();
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            );
            // Non-ASCII names cannot go in a plain header value; skip the hint.
            if let Some(value) = filename
                .and_then(|name| HeaderValue::from_str(&format!("attachment; filename=\"{name}\"")).ok())
            {
                headers.insert(header::CONTENT_DISPOSITION, value);
            }
            Ok((StatusCode::OK, headers, bytes).into_response())
        }
        FetchOutcome::Pending(job_state) => Err(AppError::Pending(job_state)),
        FetchOutcome::Failed(reason) => Err(AppError::JobFailed(reason)),
    }
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    #[serde(flatten)]
    pub jobs: JobCounts,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        jobs: state.intake.counts(),
    })
}
