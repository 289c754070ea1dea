use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;

use super::error::ClientError;
use crate::api::handlers::{HealthResponse, SubmitResponse};
use crate::intake::FetchOutcome;
use crate::registry::{JobId, JobState, JobSummary};

pub const DEFAULT_SERVER: &str = "http://127.0.0.1:5000";

/// Error body returned by the server.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    code: String,
    #[serde(default)]
    state: Option<JobState>,
}

pub struct IntakeClient {
    client: Client,
    base_url: String,
}

impl IntakeClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn submit(
        &self,
        bytes: Vec<u8>,
        filename: Option<&str>,
    ) -> Result<JobId, ClientError> {
        let mut request = self.client.post(format!("{}/jobs", self.base_url));
        if let Some(name) = filename {
            request = request.query(&[("filename", name)]);
        }
        let response = request
            .header("content-type", "application/octet-stream")
            .body(bytes)
            .send()
            .await?;
        let body: SubmitResponse = check(response).await?.json().await?;
        Ok(body.job_id)
    }

    pub async fn status(&self, id: JobId) -> Result<JobSummary, ClientError> {
        let response = self
            .client
            .get(format!("{}/jobs/{id}", self.base_url))
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    /// Fetch a job's result. Pending and failed jobs are outcomes, not errors.
    pub async fn fetch(&self, id: JobId) -> Result<FetchOutcome, ClientError> {
        let response = self
            .client
            .get(format!("{}/jobs/{id}/result", self.base_url))
            .send()
            .await?;

        match response.status() {
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                let status = response.status().as_u16();
                let body: ErrorBody = response.json().await?;
                match (body.code.as_str(), body.state) {
                    ("PENDING", Some(state)) => Ok(FetchOutcome::Pending(state)),
                    ("JOB_FAILED", _) => Ok(FetchOutcome::Failed(body.error)),
                    _ => Err(ClientError::Api {
                        status,
                        code: body.code,
                        message: body.error,
                    }),
                }
            }
            _ => {
                let response = check(response).await?;
                let filename = response
                    .headers()
                    .get("content-disposition")
                    .and_then(|v| v.to_str().ok())
                    .and_then(disposition_filename);
                let bytes = response.bytes().await?.to_vec();
                Ok(FetchOutcome::Ready { bytes, filename })
            }
        }
    }

    pub async fn health(&self) -> Result<HealthResponse, ClientError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }
}

/// Turn non-success responses into [`ClientError`].
async fn check(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::SERVICE_UNAVAILABLE {
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(1);
        return Err(ClientError::Unavailable { retry_after_secs });
    }

    let text = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    let (code, message) = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => (body.code, body.error),
        Err(_) => ("UNKNOWN".to_string(), text),
    };
    Err(ClientError::Api {
        status: status.as_u16(),
        code,
        message,
    })
}

fn disposition_filename(value: &str) -> Option<String> {
    let (_, rest) = value.split_once("filename=\"")?;
    let (name, _) = rest.split_once('"')?;
    (!name.is_empty()).then(|| name.to_string())
}
