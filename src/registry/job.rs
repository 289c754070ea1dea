use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::JobState;
use crate::storage::ArtifactRef;

pub type JobId = Uuid;

/// Why a job ended up `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The processing function returned an error or panicked.
    Processing,
    /// The job kept overrunning its deadline after every re-queue.
    DeadlineExceeded,
    /// Input or output could not be read or written.
    Storage,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Processing => write!(f, "ProcessingFailure"),
            FailureKind::DeadlineExceeded => write!(f, "DeadlineExceeded"),
            FailureKind::Storage => write!(f, "StorageUnavailable"),
        }
    }
}

/// Failure record attached to a `Failed` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    /// Human-readable reason. Never empty.
    pub reason: String,
}

impl JobFailure {
    pub fn processing(reason: impl Into<String>) -> Self {
        Self::new(FailureKind::Processing, reason.into())
    }

    pub fn deadline_exceeded() -> Self {
        Self::new(
            FailureKind::DeadlineExceeded,
            "DeadlineExceeded: processing did not finish within the deadline".to_string(),
        )
    }

    pub fn storage(reason: impl Into<String>) -> Self {
        Self::new(FailureKind::Storage, reason.into())
    }

    fn new(kind: FailureKind, reason: String) -> Self {
        let reason = if reason.trim().is_empty() {
            kind.to_string()
        } else {
            reason
        };
        Self { kind, reason }
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.reason)
    }
}

/// Metadata captured from the upload alongside the stored input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadInfo {
    pub filename: Option<String>,
    pub size: u64,
}

/// A single unit of work tracked by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Submission order, assigned by the registry. Claims go lowest first.
    #[serde(default)]
    pub seq: u64,
    pub state: JobState,
    pub input_ref: ArtifactRef,
    pub output_ref: Option<ArtifactRef>,
    pub error: Option<JobFailure>,
    pub filename: Option<String>,
    pub input_size: u64,
    /// Incremented on every claim; a worker publishes only under its own attempt.
    pub attempt: u32,
    pub requeues: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// New `Queued` job. The id is taken from the input artifact.
    pub fn new(input_ref: ArtifactRef, upload: UploadInfo) -> Self {
        let now = Utc::now();
        Self {
            id: input_ref.job_id,
            seq: 0,
            state: JobState::Queued,
            input_ref,
            output_ref: None,
            error: None,
            filename: upload.filename,
            input_size: upload.size,
            attempt: 0,
            requeues: 0,
            started_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// `output_ref` iff Completed, `error` iff Failed.
    pub fn invariants_hold(&self) -> bool {
        self.output_ref.is_some() == (self.state == JobState::Completed)
            && self.error.is_some() == (self.state == JobState::Failed)
    }
}

/// Public view of a job, returned by status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub input_size: u64,
    pub attempt: u32,
    pub requeues: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobSummary {
    pub fn from_job(job: &Job) -> Self {
        Self {
            id: job.id,
            state: job.state,
            error: job.error.as_ref().map(|e| e.reason.clone()),
            failure_kind: job.error.as_ref().map(|e| e.kind),
            filename: job.filename.clone(),
            input_size: job.input_size,
            attempt: job.attempt,
            requeues: job.requeues,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_creation_defaults() {
        let id = Uuid::new_v4();
        let job = Job::new(
            ArtifactRef::input(id),
            UploadInfo {
                filename: Some("report.xlsx".into()),
                size: 10,
            },
        );
        assert_eq!(job.id, id);
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.attempt, 0);
        assert_eq!(job.requeues, 0);
        assert_eq!(job.input_size, 10);
        assert!(job.started_at.is_none());
        assert!(job.invariants_hold());
    }

    #[test]
    fn empty_reason_falls_back_to_kind() {
        let failure = JobFailure::processing("   ");
        assert_eq!(failure.reason, "ProcessingFailure");
        assert_eq!(failure.to_string(), "ProcessingFailure: ProcessingFailure");
    }

    #[test]
    fn failure_kind_display() {
        assert_eq!(FailureKind::Processing.to_string(), "ProcessingFailure");
        assert_eq!(FailureKind::DeadlineExceeded.to_string(), "DeadlineExceeded");
        assert!(JobFailure::deadline_exceeded().reason.starts_with("DeadlineExceeded"));
    }

    #[test]
    fn summary_omits_absent_fields() {
        let job = Job::new(ArtifactRef::input(Uuid::new_v4()), UploadInfo::default());
        let json = serde_json::to_value(JobSummary::from_job(&job)).unwrap();
        assert_eq!(json["state"], "queued");
        assert!(json.get("error").is_none());
        assert!(json.get("filename").is_none());
    }

    #[test]
    fn job_serialization_roundtrip() {
        let mut job = Job::new(ArtifactRef::input(Uuid::new_v4()), UploadInfo::default());
        job.state = JobState::Failed;
        job.error = Some(JobFailure::storage("disk gone"));
        let json = serde_json::to_string(&job).unwrap();
        let back: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, job.id);
        assert_eq!(back.error, job.error);
        assert!(back.invariants_hold());
    }
}
