//! Intake and retrieval: the operations the HTTP layer and tests drive.
//!
//! Submission stores the input and records a `Queued` job, then returns.
//! Status and fetch read the registry (and, for completed jobs, storage) and
//! never wait on processing.

use std::sync::Arc;

use crate::error::{IntakeError, Result};
use crate::registry::{JobCounts, JobId, JobState, JobSummary, Registry, UploadInfo};
use crate::storage::{ArtifactStore, RetryConfig, Role, with_retry};

/// Result of asking for a job's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Ready {
        bytes: Vec<u8>,
        filename: Option<String>,
    },
    /// Not finished yet; carries `Queued` or `Running`.
    Pending(JobState),
    Failed(String),
}

#[derive(Clone)]
pub struct Intake {
    registry: Arc<Registry>,
    store: Arc<dyn ArtifactStore>,
    retry: RetryConfig,
    max_upload_bytes: usize,
}

impl Intake {
    pub fn new(
        registry: Arc<Registry>,
        store: Arc<dyn ArtifactStore>,
        retry: RetryConfig,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            registry,
            store,
            retry,
            max_upload_bytes,
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    /// Store `bytes` and queue a job for them. No job exists if this fails.
    pub async fn submit(&self, bytes: &[u8], filename: Option<String>) -> Result<JobId> {
        if bytes.is_empty() {
            return Err(IntakeError::Validation("upload is empty".to_string()));
        }
        if bytes.len() > self.max_upload_bytes {
            return Err(IntakeError::Validation(format!(
                "upload is {} bytes, limit is {}",
                bytes.len(),
                self.max_upload_bytes
            )));
        }
        let filename = filename.map(sanitize_filename).filter(|name| !name.is_empty());

        let id = uuid::Uuid::new_v4();
        let store = self.store.as_ref();
        let input_ref = with_retry(&self.retry, "store input", move || {
            store.put(id, Role::Input, bytes)
        })
        .await?;

        let upload = UploadInfo {
            filename,
            size: bytes.len() as u64,
        };
        match self.registry.create(input_ref, upload) {
            Ok(job) => {
                tracing::info!(job_id = %job.id, size = job.input_size, "Job queued");
                Ok(job.id)
            }
            Err(e) => {
                if let Err(cleanup) = self.store.delete(&input_ref).await {
                    tracing::warn!(job_id = %id, error = %cleanup, "Failed to remove orphaned input");
                }
                Err(e)
            }
        }
    }

    pub fn status(&self, id: JobId) -> Result<JobSummary> {
        self.registry.get(id).map(|job| JobSummary::from_job(&job))
    }

    pub async fn fetch_result(&self, id: JobId) -> Result<FetchOutcome> {
        let job = self.registry.get(id)?;
        match job.state {
            JobState::Queued | JobState::Running => Ok(FetchOutcome::Pending(job.state)),
            JobState::Failed => {
                let reason = job
                    .error
                    .map(|failure| failure.to_string())
                    .unwrap_or_else(|| "job failed".to_string());
                Ok(FetchOutcome::Failed(reason))
            }
            JobState::Completed => {
                let output_ref = job.output_ref.ok_or_else(|| {
                    IntakeError::StorageUnavailable(format!("job {id} has no output reference"))
                })?;
                let store = self.store.as_ref();
                let output_ref = &output_ref;
                let bytes = with_retry(&self.retry, "read output", move || store.get(output_ref))
                    .await
                    .map_err(|e| match e {
                        // A completed job whose output vanished is a storage fault.
                        IntakeError::ArtifactNotFound(key) => {
                            IntakeError::StorageUnavailable(format!("output {key} is missing"))
                        }
                        other => other,
                    })?;
                Ok(FetchOutcome::Ready {
                    bytes,
                    filename: job.filename.map(|name| result_filename(&name)),
                })
            }
        }
    }

    pub fn list(&self, state: Option<JobState>) -> Vec<JobSummary> {
        self.registry
            .list(state)
            .iter()
            .map(JobSummary::from_job)
            .collect()
    }

    pub fn counts(&self) -> JobCounts {
        self.registry.counts()
    }
}

/// Keep only the final path component, stripped of control characters and quotes.
fn sanitize_filename(name: String) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    base.chars()
        .filter(|c| !c.is_control() && *c != '"')
        .collect::<String>()
        .trim()
        .to_string()
}

/// `report.xlsx` -> `report_result.xlsx`.
fn result_filename(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}_result.{ext}"),
        _ => format!("{name}_result"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::engine::{Engine, EngineConfig};
    use crate::processor::{Processor, ProcessingError, Repeat};

    struct AlwaysFails;

    impl Processor for AlwaysFails {
        fn name(&self) -> &str {
            "always-fails"
        }

        fn process(&self, _input: &[u8]) -> std::result::Result<Vec<u8>, ProcessingError> {
            Err(ProcessingError::new("sheet 'Data' not found"))
        }
    }

    struct Harness {
        _dir: TempDir,
        intake: Intake,
        registry: Arc<Registry>,
        store: Arc<dyn ArtifactStore>,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn ArtifactStore> =
            Arc::new(crate::storage::LocalStore::new(dir.path()).unwrap());
        let registry = Arc::new(Registry::in_memory());
        let intake = Intake::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            RetryConfig::default(),
            1024,
        );
        Harness {
            _dir: dir,
            intake,
            registry,
            store,
        }
    }

    fn start_engine(h: &Harness, processor: Arc<dyn Processor>) -> CancellationToken {
        let cancel = CancellationToken::new();
        let config = EngineConfig {
            workers: 2,
            poll_interval: Duration::from_millis(10),
            ..Default::default()
        };
        Engine::new(
            Arc::clone(&h.registry),
            Arc::clone(&h.store),
            processor,
            config,
        )
        .start(cancel.clone());
        cancel
    }

    async fn wait_terminal(intake: &Intake, id: JobId) -> JobSummary {
        for _ in 0..200 {
            let summary = intake.status(id).unwrap();
            if summary.state.is_terminal() {
                return summary;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} never reached a terminal state");
    }

    #[tokio::test]
    async fn submit_returns_immediately_with_queued_job() {
        let h = harness();
        let id = h
            .intake
            .submit(b"hello", Some("in.bin".into()))
            .await
            .unwrap();
        let summary = h.intake.status(id).unwrap();
        assert_eq!(summary.state, JobState::Queued);
        assert_eq!(summary.input_size, 5);
        assert_eq!(summary.filename.as_deref(), Some("in.bin"));
        assert_eq!(
            h.intake.fetch_result(id).await.unwrap(),
            FetchOutcome::Pending(JobState::Queued)
        );
    }

    #[tokio::test]
    async fn rejected_uploads_create_no_job() {
        let h = harness();
        assert!(matches!(
            h.intake.submit(b"", None).await,
            Err(IntakeError::Validation(_))
        ));
        assert!(matches!(
            h.intake.submit(&[0u8; 2048], None).await,
            Err(IntakeError::Validation(_))
        ));
        assert!(h.intake.list(None).is_empty());
    }

    #[tokio::test]
    async fn doubling_processor_returns_input_twice() {
        let h = harness();
        let cancel = start_engine(&h, Arc::new(Repeat { times: 2 }));

        let input = b"0123456789";
        let id = h
            .intake
            .submit(input, Some("../../data.xlsx".into()))
            .await
            .unwrap();
        let summary = wait_terminal(&h.intake, id).await;
        assert_eq!(summary.state, JobState::Completed);

        match h.intake.fetch_result(id).await.unwrap() {
            FetchOutcome::Ready { bytes, filename } => {
                assert_eq!(bytes.len(), 20);
                assert_eq!(bytes, [input.as_slice(), input.as_slice()].concat());
                assert_eq!(filename.as_deref(), Some("data_result.xlsx"));
            }
            other => panic!("expected Ready, got {other:?}"),
        }
        cancel.cancel();
    }

    #[tokio::test]
    async fn failing_processor_surfaces_reason() {
        let h = harness();
        let cancel = start_engine(&h, Arc::new(AlwaysFails));

        let id = h.intake.submit(b"payload", None).await.unwrap();
        let summary = wait_terminal(&h.intake, id).await;
        assert_eq!(summary.state, JobState::Failed);
        assert!(summary.error.as_deref().is_some_and(|e| !e.is_empty()));

        match h.intake.fetch_result(id).await.unwrap() {
            FetchOutcome::Failed(reason) => assert!(reason.contains("sheet 'Data' not found")),
            other => panic!("expected Failed, got {other:?}"),
        }
        cancel.cancel();
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let h = harness();
        let id = uuid::Uuid::new_v4();
        assert!(matches!(h.intake.status(id), Err(IntakeError::JobNotFound(_))));
        assert!(matches!(
            h.intake.fetch_result(id).await,
            Err(IntakeError::JobNotFound(_))
        ));
    }

    #[test]
    fn result_filenames() {
        assert_eq!(result_filename("report.xlsx"), "report_result.xlsx");
        assert_eq!(result_filename("archive.tar.gz"), "archive.tar_result.gz");
        assert_eq!(result_filename("README"), "README_result");
        assert_eq!(result_filename(".env"), ".env_result");
        assert_eq!(sanitize_filename("C:\\tmp\\a\"b.txt".into()), "ab.txt");
    }
}
