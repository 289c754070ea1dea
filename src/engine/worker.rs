use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::Engine;
use crate::error::IntakeError;
use crate::registry::{Job, JobFailure, JobState, Transition};
use crate::storage::{Role, with_retry};

/// Worker loop: claim, execute, finalize, until cancelled.
pub(super) async fn run(engine: Arc<Engine>, worker: usize, cancel: CancellationToken) {
    tracing::debug!(worker, "Worker started");

    while !cancel.is_cancelled() {
        match engine.registry.claim_next() {
            Ok(Some(job)) => {
                let span = tracing::info_span!(
                    "job",
                    job_id = %job.id,
                    attempt = job.attempt,
                    worker,
                );
                engine.execute(&job).instrument(span).await;
            }
            Ok(None) => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = engine.registry.notified() => {}
                    _ = tokio::time::sleep(engine.config.poll_interval) => {}
                }
            }
            Err(e) => {
                tracing::error!(worker, error = %e, "Failed to claim job");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(engine.config.poll_interval) => {}
                }
            }
        }
    }

    tracing::debug!(worker, "Worker stopped");
}

impl Engine {
    async fn execute(&self, job: &Job) {
        let started = Instant::now();
        let store = self.store.as_ref();
        let retry = &self.config.storage_retry;

        let input_ref = &job.input_ref;
        let input = match with_retry(retry, "read input", move || store.get(input_ref)).await {
            Ok(bytes) => bytes,
            Err(IntakeError::ArtifactNotFound(key)) => {
                self.settle(
                    job,
                    Transition::Fail(JobFailure::storage(format!(
                        "input artifact {key} is missing"
                    ))),
                );
                return;
            }
            Err(e) => {
                self.release_after_storage_error(job, &e);
                return;
            }
        };

        let processor = Arc::clone(&self.processor);
        let output = match tokio::task::spawn_blocking(move || processor.process(&input)).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Processor failed");
                self.settle(job, Transition::Fail(JobFailure::processing(e.to_string())));
                return;
            }
            Err(e) => {
                let reason = if e.is_panic() {
                    "processor panicked"
                } else {
                    "processing task was cancelled"
                };
                tracing::error!(error = %e, "{reason}");
                self.settle(job, Transition::Fail(JobFailure::processing(reason)));
                return;
            }
        };

        // The reconciler may have re-queued or failed the job meanwhile.
        if !self.registry.is_current(job.id, job.attempt) {
            tracing::info!("Claim superseded while processing, discarding output");
            return;
        }

        let id = job.id;
        let bytes = output.as_slice();
        let output_ref =
            match with_retry(retry, "write output", move || store.put(id, Role::Output, bytes))
                .await
            {
                Ok(output_ref) => output_ref,
                Err(e) => {
                    self.release_after_storage_error(job, &e);
                    return;
                }
            };

        match self
            .registry
            .finalize(job.id, job.attempt, Transition::Complete(output_ref))
        {
            Ok(_) => tracing::info!(
                output_size = output.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Job completed",
            ),
            Err(IntakeError::Superseded { state, .. }) => {
                tracing::info!(%state, "Claim superseded after publishing, discarding output");
                // A newer attempt may still own the output key unless the job is dead.
                if state == JobState::Failed {
                    if let Err(e) = store.delete(&output_ref).await {
                        tracing::warn!(error = %e, "Failed to delete discarded output");
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to finalize job; reconciler will retry it");
            }
        }
    }

    /// Transient storage trouble: give the job back to the queue while the
    /// re-queue budget lasts, then fail it.
    fn release_after_storage_error(&self, job: &Job, err: &IntakeError) {
        tracing::warn!(error = %err, requeues = job.requeues, "Storage error while processing");
        let transition = if job.requeues < self.config.max_requeues {
            Transition::Requeue
        } else {
            Transition::Fail(JobFailure::storage(err.to_string()))
        };
        self.settle(job, transition);
    }

    fn settle(&self, job: &Job, transition: Transition) {
        let target = transition.target();
        match self.registry.finalize(job.id, job.attempt, transition) {
            Ok(_) => tracing::info!(state = %target, "Job settled"),
            Err(IntakeError::Superseded { state, .. }) => {
                tracing::info!(%state, "Claim superseded, outcome dropped");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to record job outcome; reconciler will retry it");
            }
        }
    }
}
