//! Periodic cleanup of finished jobs.
//!
//! Terminal jobs older than the retention window (or beyond the configured
//! count) are deleted: artifacts first, then the registry record, so a
//! failed pass leaves the record in place for the next one.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::registry::Registry;
use crate::storage::{ArtifactRef, ArtifactStore};

#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub retention: chrono::Duration,
    pub max_retained_jobs: Option<usize>,
}

/// Run the retention sweeper until `cancel` is triggered.
pub async fn run(
    registry: Arc<Registry>,
    store: Arc<dyn ArtifactStore>,
    policy: RetentionPolicy,
    interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        retention_hours = policy.retention.num_hours(),
        max_retained_jobs = ?policy.max_retained_jobs,
        interval_secs = interval.as_secs(),
        "Retention sweeper started"
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Retention sweeper stopping");
                break;
            }
            _ = ticker.tick() => {
                let removed = sweep_once(&registry, store.as_ref(), &policy, Utc::now()).await;
                if removed > 0 {
                    tracing::info!(removed, "Retention: purged finished jobs");
                } else {
                    tracing::debug!("Retention: nothing to purge");
                }
            }
        }
    }
}

/// Delete every job the policy marks as expired at `now`. Returns how many
/// jobs were removed; failures are logged and retried on the next pass.
pub async fn sweep_once(
    registry: &Registry,
    store: &dyn ArtifactStore,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> usize {
    let mut removed = 0;

    for job in registry.expired(policy.retention, policy.max_retained_jobs, now) {
        // Output is deleted even without an output_ref: discarded attempts
        // may have left one behind.
        let artifacts = [job.input_ref, ArtifactRef::output(job.id)];
        let mut deleted = true;
        for artifact in &artifacts {
            if let Err(e) = store.delete(artifact).await {
                tracing::warn!(job_id = %job.id, artifact = %artifact, error = %e, "Retention: failed to delete artifact");
                deleted = false;
            }
        }
        if !deleted {
            continue;
        }

        match registry.remove(job.id) {
            Ok(_) => removed += 1,
            Err(e) => {
                tracing::warn!(job_id = %job.id, error = %e, "Retention: failed to remove job record");
            }
        }
    }

    removed
}
