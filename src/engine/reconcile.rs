//! Deadline reconciliation.
//!
//! A worker that dies or hangs mid-job would otherwise leave the job
//! `Running` forever. This pass puts overdue jobs back in the queue, and once
//! their re-queue budget is spent fails them with `DeadlineExceeded`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::registry::{ReconcileReport, Registry};

/// Run the reconciliation loop until `cancel` is triggered.
pub async fn run(
    registry: Arc<Registry>,
    deadline: chrono::Duration,
    max_requeues: u32,
    interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        deadline_secs = deadline.num_seconds(),
        max_requeues,
        interval_ms = interval.as_millis() as u64,
        "Deadline reconciler started"
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Deadline reconciler stopping");
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = reconcile_once(&registry, deadline, max_requeues) {
                    tracing::error!(error = %e, "Deadline reconciliation failed");
                }
            }
        }
    }
}

/// One reconciliation pass against the current time.
pub fn reconcile_once(
    registry: &Registry,
    deadline: chrono::Duration,
    max_requeues: u32,
) -> Result<ReconcileReport> {
    let report = registry.reconcile(deadline, max_requeues, Utc::now())?;
    if report.is_empty() {
        tracing::debug!("No overdue jobs");
    }
    for id in &report.requeued {
        tracing::warn!(job_id = %id, "Job exceeded its deadline, re-queued");
    }
    for id in &report.failed {
        tracing::warn!(job_id = %id, "Job exceeded its deadline with no re-queues left, failed");
    }
    Ok(report)
}
