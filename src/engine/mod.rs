//! Processing engine: a fixed pool of workers plus two housekeeping tasks.
//!
//! - workers claim queued jobs, run the processor and publish results;
//! - the reconciler re-queues or fails jobs stuck `Running` past the deadline;
//! - the retention sweeper deletes old terminal jobs and their artifacts.
//!
//! Every task is a plain Tokio task driven by a [`CancellationToken`].

pub mod reconcile;
pub mod retention;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::IntakeConfig;
use crate::processor::Processor;
use crate::registry::Registry;
use crate::storage::{ArtifactStore, RetryConfig};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub workers: usize,
    pub poll_interval: Duration,
    pub deadline: chrono::Duration,
    pub max_requeues: u32,
    pub reconcile_interval: Duration,
    pub retention: chrono::Duration,
    pub max_retained_jobs: Option<usize>,
    pub cleanup_interval: Duration,
    pub storage_retry: RetryConfig,
}

impl EngineConfig {
    pub fn from_config(config: &IntakeConfig) -> Self {
        Self {
            workers: config.workers,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            deadline: chrono::Duration::seconds(config.deadline_secs as i64),
            max_requeues: config.max_requeues,
            reconcile_interval: Duration::from_secs(config.reconcile_interval_secs),
            retention: chrono::Duration::hours(config.retention_hours as i64),
            max_retained_jobs: config.max_retained_jobs,
            cleanup_interval: Duration::from_secs(config.cleanup_interval_secs),
            storage_retry: config.storage_retry(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_config(&IntakeConfig::default())
    }
}

pub struct Engine {
    registry: Arc<Registry>,
    store: Arc<dyn ArtifactStore>,
    processor: Arc<dyn Processor>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        registry: Arc<Registry>,
        store: Arc<dyn ArtifactStore>,
        processor: Arc<dyn Processor>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            store,
            processor,
            config,
        }
    }

    /// Spawn the worker pool, the reconciler and the retention sweeper.
    pub fn start(self, cancel: CancellationToken) -> EngineHandle {
        let engine = Arc::new(self);
        let mut tasks = Vec::with_capacity(engine.config.workers + 2);

        for id in 0..engine.config.workers {
            tasks.push(tokio::spawn(worker::run(
                Arc::clone(&engine),
                id,
                cancel.clone(),
            )));
        }

        tasks.push(tokio::spawn(reconcile::run(
            Arc::clone(&engine.registry),
            engine.config.deadline,
            engine.config.max_requeues,
            engine.config.reconcile_interval,
            cancel.clone(),
        )));

        tasks.push(tokio::spawn(retention::run(
            Arc::clone(&engine.registry),
            Arc::clone(&engine.store),
            retention::RetentionPolicy {
                retention: engine.config.retention,
                max_retained_jobs: engine.config.max_retained_jobs,
            },
            engine.config.cleanup_interval,
            cancel.clone(),
        )));

        tracing::info!(
            workers = engine.config.workers,
            processor = engine.processor.name(),
            deadline_secs = engine.config.deadline.num_seconds(),
            max_requeues = engine.config.max_requeues,
            "Processing engine started",
        );

        EngineHandle { tasks, cancel }
    }
}

/// Running engine tasks.
pub struct EngineHandle {
    tasks: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl EngineHandle {
    /// Signal every task to stop and wait up to `grace` for them.
    ///
    /// Workers finish the job in hand before exiting. Anything still
    /// running after `grace` is recovered on the next start.
    pub async fn shutdown(self, grace: Duration) {
        self.cancel.cancel();
        let joined = tokio::time::timeout(grace, async {
            for task in self.tasks {
                if let Err(e) = task.await {
                    tracing::error!(error = %e, "Engine task ended abnormally");
                }
            }
        })
        .await;
        match joined {
            Ok(()) => tracing::info!("Processing engine stopped"),
            Err(_) => tracing::warn!(
                grace_secs = grace.as_secs(),
                "Processing engine did not stop in time"
            ),
        }
    }
}
