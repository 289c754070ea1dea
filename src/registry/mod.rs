//! Job registry: the single source of truth for job lifecycle state.
//!
//! All mutation goes through one mutex-guarded table. [`Registry::claim_next`]
//! selects and flips a queued job inside a single critical section, which is
//! what gives exactly-once claiming under concurrent workers. The lock is
//! never held across an `.await`.

mod job;
mod journal;
mod state;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::error::{IntakeError, Result};
use crate::storage::ArtifactRef;
use journal::Journal;

pub use job::{FailureKind, Job, JobFailure, JobId, JobSummary, UploadInfo};
pub use state::{JobState, Transition};
use state::StateMachine;

/// Number of jobs per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Outcome of one deadline reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub requeued: Vec<JobId>,
    pub failed: Vec<JobId>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.failed.is_empty()
    }
}

#[derive(Default)]
struct Table {
    jobs: HashMap<JobId, Job>,
    // Submission order; the next job gets `next_seq`.
    next_seq: u64,
}

pub struct Registry {
    table: Mutex<Table>,
    journal: Option<Journal>,
    wakeup: Notify,
}

impl Registry {
    /// Registry without persistence.
    pub fn in_memory() -> Self {
        Self {
            table: Mutex::new(Table::default()),
            journal: None,
            wakeup: Notify::new(),
        }
    }

    /// Registry persisted under `dir`.
    ///
    /// Jobs found `Running` were claimed by a process that no longer exists;
    /// they are put back in the queue without consuming their re-queue budget.
    pub fn open(dir: &Path) -> Result<Self> {
        let (journal, stored) = Journal::open(dir)?;
        let now = Utc::now();

        let mut jobs = HashMap::with_capacity(stored.len());
        let mut next_seq = 0;
        let mut recovered = 0usize;
        for mut job in stored {
            next_seq = next_seq.max(job.seq + 1);
            if job.state == JobState::Running {
                StateMachine::apply(&mut job, Transition::Recover, now)?;
                journal.write(&job)?;
                recovered += 1;
            }
            jobs.insert(job.id, job);
        }

        tracing::info!(
            dir = %dir.display(),
            jobs = jobs.len(),
            recovered,
            "Job registry loaded",
        );

        Ok(Self {
            table: Mutex::new(Table { jobs, next_seq }),
            journal: Some(journal),
            wakeup: Notify::new(),
        })
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Write-ahead: the record is persisted before the table changes.
    fn commit(&self, table: &mut Table, job: Job) -> Result<Job> {
        debug_assert!(job.invariants_hold(), "job {} violates its invariants", job.id);
        if let Some(journal) = &self.journal {
            journal.write(&job)?;
        }
        table.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    /// Record a new `Queued` job for an already stored input.
    pub fn create(&self, input_ref: ArtifactRef, upload: UploadInfo) -> Result<Job> {
        let mut job = Job::new(input_ref, upload);
        let job = {
            let mut table = self.table();
            if table.jobs.contains_key(&job.id) {
                return Err(IntakeError::Validation(format!(
                    "job {} already exists",
                    job.id
                )));
            }
            job.seq = table.next_seq;
            let job = self.commit(&mut table, job)?;
            table.next_seq += 1;
            job
        };
        self.wakeup.notify_one();
        Ok(job)
    }

    pub fn get(&self, id: JobId) -> Result<Job> {
        self.table()
            .jobs
            .get(&id)
            .cloned()
            .ok_or(IntakeError::JobNotFound(id))
    }

    /// Apply `transition` to job `id`, enforcing the state machine.
    #[allow(dead_code)]
    pub fn transition(&self, id: JobId, transition: Transition) -> Result<Job> {
        self.apply(id, None, transition)
    }

    /// Like [`transition`](Self::transition), but only while the job is still
    /// `Running` under `attempt`. Otherwise fails with `Superseded`.
    pub fn finalize(&self, id: JobId, attempt: u32, transition: Transition) -> Result<Job> {
        self.apply(id, Some(attempt), transition)
    }

    fn apply(&self, id: JobId, attempt: Option<u32>, transition: Transition) -> Result<Job> {
        let requeued = transition.target() == JobState::Queued;
        let job = {
            let mut table = self.table();
            let mut job = table
                .jobs
                .get(&id)
                .cloned()
                .ok_or(IntakeError::JobNotFound(id))?;
            if let Some(attempt) = attempt {
                if job.state != JobState::Running || job.attempt != attempt {
                    return Err(IntakeError::Superseded {
                        id,
                        attempt,
                        state: job.state,
                    });
                }
            }
            StateMachine::apply(&mut job, transition, Utc::now())?;
            self.commit(&mut table, job)?
        };
        if requeued {
            self.wakeup.notify_one();
        }
        Ok(job)
    }

    /// Whether the job is still `Running` under the claim `attempt`.
    pub fn is_current(&self, id: JobId, attempt: u32) -> bool {
        self.table()
            .jobs
            .get(&id)
            .is_some_and(|job| job.state == JobState::Running && job.attempt == attempt)
    }

    /// Atomically take the oldest `Queued` job and mark it `Running`.
    pub fn claim_next(&self) -> Result<Option<Job>> {
        let mut table = self.table();
        let Some(mut job) = table
            .jobs
            .values()
            .filter(|job| job.state == JobState::Queued)
            .min_by_key(|job| job.seq)
            .cloned()
        else {
            return Ok(None);
        };
        StateMachine::apply(&mut job, Transition::Start, Utc::now())?;
        self.commit(&mut table, job).map(Some)
    }

    /// Jobs in `state` (all when `None`), oldest first.
    pub fn list(&self, state: Option<JobState>) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .table()
            .jobs
            .values()
            .filter(|job| state.is_none_or(|s| job.state == s))
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.seq);
        jobs
    }

    pub fn counts(&self) -> JobCounts {
        let mut counts = JobCounts::default();
        for job in self.table().jobs.values() {
            match job.state {
                JobState::Queued => counts.queued += 1,
                JobState::Running => counts.running += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Re-queue or force-fail jobs whose current claim started before
    /// `now - deadline`. A job is re-queued while it has fewer than
    /// `max_requeues` re-queues, then failed with `DeadlineExceeded`.
    pub fn reconcile(
        &self,
        deadline: Duration,
        max_requeues: u32,
        now: DateTime<Utc>,
    ) -> Result<ReconcileReport> {
        let cutoff = now - deadline;
        let mut report = ReconcileReport::default();
        {
            let mut table = self.table();
            let overdue: Vec<Job> = table
                .jobs
                .values()
                .filter(|job| {
                    job.state == JobState::Running
                        && job.started_at.is_some_and(|started| started <= cutoff)
                })
                .cloned()
                .collect();

            for mut job in overdue {
                let transition = if job.requeues < max_requeues {
                    Transition::Requeue
                } else {
                    Transition::Fail(JobFailure::deadline_exceeded())
                };
                let requeue = transition == Transition::Requeue;
                StateMachine::apply(&mut job, transition, now)?;
                let job = self.commit(&mut table, job)?;
                if requeue {
                    report.requeued.push(job.id);
                } else {
                    report.failed.push(job.id);
                }
            }
        }
        for _ in &report.requeued {
            self.wakeup.notify_one();
        }
        Ok(report)
    }

    /// Terminal jobs due for deletion: those last updated before
    /// `now - retention`, plus the oldest ones beyond `max_retained`.
    pub fn expired(
        &self,
        retention: Duration,
        max_retained: Option<usize>,
        now: DateTime<Utc>,
    ) -> Vec<Job> {
        let cutoff = now - retention;
        let mut terminal: Vec<Job> = self
            .table()
            .jobs
            .values()
            .filter(|job| job.state.is_terminal())
            .cloned()
            .collect();
        // Newest first, so everything past `max_retained` is the oldest.
        terminal.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.seq.cmp(&a.seq)));

        terminal
            .into_iter()
            .enumerate()
            .filter(|(index, job)| {
                job.updated_at < cutoff || max_retained.is_some_and(|max| *index >= max)
            })
            .map(|(_, job)| job)
            .collect()
    }

    /// Delete a job record. Returns the removed job, if any.
    pub fn remove(&self, id: JobId) -> Result<Option<Job>> {
        let mut table = self.table();
        if !table.jobs.contains_key(&id) {
            return Ok(None);
        }
        if let Some(journal) = &self.journal {
            journal.remove(id)?;
        }
        Ok(table.jobs.remove(&id))
    }

    /// Resolves when work may have become available.
    pub async fn notified(&self) {
        self.wakeup.notified().await;
    }
}
