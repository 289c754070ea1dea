use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::{Job, JobFailure};
use crate::error::{IntakeError, Result};
use crate::storage::ArtifactRef;

/// Lifecycle state of a job.
///
/// Each job flows through: QUEUED → RUNNING → COMPLETED | FAILED, with
/// RUNNING → QUEUED only for deadline re-queues and restart recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Queued, JobState::Running)
                | (JobState::Running, JobState::Completed)
                | (JobState::Running, JobState::Failed)
                | (JobState::Running, JobState::Queued)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A requested change to a job's lifecycle state.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// A worker claimed the job.
    Start,
    /// Processing succeeded and the output is published.
    Complete(ArtifactRef),
    /// Terminal failure with a recorded reason.
    Fail(JobFailure),
    /// Put a running job back in the queue, consuming one re-queue.
    Requeue,
    /// Put a running job back in the queue after a restart. Free of charge.
    Recover,
}

impl Transition {
    pub fn target(&self) -> JobState {
        match self {
            Transition::Start => JobState::Running,
            Transition::Complete(_) => JobState::Completed,
            Transition::Fail(_) => JobState::Failed,
            Transition::Requeue | Transition::Recover => JobState::Queued,
        }
    }
}

/// Applies transitions to a `Job`, enforcing the lifecycle rules.
pub struct StateMachine;

impl StateMachine {
    /// Apply `transition` to `job` in place.
    ///
    /// Fails with [`IntakeError::InvalidTransition`] and leaves the job
    /// untouched when the move is not allowed from the current state.
    pub fn apply(job: &mut Job, transition: Transition, now: DateTime<Utc>) -> Result<()> {
        let target = transition.target();
        if !job.state.can_transition_to(target) {
            return Err(IntakeError::InvalidTransition {
                id: job.id,
                from: job.state,
                to: target,
            });
        }

        match transition {
            Transition::Start => {
                job.attempt += 1;
                job.started_at = Some(now);
            }
            Transition::Complete(output_ref) => {
                job.output_ref = Some(output_ref);
            }
            Transition::Fail(failure) => {
                job.error = Some(failure);
            }
            Transition::Requeue => {
                job.requeues += 1;
                job.started_at = None;
            }
            Transition::Recover => {
                job.started_at = None;
            }
        }

        job.state = target;
        job.updated_at = now;
        Ok(())
    }
}
