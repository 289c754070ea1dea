//! Artifact storage for uploaded inputs and produced results.
//!
//! Artifacts are addressed by job id and [`Role`]. The registry only ever
//! holds [`ArtifactRef`]s; bytes live behind an [`ArtifactStore`].

mod local;
mod retry;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

pub use local::LocalStore;
pub use retry::{RetryConfig, with_retry};

/// Which side of a job an artifact belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Input,
    Output,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Input => "input",
            Role::Output => "output",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle to a stored artifact. Key layout is `{job_id}/{role}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub job_id: Uuid,
    pub role: Role,
}

impl ArtifactRef {
    pub fn input(job_id: Uuid) -> Self {
        Self {
            job_id,
            role: Role::Input,
        }
    }

    pub fn output(job_id: Uuid) -> Self {
        Self {
            job_id,
            role: Role::Output,
        }
    }

    pub fn key(&self) -> String {
        format!("{}/{}", self.job_id, self.role)
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.job_id, self.role)
    }
}

/// Byte storage keyed by `(job_id, role)`.
///
/// Implementations must publish writes atomically (a half-written artifact is
/// never readable) and serialize concurrent writers of the same key. I/O
/// failures are reported as [`IntakeError::StorageUnavailable`](crate::error::IntakeError::StorageUnavailable).
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(&self, job_id: Uuid, role: Role, bytes: &[u8]) -> Result<ArtifactRef>;

    /// Fails with `ArtifactNotFound` when nothing is published under `artifact`.
    async fn get(&self, artifact: &ArtifactRef) -> Result<Vec<u8>>;

    /// Deleting a missing artifact is not an error.
    async fn delete(&self, artifact: &ArtifactRef) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_key_layout() {
        let id = Uuid::nil();
        assert_eq!(
            ArtifactRef::input(id).key(),
            "00000000-0000-0000-0000-000000000000/input"
        );
        assert_eq!(ArtifactRef::output(id).role, Role::Output);
        assert_eq!(ArtifactRef::output(id).to_string(), ArtifactRef::output(id).key());
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Output).unwrap(), "\"output\"");
    }
}
