use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use super::{ArtifactRef, ArtifactStore, Role};
use crate::error::{IntakeError, Result};

/// Filesystem-backed artifact store rooted at a single directory.
///
/// Layout is `{root}/{job_id}/{input|output}`. Writes land in a temporary
/// file next to the destination and are renamed into place once synced.
pub struct LocalStore {
    root: PathBuf,
    // One async mutex per artifact being written or deleted.
    write_locks: Mutex<HashMap<ArtifactRef, Arc<AsyncMutex<()>>>>,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            IntakeError::StorageUnavailable(format!(
                "failed to create artifact root {}: {e}",
                root.display()
            ))
        })?;
        Ok(Self {
            root,
            write_locks: Mutex::new(HashMap::new()),
        })
    }

    #[cfg(test)]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn job_dir(&self, job_id: Uuid) -> PathBuf {
        self.root.join(job_id.to_string())
    }

    fn path_for(&self, artifact: &ArtifactRef) -> PathBuf {
        self.job_dir(artifact.job_id).join(artifact.role.as_str())
    }

    fn write_lock(&self, artifact: ArtifactRef) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .write_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(artifact).or_default())
    }

    // Drop the lock entry once nobody else is waiting on it.
    fn release_lock(&self, artifact: &ArtifactRef) {
        let mut locks = self
            .write_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(artifact)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(artifact);
        }
    }
}

#[async_trait]
impl ArtifactStore for LocalStore {
    async fn put(&self, job_id: Uuid, role: Role, bytes: &[u8]) -> Result<ArtifactRef> {
        let artifact = ArtifactRef { job_id, role };
        let lock = self.write_lock(artifact);

        let result = {
            let _guard = lock.lock().await;
            let dir = self.job_dir(job_id);
            let path = self.path_for(&artifact);
            let bytes = bytes.to_vec();
            tokio::task::spawn_blocking(move || write_atomic(&dir, &path, &bytes))
                .await
                .map_err(|e| IntakeError::StorageUnavailable(format!("write task failed: {e}")))?
        };

        drop(lock);
        self.release_lock(&artifact);

        result.map_err(|e| storage_error("write", &artifact, e))?;
        tracing::debug!(artifact = %artifact, size = bytes.len(), "Artifact stored");
        Ok(artifact)
    }

    async fn get(&self, artifact: &ArtifactRef) -> Result<Vec<u8>> {
        match tokio::fs::read(self.path_for(artifact)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(IntakeError::ArtifactNotFound(artifact.key()))
            }
            Err(e) => Err(storage_error("read", artifact, e)),
        }
    }

    async fn delete(&self, artifact: &ArtifactRef) -> Result<()> {
        let lock = self.write_lock(*artifact);

        let result = {
            let _guard = lock.lock().await;
            match tokio::fs::remove_file(self.path_for(artifact)).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(storage_error("delete", artifact, e)),
            }
        };

        drop(lock);
        self.release_lock(artifact);
        result?;

        // Fails while the other role is still present, which is fine.
        let _ = tokio::fs::remove_dir(self.job_dir(artifact.job_id)).await;
        Ok(())
    }
}

fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn storage_error(op: &str, artifact: &ArtifactRef, err: io::Error) -> IntakeError {
    IntakeError::StorageUnavailable(format!("failed to {op} {artifact}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, LocalStore) {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::new(dir.path().join("artifacts")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn put_then_get_returns_same_bytes() {
        let (_dir, store) = store();
        let id = Uuid::new_v4();

        let artifact = store.put(id, Role::Input, b"hello world").await.unwrap();
        assert_eq!(artifact, ArtifactRef::input(id));
        assert_eq!(store.get(&artifact).await.unwrap(), b"hello world");
        assert!(store.root().join(id.to_string()).join("input").is_file());
    }

    #[tokio::test]
    async fn get_missing_artifact_is_not_found() {
        let (_dir, store) = store();
        let err = store
            .get(&ArtifactRef::output(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, IntakeError::ArtifactNotFound(_)));
    }

    #[tokio::test]
    async fn put_overwrites_and_leaves_no_temp_files() {
        let (_dir, store) = store();
        let id = Uuid::new_v4();

        store.put(id, Role::Output, b"first").await.unwrap();
        store.put(id, Role::Output, b"second").await.unwrap();

        assert_eq!(store.get(&ArtifactRef::output(id)).await.unwrap(), b"second");
        let entries: Vec<_> = fs::read_dir(store.root().join(id.to_string()))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(entries, vec!["output".to_string()]);
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_removes_empty_job_dir() {
        let (_dir, store) = store();
        let id = Uuid::new_v4();
        store.put(id, Role::Input, b"in").await.unwrap();
        store.put(id, Role::Output, b"out").await.unwrap();

        store.delete(&ArtifactRef::input(id)).await.unwrap();
        assert!(store.root().join(id.to_string()).exists());

        store.delete(&ArtifactRef::output(id)).await.unwrap();
        store.delete(&ArtifactRef::output(id)).await.unwrap();
        assert!(!store.root().join(id.to_string()).exists());
        assert!(store.write_locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_writers_never_expose_partial_content() {
        let (_dir, store) = store();
        let store = Arc::new(store);
        let id = Uuid::new_v4();
        let payloads: Vec<Vec<u8>> = (0..8u8).map(|i| vec![i; 64 * 1024]).collect();

        let mut handles = Vec::new();
        for payload in payloads.clone() {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.put(id, Role::Output, &payload).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stored = store.get(&ArtifactRef::output(id)).await.unwrap();
        assert!(payloads.contains(&stored));
    }
}
