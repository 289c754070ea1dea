use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use super::job::{Job, JobId};
use crate::error::{IntakeError, Result};

/// One JSON file per job under a directory: `{dir}/{id}.json`.
pub(super) struct Journal {
    dir: PathBuf,
}

impl Journal {
    /// Open `dir`, creating it if needed, and read back every stored record.
    ///
    /// Unreadable records are logged and skipped so one corrupt file does
    /// not keep the service from starting.
    pub(super) fn open(dir: &Path) -> Result<(Self, Vec<Job>)> {
        fs::create_dir_all(dir)?;

        let mut jobs = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let contents = fs::read_to_string(&path)?;
            match serde_json::from_str::<Job>(&contents) {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable job record");
                }
            }
        }

        Ok((
            Self {
                dir: dir.to_path_buf(),
            },
            jobs,
        ))
    }

    pub(super) fn write(&self, job: &Job) -> Result<()> {
        let path = self.path_for(job.id);
        let json = serde_json::to_vec_pretty(job)?;
        write_atomic(&self.dir, &path, &json).map_err(|e| {
            IntakeError::StorageUnavailable(format!("failed to persist job {}: {e}", job.id))
        })
    }

    pub(super) fn remove(&self, id: JobId) -> Result<()> {
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(IntakeError::StorageUnavailable(format!(
                "failed to remove job record {id}: {e}"
            ))),
        }
    }

    fn path_for(&self, id: JobId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
