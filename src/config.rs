//! Service configuration loaded from `intake.toml`.
//!
//! [`IntakeConfig`] holds every tunable. Values missing from the file fall
//! back to defaults, `INTAKE_*` environment variables override the file, and
//! CLI flags override both (applied in `main`).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IntakeError, Result};
use crate::processor::BUILTIN_PROCESSORS;
use crate::storage::RetryConfig;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "intake.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    /// Bind address.
    pub host: String,
    pub port: u16,
    /// Root for `jobs/` (registry records) and `artifacts/`.
    pub data_dir: PathBuf,

    /// Size of the worker pool.
    pub workers: usize,
    /// How often an idle worker re-checks the queue without a wake-up.
    pub poll_interval_ms: u64,
    /// A claim older than this is considered stuck.
    pub deadline_secs: u64,
    /// Re-queues allowed per job before it is failed with `DeadlineExceeded`.
    pub max_requeues: u32,
    pub reconcile_interval_secs: u64,

    /// Terminal jobs older than this are deleted with their artifacts.
    pub retention_hours: u64,
    /// Optional cap on retained terminal jobs; oldest go first.
    pub max_retained_jobs: Option<usize>,
    pub cleanup_interval_secs: u64,

    pub max_upload_bytes: usize,
    pub storage_max_retries: u32,
    pub storage_base_delay_ms: u64,

    /// Built-in processor name (`identity` or `repeat`).
    pub processor: String,
    pub repeat_times: usize,

    pub request_timeout_secs: u64,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            data_dir: PathBuf::from("data"),
            workers: 4,
            poll_interval_ms: 500,
            deadline_secs: 300,
            max_requeues: 2,
            reconcile_interval_secs: 15,
            retention_hours: 24,
            max_retained_jobs: None,
            cleanup_interval_secs: 600,
            max_upload_bytes: 16 * 1024 * 1024,
            storage_max_retries: 3,
            storage_base_delay_ms: 100,
            processor: "identity".to_string(),
            repeat_times: 2,
            request_timeout_secs: 30,
        }
    }
}

impl IntakeConfig {
    /// Load from `path` (or `intake.toml`), then apply environment overrides.
    /// Uses defaults if the file does not exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<IntakeConfig>(&contents)?
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `INTAKE_*` overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(host) = get("INTAKE_HOST") {
            self.host = host;
        }
        if let Some(port) = get("INTAKE_PORT") {
            self.port = parse_env("INTAKE_PORT", &port)?;
        }
        if let Some(dir) = get("INTAKE_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(workers) = get("INTAKE_WORKERS") {
            self.workers = parse_env("INTAKE_WORKERS", &workers)?;
        }
        if let Some(deadline) = get("INTAKE_DEADLINE_SECS") {
            self.deadline_secs = parse_env("INTAKE_DEADLINE_SECS", &deadline)?;
        }
        if let Some(requeues) = get("INTAKE_MAX_REQUEUES") {
            self.max_requeues = parse_env("INTAKE_MAX_REQUEUES", &requeues)?;
        }
        if let Some(hours) = get("INTAKE_RETENTION_HOURS") {
            self.retention_hours = parse_env("INTAKE_RETENTION_HOURS", &hours)?;
        }
        if let Some(processor) = get("INTAKE_PROCESSOR") {
            self.processor = processor;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("workers", self.workers as u64),
            ("poll_interval_ms", self.poll_interval_ms),
            ("deadline_secs", self.deadline_secs),
            ("reconcile_interval_secs", self.reconcile_interval_secs),
            ("cleanup_interval_secs", self.cleanup_interval_secs),
            ("max_upload_bytes", self.max_upload_bytes as u64),
            ("repeat_times", self.repeat_times as u64),
            ("request_timeout_secs", self.request_timeout_secs),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(IntakeError::Config(format!("{name} must be greater than 0")));
            }
        }
        if !BUILTIN_PROCESSORS.contains(&self.processor.as_str()) {
            return Err(IntakeError::Config(format!(
                "unknown processor '{}', expected one of: {}",
                self.processor,
                BUILTIN_PROCESSORS.join(", ")
            )));
        }
        Ok(())
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.data_dir.join("jobs")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.data_dir.join("artifacts")
    }

    pub fn storage_retry(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.storage_max_retries,
            base_delay_ms: self.storage_base_delay_ms,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| IntakeError::Config(format!("{key} has an invalid value: {value}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn default_config_values() {
        let config = IntakeConfig::default();
        assert_eq!(config.port, 5000);
        assert_eq!(config.workers, 4);
        assert_eq!(config.deadline_secs, 300);
        assert_eq!(config.max_requeues, 2);
        assert_eq!(config.processor, "identity");
        assert!(config.max_retained_jobs.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            port = 8080
            workers = 8
            processor = "repeat"
            max_retained_jobs = 100
        "#;
        let config: IntakeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.workers, 8);
        assert_eq!(config.processor, "repeat");
        assert_eq!(config.max_retained_jobs, Some(100));
        assert_eq!(config.deadline_secs, 300);
        assert_eq!(config.data_dir, PathBuf::from("data"));
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            ("INTAKE_PORT", "9000"),
            ("INTAKE_WORKERS", "2"),
            ("INTAKE_DATA_DIR", "/srv/intake"),
            ("INTAKE_PROCESSOR", "  "),
        ]
        .into_iter()
        .collect();

        let mut config = IntakeConfig::default();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.workers, 2);
        assert_eq!(config.jobs_dir(), PathBuf::from("/srv/intake/jobs"));
        assert_eq!(config.processor, "identity");
    }

    #[test]
    fn invalid_env_value_is_a_config_error() {
        let mut config = IntakeConfig::default();
        let err = config
            .apply_env(|key| (key == "INTAKE_PORT").then(|| "not-a-port".to_string()))
            .unwrap_err();
        assert!(matches!(err, IntakeError::Config(_)));
    }

    #[test]
    fn validate_rejects_zero_workers_and_unknown_processor() {
        let config = IntakeConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(IntakeError::Config(_))));

        let config = IntakeConfig {
            processor: "xlsx".into(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(IntakeError::Config(_))));
    }

    #[test]
    fn load_reads_file_and_falls_back_to_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = IntakeConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(missing.deadline_secs, 300);

        let path = dir.path().join("intake.toml");
        std::fs::write(&path, "deadline_secs = 5\nmax_requeues = 0\n").unwrap();
        let config = IntakeConfig::load(Some(&path)).unwrap();
        assert_eq!(config.deadline_secs, 5);
        assert_eq!(config.max_requeues, 0);
    }
}
