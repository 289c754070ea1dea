//! Pluggable processing step: bytes in, bytes out or a failure.
//!
//! The engine knows nothing about file formats. Anything implementing
//! [`Processor`] can be plugged in; the built-ins exist so the service does
//! something useful out of the box and are selected by name in config.

use std::sync::Arc;

use thiserror::Error;

/// Failure reported by a processor. Recorded on the job, never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ProcessingError(pub String);

impl ProcessingError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// A processing function. Runs on a blocking thread, so it may do CPU-bound
/// or synchronous I/O work and take as long as it needs.
pub trait Processor: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn process(&self, input: &[u8]) -> Result<Vec<u8>, ProcessingError>;
}

/// Returns the input unchanged.
pub struct Identity;

impl Processor for Identity {
    fn name(&self) -> &str {
        "identity"
    }

    fn process(&self, input: &[u8]) -> Result<Vec<u8>, ProcessingError> {
        Ok(input.to_vec())
    }
}

/// Concatenates the input with itself `times` times.
pub struct Repeat {
    pub times: usize,
}

impl Processor for Repeat {
    fn name(&self) -> &str {
        "repeat"
    }

    fn process(&self, input: &[u8]) -> Result<Vec<u8>, ProcessingError> {
        if self.times == 0 {
            return Err(ProcessingError::new("repeat count must be at least 1"));
        }
        Ok(input.repeat(self.times))
    }
}

/// Names accepted by [`from_name`].
pub const BUILTIN_PROCESSORS: &[&str] = &["identity", "repeat"];

/// Build a built-in processor by name.
pub fn from_name(name: &str, repeat_times: usize) -> Option<Arc<dyn Processor>> {
    match name {
        "identity" => Some(Arc::new(Identity)),
        "repeat" => Some(Arc::new(Repeat {
            times: repeat_times,
        })),
        _ => None,
    }
}
