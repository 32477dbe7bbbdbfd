use std::{fmt, path::PathBuf};

use thiserror::Error;

/// Core error type for DeepSearch.
#[derive(Debug, Error)]
pub enum DeepSearchError {
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("missing environment variable: {0}")]
    MissingSecret(String),
    #[error("I/O error while reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("trace storage I/O error at {location}: {source}")]
    TraceIo {
        location: String,
        #[source]
        source: std::io::Error,
    },
    #[error("object store error: {0}")]
    ObjectStore(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DeepSearchError {
    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }

    pub fn trace_io(location: impl Into<String>, source: std::io::Error) -> Self {
        Self::TraceIo {
            location: location.into(),
            source,
        }
    }
}

/// Error representing a failure inside a single pipeline step.
#[derive(Debug, Clone)]
pub struct StepError {
    pub reason: String,
    pub retryable: bool,
}

impl StepError {
    pub fn new(reason: impl Into<String>, retryable: bool) -> Self {
        Self {
            reason: reason.into(),
            retryable,
        }
    }

    pub fn transient(reason: impl Into<String>) -> Self {
        Self::new(reason, true)
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let retry = if self.retryable {
            "retryable"
        } else {
            "terminal"
        };
        write!(f, "{retry} step failure: {}", self.reason)
    }
}

impl std::error::Error for StepError {}
