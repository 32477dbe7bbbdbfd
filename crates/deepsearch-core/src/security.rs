//! Secret handling: credentials come from the environment and never reach logs.

use std::env;
use std::fmt;

use crate::DeepSearchError;

/// A credential read from the environment. Debug and Display both print a redaction marker.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

const REDACTED: &str = "***redacted***";

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw value, for building auth headers only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl fmt::Display for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

/// Read a non-blank environment variable (model API key, GCS token), trimmed.
pub fn require_env(var: &str) -> Result<SecretValue, DeepSearchError> {
    secret_from(var, env::var(var).ok())
}

fn secret_from(var: &str, raw: Option<String>) -> Result<SecretValue, DeepSearchError> {
    match raw.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => Ok(SecretValue::new(value)),
        _ => Err(DeepSearchError::MissingSecret(var.to_string())),
    }
}
