//! Tracing subscriber setup shared by the CLI and the API server.

use std::str::FromStr;
use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt};

use crate::DeepSearchError;

static TELEMETRY_GUARD: OnceLock<()> = OnceLock::new();

const LOG_FORMAT_ENV: &str = "DEEPSEARCH_LOG_FORMAT";

/// Line format of the log output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Full,
    Compact,
    /// One JSON object per line, for log shippers.
    Json,
}

impl FromStr for LogFormat {
    type Err = DeepSearchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "full" | "pretty" | "" => Ok(LogFormat::Full),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(DeepSearchError::InvalidConfiguration(format!(
                "unknown log format {other:?} (expected full, compact or json)"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryOptions {
    /// Filter directives; falls back to `RUST_LOG`, then `info`.
    pub env_filter: Option<String>,
    pub with_ansi: bool,
    pub with_target: bool,
    /// Falls back to `DEEPSEARCH_LOG_FORMAT`, then [`LogFormat::Full`].
    pub format: Option<LogFormat>,
}

impl Default for TelemetryOptions {
    fn default() -> Self {
        Self {
            env_filter: None,
            with_ansi: true,
            with_target: false,
            format: None,
        }
    }
}

/// Install the global subscriber, writing to stderr so stdout stays free for command output.
///
/// Only the first call installs anything.
pub fn init_telemetry(options: TelemetryOptions) -> Result<(), DeepSearchError> {
    if TELEMETRY_GUARD.get().is_some() {
        return Ok(());
    }

    let filter = EnvFilter::new(
        options
            .env_filter
            .or_else(|| std::env::var("RUST_LOG").ok())
            .unwrap_or_else(|| "info".to_string()),
    );
    let format = match options.format {
        Some(format) => format,
        None => std::env::var(LOG_FORMAT_ENV)
            .ok()
            .map(|raw| raw.parse::<LogFormat>())
            .transpose()?
            .unwrap_or_default(),
    };

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(options.with_target);
    let installed = match format {
        LogFormat::Full => builder.with_ansi(options.with_ansi).try_init(),
        LogFormat::Compact => builder.compact().with_ansi(options.with_ansi).try_init(),
        LogFormat::Json => builder.json().with_ansi(false).try_init(),
    };
    installed.map_err(|err| {
        DeepSearchError::InvalidConfiguration(format!("telemetry init failed: {err}"))
    })?;

    TELEMETRY_GUARD.get_or_init(|| ());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_formats_parse_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(" compact ".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Full);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn repeated_initialisation_is_a_no_op() {
        let options = TelemetryOptions {
            format: Some(LogFormat::Compact),
            with_ansi: false,
            ..TelemetryOptions::default()
        };
        init_telemetry(options.clone()).unwrap();
        init_telemetry(options).unwrap();
    }
}
