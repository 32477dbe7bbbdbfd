use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::DeepSearchError;

const DEFAULT_CONFIG_PATH: &str = "config.toml";
const CONFIG_PATH_ENV: &str = "DEEPSEARCH_CONFIG";

/// Top-level configuration structure.
///
/// Every section has defaults so an absent `config.toml` yields a runnable offline setup.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub models: ModelConfig,
    pub research: ResearchConfig,
    pub traces: TraceConfig,
    pub artifacts: ArtifactConfig,
}

/// Helper to load configuration with best-practice guard rails.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a provided path or discoverable defaults.
    ///
    /// Resolution order:
    /// 1. Explicit `path` argument.
    /// 2. `DEEPSEARCH_CONFIG` environment variable.
    /// 3. `config.toml` in the current working directory (optional).
    ///
    /// Environment overrides are applied afterwards; nothing below the loader reads
    /// the process environment for configuration.
    pub fn load(path: Option<PathBuf>) -> Result<Config, DeepSearchError> {
        let (candidate, required) = resolve_path(path);
        let mut config = if candidate.exists() || required {
            let raw = fs::read_to_string(&candidate)
                .map_err(|err| DeepSearchError::config_io(candidate.clone(), err))?;
            Self::parse(&raw)?
        } else {
            Config::default()
        };

        apply_env_overrides(&mut config, |key| env::var(key).ok());
        Self::validate(&config)?;
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Config, DeepSearchError> {
        toml::from_str(raw).map_err(|err| DeepSearchError::InvalidConfiguration(err.to_string()))
    }

    pub fn validate(config: &Config) -> Result<(), DeepSearchError> {
        if config.research.max_search_iterations == 0 {
            return Err(DeepSearchError::InvalidConfiguration(
                "research.max_search_iterations must be at least 1".into(),
            ));
        }

        if config.traces.storage == StorageKind::Gcs
            && config
                .traces
                .gcs_bucket
                .as_deref()
                .map(str::trim)
                .unwrap_or_default()
                .is_empty()
        {
            return Err(DeepSearchError::InvalidConfiguration(
                "traces.gcs_bucket is required when traces.storage = \"gcs\"".into(),
            ));
        }

        if config.models.provider == ModelProvider::OpenAi && config.models.api_key_env.trim().is_empty()
        {
            return Err(DeepSearchError::InvalidConfiguration(
                "models.api_key_env must reference an environment variable".into(),
            ));
        }
        Ok(())
    }
}

fn resolve_path(path: Option<PathBuf>) -> (PathBuf, bool) {
    if let Some(path) = path {
        return (path, true);
    }

    if let Ok(from_env) = env::var(CONFIG_PATH_ENV) {
        if !from_env.trim().is_empty() {
            return (PathBuf::from(from_env), true);
        }
    }

    (Path::new(DEFAULT_CONFIG_PATH).to_path_buf(), false)
}

/// Apply the deployment environment variables on top of a parsed configuration.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| {
        lookup(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    if let Some(storage) = get("TRACE_STORAGE_TYPE") {
        match storage.to_ascii_lowercase().as_str() {
            "gcs" => config.traces.storage = StorageKind::Gcs,
            "local" => config.traces.storage = StorageKind::Local,
            other => tracing::warn!(value = other, "ignoring unknown TRACE_STORAGE_TYPE"),
        }
    }
    if let Some(path) = get("TRACE_LOCAL_PATH") {
        config.traces.local_path = PathBuf::from(path);
    }
    if let Some(bucket) = get("TRACE_GCS_BUCKET_NAME") {
        config.traces.gcs_bucket = Some(bucket);
    }
    if let Some(prefix) = get("TRACE_GCS_PREFIX") {
        config.traces.gcs_prefix = prefix;
    }
    if let Some(iterations) = get("MAX_SEARCH_ITERATIONS") {
        match iterations.parse::<u32>() {
            Ok(value) => config.research.max_search_iterations = value,
            Err(_) => tracing::warn!(value = %iterations, "ignoring invalid MAX_SEARCH_ITERATIONS"),
        }
    }
    if let Some(dir) = get("ADK_STATE_DIR") {
        config.research.state_dir = Some(PathBuf::from(dir));
    }
    if let Some(root) = get("ARTIFACT_ROOT") {
        config.artifacts.root = PathBuf::from(root);
    }
    if let Some(provider) = get("DEEPSEARCH_MODEL_PROVIDER") {
        match provider.to_ascii_lowercase().as_str() {
            "openai" => config.models.provider = ModelProvider::OpenAi,
            "offline" => config.models.provider = ModelProvider::Offline,
            other => tracing::warn!(value = other, "ignoring unknown DEEPSEARCH_MODEL_PROVIDER"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    #[default]
    Offline,
    #[serde(rename = "openai")]
    OpenAi,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub provider: ModelProvider,
    pub worker_model: String,
    pub critic_model: String,
    pub base_url: String,
    pub api_key_env: String,
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: ModelProvider::Offline,
            worker_model: "gemini-2.5-flash".to_string(),
            critic_model: "gemini-2.5-pro".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    pub max_search_iterations: u32,
    pub state_dir: Option<PathBuf>,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            max_search_iterations: 5,
            state_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Local,
    Gcs,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    pub enabled: bool,
    pub storage: StorageKind,
    pub local_path: PathBuf,
    pub gcs_bucket: Option<String>,
    pub gcs_prefix: String,
    pub gcs_token_env: String,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            storage: StorageKind::Local,
            local_path: PathBuf::from("agent_traces"),
            gcs_bucket: None,
            gcs_prefix: "traces".to_string(),
            gcs_token_env: "GCS_ACCESS_TOKEN".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub root: PathBuf,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("05_artifacts"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_yields_defaults() {
        let config = ConfigLoader::parse("").expect("empty config parses");
        assert_eq!(config.research.max_search_iterations, 5);
        assert_eq!(config.traces.storage, StorageKind::Local);
        assert_eq!(config.traces.local_path, PathBuf::from("agent_traces"));
        assert_eq!(config.artifacts.root, PathBuf::from("05_artifacts"));
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn gcs_without_bucket_is_rejected() {
        let config = ConfigLoader::parse("[traces]\nstorage = \"gcs\"\n").unwrap();
        let err = ConfigLoader::validate(&config).unwrap_err();
        assert!(matches!(err, DeepSearchError::InvalidConfiguration(_)));
    }

    #[test]
    fn env_overrides_take_precedence() {
        let mut config = ConfigLoader::parse("[research]\nmax_search_iterations = 2\n").unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            ("TRACE_STORAGE_TYPE", "gcs"),
            ("TRACE_GCS_BUCKET_NAME", "trace-bucket"),
            ("MAX_SEARCH_ITERATIONS", "7"),
            ("ADK_STATE_DIR", "projects/demo/05_artifacts"),
        ]);
        apply_env_overrides(&mut config, |key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.traces.storage, StorageKind::Gcs);
        assert_eq!(config.traces.gcs_bucket.as_deref(), Some("trace-bucket"));
        assert_eq!(config.research.max_search_iterations, 7);
        assert_eq!(
            config.research.state_dir,
            Some(PathBuf::from("projects/demo/05_artifacts"))
        );
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn zero_iterations_is_invalid() {
        let config = ConfigLoader::parse("[research]\nmax_search_iterations = 0\n").unwrap();
        assert!(ConfigLoader::validate(&config).is_err());
    }
}
