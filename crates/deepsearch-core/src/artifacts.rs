//! Best-effort export of session state entries to files for downstream tooling.

use std::fs::{self, create_dir_all};
use std::io;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::session::SessionState;

/// How an exported state value is rendered on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    Json,
    Text,
}

/// A state key mirrored to a file after the owning step completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactExport {
    pub state_key: String,
    pub filename: String,
    pub format: ArtifactFormat,
}

impl ArtifactExport {
    pub fn json(state_key: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            state_key: state_key.into(),
            filename: filename.into(),
            format: ArtifactFormat::Json,
        }
    }

    pub fn text(state_key: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            state_key: state_key.into(),
            filename: filename.into(),
            format: ArtifactFormat::Text,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    root: PathBuf,
}

impl ArtifactWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn export(&self, state: &SessionState, export: &ArtifactExport) -> Option<PathBuf> {
        match export.format {
            ArtifactFormat::Json => self.write_json(state, &export.state_key, &export.filename),
            ArtifactFormat::Text => self.write_text(state, &export.state_key, &export.filename),
        }
    }

    /// Write a state value as pretty JSON. Missing keys are a no-op; failures are logged.
    pub fn write_json(&self, state: &SessionState, state_key: &str, filename: &str) -> Option<PathBuf> {
        let Some(value) = state.get(state_key) else {
            debug!(state_key, filename, "no state value; skipping artifact");
            return None;
        };
        let rendered = match serde_json::to_string_pretty(value) {
            Ok(rendered) => rendered,
            Err(err) => {
                warn!(state_key, filename, error = %err, "failed to serialize artifact");
                return None;
            }
        };
        self.persist(state_key, filename, rendered.as_bytes())
    }

    /// Write a state value as text, preferring a `markdown` sub-field when present.
    pub fn write_text(&self, state: &SessionState, state_key: &str, filename: &str) -> Option<PathBuf> {
        let Some(value) = state.get(state_key) else {
            debug!(state_key, filename, "no text state; skipping artifact");
            return None;
        };
        let text = match value {
            Value::String(text) => text.clone(),
            Value::Object(map) => match map.get("markdown") {
                Some(Value::String(markdown)) => markdown.clone(),
                Some(other) => other.to_string(),
                None => value.to_string(),
            },
            other => other.to_string(),
        };
        self.persist(state_key, filename, text.as_bytes())
    }

    fn persist(&self, state_key: &str, filename: &str, bytes: &[u8]) -> Option<PathBuf> {
        let path = self.root.join(filename);
        match write_atomic(&path, bytes) {
            Ok(()) => {
                info!(state_key, path = %path.display(), "wrote artifact");
                Some(path)
            }
            Err(err) => {
                warn!(state_key, path = %path.display(), error = %err, "failed to write artifact");
                None
            }
        }
    }
}

/// Write via a sibling temp file and rename so readers never observe partial content.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));
    if let Err(err) = fs::write(&tmp, bytes) {
        fs::remove_file(&tmp).ok();
        return Err(err);
    }
    fs::rename(&tmp, path).inspect_err(|_| {
        fs::remove_file(&tmp).ok();
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn missing_key_writes_nothing() {
        let temp = TempDir::new().expect("temp dir");
        let writer = ArtifactWriter::new(temp.path().join("artifacts"));
        let state = SessionState::new();

        assert!(writer.write_json(&state, "risk_triage", "risk_triage_output.json").is_none());
        assert!(writer.write_text(&state, "commercial_summary", "commercial_summary.md").is_none());
        assert!(!temp.path().join("artifacts").exists());
    }

    #[test]
    fn json_artifacts_are_pretty_printed_in_nested_dirs() {
        let temp = TempDir::new().expect("temp dir");
        let writer = ArtifactWriter::new(temp.path());
        let mut state = SessionState::new();
        state.set("risk_triage", json!({"risks": [{"name": "FTO", "score": 3}]}));

        let path = writer
            .write_json(&state, "risk_triage", "nested/risk_triage_output.json")
            .expect("artifact written");
        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["risks"][0]["name"], "FTO");
        assert!(fs::read_to_string(&path).unwrap().contains('\n'));
    }

    #[test]
    fn text_artifacts_prefer_markdown_field() {
        let temp = TempDir::new().expect("temp dir");
        let writer = ArtifactWriter::new(temp.path());
        let mut state = SessionState::new();
        state.set("commercial_summary", json!({"markdown": "# Commercial Readiness"}));
        state.set("reg_snapshot", "plain text");
        state.set("scores", json!([1, 2]));

        let md = writer
            .write_text(&state, "commercial_summary", "commercial_summary.md")
            .unwrap();
        assert_eq!(fs::read_to_string(md).unwrap(), "# Commercial Readiness");
        let plain = writer
            .write_text(&state, "reg_snapshot", "regulatory_snapshot.md")
            .unwrap();
        assert_eq!(fs::read_to_string(plain).unwrap(), "plain text");
        let scores = writer.write_text(&state, "scores", "scores.txt").unwrap();
        assert_eq!(fs::read_to_string(scores).unwrap(), "[1,2]");
    }

    #[test]
    fn write_failures_are_swallowed() {
        let temp = TempDir::new().expect("temp dir");
        let blocker = temp.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();
        let writer = ArtifactWriter::new(&blocker);
        let mut state = SessionState::new();
        state.set("risk_gaps", json!({"gaps": []}));

        assert!(writer.write_json(&state, "risk_gaps", "risk_gaps.json").is_none());
    }
}
