//! Seed new sessions from artifacts produced by earlier phases.

use std::fs;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Load every `*.json`, `*.csv`, `*.md` and `*.txt` file under `dir`, keyed by file stem.
///
/// CSV files become an array of row objects keyed by header. Malformed JSON or CSV and
/// unreadable files are skipped. A missing directory yields an empty map.
pub fn load_state_dir(dir: &Path) -> Map<String, Value> {
    let mut state = Map::new();
    if !dir.is_dir() {
        warn!(path = %dir.display(), "state directory not found; starting with empty state");
        return state;
    }

    for entry in WalkDir::new(dir)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
    {
        let path = entry.path();
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        let raw = match extension.as_deref() {
            Some("json") | Some("csv") | Some("md") | Some("txt") => match fs::read_to_string(path) {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to read state file");
                    continue;
                }
            },
            _ => continue,
        };

        let value = match extension.as_deref() {
            Some("json") => match serde_json::from_str::<Value>(&raw) {
                Ok(value) => value,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping malformed JSON state file");
                    continue;
                }
            },
            Some("csv") => match parse_csv_rows(&raw) {
                Ok(rows) => rows,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping malformed CSV state file");
                    continue;
                }
            },
            _ => Value::String(raw),
        };
        debug!(key = stem, path = %path.display(), "preloaded state entry");
        state.insert(stem.to_string(), value);
    }

    info!(path = %dir.display(), keys = state.len(), "preloaded session state");
    state
}

fn parse_csv_rows(raw: &str) -> Result<Value, csv::Error> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(raw.as_bytes());
    let headers = reader.headers()?.clone();
    let mut record = StringRecord::new();
    let mut rows = Vec::new();
    while reader.read_record(&mut record)? {
        let row: Map<String, Value> = headers
            .iter()
            .zip(record.iter())
            .map(|(header, field)| (header.to_string(), Value::String(field.to_string())))
            .collect();
        rows.push(Value::Object(row));
    }
    Ok(Value::Array(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn loads_supported_files_recursively() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("risk_triage_output.json"), r#"{"risks": []}"#).unwrap();
        fs::create_dir(temp.path().join("nested")).unwrap();
        fs::write(temp.path().join("nested/commercial_summary.md"), "# Summary").unwrap();
        fs::write(temp.path().join("notes.txt"), "remember").unwrap();
        fs::write(temp.path().join("broken.json"), "{not json").unwrap();
        fs::write(
            temp.path().join("pricing_analogs.csv"),
            "drug,price\nAlpha,1200\n\"Beta, XR\",950\n",
        )
        .unwrap();
        fs::write(temp.path().join("ragged.csv"), "a,b\n1,2,3\n").unwrap();
        fs::write(temp.path().join("image.png"), [0u8, 1, 2]).unwrap();

        let state = load_state_dir(temp.path());

        assert_eq!(state["risk_triage_output"], json!({"risks": []}));
        assert_eq!(state["commercial_summary"], "# Summary");
        assert_eq!(state["notes"], "remember");
        assert!(!state.contains_key("broken"));
        assert_eq!(
            state["pricing_analogs"],
            json!([
                {"drug": "Alpha", "price": "1200"},
                {"drug": "Beta, XR", "price": "950"},
            ])
        );
        assert!(!state.contains_key("ragged"));
        assert!(!state.contains_key("image"));
    }

    #[test]
    fn missing_directory_is_empty() {
        let temp = TempDir::new().unwrap();
        assert!(load_state_dir(&temp.path().join("absent")).is_empty());
    }
}
