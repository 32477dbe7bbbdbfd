//! Durable event traces and session snapshots for replay and audit.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::artifacts::write_atomic;
use crate::config::{StorageKind, TraceConfig};
use crate::metrics::record_trace_write;
use crate::security::{SecretValue, require_env};
use crate::session::{Event, Session, snapshot_due};
use crate::sources::{SOURCES_KEY, URL_TO_SHORT_ID_KEY};
use crate::DeepSearchError;

pub const DEFAULT_EVENT_TYPE: &str = "agent_event";
const EVENT_EXTENSION: &str = "json";
const SNAPSHOT_EXTENSION: &str = "snapshot";

/// Persisted copy of one session event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTrace {
    pub trace_id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub agent_name: String,
    pub event_type: String,
    #[serde(default)]
    pub content: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub grounding_metadata: Option<Value>,
    #[serde(default)]
    pub actions: Option<Value>,
}

impl EventTrace {
    pub fn from_event(
        event: &Event,
        session_id: &str,
        event_type: &str,
        metadata: Map<String, Value>,
    ) -> Self {
        let mut content = Map::new();
        content.insert(
            "text".to_string(),
            Value::String(event.content.clone().unwrap_or_default()),
        );
        if let Some(error) = &event.error {
            content.insert("error".to_string(), Value::String(error.clone()));
        }
        content.insert("event_id".to_string(), Value::String(event.id.clone()));

        Self {
            trace_id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            timestamp: Utc::now(),
            agent_name: event.author.clone(),
            event_type: event_type.to_string(),
            content,
            metadata,
            grounding_metadata: event
                .grounding
                .as_ref()
                .and_then(|grounding| serde_json::to_value(grounding).ok()),
            actions: serde_json::to_value(event.actions).ok(),
        }
    }
}

/// Persisted copy of the full session state at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub snapshot_id: String,
    pub timestamp: DateTime<Utc>,
    pub state: Map<String, Value>,
    #[serde(default)]
    pub sources: Map<String, Value>,
    #[serde(default)]
    pub url_to_short_id: BTreeMap<String, String>,
}

impl SessionSnapshot {
    pub fn new(
        session_id: &str,
        state: Map<String, Value>,
        sources: Map<String, Value>,
        url_to_short_id: BTreeMap<String, String>,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            snapshot_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            state,
            sources,
            url_to_short_id,
        }
    }
}

/// Summary row returned by [`TraceRecorder::list_traces`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceListing {
    pub trace_id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub agent_name: String,
    pub event_type: String,
    pub location: String,
}

/// An object held by a trace store.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub name: String,
    pub location: String,
}

/// Backend holding trace objects named `{timestamp}_{id}.{ext}`.
#[async_trait]
pub trait TraceStore: Send + Sync {
    fn kind(&self) -> StorageKind;

    /// Store `body` under `name`; returns a human-readable location.
    async fn put(&self, name: &str, body: Vec<u8>) -> Result<String, DeepSearchError>;

    async fn list(&self) -> Result<Vec<StoredObject>, DeepSearchError>;

    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>, DeepSearchError>;

    /// Delete event traces older than `max_age`. Stores without retention support report 0.
    async fn cleanup(&self, max_age: Duration) -> Result<usize, DeepSearchError> {
        let _ = max_age;
        warn!(backend = ?self.kind(), "trace cleanup only supported for local storage");
        Ok(0)
    }
}

/// Trace store rooted at a local directory.
pub struct LocalTraceStore {
    root: PathBuf,
}

impl LocalTraceStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, DeepSearchError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|err| DeepSearchError::trace_io(root.display().to_string(), err))?;
        info!(path = %root.display(), "using local trace storage");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl TraceStore for LocalTraceStore {
    fn kind(&self) -> StorageKind {
        StorageKind::Local
    }

    async fn put(&self, name: &str, body: Vec<u8>) -> Result<String, DeepSearchError> {
        let path = self.root.join(name);
        let location = path.display().to_string();
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&target, &body))
            .await
            .map_err(|err| DeepSearchError::Other(err.into()))?
            .map_err(|err| DeepSearchError::trace_io(location.clone(), err))?;
        Ok(location)
    }

    async fn list(&self) -> Result<Vec<StoredObject>, DeepSearchError> {
        let mut objects = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|err| DeepSearchError::trace_io(self.root.display().to_string(), err))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| DeepSearchError::trace_io(self.root.display().to_string(), err))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            objects.push(StoredObject {
                location: entry.path().display().to_string(),
                name,
            });
        }
        Ok(objects)
    }

    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>, DeepSearchError> {
        let path = self.root.join(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(DeepSearchError::trace_io(path.display().to_string(), err)),
        }
    }

    async fn cleanup(&self, max_age: Duration) -> Result<usize, DeepSearchError> {
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut deleted = 0;
        for object in self.list().await? {
            if !object.name.ends_with(&format!(".{EVENT_EXTENSION}")) {
                continue;
            }
            let path = self.root.join(&object.name);
            let expired = fs::metadata(&path)
                .and_then(|meta| meta.modified())
                .map(|modified| modified <= cutoff)
                .unwrap_or(false);
            if !expired {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => deleted += 1,
                Err(err) => warn!(path = %path.display(), error = %err, "failed to delete old trace file"),
            }
        }
        info!(deleted, "cleaned up old trace files");
        Ok(deleted)
    }
}

const GCS_ENDPOINT: &str = "https://storage.googleapis.com";

/// Trace store backed by a Google Cloud Storage bucket (JSON API).
///
/// Object names handed to and returned from the store are relative to the prefix.
pub struct GcsTraceStore {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    prefix: String,
    token: SecretValue,
}

#[derive(Deserialize)]
struct GcsListPage {
    #[serde(default)]
    items: Vec<GcsObject>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct GcsObject {
    name: String,
}

impl GcsTraceStore {
    pub fn new(
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        token: SecretValue,
    ) -> Result<Self, DeepSearchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| DeepSearchError::ObjectStore(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: GCS_ENDPOINT.to_string(),
            bucket: bucket.into(),
            prefix: prefix.into().trim_matches('/').to_string(),
            token,
        })
    }

    /// Point the store at another GCS-compatible endpoint (emulators, tests).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    fn object_name(&self, name: &str) -> String {
        format!("{}{name}", self.list_prefix())
    }

    /// Prefix used for listing; ends with `/` so sibling prefixes never match.
    fn list_prefix(&self) -> String {
        if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        }
    }

    fn relative_name<'a>(&self, object: &'a str) -> Option<&'a str> {
        object
            .strip_prefix(self.list_prefix().as_str())
            .filter(|name| !name.is_empty())
    }

    fn location(&self, object: &str) -> String {
        format!("gs://{}/{object}", self.bucket)
    }
}

fn object_store_error(context: &str, err: impl std::fmt::Display) -> DeepSearchError {
    DeepSearchError::ObjectStore(format!("{context}: {err}"))
}

#[async_trait]
impl TraceStore for GcsTraceStore {
    fn kind(&self) -> StorageKind {
        StorageKind::Gcs
    }

    async fn put(&self, name: &str, body: Vec<u8>) -> Result<String, DeepSearchError> {
        let object = self.object_name(name);
        let response = self
            .client
            .post(format!("{}/upload/storage/v1/b/{}/o", self.endpoint, self.bucket))
            .query(&[("uploadType", "media"), ("name", object.as_str())])
            .bearer_auth(self.token.expose())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|err| object_store_error("upload failed", err))?;
        if !response.status().is_success() {
            return Err(object_store_error(
                "upload rejected",
                format!("{} for {}", response.status(), self.location(&object)),
            ));
        }
        Ok(self.location(&object))
    }

    async fn list(&self) -> Result<Vec<StoredObject>, DeepSearchError> {
        let prefix = self.list_prefix();
        let mut objects = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self
                .client
                .get(format!("{}/storage/v1/b/{}/o", self.endpoint, self.bucket))
                .query(&[("prefix", prefix.as_str())])
                .bearer_auth(self.token.expose());
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }
            let response = request
                .send()
                .await
                .map_err(|err| object_store_error("list failed", err))?;
            if !response.status().is_success() {
                return Err(object_store_error("list rejected", response.status()));
            }
            let page: GcsListPage = response
                .json()
                .await
                .map_err(|err| object_store_error("malformed list response", err))?;
            for item in page.items {
                let Some(name) = self.relative_name(&item.name) else {
                    continue;
                };
                objects.push(StoredObject {
                    name: name.to_string(),
                    location: self.location(&item.name),
                });
            }
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(objects)
    }

    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>, DeepSearchError> {
        let object = self.object_name(name);
        let response = self
            .client
            .get(format!(
                "{}/storage/v1/b/{}/o/{}",
                self.endpoint,
                self.bucket,
                encode_object_name(&object)
            ))
            .query(&[("alt", "media")])
            .bearer_auth(self.token.expose())
            .send()
            .await
            .map_err(|err| object_store_error("download failed", err))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(object_store_error("download rejected", response.status()));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| object_store_error("download interrupted", err))?;
        Ok(Some(bytes.to_vec()))
    }
}

/// Percent-encode an object name for use as a single URL path segment.
fn encode_object_name(name: &str) -> String {
    let mut encoded = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            other => encoded.push_str(&format!("%{other:02X}")),
        }
    }
    encoded
}

/// Build the configured trace store.
pub fn build_trace_store(config: &TraceConfig) -> Result<Arc<dyn TraceStore>, DeepSearchError> {
    match config.storage {
        StorageKind::Local => Ok(Arc::new(LocalTraceStore::new(&config.local_path)?)),
        StorageKind::Gcs => {
            let bucket = config
                .gcs_bucket
                .clone()
                .filter(|bucket| !bucket.trim().is_empty())
                .ok_or_else(|| {
                    DeepSearchError::InvalidConfiguration(
                        "GCS bucket name is required for GCS storage".into(),
                    )
                })?;
            let token = require_env(&config.gcs_token_env)?;
            Ok(Arc::new(GcsTraceStore::new(
                bucket,
                config.gcs_prefix.clone(),
                token,
            )?))
        }
    }
}

fn object_file_name(timestamp: &DateTime<Utc>, id: &str, extension: &str) -> String {
    format!("{}_{id}.{extension}", timestamp.format("%Y%m%d_%H%M%S"))
}

/// Records every session event and periodic state snapshots to a [`TraceStore`].
#[derive(Clone)]
pub struct TraceRecorder {
    store: Arc<dyn TraceStore>,
}

impl TraceRecorder {
    pub fn new(store: Arc<dyn TraceStore>) -> Self {
        Self { store }
    }

    pub fn from_config(config: &TraceConfig) -> Result<Self, DeepSearchError> {
        Ok(Self::new(build_trace_store(config)?))
    }

    pub fn store(&self) -> &Arc<dyn TraceStore> {
        &self.store
    }

    /// Persist one event; returns the generated trace id. Storage failures propagate.
    pub async fn record_event(
        &self,
        event: &Event,
        session_id: &str,
        event_type: &str,
        metadata: Map<String, Value>,
    ) -> Result<String, DeepSearchError> {
        let trace = EventTrace::from_event(event, session_id, event_type, metadata);
        self.save_event_trace(&trace).await
    }

    pub async fn save_event_trace(&self, trace: &EventTrace) -> Result<String, DeepSearchError> {
        let body = serde_json::to_vec_pretty(trace)?;
        let name = object_file_name(&trace.timestamp, &trace.trace_id, EVENT_EXTENSION);
        let location = self.store.put(&name, body).await.inspect_err(|err| {
            error!(trace_id = %trace.trace_id, error = %err, "failed to save event trace");
        })?;
        record_trace_write("event");
        info!(trace_id = %trace.trace_id, session_id = %trace.session_id, %location, "saved event trace");
        Ok(trace.trace_id.clone())
    }

    /// Persist a snapshot of the full session state; returns the snapshot id.
    pub async fn record_snapshot(
        &self,
        session_id: &str,
        state: Map<String, Value>,
        sources: Map<String, Value>,
        url_to_short_id: BTreeMap<String, String>,
    ) -> Result<String, DeepSearchError> {
        let snapshot = SessionSnapshot::new(session_id, state, sources, url_to_short_id);
        self.save_snapshot(&snapshot).await
    }

    pub async fn save_snapshot(&self, snapshot: &SessionSnapshot) -> Result<String, DeepSearchError> {
        let body = serde_json::to_vec_pretty(snapshot)?;
        let name = object_file_name(&snapshot.timestamp, &snapshot.snapshot_id, SNAPSHOT_EXTENSION);
        let location = self.store.put(&name, body).await.inspect_err(|err| {
            error!(snapshot_id = %snapshot.snapshot_id, error = %err, "failed to save session snapshot");
        })?;
        record_trace_write("snapshot");
        info!(snapshot_id = %snapshot.snapshot_id, session_id = %snapshot.session_id, %location, "saved session snapshot");
        Ok(snapshot.snapshot_id.clone())
    }

    /// Record the events appended since `first_new` and any snapshots they make due.
    ///
    /// Snapshots carry the state as it stands after the step that produced the events.
    pub async fn observe(&self, session: &Session, first_new: usize) -> Result<(), DeepSearchError> {
        let state_keys: Vec<Value> = session
            .state
            .keys()
            .into_iter()
            .map(Value::String)
            .collect();
        let event_count = session.events.len();

        for (offset, event) in session.events.since(first_new).iter().enumerate() {
            let index = first_new + offset;
            let mut metadata = Map::new();
            metadata.insert("session_state_keys".into(), Value::Array(state_keys.clone()));
            metadata.insert("event_count".into(), json!(event_count));
            metadata.insert("current_event_index".into(), json!(index));
            self.record_event(event, &session.id, DEFAULT_EVENT_TYPE, metadata)
                .await?;

            if snapshot_due(index + 1) {
                let sources = session
                    .state
                    .get(SOURCES_KEY)
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                let url_map = session
                    .state
                    .get_as(URL_TO_SHORT_ID_KEY)
                    .unwrap_or_default();
                self.record_snapshot(&session.id, session.state.to_map(), sources, url_map)
                    .await?;
            }
        }
        Ok(())
    }

    async fn find_object(&self, id: &str, extension: &str) -> Result<Option<String>, DeepSearchError> {
        let suffix = format!("_{id}.{extension}");
        Ok(self
            .store
            .list()
            .await?
            .into_iter()
            .map(|object| object.name)
            .find(|name| name.ends_with(&suffix)))
    }

    async fn load<T: serde::de::DeserializeOwned>(
        &self,
        id: &str,
        extension: &str,
    ) -> Result<Option<T>, DeepSearchError> {
        let Some(name) = self.find_object(id, extension).await? else {
            return Ok(None);
        };
        let Some(bytes) = self.store.get(&name).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Load an event trace by id; `None` when absent or unreadable.
    pub async fn load_event(&self, trace_id: &str) -> Option<EventTrace> {
        match self.load(trace_id, EVENT_EXTENSION).await {
            Ok(trace) => trace,
            Err(err) => {
                error!(%trace_id, error = %err, "failed to load event trace");
                None
            }
        }
    }

    /// Load a snapshot by id; `None` when absent or unreadable.
    pub async fn load_snapshot(&self, snapshot_id: &str) -> Option<SessionSnapshot> {
        match self.load(snapshot_id, SNAPSHOT_EXTENSION).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                error!(%snapshot_id, error = %err, "failed to load session snapshot");
                None
            }
        }
    }

    /// Newest-first listing of event traces, optionally filtered by session.
    pub async fn list_traces(&self, session_id: Option<&str>, limit: usize) -> Vec<TraceListing> {
        let mut objects = match self.store.list().await {
            Ok(objects) => objects,
            Err(err) => {
                error!(error = %err, "failed to list traces");
                return Vec::new();
            }
        };
        objects.retain(|object| object.name.ends_with(&format!(".{EVENT_EXTENSION}")));
        objects.sort_by(|a, b| b.name.cmp(&a.name));

        let mut listings = Vec::new();
        for object in objects {
            if listings.len() >= limit {
                break;
            }
            let trace = match self.store.get(&object.name).await {
                Ok(Some(bytes)) => serde_json::from_slice::<EventTrace>(&bytes),
                Ok(None) => continue,
                Err(err) => {
                    warn!(location = %object.location, error = %err, "failed to read trace");
                    continue;
                }
            };
            match trace {
                Ok(trace) => {
                    if session_id.is_some_and(|id| id != trace.session_id) {
                        continue;
                    }
                    listings.push(TraceListing {
                        trace_id: trace.trace_id,
                        session_id: trace.session_id,
                        timestamp: trace.timestamp,
                        agent_name: trace.agent_name,
                        event_type: trace.event_type,
                        location: object.location,
                    });
                }
                Err(err) => {
                    warn!(location = %object.location, error = %err, "skipping malformed trace");
                }
            }
        }
        debug!(count = listings.len(), "listed traces");
        listings
    }

    /// Delete local event traces older than `max_age_days`; other backends report 0.
    pub async fn cleanup(&self, max_age_days: u64) -> usize {
        let max_age = Duration::from_secs(max_age_days.saturating_mul(86_400));
        match self.store.cleanup(max_age).await {
            Ok(deleted) => deleted,
            Err(err) => {
                error!(error = %err, "failed to clean up old traces");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn object_names_follow_timestamp_id_convention() {
        let stamp = DateTime::parse_from_rfc3339("2024-03-09T23:59:59.999Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            object_file_name(&stamp, "abc", EVENT_EXTENSION),
            "20240309_235959_abc.json"
        );
        assert_eq!(
            object_file_name(&stamp, "abc", SNAPSHOT_EXTENSION),
            "20240309_235959_abc.snapshot"
        );
    }

    #[tokio::test]
    async fn saved_file_name_uses_the_record_timestamp() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("traces");
        let recorder = TraceRecorder::new(Arc::new(LocalTraceStore::new(&root).unwrap()));
        let mut trace =
            EventTrace::from_event(&Event::new("writer"), "s-1", DEFAULT_EVENT_TYPE, Map::new());
        trace.timestamp = DateTime::parse_from_rfc3339("2001-02-03T04:05:06Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut snapshot = SessionSnapshot::new("s-1", Map::new(), Map::new(), BTreeMap::new());
        snapshot.timestamp = trace.timestamp;

        recorder.save_event_trace(&trace).await.unwrap();
        recorder.save_snapshot(&snapshot).await.unwrap();

        assert!(root.join(format!("20010203_040506_{}.json", trace.trace_id)).is_file());
        assert!(
            root.join(format!("20010203_040506_{}.snapshot", snapshot.snapshot_id))
                .is_file()
        );
    }

    #[test]
    fn gcs_names_are_relative_to_a_slash_terminated_prefix() {
        let store = GcsTraceStore::new("bucket", "/traces/", SecretValue::new("t")).unwrap();
        assert_eq!(store.list_prefix(), "traces/");
        assert_eq!(store.object_name("a.json"), "traces/a.json");
        assert_eq!(store.relative_name("traces/nested/b.json"), Some("nested/b.json"));
        assert_eq!(store.relative_name("traces-old/c.json"), None);
        assert_eq!(store.relative_name("traces/"), None);

        let bare = GcsTraceStore::new("bucket", "", SecretValue::new("t")).unwrap();
        assert_eq!(bare.object_name("a.json"), "a.json");
        assert_eq!(bare.relative_name("x/a.json"), Some("x/a.json"));
    }

    #[test]
    fn object_names_are_percent_encoded() {
        assert_eq!(encode_object_name("traces/a b.json"), "traces%2Fa%20b.json");
    }

    #[tokio::test]
    async fn local_store_returns_none_for_missing_objects() {
        let temp = TempDir::new().unwrap();
        let store = LocalTraceStore::new(temp.path().join("traces")).unwrap();
        assert!(store.get("missing.json").await.unwrap().is_none());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[test]
    fn event_trace_carries_error_and_actions() {
        let event = Event::new("escalation_checker")
            .with_error("model timeout")
            .with_actions(crate::session::EventActions::escalate());
        let trace = EventTrace::from_event(&event, "s-1", DEFAULT_EVENT_TYPE, Map::new());
        assert_eq!(trace.content["error"], "model timeout");
        assert_eq!(trace.actions.unwrap()["escalate"], true);
        assert!(trace.grounding_metadata.is_none());
    }
}
