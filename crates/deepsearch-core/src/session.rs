//! Session state, the append-only event log, and the in-memory session service.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

/// State key holding the latest user message for a session.
pub const USER_INPUT_KEY: &str = "user_input";

/// A cited web source attached to a model response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSource {
    pub uri: String,
    pub title: Option<String>,
    pub domain: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundingChunk {
    pub web: Option<WebSource>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundingSupport {
    #[serde(default)]
    pub segment_text: Option<String>,
    #[serde(default)]
    pub chunk_indices: Vec<usize>,
    #[serde(default)]
    pub confidence_scores: Vec<f64>,
}

/// Citation metadata produced by search-grounded model calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroundingMetadata {
    #[serde(default)]
    pub chunks: Vec<GroundingChunk>,
    #[serde(default)]
    pub supports: Vec<GroundingSupport>,
}

impl GroundingMetadata {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty() && self.supports.is_empty()
    }

    /// Append another response's grounding, re-basing its chunk indices.
    pub fn merge(&mut self, other: GroundingMetadata) {
        let offset = self.chunks.len();
        self.chunks.extend(other.chunks);
        self.supports
            .extend(other.supports.into_iter().map(|mut support| {
                for index in support.chunk_indices.iter_mut() {
                    *index += offset;
                }
                support
            }));
    }
}

/// Control signals attached to an event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventActions {
    pub escalate: bool,
    pub transfer_to_parent: bool,
    pub transfer_to_peers: bool,
}

impl EventActions {
    pub fn escalate() -> Self {
        Self {
            escalate: true,
            ..Self::default()
        }
    }
}

/// Immutable record of one step's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub content: Option<String>,
    pub error: Option<String>,
    pub grounding: Option<GroundingMetadata>,
    pub actions: EventActions,
}

impl Event {
    pub fn new(author: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            author: author.into(),
            timestamp: Utc::now(),
            content: None,
            error: None,
            grounding: None,
            actions: EventActions::default(),
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_grounding(mut self, grounding: Option<GroundingMetadata>) -> Self {
        self.grounding = grounding.filter(|g| !g.is_empty());
        self
    }

    pub fn with_actions(mut self, actions: EventActions) -> Self {
        self.actions = actions;
        self
    }
}

/// Append-only, insertion-ordered event log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Append an event and return the resulting event count.
    pub fn append(&mut self, event: Event) -> usize {
        self.events.push(event);
        self.events.len()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Event> {
        self.events.get(index)
    }

    pub fn last(&self) -> Option<&Event> {
        self.events.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    /// Events appended at or after `index`.
    pub fn since(&self, index: usize) -> &[Event] {
        self.events.get(index..).unwrap_or(&[])
    }
}

/// Snapshot cadence: the first event and every fifth event afterwards.
pub fn snapshot_due(event_count: usize) -> bool {
    event_count == 1 || (event_count > 0 && event_count % 5 == 0)
}

/// Key/value session state. Writes are last-write-wins per key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionState {
    values: Map<String, Value>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(values: Map<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|value| !value.is_null())
    }

    /// Typed read; `None` when the key is absent or has another shape.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Serialize) {
        let key = key.into();
        match serde_json::to_value(value) {
            Ok(value) => {
                self.values.insert(key, value);
            }
            Err(err) => tracing::warn!(%key, error = %err, "state value is not serializable"),
        }
    }

    pub fn set_value(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }

    pub fn extend(&mut self, other: Map<String, Value>) {
        self.values.extend(other);
    }

    pub fn to_map(&self) -> Map<String, Value> {
        self.values.clone()
    }
}

/// One end-to-end run context for a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub app_name: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub state: SessionState,
    pub events: EventLog,
}

impl Session {
    pub fn new(
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            app_name: app_name.into(),
            user_id: user_id.into(),
            created_at: Utc::now(),
            state: SessionState::new(),
            events: EventLog::new(),
        }
    }
}

pub fn new_session_id() -> String {
    format!("session-{}", Uuid::new_v4())
}

/// Shared handle to a session; the mutex keeps one thread of control per session.
pub type SessionHandle = Arc<Mutex<Session>>;

/// In-memory session storage keyed by application, user and session id.
#[derive(Default, Clone)]
pub struct SessionService {
    sessions: Arc<DashMap<String, SessionHandle>>,
}

impl SessionService {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(app_name: &str, user_id: &str, session_id: &str) -> String {
        format!("{app_name}/{user_id}/{session_id}")
    }

    /// Return the existing session or create it, seeding state from `initial_state`.
    pub fn get_or_create(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
        initial_state: &Map<String, Value>,
    ) -> (SessionHandle, bool) {
        let key = Self::key(app_name, user_id, session_id);
        let mut created = false;
        let handle = self
            .sessions
            .entry(key)
            .or_insert_with(|| {
                created = true;
                let mut session = Session::new(app_name, user_id, session_id);
                session.state.extend(initial_state.clone());
                Arc::new(Mutex::new(session))
            })
            .clone();
        (handle, created)
    }

    pub fn get(&self, app_name: &str, user_id: &str, session_id: &str) -> Option<SessionHandle> {
        self.sessions
            .get(&Self::key(app_name, user_id, session_id))
            .map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
