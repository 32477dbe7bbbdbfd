//! HTTP client for a running pipeline server.

use std::path::Path;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::DeepSearchError;
use crate::engine::RunRequest;

/// Wire payload posted to `/run` and `/run_sse`.
pub type RunPayload = RunRequest;

pub const READY_TIMEOUT: Duration = Duration::from_secs(30);
const PROBE_TIMEOUT: Duration = Duration::from_millis(1500);
const PROBE_INTERVAL: Duration = Duration::from_millis(600);
const SESSION_TIMEOUT: Duration = Duration::from_secs(30);
const RUN_TIMEOUT: Duration = Duration::from_secs(180);
const RUN_SSE_TIMEOUT: Duration = Duration::from_secs(240);

/// Conventional session id for one agent of a project.
pub fn session_id_for(project: &str, agent: &str) -> String {
    format!("{project}-{agent}")
}

/// Read the sources document sent as the user message; `"{}"` when unavailable.
pub fn load_sources(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "sources file unavailable; sending empty object");
            "{}".to_string()
        }
    }
}

#[derive(Clone)]
pub struct RunnerClient {
    client: reqwest::Client,
    base_url: String,
}

impl RunnerClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, DeepSearchError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|err| DeepSearchError::InvalidConfiguration(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Poll `/list-apps` until it answers 200 or `timeout` elapses.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let url = self.url("/list-apps");
        loop {
            match self.client.get(&url).timeout(PROBE_TIMEOUT).send().await {
                Ok(response) if response.status() == StatusCode::OK => {
                    info!(url = %url, "runner is ready");
                    return true;
                }
                Ok(response) => debug!(status = %response.status(), "runner not ready yet"),
                Err(err) => debug!(error = %err, "runner not reachable yet"),
            }
            if Instant::now() + PROBE_INTERVAL >= deadline {
                warn!(url = %url, timeout_secs = timeout.as_secs(), "runner did not become ready");
                return false;
            }
            sleep(PROBE_INTERVAL).await;
        }
    }

    /// Create a session, trying the plain route and then the `/api` variant.
    ///
    /// 200, 201, 204 and 409 (already exists) count as success. Failures are logged only.
    pub async fn create_session(&self, app_name: &str, user_id: &str, session_id: &str) -> bool {
        let path = format!("/apps/{app_name}/users/{user_id}/sessions/{session_id}");
        for candidate in [path.clone(), format!("/api{path}")] {
            let url = self.url(&candidate);
            match self
                .client
                .post(&url)
                .timeout(SESSION_TIMEOUT)
                .json(&serde_json::json!({}))
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();
                    if matches!(status.as_u16(), 200 | 201 | 204 | 409) {
                        info!(%session_id, %status, "session ready");
                        return true;
                    }
                    debug!(url = %url, %status, "session route rejected request");
                }
                Err(err) => debug!(url = %url, error = %err, "session route failed"),
            }
        }
        warn!(%app_name, %session_id, "could not create session; continuing");
        false
    }

    /// POST `/run` and return the JSON body.
    pub async fn run(&self, payload: &RunPayload) -> Result<Value, DeepSearchError> {
        let url = self.url("/run");
        let response = self
            .client
            .post(&url)
            .timeout(RUN_TIMEOUT)
            .json(payload)
            .send()
            .await
            .map_err(|err| DeepSearchError::Other(anyhow::anyhow!("run request to {url} failed: {err}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| DeepSearchError::Other(anyhow::anyhow!("run response unreadable: {err}")))?;
        if !status.is_success() {
            return Err(DeepSearchError::Other(anyhow::anyhow!(
                "run returned {status}: {body}"
            )));
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// POST `/run_sse` (then `/api/run_sse`) and collect every `data:` payload.
    pub async fn run_sse(&self, payload: &RunPayload) -> Result<Vec<Value>, DeepSearchError> {
        let payload = payload.clone().streaming(true);
        let mut last_error = None;
        for path in ["/run_sse", "/api/run_sse"] {
            let url = self.url(path);
            let response = match self
                .client
                .post(&url)
                .timeout(RUN_SSE_TIMEOUT)
                .header(reqwest::header::ACCEPT, "text/event-stream")
                .json(&payload)
                .send()
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    debug!(url = %url, error = %err, "run_sse route failed");
                    last_error = Some(format!("{url}: {err}"));
                    continue;
                }
            };
            let status = response.status();
            if !status.is_success() {
                debug!(url = %url, %status, "run_sse route rejected request");
                last_error = Some(format!("{url}: {status}"));
                continue;
            }
            let body = response
                .text()
                .await
                .map_err(|err| DeepSearchError::Other(anyhow::anyhow!("stream interrupted: {err}")))?;
            let events = parse_sse_events(&body);
            info!(session_id = %payload.session_id, events = events.len(), "run_sse completed");
            return Ok(events);
        }
        Err(DeepSearchError::Other(anyhow::anyhow!(
            "run_sse failed: {}",
            last_error.unwrap_or_else(|| "no route accepted the request".into())
        )))
    }
}

/// Extract JSON `data:` lines from a server-sent-events body; non-JSON data is kept as strings.
pub fn parse_sse_events(body: &str) -> Vec<Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .filter(|data| !data.is_empty())
        .map(|data| serde_json::from_str(data).unwrap_or_else(|_| Value::String(data.to_string())))
        .collect()
}
