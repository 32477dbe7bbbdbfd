//! Hosted runner surface: sessions, pipeline runs and feedback.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{error, info, instrument};

use crate::artifacts::ArtifactWriter;
use crate::config::Config;
use crate::model::{LanguageModel, ModelSelection};
use crate::pipelines::{PipelineId, build_pipeline};
use crate::prompt::ModelContext;
use crate::quality_gate::{Feedback, Grade};
use crate::selector::{FALLBACK_APP_NAME, app_names, pipeline_for_app};
use crate::session::{Event, SessionService, USER_INPUT_KEY, new_session_id};
use crate::state_loader::load_state_dir;
use crate::step::{PipelineRunner, Step};
use crate::trace::TraceRecorder;
use crate::DeepSearchError;

pub const DEFAULT_USER_ID: &str = "default_user";
const USER_AUTHOR: &str = "user";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

/// A chat message in the runner wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub role: String,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: USER_AUTHOR.to_string(),
            parts: vec![Part {
                text: Some(text.into()),
            }],
        }
    }

    /// Concatenated text of all parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Body of `/run` and `/run_sse`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
    pub new_message: Content,
    #[serde(default)]
    pub streaming: bool,
}

impl RunRequest {
    pub fn new(
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            new_message: Content::user_text(text),
            streaming: false,
        }
    }

    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResponse {
    pub session_id: String,
    pub pipeline: PipelineId,
    /// Events appended by this run, the user message first.
    pub events: Vec<Event>,
    pub final_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
    pub created: bool,
    pub state_keys: Vec<String>,
}

/// In-process runner for every pipeline, sharing one trace recorder and artifact root.
pub struct ResearchEngine {
    config: Config,
    sessions: SessionService,
    runner: PipelineRunner,
    pipelines: HashMap<PipelineId, Arc<Step>>,
    preloaded: Map<String, Value>,
}

impl ResearchEngine {
    pub fn new(config: Config, model: Arc<dyn LanguageModel>) -> Result<Self, DeepSearchError> {
        let recorder = if config.traces.enabled {
            Some(TraceRecorder::from_config(&config.traces)?)
        } else {
            info!("trace recording disabled");
            None
        };
        let artifacts = ArtifactWriter::new(config.artifacts.root.clone());
        let context = ModelContext::new(model, ModelSelection::from_config(&config.models));
        let pipelines = PipelineId::ALL
            .into_iter()
            .map(|id| {
                let step = build_pipeline(id, &context, config.research.max_search_iterations);
                (id, Arc::new(step))
            })
            .collect();
        let preloaded = config
            .research
            .state_dir
            .as_deref()
            .map(load_state_dir)
            .unwrap_or_default();

        info!(
            artifacts = %config.artifacts.root.display(),
            preloaded_keys = preloaded.len(),
            max_iterations = config.research.max_search_iterations,
            "research engine ready"
        );
        Ok(Self {
            runner: PipelineRunner::new(artifacts, recorder),
            sessions: SessionService::new(),
            pipelines,
            preloaded,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn recorder(&self) -> Option<&TraceRecorder> {
        self.runner.recorder()
    }

    pub fn sessions(&self) -> &SessionService {
        &self.sessions
    }

    pub fn list_apps(&self) -> Vec<&'static str> {
        app_names()
    }

    /// Create the session if needed; new sessions start from the preloaded state.
    pub async fn create_session(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: Option<String>,
    ) -> SessionInfo {
        let session_id = session_id.unwrap_or_else(new_session_id);
        let (handle, created) =
            self.sessions
                .get_or_create(app_name, user_id, &session_id, &self.preloaded);
        let state_keys = handle.lock().await.state.keys();
        if created {
            info!(app_name, user_id, session_id = %session_id, "session created");
        }
        SessionInfo {
            app_name: app_name.to_string(),
            user_id: user_id.to_string(),
            session_id,
            created,
            state_keys,
        }
    }

    /// Append the user message and run the pipeline behind `request.app_name`.
    #[instrument(name = "engine.run", skip(self, request), fields(app = %request.app_name, session_id = %request.session_id))]
    pub async fn run(&self, request: RunRequest) -> Result<RunResponse, DeepSearchError> {
        let pipeline_id = pipeline_for_app(&request.app_name);
        let step = self.pipelines.get(&pipeline_id).cloned().ok_or_else(|| {
            DeepSearchError::InvalidConfiguration(format!("pipeline {pipeline_id} not built"))
        })?;

        let (handle, _) = self.sessions.get_or_create(
            &request.app_name,
            &request.user_id,
            &request.session_id,
            &self.preloaded,
        );
        let mut session = handle.lock().await;
        let first_new = session.events.len();

        let text = request.new_message.text();
        session.state.set(USER_INPUT_KEY, &text);
        session
            .events
            .append(Event::new(USER_AUTHOR).with_content(text));
        if let Some(recorder) = self.runner.recorder() {
            recorder.observe(&session, first_new).await?;
        }

        info!(pipeline = %pipeline_id, "running pipeline");
        self.runner.run(&step, &mut session).await?;

        let events = session.events.since(first_new).to_vec();
        let final_text = events
            .iter()
            .rev()
            .filter(|event| event.author != USER_AUTHOR)
            .find_map(|event| event.content.clone());
        info!(pipeline = %pipeline_id, events = events.len(), "pipeline finished");

        Ok(RunResponse {
            session_id: session.id.clone(),
            pipeline: pipeline_id,
            events,
            final_text,
        })
    }

    /// Run the default pipeline and return `{session_id, response}` or `{error}`.
    pub async fn query(&self, input: &str, session_id: Option<String>) -> Value {
        let session_id = session_id.unwrap_or_else(new_session_id);
        let request = RunRequest::new(FALLBACK_APP_NAME, DEFAULT_USER_ID, session_id, input);
        match self.run(request).await {
            Ok(response) => json!({
                "session_id": response.session_id,
                "response": response.final_text.unwrap_or_default(),
            }),
            Err(err) => {
                error!(error = %err, "query failed");
                json!({ "error": err.to_string() })
            }
        }
    }

    pub fn register_feedback(&self, feedback: &Feedback) {
        let grade = match feedback.grade {
            Grade::Pass => "pass",
            Grade::Fail => "fail",
        };
        info!(target: "deepsearch::feedback", grade, comment = %feedback.comment, "feedback received");
    }
}
