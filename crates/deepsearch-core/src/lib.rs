//! DeepSearch core: domain research pipelines run by a small step interpreter.
//!
//! Each pipeline is a fixed [`Step`] tree of model-backed leaf steps. The
//! [`PipelineRunner`] executes it against one [`Session`], mirroring selected state to
//! artifact files and recording every event (plus periodic state snapshots) through the
//! [`TraceRecorder`]. The default prior-art pipeline wraps its research in a
//! quality-gate loop that stops as soon as a critic grades the findings as passing.

mod artifacts;
mod config;
mod engine;
mod error;
mod invoke;
mod metrics;
mod model;
mod pipelines;
mod prompt;
mod quality_gate;
mod security;
mod selector;
mod session;
mod sources;
mod state_loader;
mod step;
mod telemetry;
mod trace;

pub use artifacts::{ArtifactExport, ArtifactFormat, ArtifactWriter};
pub use config::{
    ArtifactConfig, Config, ConfigLoader, ModelConfig, ModelProvider, ResearchConfig,
    StorageKind, TraceConfig, apply_env_overrides,
};
pub use engine::{
    Content, DEFAULT_USER_ID, Part, ResearchEngine, RunRequest, RunResponse, SessionInfo,
};
pub use error::{DeepSearchError, StepError};
pub use invoke::{
    READY_TIMEOUT, RunPayload, RunnerClient, load_sources, parse_sse_events, session_id_for,
};
pub use metrics::{init_metrics_from_env, record_loop_metrics, record_step_metrics};
pub use model::{
    ChatCompletionsModel, EVALUATION_SCHEMA, LanguageModel, ModelRequest, ModelResponse,
    ModelRole, ModelSelection, OfflineModel, build_model,
};
pub use pipelines::{
    AxisBadges, AxisRating, CITED_REPORT_KEY, PipelineId, RESEARCH_FINDINGS_KEY,
    build_pipeline, validate_axis_rating,
};
pub use prompt::{ModelContext, OutputMode, PromptStep, build_prompt, coerce_json, parse_json_output};
pub use quality_gate::{
    EVALUATION_KEY, EscalationChecker, Evaluation, EvaluationStep, Feedback, Grade,
    RefinementStep, SearchQuery, quality_gate_loop,
};
pub use security::{SecretValue, require_env};
pub use selector::{FALLBACK_APP_NAME, Selection, app_name_for, app_names, pipeline_for_app, resolve};
pub use session::{
    Event, EventActions, EventLog, GroundingChunk, GroundingMetadata, GroundingSupport, Session,
    SessionHandle, SessionService, SessionState, USER_INPUT_KEY, WebSource, new_session_id,
    snapshot_due,
};
pub use sources::{SOURCES_KEY, SourceEntry, SourceRegistry, SupportedClaim, URL_TO_SHORT_ID_KEY};
pub use state_loader::load_state_dir;
pub use step::{Flow, LeafStep, PipelineRunner, Step, StepHandler, StepOutcome};
pub use telemetry::{LogFormat, TelemetryOptions, init_telemetry};
pub use trace::{
    DEFAULT_EVENT_TYPE, EventTrace, GcsTraceStore, LocalTraceStore, SessionSnapshot,
    StoredObject, TraceListing, TraceRecorder, TraceStore, build_trace_store,
};
