//! Model-backed leaf step that renders a prompt from session state and stores the reply.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::StepError;
use crate::model::{LanguageModel, ModelRequest, ModelRole, ModelSelection};
use crate::session::{Session, SessionState, USER_INPUT_KEY};
use crate::sources::SourceRegistry;
use crate::step::{StepHandler, StepOutcome};

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*```[A-Za-z0-9_-]*\s*\n?(.*?)\s*```\s*$").expect("invalid fence regex")
});

/// Shape-check hook for structured outputs; the error is logged, the value still stored.
pub type OutputValidator = fn(&Value) -> Result<(), String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Text,
    Json { schema: &'static str },
    Markdown,
}

/// Shared model handle and per-role model names passed to every prompt-driven step.
#[derive(Clone)]
pub struct ModelContext {
    pub model: Arc<dyn LanguageModel>,
    pub models: ModelSelection,
}

impl ModelContext {
    pub fn new(model: Arc<dyn LanguageModel>, models: ModelSelection) -> Self {
        Self { model, models }
    }

    pub(crate) fn request(
        &self,
        role: ModelRole,
        step: &str,
        instruction: &str,
        prompt: String,
    ) -> ModelRequest {
        ModelRequest {
            model: self.models.for_role(role).to_string(),
            step: step.to_string(),
            instruction: instruction.to_string(),
            prompt,
            use_search: false,
            output_schema: None,
        }
    }
}

pub struct PromptStep {
    id: String,
    context: ModelContext,
    role: ModelRole,
    instruction: String,
    inputs: Vec<String>,
    output_key: String,
    output: OutputMode,
    use_search: bool,
    collect_sources: bool,
    cite_into: Option<String>,
    validator: Option<OutputValidator>,
}

impl PromptStep {
    pub fn new(
        id: impl Into<String>,
        context: ModelContext,
        instruction: impl Into<String>,
        output_key: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            context,
            role: ModelRole::Worker,
            instruction: instruction.into(),
            inputs: Vec::new(),
            output_key: output_key.into(),
            output: OutputMode::Text,
            use_search: false,
            collect_sources: false,
            cite_into: None,
            validator: None,
        }
    }

    pub fn critic(mut self) -> Self {
        self.role = ModelRole::Critic;
        self
    }

    /// State keys rendered into the prompt after the user request.
    pub fn reads(mut self, keys: &[&str]) -> Self {
        self.inputs = keys.iter().map(|key| key.to_string()).collect();
        self
    }

    pub fn json(mut self, schema: &'static str) -> Self {
        self.output = OutputMode::Json { schema };
        self
    }

    pub fn markdown(mut self) -> Self {
        self.output = OutputMode::Markdown;
        self
    }

    /// Ask for search grounding and fold returned sources into the registry.
    pub fn with_search(mut self) -> Self {
        self.use_search = true;
        self.collect_sources = true;
        self
    }

    /// Also store the reply with `<cite>` tags rendered as links under `key`.
    pub fn cite_into(mut self, key: impl Into<String>) -> Self {
        self.cite_into = Some(key.into());
        self
    }

    pub fn validate_with(mut self, validator: OutputValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    fn build_prompt(&self, state: &SessionState) -> String {
        build_prompt(state, &self.inputs)
    }
}

/// Render the user request plus the listed state keys as markdown sections.
pub fn build_prompt(state: &SessionState, inputs: &[String]) -> String {
    let mut prompt = String::new();
    if let Some(request) = state.get(USER_INPUT_KEY) {
        prompt.push_str("## Request\n");
        prompt.push_str(&render_value(request));
        prompt.push_str("\n\n");
    }
    for key in inputs {
        match state.get(key) {
            Some(value) => {
                prompt.push_str(&format!("## {key}\n{}\n\n", render_value(value)));
            }
            None => debug!(key = %key, "prompt input missing from state"),
        }
    }
    prompt.trim_end().to_string()
}

pub(crate) fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Parse model output as JSON, tolerating a surrounding markdown code fence.
pub fn parse_json_output(raw: &str) -> Result<Value, serde_json::Error> {
    let body = CODE_FENCE
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map_or(raw.trim(), |inner| inner.as_str());
    serde_json::from_str(body)
}

/// Like [`parse_json_output`], keeping the raw text as a string when it is not JSON.
pub fn coerce_json(raw: &str) -> Value {
    parse_json_output(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[async_trait]
impl StepHandler for PromptStep {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, session: &mut Session) -> Result<StepOutcome, StepError> {
        let prompt = self.build_prompt(&session.state);
        let mut request = self
            .context
            .request(self.role, &self.id, &self.instruction, prompt);
        request.use_search = self.use_search;
        if let OutputMode::Json { schema } = self.output {
            request.output_schema = Some(schema);
        }

        let response = self.context.model.generate(request).await?;
        let text = response.text;

        let stored = match self.output {
            OutputMode::Text => Value::String(text.clone()),
            OutputMode::Markdown => json!({ "markdown": text }),
            OutputMode::Json { schema } => {
                let value = coerce_json(&text);
                if value.is_string() {
                    warn!(step = %self.id, schema, "structured output is not JSON; storing raw text");
                } else if let Some(validate) = self.validator {
                    if let Err(problem) = validate(&value) {
                        warn!(step = %self.id, schema, %problem, "structured output does not match schema");
                    }
                }
                value
            }
        };
        session.state.set_value(self.output_key.clone(), stored);

        if self.collect_sources {
            if let Some(grounding) = response.grounding.as_ref().filter(|g| !g.is_empty()) {
                let mut registry = SourceRegistry::load(&session.state);
                registry.ingest(grounding);
                registry.store(&mut session.state);
                debug!(step = %self.id, sources = registry.sources.len(), "source registry updated");
            }
        }

        if let Some(key) = &self.cite_into {
            let registry = SourceRegistry::load(&session.state);
            let cited = registry.render_citations(&text);
            session.state.set(key.clone(), json!({ "markdown": cited }));
        }

        Ok(StepOutcome::text(text).with_grounding(response.grounding))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelResponse;
    use crate::session::{GroundingChunk, GroundingMetadata, WebSource};

    struct Canned(&'static str);

    #[async_trait]
    impl LanguageModel for Canned {
        fn name(&self) -> &str {
            "canned"
        }

        async fn generate(&self, _request: ModelRequest) -> Result<ModelResponse, StepError> {
            Ok(ModelResponse {
                text: self.0.to_string(),
                grounding: Some(GroundingMetadata {
                    chunks: vec![GroundingChunk {
                        web: Some(WebSource {
                            uri: "https://fda.example/guidance".into(),
                            title: Some("FDA guidance".into()),
                            domain: Some("fda.example".into()),
                        }),
                    }],
                    supports: vec![],
                }),
            })
        }
    }

    fn context(reply: &'static str) -> ModelContext {
        ModelContext::new(Arc::new(Canned(reply)), ModelSelection::default())
    }

    #[test]
    fn fenced_json_is_unwrapped() {
        let value = coerce_json("```json\n{\"risks\": []}\n```");
        assert_eq!(value, json!({"risks": []}));
        assert_eq!(coerce_json("not json"), Value::String("not json".into()));
    }

    #[test]
    fn prompt_includes_request_and_inputs() {
        let mut state = SessionState::new();
        state.set(USER_INPUT_KEY, "solid-state electrolyte");
        state.set("research_plan", json!({"goals": ["novelty"]}));
        let prompt = build_prompt(&state, &["research_plan".into(), "absent".into()]);
        assert!(prompt.starts_with("## Request\nsolid-state electrolyte"));
        assert!(prompt.contains("## research_plan"));
        assert!(!prompt.contains("absent"));
    }

    #[tokio::test]
    async fn search_steps_collect_sources_and_render_citations() {
        let step = PromptStep::new(
            "report_composer",
            context("Prior filings exist<cite source=\"src-1\"/>."),
            "compose",
            "final_cited_report",
        )
        .with_search()
        .cite_into("prior_art_report");
        let mut session = Session::new("app", "u", "s");

        let outcome = step.run(&mut session).await.unwrap();

        assert!(outcome.grounding.is_some());
        assert_eq!(
            session.state.get("prior_art_report").unwrap()["markdown"],
            "Prior filings exist [FDA guidance](https://fda.example/guidance)."
        );
        assert!(session.state.contains("sources"));
    }

    #[tokio::test]
    async fn invalid_json_output_is_kept_as_text() {
        let step = PromptStep::new("risk_triage_agent", context("plain words"), "triage", "risk_triage")
            .json("risk_triage");
        let mut session = Session::new("risk_agent", "u", "s");

        step.run(&mut session).await.unwrap();

        assert_eq!(session.state.get_str("risk_triage"), Some("plain words"));
    }
}
