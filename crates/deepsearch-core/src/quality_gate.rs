//! Research → evaluate → escalate-or-refine loop.
//!
//! The loop itself is a plain [`Step::Loop`]; this module provides the three leaf steps
//! that make it a quality gate:
//!
//! 1. [`EvaluationStep`] grades the current findings and always leaves a parseable
//!    [`Evaluation`] under [`EVALUATION_KEY`].
//! 2. [`EscalationChecker`] raises `escalate` when that evaluation passed.
//! 3. [`RefinementStep`] runs the follow-up queries and merges what it finds back into
//!    the findings key read by later iterations and downstream steps.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::StepError;
use crate::model::{EVALUATION_SCHEMA, ModelRole};
use crate::prompt::{ModelContext, build_prompt, parse_json_output, render_value};
use crate::session::{GroundingMetadata, Session, USER_INPUT_KEY};
use crate::sources::SourceRegistry;
use crate::step::{Step, StepHandler, StepOutcome};

pub const EVALUATION_KEY: &str = "research_evaluation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grade {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub search_query: String,
}

/// Result of one quality-gate evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub grade: Grade,
    pub comment: String,
    #[serde(default)]
    pub follow_up_queries: Option<Vec<SearchQuery>>,
}

impl Evaluation {
    pub fn passed(&self) -> bool {
        self.grade == Grade::Pass
    }

    pub fn follow_ups(&self) -> &[SearchQuery] {
        self.follow_up_queries.as_deref().unwrap_or(&[])
    }

    /// Failing evaluation carrying a single fallback query.
    pub fn fallback_fail(comment: impl Into<String>, topic: &str) -> Self {
        Self {
            grade: Grade::Fail,
            comment: comment.into(),
            follow_up_queries: Some(vec![fallback_query(topic)]),
        }
    }

    /// Enforce that follow-ups are absent exactly when the grade is pass.
    pub fn normalized(mut self, topic: &str) -> Self {
        match self.grade {
            Grade::Pass => self.follow_up_queries = None,
            Grade::Fail if self.follow_ups().is_empty() => {
                self.follow_up_queries = Some(vec![fallback_query(topic)]);
            }
            Grade::Fail => {}
        }
        self
    }
}

fn fallback_query(topic: &str) -> SearchQuery {
    let topic = topic.trim();
    let topic = if topic.is_empty() { "research topic" } else { topic };
    SearchQuery {
        search_query: format!("{topic} additional evidence and recent sources"),
    }
}

/// Human feedback on a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub grade: Grade,
    pub comment: String,
}

fn topic(session: &Session) -> String {
    session
        .state
        .get(USER_INPUT_KEY)
        .map(render_value)
        .and_then(|text| text.lines().map(str::trim).find(|l| !l.is_empty()).map(str::to_string))
        .unwrap_or_default()
}

/// Critic step grading the findings under `findings_key`.
pub struct EvaluationStep {
    id: String,
    context: ModelContext,
    instruction: String,
    findings_key: String,
}

impl EvaluationStep {
    pub fn new(
        id: impl Into<String>,
        context: ModelContext,
        instruction: impl Into<String>,
        findings_key: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            context,
            instruction: instruction.into(),
            findings_key: findings_key.into(),
        }
    }
}

#[async_trait]
impl StepHandler for EvaluationStep {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, session: &mut Session) -> Result<StepOutcome, StepError> {
        let topic = topic(session);
        let prompt = build_prompt(&session.state, std::slice::from_ref(&self.findings_key));
        let mut request = self
            .context
            .request(ModelRole::Critic, &self.id, &self.instruction, prompt);
        request.output_schema = Some(EVALUATION_SCHEMA);

        let evaluation = match self.context.model.generate(request).await {
            Ok(response) => match parse_json_output(&response.text)
                .and_then(serde_json::from_value::<Evaluation>)
            {
                Ok(evaluation) => evaluation.normalized(&topic),
                Err(err) => {
                    warn!(step = %self.id, error = %err, "unparseable evaluation; grading as fail");
                    Evaluation::fallback_fail(
                        format!("evaluation output could not be parsed: {err}"),
                        &topic,
                    )
                }
            },
            Err(err) => {
                warn!(step = %self.id, error = %err, "evaluation call failed; grading as fail");
                Evaluation::fallback_fail(format!("evaluation unavailable: {}", err.reason), &topic)
            }
        };

        info!(step = %self.id, grade = ?evaluation.grade, follow_ups = evaluation.follow_ups().len(), "research evaluated");
        let summary = serde_json::to_string(&evaluation).unwrap_or_else(|_| evaluation.comment.clone());
        session.state.set(EVALUATION_KEY, &evaluation);
        Ok(StepOutcome::text(summary))
    }
}

/// Raises `escalate` once the stored evaluation passes.
pub struct EscalationChecker {
    id: String,
}

impl EscalationChecker {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl StepHandler for EscalationChecker {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, session: &mut Session) -> Result<StepOutcome, StepError> {
        match session.state.get_as::<Evaluation>(EVALUATION_KEY) {
            Some(evaluation) if evaluation.passed() => {
                info!(step = %self.id, "research evaluation passed; escalating to stop loop");
                Ok(StepOutcome::text("Research evaluation passed.").escalate())
            }
            Some(_) => {
                info!(step = %self.id, "research evaluation failed; continuing refinement");
                Ok(StepOutcome::text("Research evaluation failed; refining."))
            }
            None => {
                warn!(step = %self.id, "no research evaluation in state; continuing loop");
                Ok(StepOutcome::default())
            }
        }
    }
}

/// Runs the evaluation's follow-up queries and merges the findings.
pub struct RefinementStep {
    id: String,
    context: ModelContext,
    instruction: String,
    findings_key: String,
}

impl RefinementStep {
    pub fn new(
        id: impl Into<String>,
        context: ModelContext,
        instruction: impl Into<String>,
        findings_key: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            context,
            instruction: instruction.into(),
            findings_key: findings_key.into(),
        }
    }
}

#[async_trait]
impl StepHandler for RefinementStep {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, session: &mut Session) -> Result<StepOutcome, StepError> {
        let queries: Vec<SearchQuery> = session
            .state
            .get_as::<Evaluation>(EVALUATION_KEY)
            .map(|evaluation| evaluation.follow_ups().to_vec())
            .unwrap_or_default();
        if queries.is_empty() {
            return Ok(StepOutcome::text("No follow-up queries to execute."));
        }

        let mut sections = Vec::new();
        let mut grounding = GroundingMetadata::default();
        let mut failures = 0;
        for query in &queries {
            let prompt = format!(
                "## Follow-up query\n{}\n\n{}",
                query.search_query,
                build_prompt(&session.state, std::slice::from_ref(&self.findings_key))
            );
            let mut request = self
                .context
                .request(ModelRole::Worker, &self.id, &self.instruction, prompt);
            request.use_search = true;
            match self.context.model.generate(request).await {
                Ok(response) => {
                    sections.push(format!("### {}\n{}", query.search_query, response.text.trim()));
                    if let Some(extra) = response.grounding {
                        grounding.merge(extra);
                    }
                }
                Err(err) => {
                    failures += 1;
                    warn!(step = %self.id, query = %query.search_query, error = %err, "follow-up search failed");
                }
            }
        }
        if sections.is_empty() {
            return Err(StepError::transient(format!(
                "all {failures} follow-up searches failed"
            )));
        }

        let addition = sections.join("\n\n");
        let merged = match session.state.get(&self.findings_key) {
            Some(existing) => format!("{}\n\n{addition}", render_value(existing)),
            None => addition.clone(),
        };
        session.state.set_value(self.findings_key.clone(), Value::String(merged));

        if !grounding.is_empty() {
            let mut registry = SourceRegistry::load(&session.state);
            registry.ingest(&grounding);
            registry.store(&mut session.state);
        }
        info!(step = %self.id, executed = sections.len(), failures, "refinement merged into findings");

        Ok(StepOutcome::text(addition).with_grounding(Some(grounding)))
    }
}

/// Assemble the quality-gate loop: evaluate, check, refine, at most `max_iterations` times.
pub fn quality_gate_loop(
    name: impl Into<String>,
    max_iterations: u32,
    evaluator: EvaluationStep,
    checker: EscalationChecker,
    refiner: RefinementStep,
) -> Step {
    Step::looped(
        name,
        vec![Step::leaf(evaluator), Step::leaf(checker), Step::leaf(refiner)],
        max_iterations,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_keeps_followups_exactly_on_fail() {
        let pass = Evaluation {
            grade: Grade::Pass,
            comment: "complete".into(),
            follow_up_queries: Some(vec![SearchQuery {
                search_query: "stale".into(),
            }]),
        }
        .normalized("anodes");
        assert!(pass.follow_up_queries.is_none());

        let fail = Evaluation {
            grade: Grade::Fail,
            comment: "thin".into(),
            follow_up_queries: None,
        }
        .normalized("anodes");
        assert_eq!(fail.follow_ups().len(), 1);
        assert!(fail.follow_ups()[0].search_query.starts_with("anodes"));
    }

    #[test]
    fn evaluation_parses_model_json() {
        let raw = r#"{"grade":"fail","comment":"needs claims","follow_up_queries":[{"search_query":"US patents silicon anode"}]}"#;
        let evaluation: Evaluation = serde_json::from_value(parse_json_output(raw).unwrap()).unwrap();
        assert_eq!(evaluation.grade, Grade::Fail);
        assert_eq!(evaluation.follow_ups()[0].search_query, "US patents silicon anode");
    }

    #[tokio::test]
    async fn checker_without_evaluation_does_not_escalate() {
        let mut session = Session::new("app", "u", "s");
        let outcome = EscalationChecker::new("escalation_checker")
            .run(&mut session)
            .await
            .unwrap();
        assert!(!outcome.actions.escalate);
    }
}
