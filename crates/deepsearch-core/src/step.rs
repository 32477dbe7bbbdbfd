//! Pipeline step tree and its interpreter.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, info, instrument, warn};

use crate::DeepSearchError;
use crate::artifacts::{ArtifactExport, ArtifactWriter};
use crate::error::StepError;
use crate::metrics::{record_loop_metrics, record_step_metrics};
use crate::session::{Event, EventActions, GroundingMetadata, Session};
use crate::trace::TraceRecorder;

/// What a leaf step produced; the runner turns it into exactly one event.
#[derive(Debug, Clone, Default)]
pub struct StepOutcome {
    pub content: Option<String>,
    pub grounding: Option<GroundingMetadata>,
    pub actions: EventActions,
}

impl StepOutcome {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn with_grounding(mut self, grounding: Option<GroundingMetadata>) -> Self {
        self.grounding = grounding;
        self
    }

    pub fn escalate(mut self) -> Self {
        self.actions.escalate = true;
        self
    }
}

/// A single unit of pipeline work that reads and writes session state.
#[async_trait]
pub trait StepHandler: Send + Sync {
    fn id(&self) -> &str;

    async fn run(&self, session: &mut Session) -> Result<StepOutcome, StepError>;
}

pub struct LeafStep {
    pub handler: Arc<dyn StepHandler>,
    pub exports: Vec<ArtifactExport>,
}

/// Statically declared pipeline structure.
pub enum Step {
    Leaf(LeafStep),
    Sequential { name: String, steps: Vec<Step> },
    Loop {
        name: String,
        body: Vec<Step>,
        max_iterations: u32,
    },
}

impl Step {
    pub fn leaf(handler: impl StepHandler + 'static) -> Self {
        Step::Leaf(LeafStep {
            handler: Arc::new(handler),
            exports: Vec::new(),
        })
    }

    pub fn sequential(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Step::Sequential {
            name: name.into(),
            steps,
        }
    }

    pub fn looped(name: impl Into<String>, body: Vec<Step>, max_iterations: u32) -> Self {
        Step::Loop {
            name: name.into(),
            body,
            max_iterations,
        }
    }

    /// Mirror `state_key` to a file after this leaf completes. No-op on composite steps.
    pub fn export(mut self, export: ArtifactExport) -> Self {
        if let Step::Leaf(leaf) = &mut self {
            leaf.exports.push(export);
        }
        self
    }

    pub fn name(&self) -> &str {
        match self {
            Step::Leaf(leaf) => leaf.handler.id(),
            Step::Sequential { name, .. } | Step::Loop { name, .. } => name,
        }
    }

    /// Leaf ids in declaration order.
    pub fn leaf_ids(&self) -> Vec<String> {
        match self {
            Step::Leaf(leaf) => vec![leaf.handler.id().to_string()],
            Step::Sequential { steps, .. } | Step::Loop { body: steps, .. } => {
                steps.iter().flat_map(Step::leaf_ids).collect()
            }
        }
    }
}

/// Control signal surfaced by a step to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Escalate,
}

/// Interprets a [`Step`] tree against one session.
#[derive(Clone)]
pub struct PipelineRunner {
    artifacts: ArtifactWriter,
    recorder: Option<TraceRecorder>,
}

impl PipelineRunner {
    pub fn new(artifacts: ArtifactWriter, recorder: Option<TraceRecorder>) -> Self {
        Self {
            artifacts,
            recorder,
        }
    }

    pub fn artifacts(&self) -> &ArtifactWriter {
        &self.artifacts
    }

    pub fn recorder(&self) -> Option<&TraceRecorder> {
        self.recorder.as_ref()
    }

    /// Run `step` to completion. Only trace storage failures abort the run.
    pub async fn run(&self, step: &Step, session: &mut Session) -> Result<Flow, DeepSearchError> {
        self.execute(step, session).await
    }

    fn execute<'a>(
        &'a self,
        step: &'a Step,
        session: &'a mut Session,
    ) -> BoxFuture<'a, Result<Flow, DeepSearchError>> {
        async move {
            match step {
                Step::Leaf(leaf) => self.run_leaf(leaf, session).await,
                Step::Sequential { name, steps } => {
                    for child in steps {
                        if self.execute(child, session).await? == Flow::Escalate {
                            debug!(sequence = %name, "escalation propagated");
                            return Ok(Flow::Escalate);
                        }
                    }
                    Ok(Flow::Continue)
                }
                Step::Loop {
                    name,
                    body,
                    max_iterations,
                } => {
                    for iteration in 1..=*max_iterations {
                        debug!(loop_name = %name, iteration, "starting loop iteration");
                        for child in body {
                            if self.execute(child, session).await? == Flow::Escalate {
                                info!(loop_name = %name, iteration, "loop exited on escalation");
                                record_loop_metrics(name, iteration, true);
                                return Ok(Flow::Continue);
                            }
                        }
                    }
                    info!(loop_name = %name, iterations = *max_iterations, "loop reached iteration ceiling");
                    record_loop_metrics(name, *max_iterations, false);
                    Ok(Flow::Continue)
                }
            }
        }
        .boxed()
    }

    #[instrument(name = "pipeline.step", skip_all, fields(step = %leaf.handler.id(), session_id = %session.id))]
    async fn run_leaf(&self, leaf: &LeafStep, session: &mut Session) -> Result<Flow, DeepSearchError> {
        let id = leaf.handler.id().to_string();
        let started = Instant::now();
        let first_new = session.events.len();

        let (event, status) = match leaf.handler.run(session).await {
            Ok(outcome) => {
                let mut event = Event::new(&id)
                    .with_grounding(outcome.grounding)
                    .with_actions(outcome.actions);
                event.content = outcome.content;
                (event, "ok")
            }
            Err(err) => {
                warn!(step = %id, error = %err, "step failed; continuing pipeline");
                (Event::new(&id).with_error(err.reason), "error")
            }
        };
        let flow = if event.actions.escalate {
            Flow::Escalate
        } else {
            Flow::Continue
        };
        session.events.append(event);

        for export in &leaf.exports {
            self.artifacts.export(&session.state, export);
        }
        if let Some(recorder) = &self.recorder {
            recorder.observe(session, first_new).await?;
        }

        let elapsed = started.elapsed().as_millis() as u64;
        record_step_metrics(&id, status, elapsed);
        debug!(step = %id, status, elapsed_ms = elapsed, "step finished");
        Ok(flow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct Counter {
        id: &'static str,
        calls: Arc<AtomicUsize>,
        escalate_on: Option<usize>,
    }

    #[async_trait]
    impl StepHandler for Counter {
        fn id(&self) -> &str {
            self.id
        }

        async fn run(&self, session: &mut Session) -> Result<StepOutcome, StepError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            session.state.set(self.id, call);
            let outcome = StepOutcome::text(format!("{} call {call}", self.id));
            Ok(match self.escalate_on {
                Some(target) if target == call => outcome.escalate(),
                _ => outcome,
            })
        }
    }

    struct Failing;

    #[async_trait]
    impl StepHandler for Failing {
        fn id(&self) -> &str {
            "failing"
        }

        async fn run(&self, _session: &mut Session) -> Result<StepOutcome, StepError> {
            Err(StepError::transient("search backend unavailable"))
        }
    }

    fn counter(id: &'static str, escalate_on: Option<usize>) -> (Step, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let step = Step::leaf(Counter {
            id,
            calls: calls.clone(),
            escalate_on,
        });
        (step, calls)
    }

    fn runner(temp: &TempDir) -> PipelineRunner {
        PipelineRunner::new(ArtifactWriter::new(temp.path()), None)
    }

    #[tokio::test]
    async fn escalation_ends_only_the_innermost_loop() {
        let temp = TempDir::new().unwrap();
        let (checker, checker_calls) = counter("checker", Some(2));
        let (after, after_calls) = counter("after", None);
        let (tail, tail_calls) = counter("tail", None);
        let pipeline = Step::sequential(
            "root",
            vec![
                Step::looped("gate", vec![Step::sequential("body", vec![checker, after])], 5),
                tail,
            ],
        );
        let mut session = Session::new("app", "u", "s");

        let flow = runner(&temp).run(&pipeline, &mut session).await.unwrap();

        assert_eq!(flow, Flow::Continue);
        assert_eq!(checker_calls.load(Ordering::SeqCst), 2);
        assert_eq!(after_calls.load(Ordering::SeqCst), 1);
        assert_eq!(tail_calls.load(Ordering::SeqCst), 1);
        assert_eq!(session.events.len(), 4);
        assert!(session.events.get(2).unwrap().actions.escalate);
    }

    #[tokio::test]
    async fn step_failures_become_error_events() {
        let temp = TempDir::new().unwrap();
        let (next, next_calls) = counter("next", None);
        let pipeline = Step::sequential("root", vec![Step::leaf(Failing), next]);
        let mut session = Session::new("app", "u", "s");

        runner(&temp).run(&pipeline, &mut session).await.unwrap();

        let failed = session.events.get(0).unwrap();
        assert_eq!(failed.author, "failing");
        assert_eq!(failed.error.as_deref(), Some("search backend unavailable"));
        assert_eq!(next_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn leaf_exports_run_after_each_step() {
        let temp = TempDir::new().unwrap();
        let (step, _) = counter("pricing_researcher", None);
        let step = step.export(ArtifactExport::json("pricing_researcher", "pricing_analogs.json"));
        let mut session = Session::new("commercial_agent", "u", "s");

        runner(&temp).run(&step, &mut session).await.unwrap();

        let written = std::fs::read_to_string(temp.path().join("pricing_analogs.json")).unwrap();
        assert_eq!(written.trim(), "1");
    }

    #[test]
    fn leaf_ids_follow_declaration_order() {
        let (a, _) = counter("a", None);
        let (b, _) = counter("b", None);
        let (c, _) = counter("c", None);
        let tree = Step::sequential("root", vec![a, Step::looped("loop", vec![b, c], 2)]);
        assert_eq!(tree.leaf_ids(), vec!["a", "b", "c"]);
        assert_eq!(tree.name(), "root");
    }
}
