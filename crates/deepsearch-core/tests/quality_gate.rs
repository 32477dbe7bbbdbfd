use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use deepsearch_core::{
    ArtifactWriter, EVALUATION_KEY, EscalationChecker, Evaluation, EvaluationStep, Grade,
    LanguageModel, ModelContext, ModelRequest, ModelResponse, ModelSelection, PipelineRunner,
    RefinementStep, Session, StepError, USER_INPUT_KEY, quality_gate_loop,
};
use tempfile::TempDir;

/// Answers per step with a fixed script and counts calls.
struct ScriptedModel {
    evaluations: Mutex<Vec<String>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedModel {
    fn new(evaluations: Vec<&str>) -> Arc<Self> {
        Arc::new(Self {
            evaluations: Mutex::new(evaluations.into_iter().rev().map(String::from).collect()),
            calls: Mutex::new(HashMap::new()),
        })
    }

    fn calls(&self, step: &str) -> usize {
        self.calls.lock().unwrap().get(step).copied().unwrap_or(0)
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: ModelRequest) -> Result<ModelResponse, StepError> {
        *self.calls.lock().unwrap().entry(request.step.clone()).or_default() += 1;
        if request.step == "research_evaluator" {
            let next = self.evaluations.lock().unwrap().pop();
            return Ok(ModelResponse::text(next.unwrap_or_else(|| FAIL.to_string())));
        }
        Ok(ModelResponse::text(format!("new evidence for: {}", request.prompt.lines().nth(1).unwrap_or(""))))
    }
}

const FAIL: &str = r#"{"grade":"fail","comment":"missing claims analysis","follow_up_queries":[{"search_query":"silicon anode claim charts"}]}"#;
const PASS: &str = r#"```json
{"grade":"pass","comment":"complete"}
```"#;

fn gate(model: Arc<ScriptedModel>, max_iterations: u32) -> deepsearch_core::Step {
    let context = ModelContext::new(model, ModelSelection::default());
    quality_gate_loop(
        "iterative_refinement_loop",
        max_iterations,
        EvaluationStep::new("research_evaluator", context.clone(), "grade", "research_findings"),
        EscalationChecker::new("escalation_checker"),
        RefinementStep::new("enhanced_search_executor", context, "refine", "research_findings"),
    )
}

fn session() -> Session {
    let mut session = Session::new("app", "tester", "gate-session");
    session.state.set(USER_INPUT_KEY, "silicon anode prior art");
    session.state.set("research_findings", "initial findings");
    session
}

#[tokio::test]
async fn always_failing_evaluator_runs_exactly_the_ceiling() {
    for ceiling in [1_u32, 3, 5] {
        let temp = TempDir::new().unwrap();
        let model = ScriptedModel::new(vec![]);
        let runner = PipelineRunner::new(ArtifactWriter::new(temp.path()), None);
        let mut session = session();

        runner.run(&gate(model.clone(), ceiling), &mut session).await.unwrap();

        assert_eq!(model.calls("research_evaluator"), ceiling as usize);
        assert_eq!(model.calls("enhanced_search_executor"), ceiling as usize);
        assert_eq!(session.events.len(), 3 * ceiling as usize);
        assert!(session.events.iter().all(|event| !event.actions.escalate));
        let findings = session.state.get_str("research_findings").unwrap();
        assert!(findings.starts_with("initial findings"));
        assert_eq!(findings.matches("### silicon anode claim charts").count(), ceiling as usize);
    }
}

#[tokio::test]
async fn first_pass_stops_the_loop_immediately() {
    let temp = TempDir::new().unwrap();
    let model = ScriptedModel::new(vec![FAIL, PASS, FAIL]);
    let runner = PipelineRunner::new(ArtifactWriter::new(temp.path()), None);
    let mut session = session();

    runner.run(&gate(model.clone(), 5), &mut session).await.unwrap();

    assert_eq!(model.calls("research_evaluator"), 2);
    assert_eq!(model.calls("enhanced_search_executor"), 1);
    let last = session.events.last().unwrap();
    assert_eq!(last.author, "escalation_checker");
    assert!(last.actions.escalate);

    let evaluation: Evaluation = session.state.get_as(EVALUATION_KEY).unwrap();
    assert_eq!(evaluation.grade, Grade::Pass);
    assert!(evaluation.follow_up_queries.is_none());
}

#[tokio::test]
async fn unparseable_evaluation_counts_as_fail() {
    let temp = TempDir::new().unwrap();
    let model = ScriptedModel::new(vec!["I think it looks fine", "{\"grade\": \"maybe\"}"]);
    let runner = PipelineRunner::new(ArtifactWriter::new(temp.path()), None);
    let mut session = session();

    runner.run(&gate(model.clone(), 2), &mut session).await.unwrap();

    assert_eq!(model.calls("research_evaluator"), 2);
    assert_eq!(model.calls("enhanced_search_executor"), 2);
    let evaluation: Evaluation = session.state.get_as(EVALUATION_KEY).unwrap();
    assert_eq!(evaluation.grade, Grade::Fail);
    assert!(evaluation.comment.contains("could not be parsed"));
    assert_eq!(evaluation.follow_ups().len(), 1);
    assert!(session.events.iter().all(|event| event.error.is_none()));
}
