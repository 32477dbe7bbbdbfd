use std::sync::Arc;

use deepsearch_core::{
    Config, Feedback, Grade, OfflineModel, PipelineId, ResearchEngine, RunRequest, StorageKind,
    resolve,
};
use tempfile::TempDir;

fn engine(temp: &TempDir) -> ResearchEngine {
    let mut config = Config::default();
    config.traces.storage = StorageKind::Local;
    config.traces.local_path = temp.path().join("agent_traces");
    config.artifacts.root = temp.path().join("05_artifacts");
    config.research.max_search_iterations = 2;
    ResearchEngine::new(config, Arc::new(OfflineModel)).expect("engine builds")
}

#[test]
fn phase_router_resolves_risk_and_defaults_unknown_phases() {
    let risk = resolve(Some("p7b"), None);
    assert_eq!(risk.pipeline, PipelineId::Risk);
    assert_eq!(risk.app_name, "risk_agent");

    let fallback = resolve(Some("zz"), None);
    assert_eq!(fallback.pipeline, PipelineId::PriorArt);
    assert!(fallback.defaulted);
}

#[tokio::test]
async fn risk_pipeline_writes_every_artifact() {
    let temp = TempDir::new().unwrap();
    let engine = engine(&temp);

    let response = engine
        .run(RunRequest::new("risk_agent", "analyst", "proj-risk", "{\"patents\": []}"))
        .await
        .unwrap();

    assert_eq!(response.pipeline, PipelineId::Risk);
    assert_eq!(response.events.len(), 6);
    assert_eq!(response.events[0].author, "user");
    let artifacts = temp.path().join("05_artifacts");
    for file in [
        "risk_config_output.json",
        "risk_triage_output.json",
        "ip_watch_output.json",
        "risk_gaps.json",
        "regulatory_snapshot.md",
    ] {
        assert!(artifacts.join(file).is_file(), "missing artifact {file}");
    }
    let snapshot = std::fs::read_to_string(artifacts.join("regulatory_snapshot.md")).unwrap();
    assert!(snapshot.starts_with("# reg_snapshot_agent"));
}

#[tokio::test]
async fn prior_art_run_passes_gate_and_writes_report() {
    let temp = TempDir::new().unwrap();
    let engine = engine(&temp);

    let response = engine
        .run(RunRequest::new("app", "analyst", "proj-p7a", "Silicon anode coatings"))
        .await
        .unwrap();

    let authors: Vec<&str> = response.events.iter().map(|e| e.author.as_str()).collect();
    assert_eq!(
        authors,
        vec![
            "user",
            "plan_generator",
            "section_planner",
            "section_researcher",
            "research_evaluator",
            "escalation_checker",
            "report_composer",
        ]
    );
    assert!(response.events[5].actions.escalate);
    assert!(response.final_text.unwrap().contains("report_composer"));
    let artifacts = temp.path().join("05_artifacts");
    assert!(artifacts.join("patent_search_results.json").is_file());
    assert!(artifacts.join("prior_art_report.md").is_file());

    let recorder = engine.recorder().expect("tracing enabled");
    assert_eq!(recorder.list_traces(Some("proj-p7a"), 100).await.len(), 7);
    let snapshots = std::fs::read_dir(temp.path().join("agent_traces"))
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".snapshot"))
        .count();
    assert_eq!(snapshots, 2);
}

#[tokio::test]
async fn sessions_accumulate_across_runs_and_query_returns_the_report() {
    let temp = TempDir::new().unwrap();
    let engine = engine(&temp);

    let info = engine
        .create_session("commercial_agent", "analyst", Some("proj-commercial".into()))
        .await;
    assert!(info.created);
    let again = engine
        .create_session("commercial_agent", "analyst", Some("proj-commercial".into()))
        .await;
    assert!(!again.created);

    let first = engine
        .run(RunRequest::new("commercial_agent", "analyst", "proj-commercial", "first"))
        .await
        .unwrap();
    let second = engine
        .run(RunRequest::new("commercial_agent", "analyst", "proj-commercial", "second"))
        .await
        .unwrap();
    assert_eq!(first.events.len(), 4);
    assert_eq!(second.events.len(), 4);
    assert!(temp.path().join("05_artifacts/commercial_summary.md").is_file());

    let answer = engine.query("Quick prior-art scan", None).await;
    assert!(answer["response"].as_str().unwrap().contains("report_composer"));
    assert!(answer.get("error").is_none());

    engine.register_feedback(&Feedback {
        grade: Grade::Pass,
        comment: "useful".into(),
    });
    assert_eq!(engine.list_apps()[0], "app");
}

#[tokio::test]
async fn query_reports_trace_storage_failures_as_error_objects() {
    let temp = TempDir::new().unwrap();
    let engine = engine(&temp);
    let traces = temp.path().join("agent_traces");
    std::fs::remove_dir_all(&traces).unwrap();
    std::fs::write(&traces, "not a directory").unwrap();

    let answer = engine.query("Silicon anode coatings", Some("broken-store".into())).await;

    let error = answer["error"].as_str().expect("error message");
    assert!(!error.is_empty());
    assert!(answer.get("response").is_none());
    assert!(answer.get("session_id").is_none());
}

#[tokio::test]
async fn preloaded_state_seeds_new_sessions() {
    let temp = TempDir::new().unwrap();
    let state_dir = temp.path().join("projects/demo/05_artifacts");
    std::fs::create_dir_all(&state_dir).unwrap();
    std::fs::write(state_dir.join("mechanistic_inputs.json"), r#"{"pathway": "mTOR"}"#).unwrap();

    let mut config = Config::default();
    config.traces.enabled = false;
    config.artifacts.root = temp.path().join("out");
    config.research.state_dir = Some(state_dir);
    let engine = ResearchEngine::new(config, Arc::new(OfflineModel)).unwrap();

    let info = engine.create_session("mechanistic_agent", "u", None).await;
    assert!(info.state_keys.contains(&"mechanistic_inputs".to_string()));
    assert!(engine.recorder().is_none());

    engine
        .run(RunRequest::new("mechanistic_agent", "u", info.session_id, "{}"))
        .await
        .unwrap();
    let rating = std::fs::read_to_string(
        temp.path()
            .join("out/axis_rating_mechanistic_plausibility.json"),
    )
    .unwrap();
    assert!(rating.contains("axis_rating"));
}
