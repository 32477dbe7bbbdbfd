//! Fixed domain pipelines.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::artifacts::ArtifactExport;
use crate::prompt::{ModelContext, PromptStep};
use crate::quality_gate::{EscalationChecker, EvaluationStep, RefinementStep, quality_gate_loop};
use crate::step::Step;

pub const RESEARCH_FINDINGS_KEY: &str = "research_findings";
pub const CITED_REPORT_KEY: &str = "prior_art_report";

/// Identity of one of the statically declared pipelines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineId {
    #[default]
    PriorArt,
    Commercial,
    Risk,
    RegulatoryCmc,
    UnmetNeed,
    Safety,
    Mechanistic,
}

impl PipelineId {
    pub const ALL: [PipelineId; 7] = [
        PipelineId::PriorArt,
        PipelineId::Commercial,
        PipelineId::Risk,
        PipelineId::RegulatoryCmc,
        PipelineId::UnmetNeed,
        PipelineId::Safety,
        PipelineId::Mechanistic,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineId::PriorArt => "prior_art",
            PipelineId::Commercial => "commercial",
            PipelineId::Risk => "risk",
            PipelineId::RegulatoryCmc => "regulatory_cmc",
            PipelineId::UnmetNeed => "unmet_need",
            PipelineId::Safety => "safety",
            PipelineId::Mechanistic => "mechanistic",
        }
    }
}

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineId {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        PipelineId::ALL
            .into_iter()
            .find(|id| id.as_str() == normalized)
            .ok_or_else(|| format!("unknown pipeline '{value}'"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisBadges {
    pub coverage: String,
    pub confidence: String,
    pub evidence_direction: String,
}

/// Rating emitted by the single-axis reviewer pipelines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisRating {
    pub section_id: String,
    pub display_name: String,
    pub grade: String,
    #[serde(default)]
    pub grade_modifier: Option<String>,
    pub summary: String,
    #[serde(default)]
    pub decision_hook: Option<String>,
    pub badges: AxisBadges,
    #[serde(default)]
    pub pros: Vec<String>,
    #[serde(default)]
    pub caveats: Vec<String>,
    #[serde(default)]
    pub evidence: Vec<String>,
}

pub fn validate_axis_rating(value: &Value) -> Result<(), String> {
    serde_json::from_value::<AxisRating>(value.clone())
        .map(|_| ())
        .map_err(|err| err.to_string())
}

/// Build the step tree for `id`.
pub fn build_pipeline(id: PipelineId, context: &ModelContext, max_iterations: u32) -> Step {
    match id {
        PipelineId::PriorArt => prior_art(context, max_iterations),
        PipelineId::Commercial => commercial(context),
        PipelineId::Risk => risk(context),
        PipelineId::RegulatoryCmc => regulatory_cmc(context),
        PipelineId::UnmetNeed => axis_review(
            context,
            "unmet_need",
            "unmet_need_reviewer",
            "commercial_landscape",
            "Commercial Landscape",
            "unmet_need_inputs",
        ),
        PipelineId::Safety => axis_review(
            context,
            "safety",
            "safety_reviewer",
            "safety_liability",
            "Safety & Liability",
            "safety_inputs",
        ),
        PipelineId::Mechanistic => axis_review(
            context,
            "mechanistic",
            "mechanistic_reviewer",
            "mechanistic_plausibility",
            "Mechanistic Plausibility",
            "mechanistic_inputs",
        ),
    }
}

fn prior_art(context: &ModelContext, max_iterations: u32) -> Step {
    let plan = PromptStep::new(
        "plan_generator",
        context.clone(),
        "Draft a prior-art research plan: goals, claim elements to search, and jurisdictions.",
        "research_plan",
    );
    let sections = PromptStep::new(
        "section_planner",
        context.clone(),
        "Turn the research plan into a markdown outline of report sections.",
        "report_sections",
    )
    .reads(&["research_plan"]);
    let researcher = PromptStep::new(
        "section_researcher",
        context.clone(),
        "Search patents and literature for each section and summarize the findings with sources.",
        RESEARCH_FINDINGS_KEY,
    )
    .reads(&["research_plan", "report_sections"])
    .with_search();

    let gate = quality_gate_loop(
        "iterative_refinement_loop",
        max_iterations,
        EvaluationStep::new(
            "research_evaluator",
            context.clone(),
            "Grade the findings pass or fail. On fail, list targeted follow-up search queries.",
            RESEARCH_FINDINGS_KEY,
        ),
        EscalationChecker::new("escalation_checker"),
        RefinementStep::new(
            "enhanced_search_executor",
            context.clone(),
            "Execute the follow-up query and report new, sourced findings only.",
            RESEARCH_FINDINGS_KEY,
        ),
    );

    let composer = PromptStep::new(
        "report_composer",
        context.clone(),
        "Write the final prior-art report in markdown. Cite sources with <cite source=\"src-N\"/> tags.",
        "final_cited_report",
    )
    .reads(&["report_sections", RESEARCH_FINDINGS_KEY, "sources"])
    .critic()
    .cite_into(CITED_REPORT_KEY);

    Step::sequential(
        "research_pipeline",
        vec![
            Step::leaf(plan),
            Step::leaf(sections),
            Step::leaf(researcher)
                .export(ArtifactExport::json(RESEARCH_FINDINGS_KEY, "patent_search_results.json")),
            gate,
            Step::leaf(composer)
                .export(ArtifactExport::text(CITED_REPORT_KEY, "prior_art_report.md")),
        ],
    )
}

fn commercial(context: &ModelContext) -> Step {
    let pricing = PromptStep::new(
        "pricing_researcher",
        context.clone(),
        "Find pricing analogs for comparable products and return them as JSON.",
        "pricing_analogs",
    )
    .json("pricing_analogs")
    .with_search();
    let flow = PromptStep::new(
        "patient_flow_modeler",
        context.clone(),
        "Model the patient flow from diagnosis to treatment as JSON stages with volumes.",
        "patient_flow",
    )
    .reads(&["pricing_analogs"])
    .json("patient_flow");
    let narrator = PromptStep::new(
        "commercial_narrator",
        context.clone(),
        "Summarize commercial readiness in markdown using the pricing analogs and patient flow.",
        "commercial_summary",
    )
    .reads(&["pricing_analogs", "patient_flow"])
    .markdown();

    Step::sequential(
        "commercial_pipeline",
        vec![
            Step::leaf(pricing).export(ArtifactExport::json("pricing_analogs", "pricing_analogs.json")),
            Step::leaf(flow).export(ArtifactExport::json("patient_flow", "patient_flow_map.json")),
            Step::leaf(narrator)
                .export(ArtifactExport::text("commercial_summary", "commercial_summary.md")),
        ],
    )
}

fn risk(context: &ModelContext) -> Step {
    let json_step = |id: &str, key: &'static str, instruction: &str, reads: &[&str]| {
        PromptStep::new(id, context.clone(), instruction, key)
            .reads(reads)
            .json(key)
    };

    Step::sequential(
        "risk_pipeline",
        vec![
            Step::leaf(json_step(
                "risk_config_agent",
                "risk_config",
                "Define the risk categories and scoring scale for this asset as JSON.",
                &[],
            ))
            .export(ArtifactExport::json("risk_config", "risk_config_output.json")),
            Step::leaf(
                json_step(
                    "risk_triage_agent",
                    "risk_triage",
                    "Score each risk category with rationale and sources as JSON.",
                    &["risk_config"],
                )
                .with_search(),
            )
            .export(ArtifactExport::json("risk_triage", "risk_triage_output.json")),
            Step::leaf(
                json_step(
                    "ip_watch_agent",
                    "ip_watch",
                    "List blocking patents and freedom-to-operate concerns as JSON.",
                    &["risk_triage"],
                )
                .with_search(),
            )
            .export(ArtifactExport::json("ip_watch", "ip_watch_output.json")),
            Step::leaf(json_step(
                "risk_gap_agent",
                "risk_gaps",
                "Identify evidence gaps left by the triage and IP watch as JSON.",
                &["risk_triage", "ip_watch"],
            ))
            .export(ArtifactExport::json("risk_gaps", "risk_gaps.json")),
            Step::leaf(
                PromptStep::new(
                    "reg_snapshot_agent",
                    context.clone(),
                    "Write a short regulatory snapshot in markdown.",
                    "regulatory_snapshot",
                )
                .reads(&["risk_triage", "risk_gaps"])
                .markdown(),
            )
            .export(ArtifactExport::text("regulatory_snapshot", "regulatory_snapshot.md")),
        ],
    )
}

fn regulatory_cmc(context: &ModelContext) -> Step {
    let payload = PromptStep::new(
        "reg_payload_agent",
        context.clone(),
        "Collect the regulatory pathway and CMC requirements as JSON.",
        "reg_payload",
    )
    .json("reg_payload")
    .with_search();
    let narrative = PromptStep::new(
        "reg_narrative_agent",
        context.clone(),
        "Write the regulatory and CMC brief in markdown from the payload.",
        "regulatory_brief",
    )
    .reads(&["reg_payload"])
    .markdown();

    Step::sequential(
        "regulatory_pipeline",
        vec![
            Step::leaf(payload).export(ArtifactExport::json("reg_payload", "regulatory_payload.json")),
            Step::leaf(narrative)
                .export(ArtifactExport::text("regulatory_brief", "regulatory_cmc_brief.md")),
        ],
    )
}

fn axis_review(
    context: &ModelContext,
    pipeline: &str,
    reviewer: &str,
    section_id: &str,
    display_name: &str,
    inputs_key: &str,
) -> Step {
    let output_key = format!("axis_rating_{section_id}");
    let step = PromptStep::new(
        reviewer,
        context.clone(),
        format!(
            "Rate {display_name} as JSON matching AxisRating with section_id \"{section_id}\": \
             grade A-F or U, badges, pros, caveats and evidence."
        ),
        output_key.clone(),
    )
    .reads(&[inputs_key])
    .json("axis_rating")
    .with_search()
    .validate_with(validate_axis_rating);

    Step::sequential(
        format!("{pipeline}_pipeline"),
        vec![Step::leaf(step).export(ArtifactExport::json(output_key.clone(), format!("{output_key}.json")))],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelSelection, OfflineModel};
    use serde_json::json;
    use std::sync::Arc;

    fn context() -> ModelContext {
        ModelContext::new(Arc::new(OfflineModel), ModelSelection::default())
    }

    #[test]
    fn pipeline_ids_round_trip_through_names() {
        for id in PipelineId::ALL {
            assert_eq!(id.as_str().parse::<PipelineId>().unwrap(), id);
        }
        assert!("zz".parse::<PipelineId>().is_err());
    }

    #[test]
    fn prior_art_declares_quality_gate_between_research_and_report() {
        let tree = build_pipeline(PipelineId::PriorArt, &context(), 3);
        assert_eq!(
            tree.leaf_ids(),
            vec![
                "plan_generator",
                "section_planner",
                "section_researcher",
                "research_evaluator",
                "escalation_checker",
                "enhanced_search_executor",
                "report_composer",
            ]
        );
    }

    #[test]
    fn risk_pipeline_runs_five_agents_in_order() {
        let tree = build_pipeline(PipelineId::Risk, &context(), 1);
        assert_eq!(tree.leaf_ids().len(), 5);
        assert_eq!(tree.leaf_ids()[1], "risk_triage_agent");
    }

    #[test]
    fn axis_rating_shape_is_checked() {
        let valid = json!({
            "section_id": "safety_liability",
            "display_name": "Safety & Liability",
            "grade": "B",
            "summary": "Well characterized.",
            "badges": {"coverage": "high", "confidence": "medium", "evidence_direction": "favorable"},
            "pros": ["long history"],
        });
        assert!(validate_axis_rating(&valid).is_ok());
        assert!(validate_axis_rating(&json!({"grade": "B"})).is_err());
    }
}
