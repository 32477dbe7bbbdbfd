//! Maps phase codes and agent names to pipelines and externally visible app names.

use tracing::{debug, warn};

use crate::pipelines::PipelineId;

/// App name used when a pipeline has no dedicated entry.
pub const FALLBACK_APP_NAME: &str = "app";

const PHASE_TO_AGENT: &[(&str, PipelineId)] = &[
    ("p7a", PipelineId::PriorArt),
    ("p7b", PipelineId::Risk),
    ("p7c", PipelineId::RegulatoryCmc),
    ("p7d", PipelineId::Commercial),
    ("p7e", PipelineId::Mechanistic),
    ("risk", PipelineId::Risk),
    ("commercial", PipelineId::Commercial),
    ("reg", PipelineId::RegulatoryCmc),
    ("unmet", PipelineId::UnmetNeed),
    ("safety", PipelineId::Safety),
    ("mech", PipelineId::Mechanistic),
];

const AGENT_TO_APPNAME: &[(PipelineId, &str)] = &[
    (PipelineId::Commercial, "commercial_agent"),
    (PipelineId::Risk, "risk_agent"),
    (PipelineId::RegulatoryCmc, "regulatory_cmc_agent"),
    (PipelineId::UnmetNeed, "unmet_need_agent"),
    (PipelineId::Safety, "safety_agent"),
    (PipelineId::Mechanistic, "mechanistic_agent"),
];

/// Outcome of resolving a phase or agent token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub pipeline: PipelineId,
    pub app_name: &'static str,
    /// True when nothing matched and the default pipeline was chosen.
    pub defaulted: bool,
}

/// Resolve an explicit agent override, then a phase code, then the default.
///
/// Matching is case-insensitive. Unknown tokens never fail; they log a warning and
/// select [`PipelineId::default`].
pub fn resolve(phase: Option<&str>, agent_override: Option<&str>) -> Selection {
    if let Some(requested) = agent_override.map(str::trim).filter(|s| !s.is_empty()) {
        match requested.parse::<PipelineId>() {
            Ok(pipeline) => return selection(pipeline, false),
            Err(_) => warn!(agent = requested, "unknown agent override; falling back to phase lookup"),
        }
    }

    if let Some(code) = phase.map(str::trim).filter(|s| !s.is_empty()) {
        let code = code.to_ascii_lowercase();
        if let Some((_, pipeline)) = PHASE_TO_AGENT.iter().find(|(key, _)| *key == code) {
            debug!(phase = %code, pipeline = %pipeline, "phase resolved");
            return selection(*pipeline, false);
        }
        warn!(phase = %code, default = %PipelineId::default(), "unknown phase; using default pipeline");
    } else {
        warn!(default = %PipelineId::default(), "no phase or agent given; using default pipeline");
    }
    selection(PipelineId::default(), true)
}

fn selection(pipeline: PipelineId, defaulted: bool) -> Selection {
    Selection {
        pipeline,
        app_name: app_name_for(pipeline),
        defaulted,
    }
}

pub fn app_name_for(pipeline: PipelineId) -> &'static str {
    AGENT_TO_APPNAME
        .iter()
        .find(|(id, _)| *id == pipeline)
        .map_or(FALLBACK_APP_NAME, |(_, name)| *name)
}

/// Reverse lookup used by the runner: app name → pipeline, default on unknown names.
pub fn pipeline_for_app(app_name: &str) -> PipelineId {
    let app_name = app_name.trim();
    if let Some((pipeline, _)) = AGENT_TO_APPNAME
        .iter()
        .find(|(_, name)| name.eq_ignore_ascii_case(app_name))
    {
        return *pipeline;
    }
    if !app_name.eq_ignore_ascii_case(FALLBACK_APP_NAME) {
        warn!(app_name, default = %PipelineId::default(), "unknown app name; using default pipeline");
    }
    PipelineId::default()
}

/// Every app name served, default first.
pub fn app_names() -> Vec<&'static str> {
    let mut names = vec![app_name_for(PipelineId::default())];
    for pipeline in PipelineId::ALL {
        let name = app_name_for(pipeline);
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}
