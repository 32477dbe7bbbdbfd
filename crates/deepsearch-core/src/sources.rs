//! Cumulative source registry built from grounding metadata, plus citation rendering.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::session::{GroundingMetadata, SessionState};

pub const SOURCES_KEY: &str = "sources";
pub const URL_TO_SHORT_ID_KEY: &str = "url_to_short_id";

const DEFAULT_CONFIDENCE: f64 = 0.5;

static CITE_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<cite\s+source\s*=\s*["']?\s*(src-\d+)\s*["']?\s*/>"#)
        .expect("invalid cite regex")
});

static SPACE_BEFORE_PUNCT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+([.,;:])").expect("invalid punctuation regex"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportedClaim {
    pub text_segment: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub short_id: String,
    pub title: String,
    pub url: String,
    pub domain: Option<String>,
    #[serde(default)]
    pub supported_claims: Vec<SupportedClaim>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceRegistry {
    pub sources: BTreeMap<String, SourceEntry>,
    pub url_to_short_id: BTreeMap<String, String>,
}

impl SourceRegistry {
    pub fn load(state: &SessionState) -> Self {
        Self {
            sources: state.get_as(SOURCES_KEY).unwrap_or_default(),
            url_to_short_id: state.get_as(URL_TO_SHORT_ID_KEY).unwrap_or_default(),
        }
    }

    pub fn store(&self, state: &mut SessionState) {
        state.set(URL_TO_SHORT_ID_KEY, &self.url_to_short_id);
        state.set(SOURCES_KEY, &self.sources);
    }

    /// Register every web chunk and attach supported claims to their sources.
    pub fn ingest(&mut self, grounding: &GroundingMetadata) {
        let mut chunk_ids: BTreeMap<usize, String> = BTreeMap::new();

        for (idx, chunk) in grounding.chunks.iter().enumerate() {
            let Some(web) = &chunk.web else {
                continue;
            };
            let short_id = match self.url_to_short_id.get(&web.uri) {
                Some(existing) => existing.clone(),
                None => {
                    let short_id = format!("src-{}", self.url_to_short_id.len() + 1);
                    let title = match (&web.title, &web.domain) {
                        (Some(title), Some(domain)) if title == domain => domain.clone(),
                        (Some(title), _) => title.clone(),
                        (None, Some(domain)) => domain.clone(),
                        (None, None) => web.uri.clone(),
                    };
                    self.url_to_short_id
                        .insert(web.uri.clone(), short_id.clone());
                    self.sources.insert(
                        short_id.clone(),
                        SourceEntry {
                            short_id: short_id.clone(),
                            title,
                            url: web.uri.clone(),
                            domain: web.domain.clone(),
                            supported_claims: Vec::new(),
                        },
                    );
                    short_id
                }
            };
            chunk_ids.insert(idx, short_id);
        }

        for support in &grounding.supports {
            for (position, chunk_idx) in support.chunk_indices.iter().enumerate() {
                let Some(short_id) = chunk_ids.get(chunk_idx) else {
                    continue;
                };
                let confidence = support
                    .confidence_scores
                    .get(position)
                    .copied()
                    .unwrap_or(DEFAULT_CONFIDENCE);
                if let Some(entry) = self.sources.get_mut(short_id) {
                    entry.supported_claims.push(SupportedClaim {
                        text_segment: support.segment_text.clone().unwrap_or_default(),
                        confidence,
                    });
                }
            }
        }
    }

    /// Replace `<cite source="src-N"/>` tags with markdown links.
    ///
    /// Unknown ids are dropped with a warning; whitespace before punctuation is collapsed.
    pub fn render_citations(&self, report: &str) -> String {
        let replaced = CITE_TAG.replace_all(report, |caps: &Captures| {
            let short_id = &caps[1];
            match self.sources.get(short_id) {
                Some(source) => format!(" [{}]({})", source.title, source.url),
                None => {
                    warn!(tag = &caps[0], "invalid citation tag removed");
                    String::new()
                }
            }
        });
        SPACE_BEFORE_PUNCT.replace_all(&replaced, "$1").into_owned()
    }
}
