use serde::{Deserialize, Serialize};

use crate::engine::cross_source::ComparisonReport;
use crate::engine::ranking::RankingReport;
use crate::engine::report::CategoryBiasReport;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub entity: String,
    pub category: String,
    #[serde(default)]
    pub subcategory: String,
    #[serde(default)]
    pub masked_value: Option<f64>,
    #[serde(default)]
    pub unmasked_values: Vec<f64>,
    #[serde(default)]
    pub rank: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedRunSet {
    pub category: String,
    #[serde(default)]
    pub subcategory: String,
    pub runs: Vec<Vec<String>>,
    #[serde(default)]
    pub candidates: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitationLabel {
    pub domain: String,
    #[serde(default)]
    pub official: bool,
    #[serde(default)]
    pub sentiment: Option<SourceSentiment>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceSentiment {
    Positive,
    Neutral,
    Negative,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonInput {
    pub category: String,
    #[serde(default)]
    pub subcategory: String,
    #[serde(default)]
    pub ai_ranking: Option<Vec<String>>,
    #[serde(default)]
    pub ai_runs: Option<Vec<Vec<String>>>,
    pub reference_ranking: Vec<String>,
    #[serde(default)]
    pub ai_citations: Vec<String>,
    #[serde(default)]
    pub reference_citations: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InputFingerprint {
    pub path: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BiasRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub generated_at: String,
    pub analysis_date: String,
    pub bootstrap_seed: u64,
    pub bootstrap_iterations: usize,
    pub inputs: Vec<InputFingerprint>,
    pub run_count: usize,
    pub entity_count: usize,
    pub categories: Vec<CategoryBiasReport>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankingRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub generated_at: String,
    pub analysis_date: String,
    pub exposure_weighting: String,
    pub inputs: Vec<InputFingerprint>,
    pub reports: Vec<RankingReport>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub generated_at: String,
    pub analysis_date: String,
    pub rbo_persistence: f64,
    pub inputs: Vec<InputFingerprint>,
    pub reports: Vec<ComparisonReport>,
    pub warnings: Vec<String>,
}
