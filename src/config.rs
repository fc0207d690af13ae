use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engine::error::{EngineError, EngineResult};

pub const CONFIG_PATH_ENV: &str = "BIAS_METRICS_CONFIG";
pub const MIN_BOOTSTRAP_ITERATIONS: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub min_samples: MinSamples,
    pub bias_thresholds: BiasThresholds,
    pub effect_size_thresholds: EffectSizeThresholds,
    pub stability_thresholds: StabilityThresholds,
    pub bootstrap: BootstrapConfig,
    pub exposure_weighting: ExposureWeighting,
    pub top_k: Vec<usize>,
    pub category_top_k: BTreeMap<String, usize>,
    pub eo_k: usize,
    pub rbo_persistence: f64,
    pub alerts: AlertThresholds,
    pub integrated_weights: IntegratedWeights,
    pub market_impact: MarketImpactTransform,
    pub zero_epsilon: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_samples: MinSamples::default(),
            bias_thresholds: BiasThresholds::default(),
            effect_size_thresholds: EffectSizeThresholds::default(),
            stability_thresholds: StabilityThresholds::default(),
            bootstrap: BootstrapConfig::default(),
            exposure_weighting: ExposureWeighting::Linear,
            top_k: vec![1, 3],
            category_top_k: BTreeMap::new(),
            eo_k: 1,
            rbo_persistence: 0.9,
            alerts: AlertThresholds::default(),
            integrated_weights: IntegratedWeights::default(),
            market_impact: MarketImpactTransform::default(),
            zero_epsilon: 1e-9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MinSamples {
    pub raw_delta: usize,
    pub bias_index: usize,
    pub cliffs_delta: usize,
    pub sign_test: usize,
    pub bootstrap: usize,
    pub stability: usize,
    pub ranking_stability: usize,
}

impl Default for MinSamples {
    fn default() -> Self {
        Self {
            raw_delta: 2,
            bias_index: 3,
            cliffs_delta: 5,
            sign_test: 5,
            bootstrap: 5,
            stability: 3,
            ranking_stability: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BiasThresholds {
    pub very_strong: f64,
    pub strong: f64,
    pub moderate: f64,
}

impl Default for BiasThresholds {
    fn default() -> Self {
        Self {
            very_strong: 1.5,
            strong: 0.8,
            moderate: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectSizeThresholds {
    pub large: f64,
    pub medium: f64,
    pub small: f64,
}

impl Default for EffectSizeThresholds {
    fn default() -> Self {
        Self {
            large: 0.474,
            medium: 0.33,
            small: 0.147,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilityThresholds {
    pub very_stable: f64,
    pub stable: f64,
    pub moderate: f64,
    pub unstable: f64,
}

impl Default for StabilityThresholds {
    fn default() -> Self {
        Self {
            very_stable: 0.9,
            stable: 0.7,
            moderate: 0.5,
            unstable: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub iterations: usize,
    pub seed: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            iterations: 10_000,
            seed: 0x5EED_B1A5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum ExposureWeighting {
    Linear,
    Reciprocal,
    Logarithmic,
    PointTable { points: Vec<f64> },
}

impl ExposureWeighting {
    pub fn weight(&self, rank: usize, candidate_count: usize) -> f64 {
        if rank == 0 {
            return 0.0;
        }

        match self {
            Self::Linear => {
                if candidate_count == 0 || rank > candidate_count {
                    return 0.0;
                }
                (candidate_count - rank + 1) as f64 / candidate_count as f64
            }
            Self::Reciprocal => 1.0 / rank as f64,
            Self::Logarithmic => 1.0 / (rank as f64 + 1.0).log2(),
            Self::PointTable { points } => points.get(rank - 1).copied().unwrap_or(0.0),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Reciprocal => "reciprocal",
            Self::Logarithmic => "logarithmic",
            Self::PointTable { .. } => "point_table",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    pub parity_gap: f64,
    pub eo_gap: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            parity_gap: 0.3,
            eo_gap: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratedWeights {
    pub sentiment: f64,
    pub ranking: f64,
}

impl Default for IntegratedWeights {
    fn default() -> Self {
        Self {
            sentiment: 0.7,
            ranking: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transform", rename_all = "snake_case")]
pub enum MarketImpactTransform {
    Exponential { base_step: f64 },
    Linear { step: f64 },
}

impl Default for MarketImpactTransform {
    fn default() -> Self {
        Self::Exponential { base_step: 0.1 }
    }
}

impl MarketImpactTransform {
    pub fn multiplier(&self, delta_rank: i64) -> f64 {
        match self {
            Self::Exponential { base_step } => (1.0 + base_step).powi(delta_rank as i32),
            Self::Linear { step } => (1.0 + step * delta_rank as f64).max(0.0),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if self.bootstrap.iterations < MIN_BOOTSTRAP_ITERATIONS {
            return Err(EngineError::invalid_config(format!(
                "bootstrap.iterations must be >= {MIN_BOOTSTRAP_ITERATIONS}, got {}",
                self.bootstrap.iterations
            )));
        }
        if !(self.rbo_persistence > 0.0 && self.rbo_persistence < 1.0) {
            return Err(EngineError::invalid_config(format!(
                "rbo_persistence must be in (0, 1), got {}",
                self.rbo_persistence
            )));
        }
        if self.top_k.is_empty() || self.top_k.contains(&0) {
            return Err(EngineError::invalid_config(
                "top_k must list at least one k >= 1",
            ));
        }
        if self.category_top_k.values().any(|k| *k == 0) || self.eo_k == 0 {
            return Err(EngineError::invalid_config("k values must be >= 1"));
        }
        if let ExposureWeighting::PointTable { points } = &self.exposure_weighting {
            if points.iter().any(|value| !value.is_finite() || *value < 0.0) {
                return Err(EngineError::invalid_config(
                    "exposure point table values must be finite and non-negative",
                ));
            }
            if points.windows(2).any(|pair| pair[1] > pair[0]) {
                return Err(EngineError::invalid_config(
                    "exposure point table must be non-increasing",
                ));
            }
        }
        match &self.market_impact {
            MarketImpactTransform::Exponential { base_step } if *base_step <= -1.0 => {
                return Err(EngineError::invalid_config(
                    "market_impact.base_step must be > -1",
                ));
            }
            MarketImpactTransform::Linear { step } if *step < 0.0 => {
                return Err(EngineError::invalid_config(
                    "market_impact.step must be >= 0",
                ));
            }
            _ => {}
        }
        let thresholds_descending = |values: &[f64]| values.windows(2).all(|pair| pair[0] >= pair[1]);
        if !thresholds_descending(&[
            self.bias_thresholds.very_strong,
            self.bias_thresholds.strong,
            self.bias_thresholds.moderate,
        ]) || !thresholds_descending(&[
            self.effect_size_thresholds.large,
            self.effect_size_thresholds.medium,
            self.effect_size_thresholds.small,
        ]) || !thresholds_descending(&[
            self.stability_thresholds.very_stable,
            self.stability_thresholds.stable,
            self.stability_thresholds.moderate,
            self.stability_thresholds.unstable,
        ]) {
            return Err(EngineError::invalid_config(
                "band thresholds must be listed from strongest to weakest",
            ));
        }
        if self.zero_epsilon < 0.0 {
            return Err(EngineError::invalid_config("zero_epsilon must be >= 0"));
        }
        Ok(())
    }

    pub fn category_k(&self, category: &str) -> usize {
        self.category_top_k
            .get(category)
            .copied()
            .or_else(|| self.top_k.iter().max().copied())
            .unwrap_or(1)
    }

    pub fn top_k_for(&self, category: &str) -> Vec<usize> {
        let mut ks = self.top_k.clone();
        ks.push(self.category_k(category));
        ks.push(self.eo_k);
        ks.sort_unstable();
        ks.dedup();
        ks
    }
}

pub fn resolve_config_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    cli_path.map(Path::to_path_buf).or_else(|| {
        std::env::var(CONFIG_PATH_ENV)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
    })
}

pub fn load_config(cli_path: Option<&Path>) -> Result<EngineConfig> {
    let config = match resolve_config_path(cli_path) {
        Some(path) => {
            let raw = fs::read(&path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            let config: EngineConfig = serde_json::from_slice(&raw)
                .with_context(|| format!("failed to parse config {}", path.display()))?;
            info!(path = %path.display(), "loaded engine config");
            config
        }
        None => EngineConfig::default(),
    };

    config.validate()?;
    Ok(config)
}
