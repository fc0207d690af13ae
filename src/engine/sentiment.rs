use rand::Rng;
use serde::Serialize;

use super::aggregate::EntitySampleSet;
use super::error::{EngineError, EngineResult, require_samples};
use super::metric::{Metric, NullReason};
use super::stats::{
    bootstrap_delta_interval_95, mean, pearson, sample_std_dev, sign_test_two_sided_p_value,
};
use crate::config::{BiasThresholds, EffectSizeThresholds, EngineConfig, StabilityThresholds};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BiasStrength {
    VeryStrong,
    Strong,
    Moderate,
    Weak,
}

impl BiasStrength {
    pub fn classify(bias_index: f64, thresholds: &BiasThresholds) -> Self {
        let magnitude = bias_index.abs();
        if magnitude >= thresholds.very_strong {
            Self::VeryStrong
        } else if magnitude >= thresholds.strong {
            Self::Strong
        } else if magnitude >= thresholds.moderate {
            Self::Moderate
        } else {
            Self::Weak
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BiasDirection {
    Favorable,
    Unfavorable,
    Neutral,
}

impl BiasDirection {
    pub fn from_delta(delta: f64, epsilon: f64) -> Self {
        if delta > epsilon {
            Self::Favorable
        } else if delta < -epsilon {
            Self::Unfavorable
        } else {
            Self::Neutral
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectSize {
    Large,
    Medium,
    Small,
    Negligible,
}

impl EffectSize {
    pub fn classify(delta: f64, thresholds: &EffectSizeThresholds) -> Self {
        let magnitude = delta.abs();
        if magnitude >= thresholds.large {
            Self::Large
        } else if magnitude >= thresholds.medium {
            Self::Medium
        } else if magnitude >= thresholds.small {
            Self::Small
        } else {
            Self::Negligible
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StabilityLabel {
    VeryStable,
    Stable,
    ModeratelyStable,
    Unstable,
    VeryUnstable,
}

impl StabilityLabel {
    pub fn classify(score: f64, thresholds: &StabilityThresholds) -> Self {
        if score >= thresholds.very_stable {
            Self::VeryStable
        } else if score >= thresholds.stable {
            Self::Stable
        } else if score >= thresholds.moderate {
            Self::ModeratelyStable
        } else if score >= thresholds.unstable {
            Self::Unstable
        } else {
            Self::VeryUnstable
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct ConfidenceInterval {
    pub low: f64,
    pub high: f64,
    pub significant: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct StabilityBreakdown {
    pub score: f64,
    pub consistency: f64,
    pub run_correlation: Option<f64>,
}

pub fn raw_delta(samples: &EntitySampleSet, config: &EngineConfig) -> EngineResult<f64> {
    require_samples("raw_delta", config.min_samples.raw_delta, samples.total_samples())?;
    let masked_mean = mean(&samples.masked)
        .ok_or_else(|| EngineError::insufficient("raw_delta", 1, 0))?;
    let unmasked_mean = mean(&samples.unmasked)
        .ok_or_else(|| EngineError::insufficient("raw_delta", 1, 0))?;
    Ok(unmasked_mean - masked_mean)
}

pub fn category_delta_scale<'a>(
    raw_deltas: impl IntoIterator<Item = &'a Metric<f64>>,
    epsilon: f64,
) -> Metric<f64> {
    let magnitudes = raw_deltas
        .into_iter()
        .filter_map(Metric::get)
        .map(f64::abs)
        .collect::<Vec<f64>>();

    match mean(&magnitudes) {
        None => Metric::unavailable(NullReason::InsufficientSamples)
            .with_detail("no entity in the category has a computable raw delta"),
        Some(scale) if scale <= epsilon => Metric::unavailable(NullReason::ZeroDenominator)
            .with_detail("mean absolute delta across the category is zero"),
        Some(scale) => Metric::available(scale),
    }
}

pub fn bias_index(
    samples: &EntitySampleSet,
    delta_scale: &Metric<f64>,
    config: &EngineConfig,
) -> EngineResult<f64> {
    require_samples("bias_index", config.min_samples.bias_index, samples.total_samples())?;
    let delta = raw_delta(samples, config)?;
    let scale = match (delta_scale.get(), delta_scale.reason) {
        (Some(scale), _) if scale > config.zero_epsilon => scale,
        (None, Some(NullReason::InsufficientSamples)) => {
            return Err(EngineError::insufficient("bias_index", 1, 0));
        }
        _ => return Err(EngineError::ZeroDenominator { metric: "bias_index" }),
    };
    Ok(delta / scale)
}

pub fn cliffs_delta(samples: &EntitySampleSet, config: &EngineConfig) -> EngineResult<f64> {
    let floor = config.min_samples.cliffs_delta;
    require_samples("cliffs_delta", floor, samples.masked.len())?;
    require_samples("cliffs_delta", floor, samples.unmasked.len())?;

    let mut greater = 0_i64;
    let mut less = 0_i64;
    for masked in &samples.masked {
        for unmasked in &samples.unmasked {
            if masked < unmasked {
                greater += 1;
            } else if masked > unmasked {
                less += 1;
            }
        }
    }

    let pairs = (samples.masked.len() * samples.unmasked.len()) as f64;
    Ok((greater - less) as f64 / pairs)
}

pub fn sign_test_p_value(samples: &EntitySampleSet, config: &EngineConfig) -> EngineResult<f64> {
    let floor = config.min_samples.sign_test;
    require_samples("sign_test", floor, samples.masked.len())?;
    require_samples("sign_test", floor, samples.unmasked.len())?;

    let deltas = samples
        .masked
        .iter()
        .flat_map(|masked| samples.unmasked.iter().map(move |unmasked| unmasked - masked))
        .collect::<Vec<f64>>();
    Ok(sign_test_two_sided_p_value(&deltas).unwrap_or(1.0))
}

pub fn bootstrap_interval<R: Rng + ?Sized>(
    samples: &EntitySampleSet,
    config: &EngineConfig,
    rng: &mut R,
) -> EngineResult<ConfidenceInterval> {
    let floor = config.min_samples.bootstrap;
    require_samples("bootstrap_ci", floor, samples.masked.len())?;
    require_samples("bootstrap_ci", floor, samples.unmasked.len())?;

    let (low, high) = bootstrap_delta_interval_95(
        &samples.masked,
        &samples.unmasked,
        config.bootstrap.iterations,
        rng,
    )
    .ok_or_else(|| EngineError::insufficient("bootstrap_ci", floor, 0))?;

    Ok(ConfidenceInterval {
        low,
        high,
        significant: low > 0.0 || high < 0.0,
    })
}

pub fn stability(samples: &EntitySampleSet, config: &EngineConfig) -> EngineResult<StabilityBreakdown> {
    require_samples("stability", config.min_samples.stability, samples.unmasked.len())?;

    let center = mean(&samples.unmasked)
        .ok_or_else(|| EngineError::insufficient("stability", 1, 0))?;
    let spread = sample_std_dev(&samples.unmasked).unwrap_or(0.0);
    let cv = if center.abs() <= config.zero_epsilon {
        if spread <= config.zero_epsilon { 0.0 } else { 1.0 }
    } else {
        spread / center.abs()
    };
    let consistency = (1.0 - cv).clamp(0.0, 1.0);

    let run_correlation = mean_run_correlation(&samples.unmasked_by_run);
    let score = match run_correlation {
        Some(r) => (consistency + (r + 1.0) / 2.0) / 2.0,
        None => consistency,
    };

    Ok(StabilityBreakdown {
        score: score.clamp(0.0, 1.0),
        consistency,
        run_correlation,
    })
}

fn mean_run_correlation(runs: &[Vec<f64>]) -> Option<f64> {
    let width = runs.first()?.len();
    if width < 2 || runs.len() < 2 || runs.iter().any(|run| run.len() != width) {
        return None;
    }

    let mut correlations = Vec::new();
    for i in 0..runs.len() {
        for j in (i + 1)..runs.len() {
            if let Some(r) = pearson(&runs[i], &runs[j]) {
                correlations.push(r);
            }
        }
    }
    mean(&correlations)
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn samples(masked: &[f64], unmasked: &[f64]) -> EntitySampleSet {
        EntitySampleSet {
            masked: masked.to_vec(),
            unmasked: unmasked.to_vec(),
            unmasked_by_run: unmasked.iter().map(|value| vec![*value]).collect(),
            ..EntitySampleSet::default()
        }
    }

    #[test]
    fn single_masked_sample_scenario() {
        let config = EngineConfig::default();
        let set = samples(&[3.0], &[4.0, 4.0, 5.0]);

        let delta = raw_delta(&set, &config).expect("raw delta should be computed");
        assert!((delta - (13.0 / 3.0 - 3.0)).abs() < 1e-12);

        let scale = Metric::available(1.0);
        let bi = bias_index(&set, &scale, &config).expect("bias index should be computed");
        assert!((bi - delta).abs() < 1e-12);

        assert!(matches!(
            cliffs_delta(&set, &config),
            Err(EngineError::InsufficientData { required: 5, actual: 1, .. })
        ));
        assert!(matches!(
            sign_test_p_value(&set, &config),
            Err(EngineError::InsufficientData { .. })
        ));
    }

    #[test]
    fn raw_delta_needs_both_groups() {
        let config = EngineConfig::default();
        assert!(raw_delta(&samples(&[], &[4.0, 5.0]), &config).is_err());
        assert!(raw_delta(&samples(&[3.0], &[]), &config).is_err());
    }

    #[test]
    fn bias_index_respects_zero_denominator() {
        let config = EngineConfig::default();
        let set = samples(&[3.0], &[3.0, 3.0]);
        let scale = category_delta_scale([&Metric::available(0.0)], config.zero_epsilon);
        assert_eq!(scale.reason, Some(NullReason::ZeroDenominator));
        assert!(matches!(
            bias_index(&set, &scale, &config),
            Err(EngineError::ZeroDenominator { .. })
        ));
    }

    #[test]
    fn category_delta_scale_ignores_null_deltas() {
        let deltas = vec![
            Metric::available(1.0),
            Metric::available(-3.0),
            Metric::unavailable(NullReason::InsufficientSamples),
        ];
        let scale = category_delta_scale(&deltas, 1e-9);
        assert_eq!(scale.get(), Some(2.0));
    }

    #[test]
    fn cliffs_delta_uses_cross_product() {
        let config = EngineConfig::default();
        let set = samples(&[1.0, 2.0, 3.0, 4.0, 5.0], &[2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        // 30 pairs: masked < unmasked in 20, masked > unmasked in 6, ties 4.
        let delta = cliffs_delta(&set, &config).expect("delta should be computed");
        assert!((delta - 14.0 / 30.0).abs() < 1e-12);
        assert_eq!(
            EffectSize::classify(delta, &config.effect_size_thresholds),
            EffectSize::Medium
        );
    }

    #[test]
    fn identical_groups_have_no_effect() {
        let config = EngineConfig::default();
        let set = samples(&[3.0; 5], &[3.0; 5]);
        assert_eq!(cliffs_delta(&set, &config).expect("delta"), 0.0);
        assert_eq!(raw_delta(&set, &config).expect("raw delta"), 0.0);
        assert_eq!(sign_test_p_value(&set, &config).expect("p value"), 1.0);
    }

    #[test]
    fn sign_test_counts_every_masked_unmasked_pair() {
        let config = EngineConfig::default();
        let set = samples(&[1.0, 2.0, 3.0, 4.0, 5.0], &[3.0, 3.0, 3.0, 3.0, 3.0, 6.0]);
        // 30 pairs: 15 positive, 10 negative, 5 ties -> n = 25, k = 10
        let p_value = sign_test_p_value(&set, &config).expect("p value");
        assert!((p_value - 0.424_356_222_152_709_96).abs() < 1e-12);
    }

    #[test]
    fn bootstrap_interval_flags_clear_shift_as_significant() {
        let config = EngineConfig::default();
        let set = samples(&[2.0, 2.0, 3.0, 2.0, 2.0], &[4.0, 5.0, 4.0, 4.0, 5.0]);
        let mut rng = StdRng::seed_from_u64(config.bootstrap.seed);
        let interval = bootstrap_interval(&set, &config, &mut rng).expect("ci should be computed");
        assert!(interval.low > 0.0);
        assert!(interval.significant);
    }

    #[test]
    fn bootstrap_interval_requires_five_per_group() {
        let config = EngineConfig::default();
        let set = samples(&[2.0, 2.0, 3.0, 2.0], &[4.0, 5.0, 4.0, 4.0, 5.0]);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(bootstrap_interval(&set, &config, &mut rng).is_err());
    }

    #[test]
    fn stability_is_one_for_constant_scores() {
        let config = EngineConfig::default();
        let set = samples(&[], &[4.0, 4.0, 4.0]);
        let breakdown = stability(&set, &config).expect("stability should be computed");
        assert_eq!(breakdown.score, 1.0);
        assert_eq!(breakdown.run_correlation, None);
        assert_eq!(
            StabilityLabel::classify(breakdown.score, &config.stability_thresholds),
            StabilityLabel::VeryStable
        );
    }

    #[test]
    fn stability_blends_run_correlation_when_available() {
        let config = EngineConfig::default();
        let set = EntitySampleSet {
            unmasked: vec![1.0, 3.0, 1.0, 3.0],
            unmasked_by_run: vec![vec![1.0, 3.0], vec![1.0, 3.0]],
            ..EntitySampleSet::default()
        };
        let breakdown = stability(&set, &config).expect("stability should be computed");
        let correlation = breakdown.run_correlation.expect("runs correlate");
        assert!((correlation - 1.0).abs() < 1e-12);
        // mean 2, sd = sqrt(4/3), cv = sqrt(4/3)/2
        let consistency = 1.0 - (4.0_f64 / 3.0).sqrt() / 2.0;
        assert!((breakdown.consistency - consistency).abs() < 1e-12);
        assert!((breakdown.score - (consistency + 1.0) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn bias_bands_use_inclusive_lower_bounds() {
        let thresholds = BiasThresholds::default();
        assert_eq!(BiasStrength::classify(1.5, &thresholds), BiasStrength::VeryStrong);
        assert_eq!(BiasStrength::classify(-0.8, &thresholds), BiasStrength::Strong);
        assert_eq!(BiasStrength::classify(0.3, &thresholds), BiasStrength::Moderate);
        assert_eq!(BiasStrength::classify(0.29, &thresholds), BiasStrength::Weak);
        assert_eq!(BiasDirection::from_delta(-0.5, 1e-9), BiasDirection::Unfavorable);
    }
}
