use std::collections::BTreeMap;

use chrono::NaiveDate;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::aggregate::{EntitySampleSet, SampleKey, ScoreSummary, aggregate, collect_sample_sets};
use super::error::EngineResult;
use super::integrated::{integrated_index, rank_percentile};
use super::metric::{Metric, NullReason};
use super::reliability::ReliabilityTier;
use super::sentiment::{
    BiasDirection, BiasStrength, ConfidenceInterval, EffectSize, StabilityBreakdown,
    StabilityLabel, bias_index, bootstrap_interval, category_delta_scale, cliffs_delta, raw_delta,
    sign_test_p_value, stability,
};
use super::stats::mean;
use crate::config::EngineConfig;
use crate::model::Run;

#[derive(Debug, Clone, Serialize)]
pub struct BiasReport {
    pub category: String,
    pub subcategory: String,
    pub entity: String,
    pub analysis_date: NaiveDate,
    pub run_count: usize,
    pub sample_count: usize,
    pub reliability_tier: Metric<ReliabilityTier>,
    pub masked: ScoreSummary,
    pub unmasked: ScoreSummary,
    pub raw_delta: Metric<f64>,
    pub direction: Option<BiasDirection>,
    pub bias_index: Metric<f64>,
    pub bias_strength: Option<BiasStrength>,
    pub cliffs_delta: Metric<f64>,
    pub effect_size: Option<EffectSize>,
    pub sign_test_p_value: Metric<f64>,
    pub confidence_interval: Metric<ConfidenceInterval>,
    pub stability: Metric<StabilityBreakdown>,
    pub stability_label: Option<StabilityLabel>,
    pub mean_rank: Metric<f64>,
    pub rank_percentile: Metric<f64>,
    pub integrated_index: Metric<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryBiasReport {
    pub category: String,
    pub delta_scale: Metric<f64>,
    pub entities: Vec<BiasReport>,
}

pub fn derive_seed(base_seed: u64, key: &SampleKey) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(key.category.as_bytes());
    hasher.update([0x1f]);
    hasher.update(key.subcategory.as_bytes());
    hasher.update([0x1f]);
    hasher.update(key.entity.as_bytes());
    let digest = hasher.finalize();

    let mut prefix = [0_u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    base_seed ^ u64::from_le_bytes(prefix)
}

fn candidate_counts(sets: &BTreeMap<SampleKey, EntitySampleSet>) -> BTreeMap<(String, String), usize> {
    let mut counts = BTreeMap::<(String, String), (usize, usize)>::new();
    for (key, set) in sets {
        let deepest = set.ranks.iter().copied().max().unwrap_or(0) as usize;
        let (entities, depth) = counts
            .entry((key.category.clone(), key.subcategory.clone()))
            .or_default();
        *entities += 1;
        *depth = (*depth).max(deepest);
    }
    counts
        .into_iter()
        .map(|(group, (entities, depth))| (group, entities.max(depth)))
        .collect()
}

fn mean_rank(samples: &EntitySampleSet) -> Metric<f64> {
    let ranks = samples
        .ranks
        .iter()
        .map(|rank| f64::from(*rank))
        .collect::<Vec<f64>>();
    match mean(&ranks) {
        Some(value) => Metric::available(value),
        None => Metric::unavailable(NullReason::InsufficientSamples)
            .with_detail("entity was never ranked"),
    }
}

pub fn build_entity_report(
    key: &SampleKey,
    samples: &EntitySampleSet,
    delta_scale: &Metric<f64>,
    candidate_count: usize,
    config: &EngineConfig,
    analysis_date: NaiveDate,
) -> EngineResult<BiasReport> {
    let summary = aggregate(samples);
    let reliability_tier = Metric::recover(ReliabilityTier::classify(samples.run_count))?;

    let raw_delta = Metric::recover(raw_delta(samples, config))?;
    let bias_index = Metric::recover(bias_index(samples, delta_scale, config))?;
    let cliffs_delta = Metric::recover(cliffs_delta(samples, config))?;
    let sign_test_p_value = Metric::recover(sign_test_p_value(samples, config))?;
    let mut rng = StdRng::seed_from_u64(derive_seed(config.bootstrap.seed, key));
    let confidence_interval = Metric::recover(bootstrap_interval(samples, config, &mut rng))?;
    let stability = Metric::recover(stability(samples, config))?;

    let mean_rank = mean_rank(samples);
    let rank_percentile = match mean_rank.get() {
        Some(value) => Metric::recover(rank_percentile(value, candidate_count))?,
        None => mean_rank.null_of(),
    };
    let integrated_index =
        integrated_index(&bias_index, &rank_percentile, &config.integrated_weights);

    Ok(BiasReport {
        category: key.category.clone(),
        subcategory: key.subcategory.clone(),
        entity: key.entity.clone(),
        analysis_date,
        run_count: samples.run_count,
        sample_count: samples.total_samples(),
        reliability_tier,
        masked: summary.masked,
        unmasked: summary.unmasked,
        direction: raw_delta
            .get()
            .map(|delta| BiasDirection::from_delta(delta, config.zero_epsilon)),
        raw_delta,
        bias_strength: bias_index
            .get()
            .map(|value| BiasStrength::classify(value, &config.bias_thresholds)),
        bias_index,
        effect_size: cliffs_delta
            .get()
            .map(|value| EffectSize::classify(value, &config.effect_size_thresholds)),
        cliffs_delta,
        sign_test_p_value,
        confidence_interval,
        stability_label: stability
            .as_ref()
            .map(|breakdown| StabilityLabel::classify(breakdown.score, &config.stability_thresholds)),
        stability,
        mean_rank,
        rank_percentile,
        integrated_index,
    })
}

pub fn build_bias_reports(
    runs: &[Run],
    config: &EngineConfig,
    analysis_date: NaiveDate,
) -> EngineResult<Vec<CategoryBiasReport>> {
    config.validate()?;
    let sets = collect_sample_sets(runs);
    let candidate_counts = candidate_counts(&sets);

    let mut by_category = BTreeMap::<&str, Vec<(&SampleKey, &EntitySampleSet)>>::new();
    for (key, set) in &sets {
        by_category
            .entry(key.category.as_str())
            .or_default()
            .push((key, set));
    }

    let mut reports = Vec::with_capacity(by_category.len());
    for (category, members) in by_category {
        let raw_deltas = members
            .iter()
            .map(|(_, set)| Metric::recover(raw_delta(set, config)))
            .collect::<EngineResult<Vec<Metric<f64>>>>()?;
        let delta_scale = category_delta_scale(&raw_deltas, config.zero_epsilon);
        debug!(
            category,
            delta_scale = ?delta_scale.get(),
            "category delta scale"
        );

        let mut entities = Vec::with_capacity(members.len());
        for (key, set) in members {
            let candidate_count = candidate_counts
                .get(&(key.category.clone(), key.subcategory.clone()))
                .copied()
                .unwrap_or(0);
            entities.push(build_entity_report(
                key,
                set,
                &delta_scale,
                candidate_count,
                config,
                analysis_date,
            )?);
        }

        info!(
            category,
            entities = entities.len(),
            "built bias reports"
        );
        reports.push(CategoryBiasReport {
            category: category.to_string(),
            delta_scale,
            entities,
        });
    }

    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(entity: &str, masked: Option<f64>, unmasked: &[f64], rank: Option<u32>) -> Run {
        Run {
            entity: entity.to_string(),
            category: "cloud".to_string(),
            subcategory: "storage".to_string(),
            masked_value: masked,
            unmasked_values: unmasked.to_vec(),
            rank,
        }
    }

    fn config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.bootstrap.iterations = 1_000;
        config
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).expect("valid date")
    }

    #[test]
    fn single_masked_sample_scenario_reports_nulls_with_reasons() {
        let runs = vec![
            run("A", Some(3.0), &[4.0], Some(1)),
            run("A", None, &[4.0], Some(1)),
            run("A", None, &[5.0], Some(2)),
            run("B", None, &[], Some(2)),
        ];
        let reports = build_bias_reports(&runs, &config(), date()).expect("reports");
        assert_eq!(reports.len(), 1);

        let category = &reports[0];
        let a = category
            .entities
            .iter()
            .find(|report| report.entity == "A")
            .expect("A reported");
        assert!((a.raw_delta.get().expect("raw delta") - 4.0 / 3.0).abs() < 1e-12);
        assert_eq!(a.bias_index.get(), Some(1.0));
        assert_eq!(a.bias_strength, Some(BiasStrength::Strong));
        assert_eq!(a.direction, Some(BiasDirection::Favorable));
        assert_eq!(a.cliffs_delta.reason, Some(NullReason::InsufficientSamples));
        assert_eq!(a.sign_test_p_value.reason, Some(NullReason::InsufficientSamples));
        assert_eq!(a.effect_size, None);
        assert_eq!(a.reliability_tier.get(), Some(ReliabilityTier::Preliminary));

        // mean rank 4/3 over two candidates
        let percentile = a.rank_percentile.get().expect("percentile");
        assert!((percentile - (1.0 - 1.0 / 3.0)).abs() < 1e-12);
        let expected = 0.7 * 1.0 + 0.3 * (percentile - 0.5);
        assert!((a.integrated_index.get().expect("integrated") - expected).abs() < 1e-12);

        let b = category
            .entities
            .iter()
            .find(|report| report.entity == "B")
            .expect("B reported");
        assert_eq!(b.raw_delta.reason, Some(NullReason::InsufficientSamples));
        assert!(!b.integrated_index.available);
        assert_eq!(
            b.integrated_index.detail.as_deref(),
            Some("missing input: bias_index")
        );
        assert!(!b.reliability_tier.available);
    }

    #[test]
    fn zero_category_scale_marks_bias_index_zero_denominator() {
        let runs = vec![
            run("A", Some(4.0), &[4.0, 4.0], None),
            run("A", None, &[4.0], None),
        ];
        let reports = build_bias_reports(&runs, &config(), date()).expect("reports");
        let a = &reports[0].entities[0];
        assert_eq!(a.raw_delta.get(), Some(0.0));
        assert_eq!(a.direction, Some(BiasDirection::Neutral));
        assert_eq!(a.bias_index.reason, Some(NullReason::ZeroDenominator));
        assert_eq!(a.mean_rank.reason, Some(NullReason::InsufficientSamples));
    }

    #[test]
    fn bootstrap_results_do_not_depend_on_run_order() {
        let entity_run = |entity: &str, i: usize| {
            run(entity, Some(2.0 + (i % 3) as f64), &[3.0 + (i % 2) as f64], None)
        };
        let mut grouped = Vec::new();
        for entity in ["A", "B", "C"] {
            for i in 0..6 {
                grouped.push(entity_run(entity, i));
            }
        }
        let mut interleaved = Vec::new();
        for i in 0..6 {
            for entity in ["C", "A", "B"] {
                interleaved.push(entity_run(entity, i));
            }
        }

        let forward = build_bias_reports(&grouped, &config(), date()).expect("reports");
        let backward = build_bias_reports(&interleaved, &config(), date()).expect("reports");

        for (left, right) in forward[0].entities.iter().zip(&backward[0].entities) {
            assert_eq!(left.entity, right.entity);
            let left_ci = left.confidence_interval.as_ref().expect("ci");
            let right_ci = right.confidence_interval.as_ref().expect("ci");
            assert_eq!(left_ci.low.to_bits(), right_ci.low.to_bits());
            assert_eq!(left_ci.high.to_bits(), right_ci.high.to_bits());
        }
    }

    #[test]
    fn derived_seeds_differ_per_entity() {
        let a = derive_seed(7, &SampleKey::new("cloud", "storage", "A"));
        let b = derive_seed(7, &SampleKey::new("cloud", "storage", "B"));
        assert_ne!(a, b);
        assert_eq!(a, derive_seed(7, &SampleKey::new("cloud", "storage", "A")));
    }
}
