use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;

use super::metric::{Metric, NullReason};
use super::stats::{mean, sample_std_dev};
use crate::model::Run;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SampleKey {
    pub category: String,
    pub subcategory: String,
    pub entity: String,
}

impl SampleKey {
    pub fn new(
        category: impl Into<String>,
        subcategory: impl Into<String>,
        entity: impl Into<String>,
    ) -> Self {
        Self {
            category: category.into(),
            subcategory: subcategory.into(),
            entity: entity.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EntitySampleSet {
    pub masked: Vec<f64>,
    pub unmasked: Vec<f64>,
    pub unmasked_by_run: Vec<Vec<f64>>,
    pub ranks: Vec<u32>,
    pub run_count: usize,
    pub dropped_values: usize,
}

impl EntitySampleSet {
    pub fn total_samples(&self) -> usize {
        self.masked.len() + self.unmasked.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreSummary {
    pub count: usize,
    pub mean: Metric<f64>,
    pub std_dev: Metric<f64>,
}

impl ScoreSummary {
    pub fn from_values(values: &[f64]) -> Self {
        let summarize = |value: Option<f64>| match value {
            Some(value) => Metric::available(value),
            None => Metric::unavailable(NullReason::InsufficientSamples).with_detail("no scores"),
        };
        Self {
            count: values.len(),
            mean: summarize(mean(values)),
            std_dev: summarize(sample_std_dev(values)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EntityAggregate {
    pub masked: ScoreSummary,
    pub unmasked: ScoreSummary,
}

pub fn aggregate(samples: &EntitySampleSet) -> EntityAggregate {
    EntityAggregate {
        masked: ScoreSummary::from_values(&samples.masked),
        unmasked: ScoreSummary::from_values(&samples.unmasked),
    }
}

pub fn collect_sample_sets(runs: &[Run]) -> BTreeMap<SampleKey, EntitySampleSet> {
    let mut sets = BTreeMap::<SampleKey, EntitySampleSet>::new();

    for run in runs {
        let key = SampleKey::new(
            run.category.trim(),
            run.subcategory.trim(),
            run.entity.trim(),
        );
        let set = sets.entry(key).or_default();
        set.run_count += 1;

        if let Some(value) = run.masked_value {
            if value.is_finite() {
                set.masked.push(value);
            } else {
                set.dropped_values += 1;
            }
        }

        let mut run_scores = Vec::with_capacity(run.unmasked_values.len());
        for value in &run.unmasked_values {
            if value.is_finite() {
                run_scores.push(*value);
            } else {
                set.dropped_values += 1;
            }
        }
        set.unmasked.extend(run_scores.iter().copied());
        if !run_scores.is_empty() {
            set.unmasked_by_run.push(run_scores);
        }

        if let Some(rank) = run.rank.filter(|rank| *rank >= 1) {
            set.ranks.push(rank);
        }
    }

    for (key, set) in &sets {
        if set.dropped_values > 0 {
            warn!(
                category = %key.category,
                subcategory = %key.subcategory,
                entity = %key.entity,
                dropped = set.dropped_values,
                "dropped non-finite scores"
            );
        }
    }

    sets
}
