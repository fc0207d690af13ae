use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;
use serde::Serialize;

use super::error::{EngineError, EngineResult, require_samples};
use super::metric::{Metric, NullReason};
use super::reference::CategoryShares;
use super::reliability::ReliabilityTier;
use super::stats::{gini, herfindahl_index, kendall_tau_b, mean};
use crate::config::{EngineConfig, ExposureWeighting};
use crate::model::RankedRunSet;

#[derive(Debug, Clone, Serialize)]
pub struct EntityRankingRow {
    pub entity: String,
    pub appearances: usize,
    pub appearance_rate: f64,
    pub mean_rank: Metric<f64>,
    pub top_k_probability: BTreeMap<usize, Metric<f64>>,
    pub exposure_index: Metric<f64>,
    pub reference_share: Metric<f64>,
    pub eo_ratio: Metric<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParitySummary {
    pub k: usize,
    pub parity_gap: Metric<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankingAlert {
    pub metric: &'static str,
    pub value: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RankingReport {
    pub category: String,
    pub subcategory: String,
    pub analysis_date: NaiveDate,
    pub run_count: usize,
    pub candidate_count: usize,
    pub reliability_tier: Metric<ReliabilityTier>,
    pub exposure_weighting: &'static str,
    pub reference_data_type: Option<&'static str>,
    pub category_k: usize,
    pub eo_k: usize,
    pub entities: Vec<EntityRankingRow>,
    pub parity: Vec<ParitySummary>,
    pub eo_gap: Metric<f64>,
    pub kendall_tau_vs_reference: Metric<f64>,
    pub gini: Metric<f64>,
    pub hhi_exposure: Metric<f64>,
    pub hhi_reference: Metric<f64>,
    pub concentration_ratio: Metric<f64>,
    pub ranking_stability: Metric<f64>,
    pub alerts: Vec<RankingAlert>,
}

pub fn validate_run_set(set: &RankedRunSet) -> EngineResult<()> {
    for (run_index, run) in set.runs.iter().enumerate() {
        let mut seen = HashSet::with_capacity(run.len());
        for entity in run {
            if !seen.insert(entity.as_str()) {
                return Err(EngineError::DuplicateEntity {
                    category: set.category.clone(),
                    subcategory: set.subcategory.clone(),
                    run_index,
                    entity: entity.clone(),
                });
            }
        }
    }
    Ok(())
}

pub fn candidate_set(
    set: &RankedRunSet,
    reference: Option<&CategoryShares>,
) -> EngineResult<Vec<String>> {
    let mut candidates = set
        .runs
        .iter()
        .flatten()
        .chain(set.candidates.iter())
        .cloned()
        .collect::<Vec<String>>();
    if let Some(reference) = reference {
        candidates.extend(reference.entities().cloned());
    }
    candidates.sort();
    candidates.dedup();

    if candidates.is_empty() {
        return Err(EngineError::EmptyCandidateSet {
            category: set.category.clone(),
            subcategory: set.subcategory.clone(),
        });
    }
    Ok(candidates)
}

pub fn top_k_probabilities(
    runs: &[Vec<String>],
    candidates: &[String],
    k: usize,
) -> EngineResult<BTreeMap<String, f64>> {
    require_samples("top_k_probability", 1, runs.len())?;

    let mut hits = candidates
        .iter()
        .map(|entity| (entity.clone(), 0_usize))
        .collect::<BTreeMap<String, usize>>();
    for run in runs {
        for entity in run.iter().take(k) {
            if let Some(count) = hits.get_mut(entity) {
                *count += 1;
            }
        }
    }

    let run_count = runs.len() as f64;
    Ok(hits
        .into_iter()
        .map(|(entity, count)| (entity, count as f64 / run_count))
        .collect())
}

pub fn exposure_indices(
    runs: &[Vec<String>],
    candidates: &[String],
    weighting: &ExposureWeighting,
) -> EngineResult<BTreeMap<String, f64>> {
    require_samples("exposure_index", 1, runs.len())?;

    let mut weighted = candidates
        .iter()
        .map(|entity| (entity.clone(), 0.0_f64))
        .collect::<BTreeMap<String, f64>>();
    for run in runs {
        for (index, entity) in run.iter().enumerate() {
            if let Some(total) = weighted.get_mut(entity) {
                *total += weighting.weight(index + 1, candidates.len());
            }
        }
    }

    let total = weighted.values().sum::<f64>();
    if total <= 0.0 {
        return Err(EngineError::ZeroDenominator {
            metric: "exposure_index",
        });
    }
    Ok(weighted
        .into_iter()
        .map(|(entity, value)| (entity, value / total))
        .collect())
}

pub fn statistical_parity_gap(probabilities: &BTreeMap<String, f64>) -> Option<f64> {
    let max = probabilities.values().copied().reduce(f64::max)?;
    let min = probabilities.values().copied().reduce(f64::min)?;
    Some(max - min)
}

pub fn mean_ranks(runs: &[Vec<String>]) -> BTreeMap<String, f64> {
    let mut positions = BTreeMap::<String, Vec<f64>>::new();
    for run in runs {
        for (index, entity) in run.iter().enumerate() {
            positions
                .entry(entity.clone())
                .or_default()
                .push((index + 1) as f64);
        }
    }
    positions
        .into_iter()
        .filter_map(|(entity, ranks)| mean(&ranks).map(|value| (entity, value)))
        .collect()
}

pub fn equal_opportunity_ratio(
    entity: &str,
    probability: f64,
    reference: Option<&CategoryShares>,
    epsilon: f64,
) -> EngineResult<f64> {
    let share = reference
        .and_then(|shares| shares.share(entity))
        .ok_or_else(|| EngineError::MissingReference {
            entity: entity.to_string(),
        })?;
    if share <= epsilon {
        return Err(EngineError::ZeroDenominator { metric: "eo_ratio" });
    }
    Ok(probability / share)
}

pub fn equal_opportunity_gap<'a>(ratios: impl IntoIterator<Item = &'a Metric<f64>>) -> Metric<f64> {
    ratios
        .into_iter()
        .filter_map(Metric::get)
        .map(|ratio| (ratio - 1.0).abs())
        .reduce(f64::max)
        .map(Metric::available)
        .unwrap_or_else(|| {
            Metric::unavailable(NullReason::MissingReference)
                .with_detail("no entity has a computable EO ratio")
        })
}

pub fn kendall_tau_vs_reference(
    exposure: &BTreeMap<String, f64>,
    reference: Option<&CategoryShares>,
) -> EngineResult<f64> {
    let reference = reference.ok_or_else(|| EngineError::MissingReference {
        entity: "*".to_string(),
    })?;

    let mut own = Vec::new();
    let mut theirs = Vec::new();
    for (entity, value) in exposure {
        if let Some(share) = reference.share(entity) {
            own.push(*value);
            theirs.push(share);
        }
    }

    require_samples("kendall_tau_vs_reference", 2, own.len())?;
    kendall_tau_b(&own, &theirs).ok_or(EngineError::ZeroDenominator {
        metric: "kendall_tau_vs_reference",
    })
}

pub fn ranking_stability(runs: &[Vec<String>], min_runs: usize) -> EngineResult<f64> {
    require_samples("ranking_stability", min_runs.max(2), runs.len())?;

    let positions = runs
        .iter()
        .map(|run| {
            run.iter()
                .enumerate()
                .map(|(index, entity)| (entity.as_str(), index as f64))
                .collect::<HashMap<&str, f64>>()
        })
        .collect::<Vec<HashMap<&str, f64>>>();

    let mut taus = Vec::new();
    for i in 0..runs.len() {
        for j in (i + 1)..runs.len() {
            let mut left = Vec::new();
            let mut right = Vec::new();
            for entity in &runs[i] {
                if let Some(position) = positions[j].get(entity.as_str()) {
                    left.push(positions[i][entity.as_str()]);
                    right.push(*position);
                }
            }
            if let Some(tau) = kendall_tau_b(&left, &right) {
                taus.push(tau);
            }
        }
    }

    mean(&taus).ok_or_else(|| EngineError::insufficient("ranking_stability", 1, 0))
}

pub fn consensus_ordering(
    set: &RankedRunSet,
    weighting: &ExposureWeighting,
) -> EngineResult<Vec<String>> {
    validate_run_set(set)?;
    let runs = set.runs.as_slice();
    let mut candidates = runs.iter().flatten().cloned().collect::<Vec<String>>();
    candidates.sort();
    candidates.dedup();

    let exposure = exposure_indices(runs, &candidates, weighting)?;
    let ranks = mean_ranks(runs);
    candidates.sort_by(|left, right| {
        let left_exposure = exposure.get(left).copied().unwrap_or(0.0);
        let right_exposure = exposure.get(right).copied().unwrap_or(0.0);
        right_exposure
            .total_cmp(&left_exposure)
            .then_with(|| {
                let left_rank = ranks.get(left).copied().unwrap_or(f64::MAX);
                let right_rank = ranks.get(right).copied().unwrap_or(f64::MAX);
                left_rank.total_cmp(&right_rank)
            })
            .then_with(|| left.cmp(right))
    });
    Ok(candidates)
}

pub fn build_ranking_report(
    set: &RankedRunSet,
    reference: Option<&CategoryShares>,
    config: &EngineConfig,
    analysis_date: NaiveDate,
) -> EngineResult<RankingReport> {
    validate_run_set(set)?;
    let candidates = candidate_set(set, reference)?;
    let run_count = set.runs.len();

    let ks = config.top_k_for(&set.category);
    let category_k = config.category_k(&set.category);
    let mut probabilities = BTreeMap::<usize, Metric<BTreeMap<String, f64>>>::new();
    for k in &ks {
        let values = Metric::recover(top_k_probabilities(&set.runs, &candidates, *k))?;
        probabilities.insert(*k, values);
    }

    let exposure = Metric::recover(exposure_indices(
        &set.runs,
        &candidates,
        &config.exposure_weighting,
    ))?;
    let ranks = mean_ranks(&set.runs);
    let appearances = set
        .runs
        .iter()
        .flatten()
        .fold(HashMap::<&str, usize>::new(), |mut counts, entity| {
            *counts.entry(entity.as_str()).or_default() += 1;
            counts
        });

    let mut entities = Vec::with_capacity(candidates.len());
    for entity in &candidates {
        let top_k_probability = probabilities
            .iter()
            .map(|(k, values)| {
                let probability = match values.as_ref() {
                    Some(values) => Metric::available(values.get(entity).copied().unwrap_or(0.0)),
                    None => values.null_of(),
                };
                (*k, probability)
            })
            .collect::<BTreeMap<usize, Metric<f64>>>();
        let appeared = appearances.get(entity.as_str()).copied().unwrap_or(0);
        let exposure_index = match exposure.as_ref() {
            Some(values) => Metric::available(values.get(entity).copied().unwrap_or(0.0)),
            None => exposure.null_of(),
        };
        let reference_share = match reference.and_then(|shares| shares.share(entity)) {
            Some(share) => Metric::available(share),
            None => Metric::unavailable(NullReason::MissingReference),
        };
        let eo_ratio = match top_k_probability.get(&config.eo_k) {
            Some(probability) => match probability.get() {
                Some(probability) => Metric::recover(equal_opportunity_ratio(
                    entity,
                    probability,
                    reference,
                    config.zero_epsilon,
                ))?,
                None => probability.clone(),
            },
            None => Metric::unavailable(NullReason::InsufficientSamples),
        };

        entities.push(EntityRankingRow {
            entity: entity.clone(),
            appearances: appeared,
            appearance_rate: if run_count == 0 {
                0.0
            } else {
                appeared as f64 / run_count as f64
            },
            mean_rank: match ranks.get(entity) {
                Some(rank) => Metric::available(*rank),
                None => Metric::unavailable(NullReason::InsufficientSamples)
                    .with_detail("entity never ranked"),
            },
            top_k_probability,
            exposure_index,
            reference_share,
            eo_ratio,
        });
    }

    let parity = probabilities
        .iter()
        .map(|(k, values)| ParitySummary {
            k: *k,
            parity_gap: match values.as_ref() {
                Some(values) => statistical_parity_gap(values)
                    .map(Metric::available)
                    .unwrap_or_else(|| Metric::unavailable(NullReason::InsufficientSamples)),
                None => values.null_of(),
            },
        })
        .collect::<Vec<ParitySummary>>();

    let eo_gap = equal_opportunity_gap(entities.iter().map(|row| &row.eo_ratio));

    let (kendall_tau, gini_value, hhi_exposure) = match exposure.as_ref() {
        Some(values) => (
            Metric::recover(kendall_tau_vs_reference(values, reference))?,
            Metric::recover(
                gini(&values.values().copied().collect::<Vec<f64>>())
                    .ok_or(EngineError::ZeroDenominator { metric: "gini" }),
            )?,
            Metric::available(herfindahl_index(values.values().copied())),
        ),
        None => (exposure.null_of(), exposure.null_of(), exposure.null_of()),
    };

    let hhi_reference = match reference {
        Some(shares) => Metric::available(herfindahl_index(shares.shares().into_values())),
        None => Metric::unavailable(NullReason::MissingReference),
    };
    let concentration_ratio = match (hhi_exposure.get(), hhi_reference.get()) {
        (Some(own), Some(theirs)) if theirs > config.zero_epsilon => Metric::available(own / theirs),
        (Some(_), Some(_)) => Metric::unavailable(NullReason::ZeroDenominator),
        (None, _) => hhi_exposure.clone(),
        (_, None) => hhi_reference.clone(),
    };

    let ranking_stability = Metric::recover(ranking_stability(
        &set.runs,
        config.min_samples.ranking_stability,
    ))?;

    let mut alerts = Vec::new();
    if let Some(gap) = parity
        .iter()
        .find(|summary| summary.k == category_k)
        .and_then(|summary| summary.parity_gap.get())
    {
        if gap > config.alerts.parity_gap {
            alerts.push(RankingAlert {
                metric: "parity_gap",
                value: gap,
                threshold: config.alerts.parity_gap,
            });
        }
    }
    if let Some(gap) = eo_gap.get() {
        if gap > config.alerts.eo_gap {
            alerts.push(RankingAlert {
                metric: "eo_gap",
                value: gap,
                threshold: config.alerts.eo_gap,
            });
        }
    }

    Ok(RankingReport {
        category: set.category.clone(),
        subcategory: set.subcategory.clone(),
        analysis_date,
        run_count,
        candidate_count: candidates.len(),
        reliability_tier: Metric::recover(ReliabilityTier::classify(run_count))?,
        exposure_weighting: config.exposure_weighting.label(),
        reference_data_type: reference.map(CategoryShares::data_type),
        category_k,
        eo_k: config.eo_k,
        entities,
        parity,
        eo_gap,
        kendall_tau_vs_reference: kendall_tau,
        gini: gini_value,
        hhi_exposure,
        hhi_reference,
        concentration_ratio,
        ranking_stability,
        alerts,
    })
}
