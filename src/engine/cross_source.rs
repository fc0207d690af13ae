use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use serde::Serialize;

use super::error::{EngineError, EngineResult, require_samples};
use super::metric::{Metric, NullReason};
use super::reference::CategoryShares;
use super::stats::{herfindahl_index, kendall_tau_b};
use crate::config::{EngineConfig, MarketImpactTransform};
use crate::model::{CitationLabel, SourceSentiment};

#[derive(Debug, Clone, Serialize)]
pub struct DeltaRankEntry {
    pub entity: String,
    pub ai_rank: usize,
    pub reference_rank: usize,
    pub delta_rank: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeltaRankSummary {
    pub entries: Vec<DeltaRankEntry>,
    pub only_in_ai: Vec<String>,
    pub only_in_reference: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CompositionRatios {
    pub citation_count: usize,
    pub official_ratio: f64,
    pub negative_ratio: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompositionComparison {
    pub ai: Metric<CompositionRatios>,
    pub reference: Metric<CompositionRatios>,
    pub official_ratio_difference: Metric<f64>,
    pub negative_ratio_difference: Metric<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketImpactRow {
    pub entity: String,
    pub current_share: f64,
    pub multiplier: f64,
    pub adjusted_share: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketImpact {
    pub rows: Vec<MarketImpactRow>,
    pub hhi_before: f64,
    pub hhi_after: f64,
    pub hhi_change: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonReport {
    pub category: String,
    pub subcategory: String,
    pub analysis_date: NaiveDate,
    pub ai_ranking: Vec<String>,
    pub reference_ranking: Vec<String>,
    pub rbo_persistence: f64,
    pub rbo: Metric<f64>,
    pub kendall_tau_common: Metric<f64>,
    pub delta_rank: DeltaRankSummary,
    pub composition: CompositionComparison,
    pub market_impact: Metric<MarketImpact>,
}

fn dedup_preserving_order(items: &[String]) -> Vec<&str> {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .iter()
        .map(String::as_str)
        .filter(|item| seen.insert(*item))
        .collect()
}

/// Extrapolated rank-biased overlap (Webber, Moffat & Zobel 2010) for lists
/// of possibly different lengths. Later duplicates within a list are ignored.
/// Returns 1 for identical lists and 0 when one list is empty.
pub fn rank_biased_overlap(left: &[String], right: &[String], persistence: f64) -> EngineResult<f64> {
    if !(persistence > 0.0 && persistence < 1.0) {
        return Err(EngineError::invalid_config(format!(
            "rbo persistence must be in (0, 1), got {persistence}"
        )));
    }

    let left = dedup_preserving_order(left);
    let right = dedup_preserving_order(right);
    require_samples("rbo", 1, left.len().max(right.len()))?;
    if left.is_empty() || right.is_empty() {
        return Ok(0.0);
    }

    let (short, long) = if left.len() <= right.len() {
        (left, right)
    } else {
        (right, left)
    };
    let s = short.len();
    let l = long.len();
    let p = persistence;

    let mut seen_short = HashSet::<&str>::with_capacity(s);
    let mut seen_long = HashSet::<&str>::with_capacity(l);
    let mut overlap = 0_usize;
    let mut overlap_at_s = 0_usize;
    let mut sum = 0.0_f64;
    let mut weight = 1.0_f64;

    for depth in 1..=l {
        weight *= p;
        if let Some(item) = short.get(depth - 1) {
            if seen_long.contains(item) {
                overlap += 1;
            }
            seen_short.insert(*item);
        }
        let item = long[depth - 1];
        if seen_short.contains(item) {
            overlap += 1;
        }
        seen_long.insert(item);

        sum += overlap as f64 / depth as f64 * weight;
        if depth == s {
            overlap_at_s = overlap;
        }
        if depth > s {
            sum += overlap_at_s as f64 * (depth - s) as f64 / (s * depth) as f64 * weight;
        }
    }

    let extrapolation =
        ((overlap as f64 - overlap_at_s as f64) / l as f64 + overlap_at_s as f64 / s as f64)
            * p.powi(l as i32);
    Ok(((1.0 - p) / p * sum + extrapolation).clamp(0.0, 1.0))
}

pub fn delta_ranks(ai: &[String], reference: &[String]) -> DeltaRankSummary {
    let ai = dedup_preserving_order(ai);
    let reference = dedup_preserving_order(reference);
    let reference_positions = reference
        .iter()
        .enumerate()
        .map(|(index, entity)| (*entity, index + 1))
        .collect::<HashMap<&str, usize>>();
    let ai_entities = ai.iter().copied().collect::<HashSet<&str>>();

    let mut entries = Vec::new();
    let mut only_in_ai = Vec::new();
    for (index, entity) in ai.iter().enumerate() {
        let ai_rank = index + 1;
        match reference_positions.get(entity) {
            Some(reference_rank) => entries.push(DeltaRankEntry {
                entity: entity.to_string(),
                ai_rank,
                reference_rank: *reference_rank,
                delta_rank: *reference_rank as i64 - ai_rank as i64,
            }),
            None => only_in_ai.push(entity.to_string()),
        }
    }

    let only_in_reference = reference
        .iter()
        .filter(|entity| !ai_entities.contains(*entity))
        .map(|entity| entity.to_string())
        .collect();

    DeltaRankSummary {
        entries,
        only_in_ai,
        only_in_reference,
    }
}

pub fn kendall_tau_common(summary: &DeltaRankSummary) -> EngineResult<f64> {
    require_samples("kendall_tau_common", 2, summary.entries.len())?;
    let ai = summary
        .entries
        .iter()
        .map(|entry| entry.ai_rank as f64)
        .collect::<Vec<f64>>();
    let reference = summary
        .entries
        .iter()
        .map(|entry| entry.reference_rank as f64)
        .collect::<Vec<f64>>();
    kendall_tau_b(&ai, &reference).ok_or(EngineError::ZeroDenominator {
        metric: "kendall_tau_common",
    })
}

pub fn composition_ratios(citations: &[CitationLabel]) -> EngineResult<CompositionRatios> {
    require_samples("composition_ratios", 1, citations.len())?;
    let total = citations.len() as f64;
    let official = citations.iter().filter(|label| label.official).count();
    let negative = citations
        .iter()
        .filter(|label| label.sentiment == Some(SourceSentiment::Negative))
        .count();

    Ok(CompositionRatios {
        citation_count: citations.len(),
        official_ratio: official as f64 / total,
        negative_ratio: negative as f64 / total,
    })
}

pub fn compare_composition(ai: &[CitationLabel], reference: &[CitationLabel]) -> CompositionComparison {
    let ai = Metric::recover(composition_ratios(ai))
        .unwrap_or_else(|_| Metric::unavailable(NullReason::InsufficientSamples));
    let reference = Metric::recover(composition_ratios(reference))
        .unwrap_or_else(|_| Metric::unavailable(NullReason::InsufficientSamples));

    let (official_ratio_difference, negative_ratio_difference) = match (ai.as_ref(), reference.as_ref()) {
        (Some(left), Some(right)) => (
            Metric::available(left.official_ratio - right.official_ratio),
            Metric::available(left.negative_ratio - right.negative_ratio),
        ),
        _ => (
            Metric::unavailable(NullReason::InsufficientSamples),
            Metric::unavailable(NullReason::InsufficientSamples),
        ),
    };

    CompositionComparison {
        ai,
        reference,
        official_ratio_difference,
        negative_ratio_difference,
    }
}

pub fn simulate_market_impact(
    delta_rank: &DeltaRankSummary,
    shares: &CategoryShares,
    transform: &MarketImpactTransform,
) -> EngineResult<MarketImpact> {
    let deltas = delta_rank
        .entries
        .iter()
        .map(|entry| (entry.entity.as_str(), entry.delta_rank))
        .collect::<HashMap<&str, i64>>();
    let current = shares.shares();
    require_samples("market_impact", 1, current.len())?;

    let weighted = current
        .iter()
        .map(|(entity, share)| {
            let multiplier = deltas
                .get(entity.as_str())
                .map(|delta| transform.multiplier(*delta))
                .unwrap_or(1.0);
            (entity.as_str(), *share, multiplier, share * multiplier)
        })
        .collect::<Vec<(&str, f64, f64, f64)>>();

    let current_total = current.values().sum::<f64>();
    let weighted_total = weighted.iter().map(|row| row.3).sum::<f64>();
    if weighted_total <= 0.0 {
        return Err(EngineError::ZeroDenominator {
            metric: "market_impact",
        });
    }
    let scale = current_total / weighted_total;

    let rows = weighted
        .into_iter()
        .map(|(entity, current_share, multiplier, raw)| MarketImpactRow {
            entity: entity.to_string(),
            current_share,
            multiplier,
            adjusted_share: raw * scale,
        })
        .collect::<Vec<MarketImpactRow>>();

    let hhi_before = herfindahl_index(rows.iter().map(|row| row.current_share));
    let hhi_after = herfindahl_index(rows.iter().map(|row| row.adjusted_share));
    Ok(MarketImpact {
        rows,
        hhi_before,
        hhi_after,
        hhi_change: hhi_after - hhi_before,
    })
}

pub struct ComparisonInputs<'a> {
    pub category: &'a str,
    pub subcategory: &'a str,
    pub ai_ranking: Vec<String>,
    pub reference_ranking: Vec<String>,
    pub ai_citations: Vec<CitationLabel>,
    pub reference_citations: Vec<CitationLabel>,
}

pub fn build_comparison_report(
    inputs: ComparisonInputs<'_>,
    shares: Option<&CategoryShares>,
    config: &EngineConfig,
    analysis_date: NaiveDate,
) -> EngineResult<ComparisonReport> {
    if inputs.ai_ranking.is_empty() && inputs.reference_ranking.is_empty() {
        return Err(EngineError::EmptyCandidateSet {
            category: inputs.category.to_string(),
            subcategory: inputs.subcategory.to_string(),
        });
    }

    let rbo = Metric::recover(rank_biased_overlap(
        &inputs.ai_ranking,
        &inputs.reference_ranking,
        config.rbo_persistence,
    ))?;
    let delta_rank = delta_ranks(&inputs.ai_ranking, &inputs.reference_ranking);
    let kendall_tau_common = Metric::recover(kendall_tau_common(&delta_rank))?;
    let composition = compare_composition(&inputs.ai_citations, &inputs.reference_citations);
    let market_impact = match shares {
        Some(shares) => Metric::recover(simulate_market_impact(
            &delta_rank,
            shares,
            &config.market_impact,
        ))?,
        None => Metric::unavailable(NullReason::MissingReference),
    };

    Ok(ComparisonReport {
        category: inputs.category.to_string(),
        subcategory: inputs.subcategory.to_string(),
        analysis_date,
        ai_ranking: inputs.ai_ranking,
        reference_ranking: inputs.reference_ranking,
        rbo_persistence: config.rbo_persistence,
        rbo,
        kendall_tau_common,
        delta_rank,
        composition,
        market_impact,
    })
}
