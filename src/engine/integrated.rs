use super::error::{EngineError, EngineResult, require_samples};
use super::metric::{Metric, NullReason};
use crate::config::IntegratedWeights;

pub fn rank_percentile(mean_rank: f64, candidate_count: usize) -> EngineResult<f64> {
    require_samples("rank_percentile", 2, candidate_count)?;
    if !mean_rank.is_finite() || mean_rank < 1.0 {
        return Err(EngineError::insufficient("rank_percentile", 1, 0));
    }

    let span = (candidate_count - 1) as f64;
    Ok((1.0 - (mean_rank - 1.0) / span).clamp(0.0, 1.0))
}

pub fn integrated_index(
    bias_index: &Metric<f64>,
    rank_percentile: &Metric<f64>,
    weights: &IntegratedWeights,
) -> Metric<f64> {
    match (bias_index.get(), rank_percentile.get()) {
        (Some(bias), Some(percentile)) => Metric::available(
            weights.sentiment * bias.clamp(-1.0, 1.0) + weights.ranking * (percentile - 0.5),
        ),
        (None, Some(_)) => missing(bias_index, "bias_index"),
        (Some(_), None) => missing(rank_percentile, "rank_percentile"),
        (None, None) => missing(bias_index, "bias_index and rank_percentile"),
    }
}

fn missing(input: &Metric<f64>, name: &str) -> Metric<f64> {
    Metric::unavailable(input.reason.unwrap_or(NullReason::InsufficientSamples))
        .with_detail(format!("missing input: {name}"))
}
