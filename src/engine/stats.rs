use rand::Rng;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn sample_std_dev(values: &[f64]) -> Option<f64> {
    let center = mean(values)?;
    if values.len() < 2 {
        return Some(0.0);
    }

    let squared = values
        .iter()
        .map(|value| (value - center).powi(2))
        .sum::<f64>();
    Some((squared / (values.len() - 1) as f64).sqrt())
}

pub fn percentile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }

    let q = q.clamp(0.0, 1.0);
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let weight = position - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

pub fn sign_test_two_sided_p_value(deltas: &[f64]) -> Option<f64> {
    let wins = deltas.iter().filter(|delta| **delta > 0.0).count();
    let losses = deltas.iter().filter(|delta| **delta < 0.0).count();
    let n = wins + losses;
    if n == 0 {
        return None;
    }

    let k = wins.min(losses);
    // pmf(i + 1) = pmf(i) * (n - i) / (i + 1), accumulated in log space
    let mut log_pmf = n as f64 * 0.5_f64.ln();
    let mut tail = log_pmf.exp();
    for i in 0..k {
        log_pmf += ((n - i) as f64).ln() - ((i + 1) as f64).ln();
        tail += log_pmf.exp();
    }
    Some((2.0 * tail).min(1.0))
}

/// Kendall's tau-b between two paired score vectors, with the standard tie
/// correction. `None` when fewer than two pairs or when either side is
/// entirely tied.
pub fn kendall_tau_b(x: &[f64], y: &[f64]) -> Option<f64> {
    let n = x.len();
    if n != y.len() || n < 2 {
        return None;
    }

    let mut concordant = 0_f64;
    let mut discordant = 0_f64;
    let mut ties_x = 0_f64;
    let mut ties_y = 0_f64;

    for i in 0..n {
        for j in (i + 1)..n {
            let dx = x[i] - x[j];
            let dy = y[i] - y[j];

            if dx == 0.0 && dy == 0.0 {
                continue;
            } else if dx == 0.0 {
                ties_x += 1.0;
            } else if dy == 0.0 {
                ties_y += 1.0;
            } else if (dx > 0.0 && dy > 0.0) || (dx < 0.0 && dy < 0.0) {
                concordant += 1.0;
            } else {
                discordant += 1.0;
            }
        }
    }

    let denom = ((concordant + discordant + ties_x) * (concordant + discordant + ties_y)).sqrt();
    if denom == 0.0 {
        return None;
    }
    Some((concordant - discordant) / denom)
}

pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }

    let mean_x = mean(x)?;
    let mean_y = mean(y)?;
    let mut num = 0.0;
    let mut den_x = 0.0;
    let mut den_y = 0.0;
    for (a, b) in x.iter().zip(y) {
        let dx = a - mean_x;
        let dy = b - mean_y;
        num += dx * dy;
        den_x += dx * dx;
        den_y += dy * dy;
    }

    let denom = (den_x * den_y).sqrt();
    if denom == 0.0 {
        return None;
    }
    Some((num / denom).clamp(-1.0, 1.0))
}

pub fn herfindahl_index(shares: impl IntoIterator<Item = f64>) -> f64 {
    shares.into_iter().map(|share| share * share).sum::<f64>() * 10_000.0
}

/// Gini coefficient via the sorted cumulative-share formula:
/// `G = 2 * sum(i * x_i) / (n * sum(x)) - (n + 1) / n`, with `x` ascending and
/// `i` starting at 1. `None` for an empty or all-zero distribution.
pub fn gini(values: &[f64]) -> Option<f64> {
    let total = values.iter().sum::<f64>();
    if values.is_empty() || total <= 0.0 {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|left, right| left.total_cmp(right));
    let n = sorted.len() as f64;
    let weighted = sorted
        .iter()
        .enumerate()
        .map(|(index, value)| (index + 1) as f64 * value)
        .sum::<f64>();
    Some((2.0 * weighted / (n * total) - (n + 1.0) / n).max(0.0))
}

pub fn bootstrap_delta_interval_95<R: Rng + ?Sized>(
    masked: &[f64],
    unmasked: &[f64],
    iterations: usize,
    rng: &mut R,
) -> Option<(f64, f64)> {
    if masked.is_empty() || unmasked.is_empty() || iterations == 0 {
        return None;
    }

    let mut deltas = Vec::<f64>::with_capacity(iterations);
    for _ in 0..iterations {
        let masked_mean = resampled_mean(masked, rng);
        let unmasked_mean = resampled_mean(unmasked, rng);
        deltas.push(unmasked_mean - masked_mean);
    }

    deltas.sort_by(|left, right| left.total_cmp(right));
    let low = percentile_sorted(&deltas, 0.025)?;
    let high = percentile_sorted(&deltas, 0.975)?;
    Some((low, high))
}

fn resampled_mean<R: Rng + ?Sized>(values: &[f64], rng: &mut R) -> f64 {
    let mut total = 0.0_f64;
    for _ in 0..values.len() {
        total += values[rng.gen_range(0..values.len())];
    }
    total / values.len() as f64
}
