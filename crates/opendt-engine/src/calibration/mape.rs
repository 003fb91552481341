//! MAPE scoring of simulated vs observed power.
//!
//! Both series are resampled by linear interpolation onto a shared grid of
//! whole minutes covering their overlap. Grid points outside either series'
//! range are skipped; the score is the mean of `|obs − sim| / max(ε, obs)`
//! over the points where both sides exist.

pub const GRID_STEP_MS: i64 = 60_000;

/// Guard against division by a zero observation.
pub const DEFAULT_EPSILON: f64 = 1e-9;

/// Score of one candidate against the observed series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapeScore {
    /// Mean absolute percentage error as a fraction (0.05 = 5%).
    pub mape: f64,
    pub aligned_points: usize,
    pub mean_observed: f64,
    pub mean_simulated: f64,
}

/// Compare two `(epoch ms, watts)` series. Returns `None` when the overlap
/// contains no aligned grid points.
pub fn score(simulated: &[(i64, f64)], observed: &[(i64, f64)], epsilon: f64) -> Option<MapeScore> {
    let sim = sorted(simulated);
    let obs = sorted(observed);
    let (sim_first, sim_last) = range(&sim)?;
    let (obs_first, obs_last) = range(&obs)?;

    let overlap_start = sim_first.max(obs_first);
    let overlap_end = sim_last.min(obs_last);
    if overlap_start > overlap_end {
        return None;
    }

    // Whole-minute grid, matching the observed samples' cadence.
    let first_grid = overlap_start.div_euclid(GRID_STEP_MS) * GRID_STEP_MS;
    let first_grid = if first_grid < overlap_start {
        first_grid + GRID_STEP_MS
    } else {
        first_grid
    };

    let mut errors = Vec::new();
    let mut sum_obs = 0.0;
    let mut sum_sim = 0.0;
    let mut t = first_grid;
    while t <= overlap_end {
        if let (Some(sim_v), Some(obs_v)) = (interpolate(&sim, t), interpolate(&obs, t)) {
            errors.push((obs_v - sim_v).abs() / obs_v.abs().max(epsilon));
            sum_obs += obs_v;
            sum_sim += sim_v;
        }
        t += GRID_STEP_MS;
    }

    if errors.is_empty() {
        return None;
    }
    let n = errors.len() as f64;
    Some(MapeScore {
        mape: errors.iter().sum::<f64>() / n,
        aligned_points: errors.len(),
        mean_observed: sum_obs / n,
        mean_simulated: sum_sim / n,
    })
}

fn sorted(series: &[(i64, f64)]) -> Vec<(i64, f64)> {
    let mut out: Vec<(i64, f64)> = series
        .iter()
        .copied()
        .filter(|(_, v)| v.is_finite())
        .collect();
    out.sort_by_key(|(t, _)| *t);
    out
}

fn range(series: &[(i64, f64)]) -> Option<(i64, i64)> {
    Some((series.first()?.0, series.last()?.0))
}

/// Linear interpolation at `t`; `None` outside the series' range.
fn interpolate(series: &[(i64, f64)], t: i64) -> Option<f64> {
    let upper = series.partition_point(|(ts, _)| *ts < t);
    if upper == 0 {
        return (series.first()?.0 == t).then(|| series[0].1);
    }
    if upper == series.len() {
        let (last_t, last_v) = *series.last()?;
        return (last_t == t).then_some(last_v);
    }
    let (t1, v1) = series[upper - 1];
    let (t2, v2) = series[upper];
    if t2 == t1 {
        return Some(v2);
    }
    let frac = (t - t1) as f64 / (t2 - t1) as f64;
    Some(v1 + (v2 - v1) * frac)
}
