//! Aggregation of Monte Carlo trial scores into a report.

use log::warn;
use serde::Serialize;

use crate::constants::{CI_WIDTH_WARN_RATIO, Z_95};

/// Summary of one simulation batch. Serializable for offline analysis.
#[derive(Clone, Debug, Serialize)]
pub struct SimulationReport {
    pub trials: u64,
    pub seed: u64,
    pub mean: f64,
    /// Sample standard deviation (n−1 denominator; 0 for n < 2).
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    /// Half-width of the 95% confidence interval around the mean.
    pub ci95_half_width: f64,
    /// Set when the CI is too wide relative to the mean to be
    /// informative; rerun with more trials.
    pub insufficient_trials: bool,
}

/// Reduce raw per-trial scores to a [`SimulationReport`].
pub fn aggregate(scores: &[f64], seed: u64) -> SimulationReport {
    let trials = scores.len() as u64;
    if scores.is_empty() {
        warn!("simulation ran zero trials; report is vacuous");
        return SimulationReport {
            trials: 0,
            seed,
            mean: 0.0,
            std_dev: 0.0,
            min: 0.0,
            max: 0.0,
            ci95_half_width: 0.0,
            insufficient_trials: true,
        };
    }

    let n = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / n;
    let std_dev = if scores.len() > 1 {
        let ss: f64 = scores.iter().map(|s| (s - mean) * (s - mean)).sum();
        (ss / (n - 1.0)).sqrt()
    } else {
        0.0
    };
    let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let ci95_half_width = Z_95 * std_dev / n.sqrt();

    let scale = mean.abs().max(f64::MIN_POSITIVE);
    let insufficient_trials = std_dev > 0.0 && ci95_half_width / scale > CI_WIDTH_WARN_RATIO;
    if insufficient_trials {
        warn!(
            "confidence interval ±{:.4} is over {:.0}% of mean {:.4} after {} trials",
            ci95_half_width,
            CI_WIDTH_WARN_RATIO * 100.0,
            mean,
            trials
        );
    }

    SimulationReport {
        trials,
        seed,
        mean,
        std_dev,
        min,
        max,
        ci95_half_width,
        insufficient_trials,
    }
}
