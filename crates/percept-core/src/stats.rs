//! Summary statistics over per-image measurements.

use serde::{Deserialize, Serialize};

/// Population statistics of a non-empty sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
}

impl Summary {
    /// Summarize the finite values of a sample. Returns `None` when there
    /// are none.
    ///
    /// `std` is the population standard deviation and `median` averages the
    /// two middle values of an even-length sample.
    pub fn of(values: &[f64]) -> Option<Self> {
        let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if sorted.is_empty() {
            return None;
        }
        sorted.sort_by(f64::total_cmp);

        let n = sorted.len() as f64;
        let mean = sorted.iter().sum::<f64>() / n;
        let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };

        // Rounding can push the mean a hair outside the observed range.
        let min = sorted[0];
        let max = sorted[sorted.len() - 1];

        Some(Self {
            mean: mean.clamp(min, max),
            std: variance.sqrt(),
            min,
            max,
            median,
        })
    }
}
