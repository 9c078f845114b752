//! Cross-view consistency of Canny edge density.

use std::path::PathBuf;

use image::GrayImage;
use imageproc::edges::canny;
use percept_core::config::EdgeConsistencyConfig;
use percept_core::{MetricKind, MetricResult};
use tracing::warn;

use super::{open_gray, ImageMetric};

/// Edge density per view; the score rewards views that agree with each
/// other, not views with many edges.
#[derive(Debug, Clone)]
pub struct EdgeConsistencyMetric {
    pub low_threshold: f32,
    pub high_threshold: f32,
    /// Density standard deviation at which the score reaches 0
    pub epsilon: f64,
}

impl Default for EdgeConsistencyMetric {
    fn default() -> Self {
        Self::from_config(&EdgeConsistencyConfig::default())
    }
}

impl EdgeConsistencyMetric {
    pub fn from_config(config: &EdgeConsistencyConfig) -> Self {
        Self {
            low_threshold: config.canny_low,
            high_threshold: config.canny_high,
            epsilon: config.epsilon,
        }
    }

    /// Fraction of pixels Canny marks as edges.
    pub fn edge_density(&self, gray: &GrayImage) -> f64 {
        let total = gray.width() as usize * gray.height() as usize;
        if total == 0 {
            return 0.0;
        }
        let edges = canny(gray, self.low_threshold, self.high_threshold);
        let count = edges.pixels().filter(|p| p[0] > 0).count();
        count as f64 / total as f64
    }

    /// `100 * (1 - min(1, std / epsilon))`
    pub fn consistency(&self, std: f64) -> f64 {
        if self.epsilon <= 0.0 {
            return if std == 0.0 { 100.0 } else { 0.0 };
        }
        100.0 * (1.0 - (std / self.epsilon).min(1.0))
    }
}

impl ImageMetric for EdgeConsistencyMetric {
    fn kind(&self) -> MetricKind {
        MetricKind::EdgeConsistency
    }

    fn evaluate(&self, paths: &[PathBuf]) -> Option<MetricResult> {
        let samples: Vec<f64> = paths
            .iter()
            .filter_map(|path| match open_gray(path) {
                Ok(gray) => Some(self.edge_density(&gray)),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping view for edge consistency");
                    None
                }
            })
            .collect();

        MetricResult::from_samples(MetricKind::EdgeConsistency, samples, |s, _| {
            self.consistency(s.std)
        })
    }
}
