//! Metric identities and per-batch metric results.

use serde::{Deserialize, Serialize};

use crate::stats::Summary;

/// Every metric the evaluator knows how to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Blur,
    EdgeConsistency,
    Naturalness,
    ClipIqa,
    VlmQuality,
    VlmArtifacts,
    VlmStructural,
}

impl MetricKind {
    pub const ALL: [MetricKind; 7] = [
        MetricKind::Blur,
        MetricKind::EdgeConsistency,
        MetricKind::Naturalness,
        MetricKind::ClipIqa,
        MetricKind::VlmQuality,
        MetricKind::VlmArtifacts,
        MetricKind::VlmStructural,
    ];

    /// Name used in result documents and the weight table.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Blur => "blur",
            Self::EdgeConsistency => "edge_consistency",
            Self::Naturalness => "naturalness",
            Self::ClipIqa => "clip_iqa",
            Self::VlmQuality => "vlm_quality",
            Self::VlmArtifacts => "vlm_artifacts",
            Self::VlmStructural => "vlm_structural",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Weight applied when the configuration does not name this metric.
    pub fn default_weight(&self) -> f64 {
        match self {
            Self::Blur | Self::EdgeConsistency | Self::Naturalness | Self::ClipIqa => 0.15,
            Self::VlmQuality => 0.20,
            Self::VlmArtifacts | Self::VlmStructural => 0.10,
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Summary of one metric over one batch of images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    pub metric_name: String,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    pub num_samples: usize,
    /// Common 0-100 "higher is better" score used for aggregation.
    pub quality_score: f64,
    /// Per-image values the statistics were computed from, in input order.
    #[serde(default)]
    pub samples: Vec<f64>,
}

impl MetricResult {
    /// Build a result from raw samples, deriving `quality_score` from the
    /// sample statistics. Non-finite samples are dropped; returns `None` when
    /// nothing is left.
    pub fn from_samples(
        kind: MetricKind,
        mut samples: Vec<f64>,
        quality: impl FnOnce(&Summary, &[f64]) -> f64,
    ) -> Option<Self> {
        samples.retain(|v| v.is_finite());
        let summary = Summary::of(&samples)?;
        let quality_score = quality(&summary, &samples);
        Some(Self {
            metric_name: kind.name().to_string(),
            mean: summary.mean,
            std: summary.std,
            min: summary.min,
            max: summary.max,
            median: summary.median,
            num_samples: samples.len(),
            quality_score,
            samples,
        })
    }

    pub fn kind(&self) -> Option<MetricKind> {
        MetricKind::from_name(&self.metric_name)
    }
}
