//! Weighted score aggregation and cross-render ranking.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::metric::{MetricKind, MetricResult};

/// Metric name to non-negative weight.
///
/// Weights need not sum to one; [`overall_score`] normalizes by the weights of
/// the metrics actually present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeightTable(BTreeMap<String, f64>);

impl Default for WeightTable {
    fn default() -> Self {
        Self(
            MetricKind::ALL
                .into_iter()
                .map(|k| (k.name().to_string(), k.default_weight()))
                .collect(),
        )
    }
}

impl WeightTable {
    pub fn new(weights: BTreeMap<String, f64>) -> Self {
        Self(weights)
    }

    /// Defaults overlaid with `overrides`. Negative weights are clamped to 0.
    pub fn with_overrides(overrides: &BTreeMap<String, f64>) -> Self {
        let mut table = Self::default();
        for (name, weight) in overrides {
            table.0.insert(name.clone(), weight.max(0.0));
        }
        table
    }

    /// Weight for `metric`, 0 when the table does not name it.
    pub fn weight(&self, metric: &str) -> f64 {
        self.0.get(metric).copied().unwrap_or(0.0)
    }
}

/// Weighted mean of the scores present, in [0, 100].
///
/// Scores are clamped to [0, 100] and non-finite scores are skipped.
/// Returns 0 when no score is present or the present weights sum to 0.
pub fn overall_score<'a>(
    scores: impl IntoIterator<Item = (&'a str, f64)>,
    weights: &WeightTable,
) -> f64 {
    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;

    for (metric, score) in scores {
        if !score.is_finite() {
            continue;
        }
        let score = score.clamp(0.0, 100.0);
        let weight = weights.weight(metric);
        weighted_sum += score * weight;
        total_weight += weight;
    }

    if total_weight <= 0.0 {
        return 0.0;
    }
    weighted_sum / total_weight
}

/// [`overall_score`] over a set of metric results.
pub fn overall_from_results<'a>(
    results: impl IntoIterator<Item = &'a MetricResult>,
    weights: &WeightTable,
) -> f64 {
    overall_score(
        results
            .into_iter()
            .map(|r| (r.metric_name.as_str(), r.quality_score)),
        weights,
    )
}

/// One row of a cross-render ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankEntry {
    pub rank: usize,
    pub name: String,
    pub score: f64,
}

/// Rank renders by descending score.
///
/// Ranks are 1-based and assigned in sorted order; equal scores keep their
/// input order. The returned rows are in rank order.
pub fn rank_renders<'a>(renders: impl IntoIterator<Item = (&'a str, f64)>) -> Vec<RankEntry> {
    let mut sorted: Vec<(&str, f64)> = renders.into_iter().collect();
    // Stable sort keeps input order among ties.
    sorted.sort_by(|a, b| b.1.total_cmp(&a.1));

    sorted
        .into_iter()
        .enumerate()
        .map(|(i, (name, score))| RankEntry {
            rank: i + 1,
            name: name.to_string(),
            score,
        })
        .collect()
}
