//! Runs the enabled image critics over one batch of views.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use percept_core::config::CvMetricsConfig;
use percept_core::MetricResult;
use tracing::{info, warn};

use crate::critics::{
    BlurMetric, ClipEncoder, ClipIqaModel, EdgeConsistencyMetric, ImageMetric, NaturalnessModel,
    PerceptualMetric,
};

/// A fixed set of independent metrics.
pub struct MetricCollector {
    metrics: Vec<Box<dyn ImageMetric>>,
}

impl MetricCollector {
    pub fn new(metrics: Vec<Box<dyn ImageMetric>>) -> Self {
        Self { metrics }
    }

    /// Build the metrics enabled in `config`.
    ///
    /// A metric whose model cannot be loaded is left out; the others still run.
    pub fn from_config(config: &CvMetricsConfig) -> Self {
        let mut metrics: Vec<Box<dyn ImageMetric>> = Vec::new();

        if config.blur.enabled {
            metrics.push(Box::new(BlurMetric::from_config(&config.blur)));
        }
        if config.edge_consistency.enabled {
            metrics.push(Box::new(EdgeConsistencyMetric::from_config(
                &config.edge_consistency,
            )));
        }
        if config.naturalness.enabled {
            metrics.push(Box::new(PerceptualMetric::new(NaturalnessModel::new())));
        }
        if config.clip_iqa.enabled {
            match ClipEncoder::load(&config.clip_iqa.model_id)
                .and_then(|encoder| Ok(ClipIqaModel::new(Arc::new(encoder))?))
            {
                Ok(model) => metrics.push(Box::new(PerceptualMetric::new(model))),
                Err(e) => warn!(error = %e, "clip_iqa unavailable, skipping metric"),
            }
        }

        Self { metrics }
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Metric names in run order.
    pub fn metric_names(&self) -> Vec<&'static str> {
        self.metrics.iter().map(|m| m.kind().name()).collect()
    }

    /// One result per metric that measured at least one image.
    ///
    /// Each metric runs on its own scoped thread.
    pub fn collect(&self, paths: &[PathBuf]) -> BTreeMap<String, MetricResult> {
        let outcomes: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .metrics
                .iter()
                .map(|metric| (metric.kind(), scope.spawn(move || metric.evaluate(paths))))
                .collect();

            handles
                .into_iter()
                .map(|(kind, handle)| (kind, handle.join()))
                .collect()
        });

        let mut results = BTreeMap::new();
        for (kind, outcome) in outcomes {
            match outcome {
                Ok(Some(result)) => {
                    info!(
                        metric = %kind,
                        mean = result.mean,
                        quality_score = result.quality_score,
                        samples = result.num_samples,
                        "metric computed"
                    );
                    results.insert(kind.name().to_string(), result);
                }
                Ok(None) => warn!(metric = %kind, "no image could be measured"),
                Err(_) => warn!(metric = %kind, "metric panicked"),
            }
        }
        results
    }
}
