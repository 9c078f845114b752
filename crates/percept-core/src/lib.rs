//! Percept Core - evaluation building blocks
//!
//! This crate provides configuration, per-metric statistics, weighted score
//! aggregation and ranking, the vision-language model client and concurrent
//! scorer, result persistence, and the text side of listing labeling
//! (region adaptation, tag parsing, label quality).

pub mod aggregate;
pub mod config;
pub mod evaluation;
pub mod labeling;
pub mod metric;
pub mod stats;
pub mod store;
pub mod vlm;

pub use aggregate::{overall_score, rank_renders, RankEntry, WeightTable};
pub use config::{EvalConfig, MetricsSelection};
pub use evaluation::{Comparison, RenderEvaluation, ViewRecord};
pub use metric::{MetricKind, MetricResult};
pub use stats::Summary;
pub use store::ResultsStore;
pub use vlm::{VisionClient, VlmError, VlmScorer};
