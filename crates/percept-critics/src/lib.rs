//! percept-critics - image critics and evaluation pipelines.
//!
//! This crate turns captured views and listing photos into results:
//! - **Critics**: sharpness, edge consistency, MSCN naturalness and CLIP-IQA
//! - **MetricCollector**: runs the enabled critics side by side
//! - **Evaluator**: per-render CV + VLM evaluation, persistence and ranking
//! - **SceneClassifier**: CLIP zero-shot interior/exterior filtering
//! - **LabelGrounder**: CLIP coverage, redundancy and consistency of labels
//! - **LabelingPipeline**: listing tags with region adaptation and quality
//!
//! # Features
//!
//! - `metal` - Enable Metal acceleration (Apple Silicon)
//! - `cuda` - Enable CUDA acceleration (NVIDIA GPUs)

pub mod collector;
pub mod critics;
pub mod evaluator;
pub mod grounding;
pub mod labeling;
pub mod scene;

pub use collector::MetricCollector;
pub use critics::{ClipEncoder, CriticError, ImageMetric, QualityModel};
pub use evaluator::Evaluator;
pub use grounding::LabelGrounder;
pub use labeling::{LabelingPipeline, LabelingResult, LabelingSummary, ListingFailure};
pub use scene::{SceneClassifier, SceneKind};
