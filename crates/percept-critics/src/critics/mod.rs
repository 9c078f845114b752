//! No-reference image quality critics.
//!
//! Every critic turns a batch of view images into one [`MetricResult`].
//! Statistical critics skip images they cannot measure; perceptual critics
//! (see [`PerceptualMetric`]) record the worst-case score instead.

pub mod clip;
pub mod clip_iqa;
pub mod edges;
pub mod naturalness;
pub mod sharpness;

use std::path::{Path, PathBuf};

use image::GrayImage;
use percept_core::{MetricKind, MetricResult};
use thiserror::Error;
use tracing::warn;

pub use clip::ClipEncoder;
pub use clip_iqa::ClipIqaModel;
pub use edges::EdgeConsistencyMetric;
pub use naturalness::NaturalnessModel;
pub use sharpness::BlurMetric;

/// Failure to measure a single image.
#[derive(Debug, Error)]
pub enum CriticError {
    #[error("failed to open image {path}: {source}")]
    Image {
        path: String,
        #[source]
        source: image::ImageError,
    },

    #[error("image {0} has no usable content")]
    Degenerate(String),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("model error: {0}")]
    Model(#[from] candle_core::Error),
}

/// A metric computed over a batch of images.
pub trait ImageMetric: Send + Sync {
    fn kind(&self) -> MetricKind;

    /// Summary over `paths`, or `None` when no image could be measured.
    fn evaluate(&self, paths: &[PathBuf]) -> Option<MetricResult>;
}

/// A per-image model producing a 0-100 higher-is-better score.
pub trait QualityModel: Send + Sync {
    fn kind(&self) -> MetricKind;

    fn score(&self, path: &Path) -> Result<f64, CriticError>;
}

/// Adapts a [`QualityModel`] into an [`ImageMetric`].
///
/// A failing image scores 0.0, so `quality_score` is the plain mean over
/// every image.
pub struct PerceptualMetric<M> {
    model: M,
}

impl<M: QualityModel> PerceptualMetric<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }
}

impl<M: QualityModel> ImageMetric for PerceptualMetric<M> {
    fn kind(&self) -> MetricKind {
        self.model.kind()
    }

    fn evaluate(&self, paths: &[PathBuf]) -> Option<MetricResult> {
        let samples = paths
            .iter()
            .map(|path| {
                self.model.score(path).unwrap_or_else(|e| {
                    warn!(metric = %self.model.kind(), path = %path.display(), error = %e, "scoring failed, recording 0");
                    0.0
                })
            })
            .collect();
        MetricResult::from_samples(self.model.kind(), samples, |s, _| s.mean)
    }
}

pub(crate) fn open_gray(path: &Path) -> Result<GrayImage, CriticError> {
    image::open(path)
        .map(|img| img.to_luma8())
        .map_err(|source| CriticError::Image {
            path: path.display().to_string(),
            source,
        })
}
