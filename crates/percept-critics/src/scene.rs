//! Zero-shot interior/exterior classification with CLIP.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::critics::clip::{cosine_similarity, softmax_scaled};
use crate::critics::{ClipEncoder, CriticError};

/// Prompts scored against each photo; the first two mean "interior".
pub const SCENE_PROMPTS: [&str; 4] = [
    "a photo of an interior room",
    "a photo of amenity interior",
    "a photo of an exterior building",
    "a photo of outdoor scenery",
];
const INTERIOR_PROMPTS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SceneKind {
    Interior,
    Exterior,
    Unknown,
}

impl fmt::Display for SceneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Interior => "interior",
            Self::Exterior => "exterior",
            Self::Unknown => "unknown",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneClassification {
    pub path: String,
    pub scene: SceneKind,
    pub confidence: f32,
}

/// Counts from one [`SceneClassifier::filter_interior`] call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageStats {
    pub total_images: usize,
    pub interior_images: usize,
    pub exterior_images: usize,
    pub interior_ratio: f64,
}

impl ImageStats {
    pub fn from_counts(total: usize, interior: usize) -> Self {
        Self {
            total_images: total,
            interior_images: interior,
            exterior_images: total - interior,
            interior_ratio: if total == 0 {
                0.0
            } else {
                interior as f64 / total as f64
            },
        }
    }
}

/// Scene and confidence from the similarities to [`SCENE_PROMPTS`].
///
/// The winning prompt decides the scene; its softmax probability is the
/// confidence. No similarities means `Unknown` with confidence 0.
pub fn classify_from_similarities(similarities: &[f32]) -> (SceneKind, f32) {
    let probs = softmax_scaled(similarities);
    match probs
        .iter()
        .copied()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(&b.1))
    {
        Some((idx, p)) if idx < INTERIOR_PROMPTS => (SceneKind::Interior, p),
        Some((_, p)) => (SceneKind::Exterior, p),
        None => (SceneKind::Unknown, 0.0),
    }
}

/// Classifies listing photos as interior or exterior.
pub struct SceneClassifier {
    encoder: Arc<ClipEncoder>,
    prompts: Vec<Vec<f32>>,
}

impl SceneClassifier {
    pub fn new(encoder: Arc<ClipEncoder>) -> Result<Self, CriticError> {
        let prompts = encoder.encode_texts(&SCENE_PROMPTS)?;
        Ok(Self { encoder, prompts })
    }

    /// An unreadable image is `Unknown` with confidence 0.
    pub fn classify(&self, path: &Path) -> SceneClassification {
        let (scene, confidence) = match self.encoder.encode_image(path) {
            Ok(image) => {
                let sims: Vec<f32> = self
                    .prompts
                    .iter()
                    .map(|p| cosine_similarity(&image, p))
                    .collect();
                classify_from_similarities(&sims)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot classify image");
                (SceneKind::Unknown, 0.0)
            }
        };
        SceneClassification {
            path: path.display().to_string(),
            scene,
            confidence,
        }
    }

    /// Interior photos in input order, plus counts.
    pub fn filter_interior(&self, paths: &[PathBuf]) -> (Vec<PathBuf>, ImageStats) {
        let classifications: Vec<SceneClassification> =
            paths.iter().map(|p| self.classify(p)).collect();
        partition_interior(paths, &classifications)
    }
}

/// Split `paths` by their classifications; anything not interior counts as
/// exterior.
pub fn partition_interior(
    paths: &[PathBuf],
    classifications: &[SceneClassification],
) -> (Vec<PathBuf>, ImageStats) {
    let interior: Vec<PathBuf> = paths
        .iter()
        .zip(classifications)
        .filter(|(_, c)| c.scene == SceneKind::Interior)
        .map(|(p, _)| p.clone())
        .collect();

    let stats = ImageStats::from_counts(paths.len(), interior.len());
    info!(
        interior = stats.interior_images,
        exterior = stats.exterior_images,
        ratio = stats.interior_ratio,
        "scene filter"
    );
    (interior, stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interior_prompts_win_as_interior() {
        let (scene, confidence) = classify_from_similarities(&[0.31, 0.24, 0.22, 0.20]);
        assert_eq!(scene, SceneKind::Interior);
        assert!(confidence > 0.9);

        let (scene, _) = classify_from_similarities(&[0.20, 0.27, 0.22, 0.20]);
        assert_eq!(scene, SceneKind::Interior);
    }

    #[test]
    fn outdoor_prompts_win_as_exterior() {
        let (scene, _) = classify_from_similarities(&[0.20, 0.21, 0.22, 0.29]);
        assert_eq!(scene, SceneKind::Exterior);
    }

    #[test]
    fn no_similarities_is_unknown() {
        assert_eq!(classify_from_similarities(&[]), (SceneKind::Unknown, 0.0));
    }

    #[test]
    fn partition_keeps_order_and_counts() {
        let paths: Vec<PathBuf> = ["a.jpg", "b.jpg", "c.jpg", "d.jpg"]
            .iter()
            .map(PathBuf::from)
            .collect();
        let scenes = [
            SceneKind::Interior,
            SceneKind::Exterior,
            SceneKind::Unknown,
            SceneKind::Interior,
        ];
        let classifications: Vec<SceneClassification> = paths
            .iter()
            .zip(scenes)
            .map(|(p, scene)| SceneClassification {
                path: p.display().to_string(),
                scene,
                confidence: 0.5,
            })
            .collect();

        let (interior, stats) = partition_interior(&paths, &classifications);
        assert_eq!(interior, vec![PathBuf::from("a.jpg"), PathBuf::from("d.jpg")]);
        assert_eq!(stats.exterior_images, 2);
        assert_eq!(stats.interior_ratio, 0.5);
    }

    #[test]
    fn empty_stats_ratio_is_zero() {
        assert_eq!(ImageStats::from_counts(0, 0).interior_ratio, 0.0);
    }
}
