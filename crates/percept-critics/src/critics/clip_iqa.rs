//! CLIP-IQA: quality as the probability of "Good photo." over "Bad photo.".

use std::path::Path;
use std::sync::Arc;

use percept_core::MetricKind;

use super::clip::{cosine_similarity, softmax_scaled, ClipEncoder};
use super::{CriticError, QualityModel};

const GOOD_PROMPT: &str = "Good photo.";
const BAD_PROMPT: &str = "Bad photo.";

/// Antonym-prompt quality model over a shared [`ClipEncoder`].
pub struct ClipIqaModel {
    encoder: Arc<ClipEncoder>,
    good: Vec<f32>,
    bad: Vec<f32>,
}

impl ClipIqaModel {
    /// Encodes the prompt pair once.
    pub fn new(encoder: Arc<ClipEncoder>) -> Result<Self, CriticError> {
        let good = encoder.encode_text(GOOD_PROMPT)?;
        let bad = encoder.encode_text(BAD_PROMPT)?;
        Ok(Self { encoder, good, bad })
    }
}

impl QualityModel for ClipIqaModel {
    fn kind(&self) -> MetricKind {
        MetricKind::ClipIqa
    }

    fn score(&self, path: &Path) -> Result<f64, CriticError> {
        let image = self.encoder.encode_image(path)?;
        Ok(antonym_score(
            cosine_similarity(&image, &self.good),
            cosine_similarity(&image, &self.bad),
        ))
    }
}

/// `100 * softmax(good, bad)[good]`
pub fn antonym_score(good_similarity: f32, bad_similarity: f32) -> f64 {
    let probs = softmax_scaled(&[good_similarity, bad_similarity]);
    probs[0] as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_similarity_is_fifty() {
        assert!((antonym_score(0.2, 0.2) - 50.0).abs() < 1e-4);
    }

    #[test]
    fn closer_to_good_scores_higher() {
        assert!(antonym_score(0.26, 0.22) > 95.0);
        assert!(antonym_score(0.22, 0.26) < 5.0);
    }
}
