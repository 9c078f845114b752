//! CLIP grounding of generated labels against the photos they describe.

use std::path::PathBuf;
use std::sync::Arc;

use percept_core::labeling::{label_prompt, LabelQuality};
use tracing::warn;

use crate::critics::ClipEncoder;

pub struct LabelGrounder {
    encoder: Arc<ClipEncoder>,
}

impl LabelGrounder {
    pub fn new(encoder: Arc<ClipEncoder>) -> Self {
        Self { encoder }
    }

    /// Text and grounding measures for `labels` over `images`.
    ///
    /// Unreadable photos are left out. When the labels cannot be encoded only
    /// the text measures are reported.
    pub fn evaluate(&self, labels: &[String], images: &[PathBuf]) -> LabelQuality {
        let prompts: Vec<String> = labels.iter().map(|l| label_prompt(l)).collect();
        let prompts: Vec<&str> = prompts.iter().map(String::as_str).collect();
        let embeddings = match self.encoder.encode_texts(&prompts) {
            Ok(embeddings) => embeddings,
            Err(e) => {
                warn!(error = %e, "cannot encode labels, skipping grounding");
                return LabelQuality::of(labels);
            }
        };

        let photos: Vec<Vec<f32>> = images
            .iter()
            .filter_map(|path| match self.encoder.encode_image(path) {
                Ok(embedding) => Some(embedding),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping photo in grounding");
                    None
                }
            })
            .collect();

        LabelQuality::grounded(labels, &embeddings, &photos)
    }
}
