//! CLIP image and text encoder.

use std::path::Path;

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::clip::{ClipConfig, ClipModel};
use hf_hub::{api::sync::Api, Repo, RepoType};
use tokenizers::Tokenizer;
use tracing::info;

use super::CriticError;

/// CLIP's text context length.
const CONTEXT_LENGTH: usize = 77;
const IMAGE_SIZE: u32 = 224;
const PIXEL_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const PIXEL_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

/// Temperature CLIP applies to cosine similarities before a softmax.
pub const LOGIT_SCALE: f32 = 100.0;

/// Shared CLIP ViT-B/32 handle producing L2-normalized embeddings.
pub struct ClipEncoder {
    model_id: String,
    device: Device,
    model: ClipModel,
    tokenizer: Tokenizer,
}

impl ClipEncoder {
    /// Download (or reuse the cached) weights and tokenizer for `model_id`.
    pub fn load(model_id: &str) -> Result<Self> {
        let device = Self::get_device()?;
        info!(model = model_id, device = ?device, "Loading CLIP model");

        let api = Api::new().context("Failed to create HF API")?;
        let repo = api.repo(Repo::new(model_id.to_string(), RepoType::Model));

        let model_path = repo
            .get("model.safetensors")
            .context("Failed to download model.safetensors")?;
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[model_path], DType::F32, &device)? };
        let model = ClipModel::new(vb, &ClipConfig::vit_base_patch32())?;

        let tokenizer_path = repo
            .get("tokenizer.json")
            .context("Failed to download tokenizer.json")?;
        let tokenizer = Tokenizer::from_file(tokenizer_path).map_err(|e| anyhow::anyhow!("{}", e))?;

        Ok(Self {
            model_id: model_id.to_string(),
            device,
            model,
            tokenizer,
        })
    }

    fn get_device() -> Result<Device> {
        #[cfg(feature = "metal")]
        {
            if let Ok(device) = Device::new_metal(0) {
                return Ok(device);
            }
        }

        #[cfg(feature = "cuda")]
        {
            if let Ok(device) = Device::new_cuda(0) {
                return Ok(device);
            }
        }

        Ok(Device::Cpu)
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Normalized text embedding.
    pub fn encode_text(&self, text: &str) -> Result<Vec<f32>, CriticError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| CriticError::Tokenizer(e.to_string()))?;

        let mut ids = vec![0u32; CONTEXT_LENGTH];
        for (slot, id) in ids.iter_mut().zip(encoding.get_ids()) {
            *slot = *id;
        }

        let input_ids = Tensor::new(&ids[..], &self.device)?.unsqueeze(0)?;
        let features = self.model.get_text_features(&input_ids)?;
        Ok(l2_normalize(features.squeeze(0)?.to_vec1::<f32>()?))
    }

    pub fn encode_texts(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, CriticError> {
        texts.iter().map(|t| self.encode_text(t)).collect()
    }

    /// Normalized image embedding.
    pub fn encode_image(&self, path: &Path) -> Result<Vec<f32>, CriticError> {
        let img = image::open(path).map_err(|source| CriticError::Image {
            path: path.display().to_string(),
            source,
        })?;
        let img = img
            .resize_exact(IMAGE_SIZE, IMAGE_SIZE, image::imageops::FilterType::Triangle)
            .to_rgb8();

        let plane = (IMAGE_SIZE * IMAGE_SIZE) as usize;
        let mut pixels = vec![0f32; 3 * plane];
        for (i, pixel) in img.pixels().enumerate() {
            for c in 0..3 {
                pixels[c * plane + i] = (pixel[c] as f32 / 255.0 - PIXEL_MEAN[c]) / PIXEL_STD[c];
            }
        }

        let size = IMAGE_SIZE as usize;
        let input = Tensor::from_vec(pixels, (1, 3, size, size), &self.device)?;
        let features = self.model.get_image_features(&input)?;
        Ok(l2_normalize(features.squeeze(0)?.to_vec1::<f32>()?))
    }
}

fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

/// Dot product of two normalized embeddings.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Softmax over `LOGIT_SCALE * similarities`.
pub fn softmax_scaled(similarities: &[f32]) -> Vec<f32> {
    let logits: Vec<f32> = similarities.iter().map(|s| s * LOGIT_SCALE).collect();
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.iter().map(|e| e / total).collect()
}
