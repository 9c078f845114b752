//! Concurrent per-view scoring with a fixed worker pool.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::{
    call_with_retry, EncodedImage, RetryPolicy, VisionClient, VisionRequest, VlmJudgement,
    NEUTRAL_SCORE,
};
use crate::config::VlmConfig;
use crate::metric::{MetricKind, MetricResult};

const SYSTEM_PROMPT: &str = "You are a strict reviewer of novel-view renders produced by \
3D scene reconstruction (Gaussian splatting, NeRF). Judge only what is visible: geometry, \
spatial consistency and texture fidelity. Ignore composition and aesthetics. Small artifacts \
must lower the score. Reply with a single JSON object and nothing else.";

const USER_PROMPT: &str = r#"Rate this rendered view.

1. overall_score: integer 1-10 for how convincingly it passes as a photograph of a real scene
   (10 photographic, 7-9 minor artifacts, 4-6 obvious reconstruction errors, 1-3 broken).
2. structural_defects: for each of curved_or_warped_walls, misaligned_edges,
   collapsed_or_melted_geometry, depth_or_perspective_errors give
   {"present": true|false, "description": "<where, if present>"}.
3. texture_artifacts: same shape for ghosting, floating_artifacts, over_blur,
   texture_inconsistency.
4. subscores: geometry_score, texture_score, consistency_score, integers 1-10.
5. summary: one sentence.

Return:
{"overall_score": 0, "structural_defects": {}, "texture_artifacts": {}, "subscores": {}, "summary": ""}"#;

/// Pool and request settings for [`VlmScorer`].
#[derive(Debug, Clone)]
pub struct ScorerSettings {
    pub max_workers: usize,
    pub retry: RetryPolicy,
    pub max_output_tokens: u32,
    pub image_detail: String,
}

impl Default for ScorerSettings {
    fn default() -> Self {
        Self::from_config(&VlmConfig::default())
    }
}

impl ScorerSettings {
    pub fn from_config(config: &VlmConfig) -> Self {
        Self {
            max_workers: config.max_workers.max(1),
            retry: RetryPolicy {
                max_retries: config.max_retries,
                base_delay: config.backoff_base(),
                rate_limit_delay: config.rate_limit_delay(),
            },
            max_output_tokens: config.max_output_tokens,
            image_detail: config.image_detail.clone(),
        }
    }
}

/// Scores for one view, in the order the views were given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewScore {
    pub image_path: String,
    /// Overall quality, 1-10
    pub quality: f64,
    /// Artifact severity, 1 (none) to 10
    pub artifact_severity: f64,
    /// Geometric plausibility, 1-10
    pub structural: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judgement: Option<VlmJudgement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ViewScore {
    /// Neutral scores for a view whose call failed outright.
    pub fn fallback(path: &Path, error: impl Into<String>) -> Self {
        Self {
            image_path: path.display().to_string(),
            quality: NEUTRAL_SCORE,
            artifact_severity: NEUTRAL_SCORE,
            structural: NEUTRAL_SCORE,
            judgement: None,
            error: Some(error.into()),
        }
    }

    fn from_judgement(path: &Path, judgement: VlmJudgement) -> Self {
        Self {
            image_path: path.display().to_string(),
            quality: judgement.quality(),
            artifact_severity: judgement.artifact_severity(),
            structural: judgement.geometry(),
            judgement: Some(judgement),
            error: None,
        }
    }
}

/// VLM metrics for one batch of views.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VlmReport {
    pub model: String,
    pub num_views: usize,
    pub quality: Option<MetricResult>,
    pub artifacts: Option<MetricResult>,
    pub structural: Option<MetricResult>,
    pub views: Vec<ViewScore>,
}

impl VlmReport {
    fn from_views(model: &str, views: Vec<ViewScore>) -> Self {
        let column = |f: fn(&ViewScore) -> f64| views.iter().map(f).collect::<Vec<_>>();

        let quality = MetricResult::from_samples(MetricKind::VlmQuality, column(|v| v.quality), |s, _| {
            s.mean / 10.0 * 100.0
        });
        // Severity is inverted so that higher is better.
        let artifacts = MetricResult::from_samples(
            MetricKind::VlmArtifacts,
            column(|v| v.artifact_severity),
            |_, samples| {
                let inverted = samples.iter().map(|s| 11.0 - s).sum::<f64>() / samples.len() as f64;
                inverted / 10.0 * 100.0
            },
        );
        let structural = MetricResult::from_samples(
            MetricKind::VlmStructural,
            column(|v| v.structural),
            |s, _| s.mean / 10.0 * 100.0,
        );

        Self {
            model: model.to_string(),
            num_views: views.len(),
            quality,
            artifacts,
            structural,
            views,
        }
    }

    /// The three metric summaries that are present.
    pub fn metric_results(&self) -> impl Iterator<Item = &MetricResult> {
        [&self.quality, &self.artifacts, &self.structural]
            .into_iter()
            .flatten()
    }
}

/// Scores views through a [`VisionClient`] with at most `max_workers`
/// requests in flight.
#[derive(Clone)]
pub struct VlmScorer {
    client: Arc<dyn VisionClient>,
    settings: ScorerSettings,
}

impl VlmScorer {
    pub fn new(client: Arc<dyn VisionClient>, settings: ScorerSettings) -> Self {
        Self { client, settings }
    }

    pub fn settings(&self) -> &ScorerSettings {
        &self.settings
    }

    /// Score every view and summarize.
    ///
    /// The returned views line up with `paths` regardless of completion
    /// order. A view that cannot be scored gets [`ViewScore::fallback`].
    #[instrument(skip(self, paths), fields(views = paths.len(), model = self.client.model()))]
    pub async fn score_views(&self, paths: &[PathBuf]) -> VlmReport {
        let model = self.client.model().to_string();
        if paths.is_empty() {
            return VlmReport::from_views(&model, Vec::new());
        }

        let paths: Arc<[PathBuf]> = paths.into();
        let cursor = Arc::new(AtomicUsize::new(0));
        let workers = self.settings.max_workers.clamp(1, paths.len());

        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let client = Arc::clone(&self.client);
                let settings = self.settings.clone();
                let paths = Arc::clone(&paths);
                let cursor = Arc::clone(&cursor);
                tokio::spawn(async move {
                    let mut scored = Vec::new();
                    loop {
                        let idx = cursor.fetch_add(1, Ordering::Relaxed);
                        let Some(path) = paths.get(idx) else { break };
                        scored.push((idx, score_one(client.as_ref(), &settings, path).await));
                    }
                    scored
                })
            })
            .collect();

        let mut slots: Vec<Option<ViewScore>> = vec![None; paths.len()];
        for handle in handles {
            match handle.await {
                Ok(scored) => {
                    for (idx, score) in scored {
                        slots[idx] = Some(score);
                    }
                }
                Err(e) => warn!(error = %e, "VLM worker aborted"),
            }
        }

        let views: Vec<ViewScore> = slots
            .into_iter()
            .zip(paths.iter())
            .map(|(slot, path)| slot.unwrap_or_else(|| ViewScore::fallback(path, "worker aborted")))
            .collect();

        let failed = views.iter().filter(|v| v.error.is_some()).count();
        info!(scored = views.len() - failed, failed, "VLM scoring complete");
        VlmReport::from_views(&model, views)
    }
}

async fn score_one(client: &dyn VisionClient, settings: &ScorerSettings, path: &Path) -> ViewScore {
    let image = match EncodedImage::from_path(path, &settings.image_detail) {
        Ok(image) => image,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot encode view");
            return ViewScore::fallback(path, e.to_string());
        }
    };

    let request = VisionRequest {
        system: SYSTEM_PROMPT.to_string(),
        prompt: USER_PROMPT.to_string(),
        images: vec![image],
        max_output_tokens: settings.max_output_tokens,
    };

    match call_with_retry(client, &request, &settings.retry).await {
        Ok(text) => match VlmJudgement::parse(&text) {
            Ok(judgement) => ViewScore::from_judgement(path, judgement),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unparseable VLM response");
                ViewScore::fallback(path, e.to_string())
            }
        },
        Err(e) => {
            warn!(path = %path.display(), error = %e, "VLM scoring failed");
            ViewScore::fallback(path, e.to_string())
        }
    }
}
