//! Listing labeling: scene filter, tags, region adaptation, label quality.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use percept_core::config::EvalConfig;
use percept_core::labeling::{
    diversity, Grounding, LabelQuality, PropertyDocument, PropertyMetadata, RegionAdapter,
    RegionContext, TagGenerator,
};
use percept_core::vlm::{OpenAiClient, ScorerSettings};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::critics::ClipEncoder;
use crate::grounding::LabelGrounder;
use crate::scene::{ImageStats, SceneClassifier};

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    pub total_seconds: f64,
    pub classification_seconds: f64,
    pub labeling_seconds: f64,
    pub evaluation_seconds: f64,
}

/// Result document for one listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelingResult {
    pub property_id: String,
    pub metadata: PropertyMetadata,
    pub labels: Vec<String>,
    pub region: RegionContext,
    pub image_stats: ImageStats,
    pub evaluation: LabelQuality,
    pub timing: Timing,
    pub generated_at: DateTime<Utc>,
}

/// A listing that produced no result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingFailure {
    pub listing: String,
    pub error: String,
}

/// Cross-listing summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelingSummary {
    pub total_properties: usize,
    pub mean_labels: f64,
    pub mean_specificity: f64,
    pub diversity: f64,
    /// Grounding means over the listings that were grounded.
    pub mean_coverage: Option<f64>,
    pub mean_redundancy: Option<f64>,
    pub mean_clip_consistency: Option<f64>,
    pub mean_seconds: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<ListingFailure>,
    pub generated_at: DateTime<Utc>,
}

impl LabelingSummary {
    pub fn of(results: &[LabelingResult], failed: &[ListingFailure]) -> Self {
        let n = results.len().max(1) as f64;
        let label_sets: Vec<Vec<String>> = results
            .iter()
            .map(|r| r.region.adapted_labels.clone())
            .collect();
        let grounded: Vec<Grounding> = results.iter().filter_map(|r| r.evaluation.grounding).collect();
        let grounded_mean = |f: fn(&Grounding) -> f64| {
            (!grounded.is_empty())
                .then(|| grounded.iter().map(f).sum::<f64>() / grounded.len() as f64)
        };

        Self {
            total_properties: results.len(),
            mean_labels: results.iter().map(|r| r.evaluation.num_labels as f64).sum::<f64>() / n,
            mean_specificity: results.iter().map(|r| r.evaluation.specificity).sum::<f64>() / n,
            diversity: diversity(&label_sets),
            mean_coverage: grounded_mean(|g| g.coverage),
            mean_redundancy: grounded_mean(|g| g.redundancy),
            mean_clip_consistency: grounded_mean(|g| g.clip_consistency),
            mean_seconds: results.iter().map(|r| r.timing.total_seconds).sum::<f64>() / n,
            failed: failed.to_vec(),
            generated_at: Utc::now(),
        }
    }
}

pub struct LabelingPipeline {
    classifier: Option<Arc<SceneClassifier>>,
    grounder: Option<Arc<LabelGrounder>>,
    generator: TagGenerator,
    adapter: RegionAdapter,
}

impl LabelingPipeline {
    pub fn new(
        classifier: Option<SceneClassifier>,
        grounder: Option<LabelGrounder>,
        generator: TagGenerator,
        adapter: RegionAdapter,
    ) -> Self {
        Self {
            classifier: classifier.map(Arc::new),
            grounder: grounder.map(Arc::new),
            generator,
            adapter,
        }
    }

    /// Build from configuration.
    ///
    /// CLIP is loaded once for the scene filter and label grounding. When it
    /// cannot be loaded every photo is tagged and only text measures are
    /// reported. The scene filter is also skipped when `filter_interior` is
    /// off.
    pub fn from_config(config: &EvalConfig, filter_interior: bool) -> Result<Self> {
        let client = OpenAiClient::new(&config.vlm_metrics)
            .context("Labeling needs a VLM API key")?
            .with_model(&config.labeling.model);
        let policy = ScorerSettings::from_config(&config.vlm_metrics).retry;
        let generator = TagGenerator::new(Arc::new(client), policy, &config.labeling);

        let encoder = match ClipEncoder::load(&config.cv_metrics.clip_iqa.model_id) {
            Ok(encoder) => Some(Arc::new(encoder)),
            Err(e) => {
                warn!(error = %e, "CLIP unavailable, no scene filter or label grounding");
                None
            }
        };

        let classifier = match &encoder {
            Some(encoder) if filter_interior => match SceneClassifier::new(Arc::clone(encoder)) {
                Ok(classifier) => Some(classifier),
                Err(e) => {
                    warn!(error = %e, "scene classifier unavailable, tagging every photo");
                    None
                }
            },
            _ => None,
        };
        let grounder = encoder.map(LabelGrounder::new);

        Ok(Self::new(
            classifier,
            grounder,
            generator,
            RegionAdapter::from_config(&config.regions),
        ))
    }

    #[instrument(skip_all, fields(property = %document.property_id(), images = images.len()))]
    pub async fn process(&self, document: &PropertyDocument, images: &[PathBuf]) -> LabelingResult {
        let start = Instant::now();
        let metadata = document.metadata();

        let stage = Instant::now();
        let (interior, image_stats) = self.filter(images).await;
        let classification_seconds = stage.elapsed().as_secs_f64();

        let stage = Instant::now();
        let labels = self.generator.generate(&interior).await;
        let region = self.adapter.enrich(&labels, &metadata);
        let labeling_seconds = stage.elapsed().as_secs_f64();

        let stage = Instant::now();
        let evaluation = self.evaluate(&region.adapted_labels, interior).await;
        let evaluation_seconds = stage.elapsed().as_secs_f64();

        let timing = Timing {
            total_seconds: start.elapsed().as_secs_f64(),
            classification_seconds,
            labeling_seconds,
            evaluation_seconds,
        };
        info!(
            labels = labels.len(),
            region = %region.region,
            interior = image_stats.interior_images,
            seconds = timing.total_seconds,
            "listing labeled"
        );

        LabelingResult {
            property_id: document.property_id().to_string(),
            metadata,
            labels,
            region,
            image_stats,
            evaluation,
            timing,
            generated_at: Utc::now(),
        }
    }

    /// Load a listing document and its photos, then [`process`](Self::process) it.
    ///
    /// Photos are looked up in `images`, or next to the listing file.
    pub async fn process_listing(
        &self,
        listing: &Path,
        images: Option<&Path>,
    ) -> Result<LabelingResult> {
        let document = PropertyDocument::load(listing)?;
        let dir = match images {
            Some(dir) => dir.to_path_buf(),
            None => listing.parent().map(Path::to_path_buf).unwrap_or_default(),
        };
        let photos = listing_images(&document, &dir)?;
        Ok(self.process(&document, &photos).await)
    }

    /// Process every listing; one failing listing does not stop the rest.
    pub async fn process_all(
        &self,
        listings: &[PathBuf],
        images: Option<&Path>,
    ) -> (Vec<LabelingResult>, Vec<ListingFailure>) {
        let mut results = Vec::with_capacity(listings.len());
        let mut failed = Vec::new();
        for listing in listings {
            match self.process_listing(listing, images).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    let reason = format!("{e:#}");
                    error!(listing = %listing.display(), error = %reason, "listing skipped");
                    failed.push(ListingFailure {
                        listing: listing.display().to_string(),
                        error: reason,
                    });
                }
            }
        }
        (results, failed)
    }

    async fn filter(&self, images: &[PathBuf]) -> (Vec<PathBuf>, ImageStats) {
        let Some(classifier) = &self.classifier else {
            return (images.to_vec(), ImageStats::from_counts(images.len(), images.len()));
        };
        let classifier = Arc::clone(classifier);
        let paths = images.to_vec();
        match tokio::task::spawn_blocking(move || classifier.filter_interior(&paths)).await {
            Ok(filtered) => filtered,
            Err(e) => {
                warn!(error = %e, "scene classification aborted, tagging every photo");
                (images.to_vec(), ImageStats::from_counts(images.len(), images.len()))
            }
        }
    }

    async fn evaluate(&self, labels: &[String], images: Vec<PathBuf>) -> LabelQuality {
        let Some(grounder) = &self.grounder else {
            return LabelQuality::of(labels);
        };
        let grounder = Arc::clone(grounder);
        let owned = labels.to_vec();
        match tokio::task::spawn_blocking(move || grounder.evaluate(&owned, &images)).await {
            Ok(quality) => quality,
            Err(e) => {
                warn!(error = %e, "label grounding aborted");
                LabelQuality::of(labels)
            }
        }
    }
}

/// Local photos for a listing.
///
/// Files in `dir` named like the listing's `picture_list` entries are used in
/// listing order; when none match, every image in `dir` is used in name order.
pub fn listing_images(document: &PropertyDocument, dir: &Path) -> Result<Vec<PathBuf>> {
    let listed: Vec<PathBuf> = document
        .listing
        .picture_list
        .iter()
        .filter_map(|url| url.rsplit('/').next())
        .map(|name| name.split(['?', '#']).next().unwrap_or(name))
        .filter(|name| !name.is_empty())
        .map(|name| dir.join(name))
        .filter(|path| path.is_file())
        .collect();
    if !listed.is_empty() {
        return Ok(listed);
    }

    let mut images: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list images in {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    images.sort();
    Ok(images)
}
