//! Render evaluation: views → image critics + VLM scorer → weighted score.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use percept_core::config::EvalConfig;
use percept_core::vlm::{OpenAiClient, ScorerSettings, VlmScorer};
use percept_core::{Comparison, MetricResult, RenderEvaluation, ResultsStore, ViewRecord, WeightTable};
use tracing::{error, info, instrument, warn};

use crate::collector::MetricCollector;

const METADATA_FILE: &str = "views_metadata.json";
const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

/// Evaluates captured renders and persists their results.
pub struct Evaluator {
    views_dir: PathBuf,
    renders: Vec<(String, String)>,
    collector: Arc<MetricCollector>,
    scorer: Option<VlmScorer>,
    weights: WeightTable,
    store: ResultsStore,
}

impl Evaluator {
    pub fn new(
        config: &EvalConfig,
        collector: MetricCollector,
        scorer: Option<VlmScorer>,
    ) -> Self {
        Self {
            views_dir: config.capture.views_dir.clone(),
            renders: config
                .renders
                .iter()
                .map(|r| (r.name.clone(), r.url.clone()))
                .collect(),
            collector: Arc::new(collector),
            scorer,
            weights: config.weight_table(),
            store: ResultsStore::new(&config.output.results_dir),
        }
    }

    /// Build critics and the VLM client from configuration.
    ///
    /// A missing API key disables the VLM metrics instead of failing.
    pub fn from_config(config: &EvalConfig) -> Self {
        let collector = MetricCollector::from_config(&config.cv_metrics);

        let scorer = if config.vlm_metrics.enabled {
            match OpenAiClient::new(&config.vlm_metrics) {
                Ok(client) => Some(VlmScorer::new(
                    Arc::new(client),
                    ScorerSettings::from_config(&config.vlm_metrics),
                )),
                Err(e) => {
                    warn!(error = %e, "VLM metrics disabled");
                    None
                }
            }
        } else {
            None
        };

        info!(
            cv_metrics = ?collector.metric_names(),
            vlm = scorer.is_some(),
            "Evaluator initialized"
        );
        Self::new(config, collector, scorer)
    }

    pub fn store(&self) -> &ResultsStore {
        &self.store
    }

    /// Views previously captured for `render_name`.
    pub fn load_views(&self, render_name: &str, render_url: &str) -> Result<Vec<ViewRecord>> {
        load_views(&self.views_dir.join(render_name), render_name, render_url)
    }

    /// Evaluate one render and write `<render>_results.json`.
    ///
    /// Never fails: a render without views carries the reason in `error`.
    #[instrument(skip(self), fields(render = %name))]
    pub async fn evaluate_render(&self, name: &str, url: &str) -> RenderEvaluation {
        let start = Instant::now();

        let views = match self.load_views(name, url) {
            Ok(views) if !views.is_empty() => views,
            Ok(_) => return self.finish(RenderEvaluation::failed(name, url, "No views available")),
            Err(e) => {
                error!(error = %e, "failed to load views");
                return self.finish(RenderEvaluation::failed(name, url, format!("{e:#}")));
            }
        };

        let paths: Vec<PathBuf> = views.iter().map(|v| v.screenshot_path.clone()).collect();
        info!(views = paths.len(), "evaluating views");

        let cv_metrics = self.run_cv(paths.clone()).await;
        let vlm_metrics = match &self.scorer {
            Some(scorer) => Some(scorer.score_views(&paths).await),
            None => None,
        };

        let evaluation =
            RenderEvaluation::completed(name, url, views, cv_metrics, vlm_metrics, &self.weights);
        info!(
            overall_score = evaluation.overall_score,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "render evaluated"
        );
        self.finish(evaluation)
    }

    /// Evaluate every configured render, then write `comparison.json`.
    pub async fn evaluate_all(&self) -> (Vec<RenderEvaluation>, Comparison) {
        let mut evaluations = Vec::with_capacity(self.renders.len());
        for (name, url) in &self.renders {
            evaluations.push(self.evaluate_render(name, url).await);
        }

        let comparison = Comparison::build(&evaluations);
        if let Err(e) = self.store.save_comparison(&comparison) {
            error!(error = %e, "failed to save comparison");
        }
        for entry in &comparison.ranking {
            info!(rank = entry.rank, render = %entry.name, score = entry.score, "ranking");
        }
        (evaluations, comparison)
    }

    async fn run_cv(&self, paths: Vec<PathBuf>) -> BTreeMap<String, MetricResult> {
        if self.collector.is_empty() {
            return BTreeMap::new();
        }
        let collector = Arc::clone(&self.collector);
        match tokio::task::spawn_blocking(move || collector.collect(&paths)).await {
            Ok(results) => results,
            Err(e) => {
                error!(error = %e, "image metrics aborted");
                BTreeMap::new()
            }
        }
    }

    fn finish(&self, evaluation: RenderEvaluation) -> RenderEvaluation {
        if let Some(reason) = &evaluation.error {
            error!(render = %evaluation.render_name, error = %reason, "render not evaluated");
        }
        if let Err(e) = self.store.save_render(&evaluation) {
            error!(error = %e, "failed to save results");
        }
        evaluation
    }
}

/// Views in `dir`: the `views_metadata.json` records when present,
/// otherwise every image file in name order.
pub fn load_views(dir: &Path, render_name: &str, render_url: &str) -> Result<Vec<ViewRecord>> {
    let metadata = dir.join(METADATA_FILE);
    if metadata.exists() {
        let content = std::fs::read_to_string(&metadata)
            .with_context(|| format!("Failed to read {}", metadata.display()))?;
        let mut views: Vec<ViewRecord> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", metadata.display()))?;
        for view in &mut views {
            view.screenshot_path = resolve_screenshot(dir, &view.screenshot_path);
        }
        return Ok(views);
    }

    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut images: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| is_image(path))
        .collect();
    images.sort();

    Ok(images
        .into_iter()
        .enumerate()
        .map(|(view_index, screenshot_path)| ViewRecord {
            view_index,
            angle: 0.0,
            render_name: render_name.to_string(),
            screenshot_path,
            url: render_url.to_string(),
            vlm_analysis: None,
        })
        .collect())
}

/// Relative screenshot paths that do not exist as given are looked up next
/// to the metadata file.
fn resolve_screenshot(dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() || path.exists() {
        return path.to_path_buf();
    }
    match path.file_name() {
        Some(name) => dir.join(name),
        None => path.to_path_buf(),
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
