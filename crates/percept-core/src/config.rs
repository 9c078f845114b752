//! Evaluation configuration loading and management.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::aggregate::WeightTable;
use crate::labeling::region::Region;

/// Main configuration, loaded once from a YAML document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Where previously captured views live
    pub capture: CaptureConfig,

    /// Image-statistics and perceptual-model metrics
    pub cv_metrics: CvMetricsConfig,

    /// Vision-language judge
    pub vlm_metrics: VlmConfig,

    /// Metric weights, overlaid on the built-in defaults
    pub weights: BTreeMap<String, f64>,

    /// Result output
    pub output: OutputConfig,

    /// Renders evaluated by a full run
    pub renders: Vec<RenderSpec>,

    /// Region detection and vocabulary
    pub regions: RegionsConfig,

    /// Listing tag generation
    pub labeling: LabelingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_views_dir")]
    pub views_dir: PathBuf,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            views_dir: default_views_dir(),
        }
    }
}

fn default_views_dir() -> PathBuf {
    PathBuf::from("captured_views")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CvMetricsConfig {
    pub blur: BlurConfig,
    pub edge_consistency: EdgeConsistencyConfig,
    pub naturalness: ToggleConfig,
    pub clip_iqa: ClipIqaConfig,
}

impl CvMetricsConfig {
    pub fn any_enabled(&self) -> bool {
        self.blur.enabled
            || self.edge_consistency.enabled
            || self.naturalness.enabled
            || self.clip_iqa.enabled
    }

    pub fn disable_all(&mut self) {
        self.blur.enabled = false;
        self.edge_consistency.enabled = false;
        self.naturalness.enabled = false;
        self.clip_iqa.enabled = false;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlurConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Laplacian variance is divided by this before clamping to 0-100
    #[serde(default = "default_blur_scale")]
    pub scale: f64,

    /// Variance below which a view is reported as blurred
    #[serde(default = "default_blur_threshold")]
    pub threshold: f64,
}

impl Default for BlurConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scale: default_blur_scale(),
            threshold: default_blur_threshold(),
        }
    }
}

fn default_blur_scale() -> f64 {
    20.0
}
fn default_blur_threshold() -> f64 {
    100.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeConsistencyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_canny_low")]
    pub canny_low: f32,

    #[serde(default = "default_canny_high")]
    pub canny_high: f32,

    /// Density standard deviation at which consistency reaches 0
    #[serde(default = "default_edge_epsilon")]
    pub epsilon: f64,
}

impl Default for EdgeConsistencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            canny_low: default_canny_low(),
            canny_high: default_canny_high(),
            epsilon: default_edge_epsilon(),
        }
    }
}

fn default_canny_low() -> f32 {
    50.0
}
fn default_canny_high() -> f32 {
    150.0
}
fn default_edge_epsilon() -> f64 {
    0.05
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToggleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ToggleConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipIqaConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_clip_model")]
    pub model_id: String,
}

impl Default for ClipIqaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_id: default_clip_model(),
        }
    }
}

pub fn default_clip_model() -> String {
    "openai/clip-vit-base-patch32".to_string()
}

fn default_true() -> bool {
    true
}

/// Vision-language judge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VlmConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_vlm_model")]
    pub model: String,

    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Pause after every successful call
    #[serde(default = "default_rate_limit_delay")]
    pub rate_limit_delay_secs: f64,

    /// First retry delay; doubles per attempt
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: f64,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    #[serde(default = "default_reasoning_effort")]
    pub reasoning_effort: String,

    #[serde(default = "default_detail_high")]
    pub image_detail: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: default_vlm_model(),
            api_base: default_api_base(),
            api_key_env: default_api_key_env(),
            max_retries: default_max_retries(),
            max_workers: default_max_workers(),
            rate_limit_delay_secs: default_rate_limit_delay(),
            backoff_base_secs: default_backoff_base(),
            max_output_tokens: default_max_output_tokens(),
            reasoning_effort: default_reasoning_effort(),
            image_detail: default_detail_high(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl VlmConfig {
    pub fn rate_limit_delay(&self) -> Duration {
        Duration::from_secs_f64(self.rate_limit_delay_secs.max(0.0))
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs_f64(self.backoff_base_secs.max(0.0))
    }
}

fn default_vlm_model() -> String {
    "gpt-5-nano".to_string()
}
fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_max_workers() -> usize {
    5
}
fn default_rate_limit_delay() -> f64 {
    1.0
}
fn default_backoff_base() -> f64 {
    1.0
}
fn default_max_output_tokens() -> u32 {
    10_000
}
fn default_reasoning_effort() -> String {
    "low".to_string()
}
fn default_detail_high() -> String {
    "high".to_string()
}
fn default_detail_low() -> String {
    "low".to_string()
}
fn default_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            results_dir: default_results_dir(),
        }
    }
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

/// A named render and the viewer it was captured from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderSpec {
    pub name: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionsConfig {
    /// Region used when no city matches
    #[serde(default)]
    pub default: Region,

    /// Region-specific vocabulary reported alongside adapted labels
    #[serde(default)]
    pub region_vocab: BTreeMap<Region, Vec<String>>,
}

impl Default for RegionsConfig {
    fn default() -> Self {
        Self {
            default: Region::default(),
            region_vocab: BTreeMap::new(),
        }
    }
}

/// Listing tag generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelingConfig {
    #[serde(default = "default_vlm_model")]
    pub model: String,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    #[serde(default = "default_detail_low")]
    pub image_detail: String,

    /// Drop exterior photos with the CLIP scene classifier before tagging
    #[serde(default = "default_true")]
    pub filter_interior: bool,

    #[serde(default = "default_labels_dir")]
    pub results_dir: PathBuf,
}

impl Default for LabelingConfig {
    fn default() -> Self {
        Self {
            model: default_vlm_model(),
            max_output_tokens: default_max_output_tokens(),
            image_detail: default_detail_low(),
            filter_interior: true,
            results_dir: default_labels_dir(),
        }
    }
}

fn default_labels_dir() -> PathBuf {
    PathBuf::from("results/labels")
}

/// Which metric families a run computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetricsSelection {
    #[default]
    All,
    Cv,
    Vlm,
}

impl EvalConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        Ok(config)
    }

    /// Weight table with configured weights over the defaults
    pub fn weight_table(&self) -> WeightTable {
        WeightTable::with_overrides(&self.weights)
    }

    /// Restrict the run to one metric family
    pub fn apply_selection(&mut self, selection: MetricsSelection) {
        match selection {
            MetricsSelection::All => {}
            MetricsSelection::Cv => self.vlm_metrics.enabled = false,
            MetricsSelection::Vlm => self.cv_metrics.disable_all(),
        }
    }

    /// Resolve relative paths against the directory holding the config
    pub fn resolve_paths(&mut self, base: &Path) {
        self.capture.views_dir = base.join(&self.capture.views_dir);
        self.output.results_dir = base.join(&self.output.results_dir);
        self.labeling.results_dir = base.join(&self.labeling.results_dir);
    }
}

/// Starter configuration written by `percept init`.
pub const DEFAULT_CONFIG_YAML: &str = r#"# percept configuration

capture:
  views_dir: captured_views

cv_metrics:
  blur:
    enabled: true
    scale: 20.0
    threshold: 100.0
  edge_consistency:
    enabled: true
    canny_low: 50
    canny_high: 150
    epsilon: 0.05
  naturalness:
    enabled: true
  clip_iqa:
    enabled: true
    model_id: openai/clip-vit-base-patch32

vlm_metrics:
  enabled: true
  model: gpt-5-nano
  max_retries: 3
  max_workers: 5
  rate_limit_delay_secs: 1.0

weights:
  blur: 0.15
  edge_consistency: 0.15
  naturalness: 0.15
  clip_iqa: 0.15
  vlm_quality: 0.20
  vlm_artifacts: 0.10
  vlm_structural: 0.10

output:
  results_dir: results

renders: []

regions:
  default: taiwan
  region_vocab:
    taiwan: [balcony with laundry area, feng shui layout]
    japan: [genkan entrance, tatami room, unit bath]
    us: [walk-in closet, granite countertops]

labeling:
  model: gpt-5-nano
  image_detail: low
  filter_interior: true
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_takes_defaults() {
        let config: EvalConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.cv_metrics.blur.enabled);
        assert_eq!(config.cv_metrics.blur.scale, 20.0);
        assert_eq!(config.cv_metrics.edge_consistency.epsilon, 0.05);
        assert_eq!(config.vlm_metrics.max_workers, 5);
        assert_eq!(config.vlm_metrics.max_retries, 3);
        assert_eq!(config.output.results_dir, PathBuf::from("results"));
        assert_eq!(config.regions.default, Region::Taiwan);
    }

    #[test]
    fn starter_config_parses() {
        let config: EvalConfig = serde_yaml::from_str(DEFAULT_CONFIG_YAML).unwrap();
        assert_eq!(config.weight_table().weight("vlm_quality"), 0.20);
        assert_eq!(
            config.regions.region_vocab.get(&Region::Japan).map(Vec::len),
            Some(3)
        );
    }

    #[test]
    fn partial_section_keeps_field_defaults() {
        let yaml = "vlm_metrics:\n  max_workers: 2\ncv_metrics:\n  blur:\n    enabled: false\n";
        let config: EvalConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.vlm_metrics.max_workers, 2);
        assert_eq!(config.vlm_metrics.model, "gpt-5-nano");
        assert!(!config.cv_metrics.blur.enabled);
        assert_eq!(config.cv_metrics.blur.scale, 20.0);
        assert!(config.cv_metrics.edge_consistency.enabled);
    }

    #[test]
    fn selection_disables_families() {
        let mut cv_only = EvalConfig::default();
        cv_only.apply_selection(MetricsSelection::Cv);
        assert!(!cv_only.vlm_metrics.enabled);
        assert!(cv_only.cv_metrics.any_enabled());

        let mut vlm_only = EvalConfig::default();
        vlm_only.apply_selection(MetricsSelection::Vlm);
        assert!(vlm_only.vlm_metrics.enabled);
        assert!(!vlm_only.cv_metrics.any_enabled());
    }

    #[test]
    fn load_reports_missing_file() {
        let err = EvalConfig::load(Path::new("/nonexistent/percept.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }

    #[test]
    fn load_reads_renders() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "renders:\n  - name: kitchen\n    url: http://localhost/viewer\n",
        )
        .unwrap();
        let config = EvalConfig::load(&path).unwrap();
        assert_eq!(config.renders.len(), 1);
        assert_eq!(config.renders[0].name, "kitchen");
    }
}
