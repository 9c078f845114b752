//! Per-render evaluation documents and the cross-render comparison.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::{overall_from_results, rank_renders, RankEntry, WeightTable};
use crate::metric::MetricResult;
use crate::vlm::{VlmJudgement, VlmReport};

/// One captured view of a render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewRecord {
    pub view_index: usize,
    #[serde(default)]
    pub angle: f64,
    #[serde(default)]
    pub render_name: String,
    pub screenshot_path: PathBuf,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlm_analysis: Option<VlmJudgement>,
}

/// Everything computed for one render in one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderEvaluation {
    pub render_name: String,
    pub render_url: String,
    pub num_views: usize,
    #[serde(default)]
    pub cv_metrics: BTreeMap<String, MetricResult>,
    #[serde(default)]
    pub vlm_metrics: Option<VlmReport>,
    pub overall_score: f64,
    #[serde(default)]
    pub views: Vec<ViewRecord>,
    pub evaluated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RenderEvaluation {
    /// A render that could not be evaluated.
    pub fn failed(name: &str, url: &str, error: impl Into<String>) -> Self {
        Self {
            render_name: name.to_string(),
            render_url: url.to_string(),
            num_views: 0,
            cv_metrics: BTreeMap::new(),
            vlm_metrics: None,
            overall_score: 0.0,
            views: Vec::new(),
            evaluated_at: Utc::now(),
            error: Some(error.into()),
        }
    }

    /// Assemble a completed evaluation, attaching each view's judgement and
    /// computing the weighted overall score.
    pub fn completed(
        name: &str,
        url: &str,
        mut views: Vec<ViewRecord>,
        cv_metrics: BTreeMap<String, MetricResult>,
        vlm_metrics: Option<VlmReport>,
        weights: &WeightTable,
    ) -> Self {
        if let Some(report) = &vlm_metrics {
            for view in &mut views {
                let path = view.screenshot_path.display().to_string();
                view.vlm_analysis = report
                    .views
                    .iter()
                    .find(|v| v.image_path == path)
                    .and_then(|v| v.judgement.clone());
            }
        }

        let overall_score = overall_from_results(
            cv_metrics
                .values()
                .chain(vlm_metrics.iter().flat_map(VlmReport::metric_results)),
            weights,
        );

        Self {
            render_name: name.to_string(),
            render_url: url.to_string(),
            num_views: views.len(),
            cv_metrics,
            vlm_metrics,
            overall_score,
            views,
            evaluated_at: Utc::now(),
            error: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Every metric result in this evaluation.
    pub fn metric_results(&self) -> impl Iterator<Item = &MetricResult> {
        self.cv_metrics
            .values()
            .chain(self.vlm_metrics.iter().flat_map(VlmReport::metric_results))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSummary {
    pub name: String,
    pub overall_score: f64,
    pub num_views: usize,
}

/// The `comparison.json` document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub renders: Vec<RenderSummary>,
    pub ranking: Vec<RankEntry>,
}

impl Comparison {
    /// Summaries and ranking of the renders that evaluated without error.
    pub fn build<'a>(evaluations: impl IntoIterator<Item = &'a RenderEvaluation>) -> Self {
        let renders: Vec<RenderSummary> = evaluations
            .into_iter()
            .filter(|e| e.is_ok())
            .map(|e| RenderSummary {
                name: e.render_name.clone(),
                overall_score: e.overall_score,
                num_views: e.num_views,
            })
            .collect();

        let ranking = rank_renders(renders.iter().map(|r| (r.name.as_str(), r.overall_score)));
        Self { renders, ranking }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::MetricKind;
    use crate::vlm::ViewScore;

    fn view(idx: usize, path: &str) -> ViewRecord {
        ViewRecord {
            view_index: idx,
            angle: idx as f64 * 45.0,
            render_name: "r".into(),
            screenshot_path: PathBuf::from(path),
            url: String::new(),
            vlm_analysis: None,
        }
    }

    fn metric(kind: MetricKind, score: f64) -> MetricResult {
        MetricResult::from_samples(kind, vec![1.0], |_, _| score).unwrap()
    }

    #[test]
    fn completed_merges_judgements_and_scores() {
        let judgement = VlmJudgement {
            overall_score: Some(8.0),
            ..VlmJudgement::default()
        };
        let report = VlmReport {
            model: "m".into(),
            num_views: 2,
            views: vec![
                ViewScore {
                    image_path: "a.png".into(),
                    quality: 8.0,
                    artifact_severity: 5.0,
                    structural: 5.0,
                    judgement: Some(judgement.clone()),
                    error: None,
                },
                ViewScore::fallback(std::path::Path::new("b.png"), "timeout"),
            ],
            quality: Some(metric(MetricKind::VlmQuality, 60.0)),
            ..VlmReport::default()
        };
        let cv = BTreeMap::from([("blur".to_string(), metric(MetricKind::Blur, 80.0))]);
        let weights = WeightTable::new(BTreeMap::from([
            ("blur".to_string(), 0.5),
            ("vlm_quality".to_string(), 0.5),
        ]));

        let eval = RenderEvaluation::completed(
            "r",
            "http://viewer",
            vec![view(0, "a.png"), view(1, "b.png")],
            cv,
            Some(report),
            &weights,
        );

        assert_eq!(eval.num_views, 2);
        assert!((eval.overall_score - 70.0).abs() < 1e-9);
        assert_eq!(eval.views[0].vlm_analysis, Some(judgement));
        assert_eq!(eval.views[1].vlm_analysis, None);
        assert_eq!(eval.metric_results().count(), 2);
    }

    #[test]
    fn no_metrics_scores_zero() {
        let eval = RenderEvaluation::completed(
            "r",
            "",
            vec![view(0, "a.png")],
            BTreeMap::new(),
            None,
            &WeightTable::default(),
        );
        assert_eq!(eval.overall_score, 0.0);
    }

    #[test]
    fn comparison_skips_failed_renders() {
        let mut a = RenderEvaluation::failed("a", "", "x");
        a.error = None;
        a.overall_score = 55.0;
        let mut b = a.clone();
        b.render_name = "b".into();
        b.overall_score = 90.0;
        let broken = RenderEvaluation::failed("broken", "", "No views available");

        let comparison = Comparison::build([&a, &broken, &b]);
        assert_eq!(comparison.renders.len(), 2);
        assert_eq!(comparison.ranking[0].name, "b");
        assert_eq!(comparison.ranking[1].rank, 2);
    }
}
