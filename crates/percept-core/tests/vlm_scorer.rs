use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine};
use percept_core::aggregate::overall_from_results;
use percept_core::vlm::{
    RetryPolicy, ScorerSettings, VisionClient, VisionRequest, VlmError, VlmScorer,
};
use percept_core::WeightTable;
use tempfile::TempDir;

/// Replies per image according to the image bytes, which are a single letter.
struct ScriptedClient {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
    reply: fn(&str) -> (u64, Result<String, VlmError>),
}

impl ScriptedClient {
    fn new(reply: fn(&str) -> (u64, Result<String, VlmError>)) -> Arc<Self> {
        Arc::new(Self {
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            reply,
        })
    }
}

#[async_trait]
impl VisionClient for ScriptedClient {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &VisionRequest) -> Result<String, VlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let bytes = general_purpose::STANDARD
            .decode(&request.images[0].data)
            .unwrap();
        let label = String::from_utf8(bytes).unwrap();
        let (delay_ms, result) = (self.reply)(&label);
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

fn write_views(dir: &TempDir, labels: &[&str]) -> Vec<PathBuf> {
    labels
        .iter()
        .map(|label| {
            let path = dir.path().join(format!("{label}.png"));
            std::fs::write(&path, label).unwrap();
            path
        })
        .collect()
}

fn settings(max_workers: usize, max_retries: u32) -> ScorerSettings {
    ScorerSettings {
        max_workers,
        retry: RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            rate_limit_delay: Duration::ZERO,
        },
        max_output_tokens: 256,
        image_detail: "high".into(),
    }
}

fn judgement(overall: u32, texture: u32) -> String {
    format!(
        "Sure.\n{{\"overall_score\": {overall}, \"subscores\": {{\"geometry_score\": 7, \"texture_score\": {texture}}}}}"
    )
}

#[tokio::test]
async fn results_follow_input_order() {
    let dir = TempDir::new().unwrap();
    let paths = write_views(&dir, &["A", "B", "C"]);
    let client = ScriptedClient::new(|label| match label {
        "A" => (60, Ok(judgement(3, 8))),
        "B" => (40, Ok(judgement(6, 8))),
        _ => (1, Ok(judgement(9, 8))),
    });

    let scorer = VlmScorer::new(client.clone(), settings(2, 0));
    let report = scorer.score_views(&paths).await;

    let qualities: Vec<f64> = report.views.iter().map(|v| v.quality).collect();
    assert_eq!(qualities, vec![3.0, 6.0, 9.0]);
    let names: Vec<&str> = report.views.iter().map(|v| v.image_path.as_str()).collect();
    assert!(names[0].ends_with("A.png") && names[2].ends_with("C.png"));
    assert_eq!(report.num_views, 3);
    assert_eq!(report.model, "scripted");
}

#[tokio::test]
async fn concurrency_never_exceeds_worker_count() {
    let dir = TempDir::new().unwrap();
    let paths = write_views(&dir, &["A", "B", "C", "D", "E", "F", "G"]);
    let client = ScriptedClient::new(|_| (15, Ok(judgement(7, 7))));

    let scorer = VlmScorer::new(client.clone(), settings(3, 0));
    let report = scorer.score_views(&paths).await;

    assert_eq!(report.views.len(), 7);
    assert!(client.max_in_flight.load(Ordering::SeqCst) <= 3);
    assert_eq!(client.calls.load(Ordering::SeqCst), 7);
}

#[tokio::test]
async fn exhausted_retries_fall_back_to_neutral() {
    let dir = TempDir::new().unwrap();
    let paths = write_views(&dir, &["A"]);
    let client = ScriptedClient::new(|_| (0, Err(VlmError::Transport("connection reset".into()))));

    let scorer = VlmScorer::new(client.clone(), settings(5, 3));
    let report = scorer.score_views(&paths).await;

    let view = &report.views[0];
    assert_eq!(
        (view.quality, view.artifact_severity, view.structural),
        (5.0, 5.0, 5.0)
    );
    assert!(view.error.is_some());
    assert_eq!(client.calls.load(Ordering::SeqCst), 4);
    assert_eq!(report.quality.unwrap().quality_score, 50.0);
}

#[tokio::test]
async fn non_retryable_status_is_not_retried() {
    let dir = TempDir::new().unwrap();
    let paths = write_views(&dir, &["A"]);
    let client = ScriptedClient::new(|_| {
        (
            0,
            Err(VlmError::Status {
                status: 401,
                body: "invalid key".into(),
            }),
        )
    });

    let scorer = VlmScorer::new(client.clone(), settings(1, 3));
    let report = scorer.score_views(&paths).await;

    assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.views[0].quality, 5.0);
}

#[tokio::test]
async fn malformed_response_uses_fallback() {
    let dir = TempDir::new().unwrap();
    let paths = write_views(&dir, &["A", "B"]);
    let client = ScriptedClient::new(|label| match label {
        "A" => (0, Ok("I'm unable to rate this image.".to_string())),
        _ => (0, Ok(judgement(8, 10))),
    });

    let scorer = VlmScorer::new(client, settings(2, 0));
    let report = scorer.score_views(&paths).await;

    assert_eq!(report.views[0].quality, 5.0);
    assert!(report.views[0].error.is_some());
    assert_eq!(report.views[1].quality, 8.0);
    assert_eq!(report.views[1].artifact_severity, 1.0);
    assert_eq!(report.views[1].structural, 7.0);
}

#[tokio::test]
async fn perfect_texture_gives_full_artifact_score() {
    let dir = TempDir::new().unwrap();
    let paths = write_views(&dir, &["A", "B"]);
    let client = ScriptedClient::new(|_| (0, Ok(judgement(9, 10))));

    let report = VlmScorer::new(client, settings(2, 0)).score_views(&paths).await;

    let artifacts = report.artifacts.unwrap();
    assert_eq!(artifacts.mean, 1.0);
    assert!((artifacts.quality_score - 100.0).abs() < 1e-9);
    assert!((report.quality.unwrap().quality_score - 90.0).abs() < 1e-9);
}

#[tokio::test]
async fn unreadable_view_is_never_sent() {
    let dir = TempDir::new().unwrap();
    let mut paths = write_views(&dir, &["A"]);
    paths.insert(0, dir.path().join("missing.png"));
    let client = ScriptedClient::new(|_| (0, Ok(judgement(6, 6))));

    let report = VlmScorer::new(client.clone(), settings(2, 3)).score_views(&paths).await;

    assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    assert!(report.views[0].error.is_some());
    assert_eq!(report.views[1].quality, 6.0);
}

#[tokio::test]
async fn empty_batch_makes_no_calls() {
    let client = ScriptedClient::new(|_| (0, Ok(judgement(6, 6))));
    let report = VlmScorer::new(client.clone(), settings(2, 0)).score_views(&[]).await;
    assert_eq!(report.num_views, 0);
    assert!(report.quality.is_none());
    assert_eq!(client.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn non_finite_scores_become_neutral() {
    let dir = TempDir::new().unwrap();
    let paths = write_views(&dir, &["A", "B"]);
    let client = ScriptedClient::new(|label| match label {
        "A" => (0, Ok(r#"{"overall_score": "NaN", "subscores": {"texture_score": "inf"}}"#.into())),
        _ => (0, Ok(judgement(8, 8))),
    });

    let report = VlmScorer::new(client, settings(2, 0)).score_views(&paths).await;

    assert_eq!(report.views[0].quality, 5.0);
    assert_eq!(report.views[0].artifact_severity, 6.0);
    let quality = report.quality.unwrap();
    assert_eq!(quality.num_samples, 2);
    assert!((quality.quality_score - 65.0).abs() < 1e-9);
}

#[tokio::test]
async fn percent_scale_replies_keep_scores_bounded() {
    let dir = TempDir::new().unwrap();
    let paths = write_views(&dir, &["A", "B"]);
    let client = ScriptedClient::new(|_| {
        (
            0,
            Ok(r#"{"overall_score": 85, "subscores": {"geometry_score": 90, "texture_score": 80}}"#.into()),
        )
    });

    let report = VlmScorer::new(client, settings(2, 0)).score_views(&paths).await;

    for result in report.metric_results() {
        assert!(
            (0.0..=100.0).contains(&result.quality_score),
            "{} = {}",
            result.metric_name,
            result.quality_score
        );
    }
    let overall = overall_from_results(report.metric_results(), &WeightTable::default());
    assert!((0.0..=100.0).contains(&overall), "overall = {overall}");
    assert!((overall - 100.0).abs() < 1e-9);
}
