use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use percept_core::config::LabelingConfig;
use percept_core::labeling::{Region, RegionAdapter, TagGenerator};
use percept_core::vlm::{RetryPolicy, VisionClient, VisionRequest, VlmError};
use percept_critics::LabelingPipeline;
use tempfile::TempDir;

struct Tagger {
    calls: AtomicUsize,
    images: AtomicUsize,
}

#[async_trait]
impl VisionClient for Tagger {
    fn model(&self) -> &str {
        "tagger"
    }

    async fn complete(&self, request: &VisionRequest) -> Result<String, VlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.images.fetch_add(request.images.len(), Ordering::SeqCst);
        Ok("```json\nentrance with shoe cabinet, sunlit living room, room\n```".into())
    }
}

fn pipeline(client: Arc<Tagger>) -> LabelingPipeline {
    let policy = RetryPolicy {
        max_retries: 0,
        base_delay: Duration::from_millis(1),
        rate_limit_delay: Duration::ZERO,
    };
    let generator = TagGenerator::new(client, policy, &LabelingConfig::default());
    LabelingPipeline::new(None, None, generator, RegionAdapter::default())
}

fn write_listing(dir: &Path, id: &str, city: &str) -> std::path::PathBuf {
    for name in ["living.jpg", "hall.jpg"] {
        std::fs::write(dir.join(name), b"jpeg").unwrap();
    }
    let path = dir.join(format!("{id}.json"));
    let doc = serde_json::json!({
        "listing": {
            "property_id": id,
            "city": city,
            "picture_list": ["https://cdn/p/living.jpg", "https://cdn/p/hall.jpg"],
        }
    });
    std::fs::write(&path, doc.to_string()).unwrap();
    path
}

#[tokio::test]
async fn listing_is_tagged_adapted_and_scored_without_clip() {
    let tmp = TempDir::new().unwrap();
    let listing = write_listing(tmp.path(), "P-1", "Tokyo, Shibuya");
    let client = Arc::new(Tagger {
        calls: AtomicUsize::new(0),
        images: AtomicUsize::new(0),
    });

    let result = pipeline(client.clone())
        .process_listing(&listing, None)
        .await
        .unwrap();

    assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.images.load(Ordering::SeqCst), 2);
    assert_eq!(result.property_id, "P-1");
    assert_eq!(
        result.labels,
        vec!["entrance with shoe cabinet", "sunlit living room", "room"]
    );
    assert_eq!(result.region.region, Region::Japan);
    assert_eq!(result.region.adapted_labels[0], "genkan entrance with shoe cabinet");
    assert_eq!(result.image_stats.total_images, 2);
    assert_eq!(result.image_stats.interior_images, 2);
    assert_eq!(result.evaluation.num_labels, 3);
    assert!(result.evaluation.grounding.is_none());
    assert_eq!(result.evaluation.errors["over_generic"], vec!["room"]);
}

#[tokio::test]
async fn broken_listing_does_not_stop_the_batch() {
    let tmp = TempDir::new().unwrap();
    let first = write_listing(tmp.path(), "P-1", "Taipei");
    let broken = tmp.path().join("broken.json");
    std::fs::write(&broken, "{ not json").unwrap();
    let last = write_listing(tmp.path(), "P-3", "Chicago");
    let client = Arc::new(Tagger {
        calls: AtomicUsize::new(0),
        images: AtomicUsize::new(0),
    });

    let (results, failed) = pipeline(client.clone())
        .process_all(&[first, broken, last], None)
        .await;

    let ids: Vec<&str> = results.iter().map(|r| r.property_id.as_str()).collect();
    assert_eq!(ids, vec!["P-1", "P-3"]);
    assert_eq!(failed.len(), 1);
    assert!(failed[0].listing.ends_with("broken.json"));
    assert_eq!(client.calls.load(Ordering::SeqCst), 2);
}
