//! Descriptive tag generation for a listing's photos.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::config::LabelingConfig;
use crate::vlm::{call_with_retry, EncodedImage, RetryPolicy, VisionClient, VisionRequest};

const SYSTEM_PROMPT: &str = "You tag real-estate listings from their interior photos. \
Produce at least ten specific, descriptive tags covering rooms, layout, fixtures, materials, \
style, lighting and condition. Prefer compound tags such as \"walk-in shower with glass door\" \
or \"open-plan kitchen with island\" over bare nouns like \"bathroom\" or \"kitchen\". \
Output only the tags, comma-separated, with no numbering or commentary.";

const USER_PROMPT: &str = "Analyze these property images and provide semantic tags.";

/// Split a comma-separated model reply into tags.
///
/// Markdown code fences are removed; tags are trimmed and empties dropped.
pub fn parse_tags(text: &str) -> Vec<String> {
    text.replace("```json", "")
        .replace("```", "")
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// One VLM call per listing, all photos attached.
#[derive(Clone)]
pub struct TagGenerator {
    client: Arc<dyn VisionClient>,
    policy: RetryPolicy,
    max_output_tokens: u32,
    image_detail: String,
}

impl TagGenerator {
    pub fn new(client: Arc<dyn VisionClient>, policy: RetryPolicy, config: &LabelingConfig) -> Self {
        Self {
            client,
            policy,
            max_output_tokens: config.max_output_tokens,
            image_detail: config.image_detail.clone(),
        }
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    /// Tags for the given photos; empty when no photo can be read or the call
    /// fails.
    #[instrument(skip(self, paths), fields(images = paths.len()))]
    pub async fn generate(&self, paths: &[PathBuf]) -> Vec<String> {
        let images: Vec<EncodedImage> = paths
            .iter()
            .filter_map(|path| match EncodedImage::from_path(path, &self.image_detail) {
                Ok(image) => Some(image),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable photo");
                    None
                }
            })
            .collect();

        if images.is_empty() {
            warn!("no readable photos to tag");
            return Vec::new();
        }

        let request = VisionRequest {
            system: SYSTEM_PROMPT.to_string(),
            prompt: USER_PROMPT.to_string(),
            images,
            max_output_tokens: self.max_output_tokens,
        };

        match call_with_retry(self.client.as_ref(), &request, &self.policy).await {
            Ok(text) => {
                let tags = parse_tags(&text);
                info!(tags = tags.len(), "generated tags");
                tags
            }
            Err(e) => {
                warn!(error = %e, "tag generation failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vlm::VlmError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Records how many images each call carried.
    struct FixedReply {
        reply: fn() -> Result<String, VlmError>,
        calls: AtomicUsize,
        images: AtomicUsize,
    }

    impl FixedReply {
        fn new(reply: fn() -> Result<String, VlmError>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: AtomicUsize::new(0),
                images: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl VisionClient for FixedReply {
        fn model(&self) -> &str {
            "fixed"
        }

        async fn complete(&self, request: &VisionRequest) -> Result<String, VlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.images.store(request.images.len(), Ordering::SeqCst);
            (self.reply)()
        }
    }

    fn generator(client: Arc<FixedReply>) -> TagGenerator {
        let policy = RetryPolicy {
            max_retries: 0,
            base_delay: Duration::from_millis(1),
            rate_limit_delay: Duration::ZERO,
        };
        TagGenerator::new(client, policy, &LabelingConfig::default())
    }

    fn photos(dir: &TempDir) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = ["a.jpg", "b.jpg"]
            .iter()
            .map(|name| {
                let path = dir.path().join(name);
                std::fs::write(&path, b"jpeg").unwrap();
                path
            })
            .collect();
        paths.push(dir.path().join("missing.jpg"));
        paths
    }

    #[tokio::test]
    async fn fenced_reply_becomes_tags() {
        let dir = TempDir::new().unwrap();
        let client = FixedReply::new(|| Ok("```json\ngenkan entrance, tatami room\n```".into()));

        let tags = generator(client.clone()).generate(&photos(&dir)).await;

        assert_eq!(tags, vec!["genkan entrance", "tatami room"]);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.images.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_call_gives_no_tags() {
        let dir = TempDir::new().unwrap();
        let client = FixedReply::new(|| {
            Err(VlmError::Status {
                status: 401,
                body: "invalid key".into(),
            })
        });

        assert!(generator(client).generate(&photos(&dir)).await.is_empty());
    }

    #[tokio::test]
    async fn no_readable_photo_makes_no_call() {
        let dir = TempDir::new().unwrap();
        let client = FixedReply::new(|| Ok("x".into()));

        let tags = generator(client.clone())
            .generate(&[dir.path().join("missing.jpg")])
            .await;

        assert!(tags.is_empty());
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn splits_and_trims() {
        assert_eq!(
            parse_tags(" genkan entrance ,tatami room,, bidet toilet \n"),
            vec!["genkan entrance", "tatami room", "bidet toilet"]
        );
    }

    #[test]
    fn strips_code_fences() {
        assert_eq!(
            parse_tags("```json\nsunlit living room, marble countertops\n```"),
            vec!["sunlit living room", "marble countertops"]
        );
        assert!(parse_tags("```\n```").is_empty());
    }
}
