//! Sharpness via Laplacian variance.

use std::path::PathBuf;

use image::GrayImage;
use percept_core::config::BlurConfig;
use percept_core::{MetricKind, MetricResult};
use tracing::{debug, warn};

use super::{open_gray, ImageMetric};

/// Laplacian variance per image; higher is sharper.
#[derive(Debug, Clone)]
pub struct BlurMetric {
    /// Variance that maps to a quality score of 1
    pub scale: f64,
    /// Variance below which a view is reported as blurry
    pub threshold: f64,
}

impl Default for BlurMetric {
    fn default() -> Self {
        Self::from_config(&BlurConfig::default())
    }
}

impl BlurMetric {
    pub fn from_config(config: &BlurConfig) -> Self {
        Self {
            scale: config.scale,
            threshold: config.threshold,
        }
    }

    fn quality(&self, mean: f64) -> f64 {
        if self.scale <= 0.0 {
            return 0.0;
        }
        (mean / self.scale).clamp(0.0, 100.0)
    }
}

impl ImageMetric for BlurMetric {
    fn kind(&self) -> MetricKind {
        MetricKind::Blur
    }

    fn evaluate(&self, paths: &[PathBuf]) -> Option<MetricResult> {
        let mut samples = Vec::with_capacity(paths.len());
        for path in paths {
            match open_gray(path) {
                Ok(gray) => samples.push(laplacian_variance(&gray)),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping view for blur"),
            }
        }

        let blurry = samples.iter().filter(|v| **v < self.threshold).count();
        debug!(views = samples.len(), blurry, threshold = self.threshold, "blur measured");

        MetricResult::from_samples(MetricKind::Blur, samples, |s, _| self.quality(s.mean))
    }
}

/// Variance of the 3x3 Laplacian `[0,1,0; 1,-4,1; 0,1,0]` over interior
/// pixels. Images smaller than 3x3 have variance 0.
pub fn laplacian_variance(img: &GrayImage) -> f64 {
    let (width, height) = img.dimensions();
    if width < 3 || height < 3 {
        return 0.0;
    }

    let mut sum = 0i64;
    let mut sum_sq = 0i64;
    let mut count = 0u64;

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let center = img.get_pixel(x, y)[0] as i64;
            let top = img.get_pixel(x, y - 1)[0] as i64;
            let bottom = img.get_pixel(x, y + 1)[0] as i64;
            let left = img.get_pixel(x - 1, y)[0] as i64;
            let right = img.get_pixel(x + 1, y)[0] as i64;

            let laplacian = top + bottom + left + right - 4 * center;
            sum += laplacian;
            sum_sq += laplacian * laplacian;
            count += 1;
        }
    }

    // E[X^2] - E[X]^2
    let mean = sum as f64 / count as f64;
    let mean_sq = sum_sq as f64 / count as f64;
    (mean_sq - mean * mean).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn checkerboard(size: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            if (x + y) % 2 == 0 {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }

    #[test]
    fn flat_image_has_zero_variance() {
        let flat = GrayImage::from_pixel(16, 16, Luma([128]));
        assert_eq!(laplacian_variance(&flat), 0.0);
    }

    #[test]
    fn checkerboard_is_sharp() {
        // Every interior Laplacian is +-1020, so the variance is 1020^2.
        assert_eq!(laplacian_variance(&checkerboard(8)), 1020.0 * 1020.0);
    }

    #[test]
    fn tiny_images_are_zero() {
        assert_eq!(laplacian_variance(&GrayImage::new(2, 2)), 0.0);
    }

    #[test]
    fn quality_clamps_to_percent() {
        let metric = BlurMetric::default();
        assert_eq!(metric.quality(1000.0), 50.0);
        assert_eq!(metric.quality(1e9), 100.0);
    }

    #[test]
    fn unreadable_views_are_skipped() {
        let dir = tempfile::TempDir::new().unwrap();
        let good = dir.path().join("good.png");
        checkerboard(8).save(&good).unwrap();

        let result = BlurMetric::default()
            .evaluate(&[dir.path().join("missing.png"), good])
            .unwrap();
        assert_eq!(result.num_samples, 1);
        assert_eq!(result.quality_score, 100.0);

        assert!(BlurMetric::default()
            .evaluate(&[dir.path().join("missing.png")])
            .is_none());
    }
}
