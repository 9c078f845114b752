//! Natural-scene-statistics score from MSCN coefficients.
//!
//! Mean-subtracted contrast-normalized (MSCN) luminance of undistorted
//! photographs follows a near-Gaussian generalized Gaussian distribution.
//! Blur, ringing and splat noise move the fitted shape parameter away from 2;
//! the score falls off linearly with that distance.

use std::path::Path;

use image::{ImageBuffer, Luma};
use imageproc::filter::gaussian_blur_f32;
use percept_core::MetricKind;

use super::{open_gray, CriticError, QualityModel};

type GrayF32 = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Local window of the MSCN transform.
const MSCN_SIGMA: f32 = 7.0 / 6.0;
/// Shape distance at which the score reaches 0.
const SHAPE_TOLERANCE: f64 = 1.5;
const GAUSSIAN_SHAPE: f64 = 2.0;
/// Below this mean |MSCN| the image is treated as flat.
const MIN_MEAN_ABS: f64 = 1e-4;

#[derive(Debug, Clone, Default)]
pub struct NaturalnessModel;

impl NaturalnessModel {
    pub fn new() -> Self {
        Self
    }

    /// Score an in-memory image.
    pub fn score_image(&self, gray: &image::GrayImage, name: &str) -> Result<f64, CriticError> {
        let coefficients = mscn(gray);
        let shape = ggd_shape(&coefficients).ok_or_else(|| CriticError::Degenerate(name.to_string()))?;
        Ok(shape_score(shape))
    }
}

impl QualityModel for NaturalnessModel {
    fn kind(&self) -> MetricKind {
        MetricKind::Naturalness
    }

    fn score(&self, path: &Path) -> Result<f64, CriticError> {
        let gray = open_gray(path)?;
        self.score_image(&gray, &path.display().to_string())
    }
}

/// `100 * (1 - min(1, |shape - 2| / 1.5))`
pub fn shape_score(shape: f64) -> f64 {
    100.0 * (1.0 - ((shape - GAUSSIAN_SHAPE).abs() / SHAPE_TOLERANCE).min(1.0))
}

/// MSCN coefficients `(I - mu) / (sigma + 1)` with Gaussian-weighted local
/// mean and deviation.
pub fn mscn(gray: &image::GrayImage) -> Vec<f32> {
    let (w, h) = gray.dimensions();
    let luma: Vec<f32> = gray.pixels().map(|p| p[0] as f32).collect();
    let squared: Vec<f32> = luma.iter().map(|v| v * v).collect();

    let (Some(image), Some(image_sq)) = (
        GrayF32::from_raw(w, h, luma),
        GrayF32::from_raw(w, h, squared),
    ) else {
        return Vec::new();
    };

    let mu = gaussian_blur_f32(&image, MSCN_SIGMA);
    let mu_sq = gaussian_blur_f32(&image_sq, MSCN_SIGMA);

    image
        .pixels()
        .zip(mu.pixels())
        .zip(mu_sq.pixels())
        .map(|((i, m), m2)| {
            let sigma = (m2[0] - m[0] * m[0]).abs().sqrt();
            (i[0] - m[0]) / (sigma + 1.0)
        })
        .collect()
}

/// Moment-matching estimate of the generalized Gaussian shape.
///
/// Returns `None` when the coefficients carry no signal.
pub fn ggd_shape(coefficients: &[f32]) -> Option<f64> {
    if coefficients.is_empty() {
        return None;
    }
    let n = coefficients.len() as f64;
    let mean_abs = coefficients.iter().map(|c| c.abs() as f64).sum::<f64>() / n;
    let mean_sq = coefficients.iter().map(|c| (*c as f64).powi(2)).sum::<f64>() / n;
    if mean_abs < MIN_MEAN_ABS {
        return None;
    }
    let rho = mean_sq / (mean_abs * mean_abs);

    (200..=10_000)
        .map(|k| k as f64 / 1000.0)
        .min_by(|a, b| {
            (moment_ratio(*a) - rho)
                .abs()
                .total_cmp(&(moment_ratio(*b) - rho).abs())
        })
}

/// `Γ(1/a) Γ(3/a) / Γ(2/a)^2`
fn moment_ratio(shape: f64) -> f64 {
    (ln_gamma(1.0 / shape) + ln_gamma(3.0 / shape) - 2.0 * ln_gamma(2.0 / shape)).exp()
}

/// Lanczos approximation (g = 7).
fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];

    if x < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin().abs()).ln() - ln_gamma(1.0 - x);
    }

    let x = x - 1.0;
    let t = x + 7.5;
    let series = COEFFS[1..]
        .iter()
        .enumerate()
        .fold(COEFFS[0], |acc, (i, c)| acc + c / (x + i as f64 + 1.0));
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + series.ln()
}
