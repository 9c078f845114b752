//! Label quality measures.
//!
//! Text measures work on the labels alone. Grounding measures compare
//! L2-normalized label embeddings (of "a photo of {label}") with embeddings
//! of the listing photos; producing those embeddings is the caller's job.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

/// Labels too vague to be useful on their own.
const GENERIC_TERMS: &[&str] = &[
    "room", "space", "area", "nice", "good", "great", "layout", "design", "style", "view",
    "feature", "interior", "exterior", "building", "home", "house", "apartment", "condo",
    "property", "unit",
];

/// Labels naming a room are held to a stricter grounding threshold.
const ROOM_TYPES: &[&str] = &[
    "bedroom", "living room", "kitchen", "kitchenette", "bathroom", "dining room", "balcony",
    "garage", "hallway", "study", "office", "gym", "pool",
];

/// Best label-photo similarity below which a room label is wrong.
pub const ROOM_TYPE_THRESHOLD: f32 = 0.22;
/// Best label-photo similarity below which any other label is a hallucination.
pub const HALLUCINATION_THRESHOLD: f32 = 0.18;

/// Text prompt whose embedding stands for `label`.
pub fn label_prompt(label: &str) -> String {
    format!("a photo of {label}")
}

/// Mean number of words per label; 0 for no labels.
pub fn specificity(labels: &[String]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let words: usize = labels.iter().map(|l| l.split_whitespace().count()).sum();
    words as f64 / labels.len() as f64
}

/// Mean pairwise Jaccard distance between the label sets of several
/// listings; 0 with fewer than two listings.
pub fn diversity(label_sets: &[Vec<String>]) -> f64 {
    if label_sets.len() < 2 {
        return 0.0;
    }

    let sets: Vec<HashSet<&str>> = label_sets
        .iter()
        .map(|labels| labels.iter().map(String::as_str).collect())
        .collect();

    let mut distances = Vec::new();
    for (i, a) in sets.iter().enumerate() {
        for b in &sets[i + 1..] {
            let union = a.union(b).count();
            if union > 0 {
                let intersection = a.intersection(b).count();
                distances.push(1.0 - intersection as f64 / union as f64);
            }
        }
    }

    if distances.is_empty() {
        0.0
    } else {
        distances.iter().sum::<f64>() / distances.len() as f64
    }
}

fn is_generic(label: &str) -> bool {
    GENERIC_TERMS.contains(&label.trim().to_lowercase().as_str())
}

/// Labels that are a bare generic term, in input order.
pub fn over_generic(labels: &[String]) -> Vec<String> {
    labels.iter().filter(|l| is_generic(l)).cloned().collect()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Highest similarity between `label` and any photo.
fn best_match(label: &[f32], images: &[Vec<f32>]) -> Option<f32> {
    images.iter().map(|image| dot(label, image)).reduce(f32::max)
}

/// Normalized mean of a set of embeddings.
fn centroid(embeddings: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = embeddings.first()?;
    let mut sum = vec![0f32; first.len()];
    for e in embeddings {
        for (s, x) in sum.iter_mut().zip(e) {
            *s += x;
        }
    }
    let norm = sum.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        sum.iter_mut().for_each(|x| *x /= norm);
    }
    Some(sum)
}

/// Mean over labels of each label's best photo similarity; 0 without labels
/// or photos.
pub fn coverage(labels: &[Vec<f32>], images: &[Vec<f32>]) -> f64 {
    let best: Vec<f64> = labels
        .iter()
        .filter_map(|label| best_match(label, images))
        .map(f64::from)
        .collect();
    if best.is_empty() {
        return 0.0;
    }
    best.iter().sum::<f64>() / best.len() as f64
}

/// Mean pairwise similarity between labels. Lower is better; 0 with fewer
/// than two labels.
pub fn redundancy(labels: &[Vec<f32>]) -> f64 {
    let mut sims = Vec::new();
    for (i, a) in labels.iter().enumerate() {
        for b in &labels[i + 1..] {
            sims.push(f64::from(dot(a, b)));
        }
    }
    if sims.is_empty() {
        return 0.0;
    }
    sims.iter().sum::<f64>() / sims.len() as f64
}

/// Similarity between the label centroid and the photo centroid; 0 without
/// labels or photos.
pub fn clip_consistency(labels: &[Vec<f32>], images: &[Vec<f32>]) -> f64 {
    match (centroid(labels), centroid(images)) {
        (Some(l), Some(i)) => f64::from(dot(&l, &i)),
        _ => 0.0,
    }
}

/// Poorly grounded labels, as `"{label} ({similarity:.3})"`.
///
/// Generic labels are skipped. Labels naming a room fall under
/// [`ROOM_TYPE_THRESHOLD`], everything else under [`HALLUCINATION_THRESHOLD`].
/// Returns `(hallucination, wrong_room_type)`.
pub fn grounding_errors(
    labels: &[String],
    embeddings: &[Vec<f32>],
    images: &[Vec<f32>],
) -> (Vec<String>, Vec<String>) {
    let mut hallucination = Vec::new();
    let mut wrong_room_type = Vec::new();

    for (label, embedding) in labels.iter().zip(embeddings) {
        if is_generic(label) {
            continue;
        }
        let Some(best) = best_match(embedding, images) else {
            continue;
        };
        let lower = label.to_lowercase();
        let entry = format!("{label} ({best:.3})");
        if ROOM_TYPES.iter().any(|room| lower.contains(room)) {
            if best < ROOM_TYPE_THRESHOLD {
                wrong_room_type.push(entry);
            }
        } else if best < HALLUCINATION_THRESHOLD {
            hallucination.push(entry);
        }
    }
    (hallucination, wrong_room_type)
}

/// Label-photo alignment measures for one listing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Grounding {
    pub coverage: f64,
    pub redundancy: f64,
    pub clip_consistency: f64,
}

/// Per-listing label measures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelQuality {
    pub num_labels: usize,
    pub specificity: f64,
    /// Present when photo embeddings were available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grounding: Option<Grounding>,
    pub errors: BTreeMap<String, Vec<String>>,
}

impl LabelQuality {
    /// Text measures only.
    pub fn of(labels: &[String]) -> Self {
        let mut errors = BTreeMap::new();
        errors.insert("over_generic".to_string(), over_generic(labels));
        Self {
            num_labels: labels.len(),
            specificity: specificity(labels),
            grounding: None,
            errors,
        }
    }

    /// Text measures plus grounding. `embeddings[i]` is the embedding of
    /// [`label_prompt`]`(labels[i])`.
    pub fn grounded(labels: &[String], embeddings: &[Vec<f32>], images: &[Vec<f32>]) -> Self {
        let mut quality = Self::of(labels);
        let (hallucination, wrong_room_type) = grounding_errors(labels, embeddings, images);
        quality.errors.insert("hallucination".to_string(), hallucination);
        quality.errors.insert("wrong_room_type".to_string(), wrong_room_type);
        quality.grounding = Some(Grounding {
            coverage: coverage(embeddings, images),
            redundancy: redundancy(embeddings),
            clip_consistency: clip_consistency(embeddings, images),
        });
        quality
    }
}
