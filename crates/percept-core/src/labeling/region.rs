//! Region detection and region-specific label adaptation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::listing::PropertyMetadata;

/// Markets the label vocabulary is adapted for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    #[default]
    Taiwan,
    Japan,
    Us,
}

impl Region {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Taiwan => "taiwan",
            Self::Japan => "japan",
            Self::Us => "us",
        }
    }

    /// Phrase appended to CLIP prompts for this region.
    pub fn prompt_context(&self) -> &'static str {
        match self {
            Self::Taiwan => "in a Taiwanese apartment",
            Self::Japan => "in a Japanese apartment",
            Self::Us => "in an American home",
        }
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// City fragments checked in order; the first region with a hit wins.
const CITY_HINTS: &[(Region, &[&str])] = &[
    (Region::Japan, &["tokyo", "東京", "osaka", "大阪", "kyoto"]),
    (Region::Us, &["new york", "los angeles", "chicago", "houston"]),
];

/// Generic term to regional term, applied in order.
pub type SynonymTable = Vec<(String, String)>;

fn default_synonyms() -> BTreeMap<Region, SynonymTable> {
    let table = |pairs: &[(&str, &str)]| -> SynonymTable {
        pairs
            .iter()
            .map(|(g, r)| (g.to_string(), r.to_string()))
            .collect()
    };

    BTreeMap::from([
        (
            Region::Japan,
            table(&[
                ("entrance", "genkan entrance"),
                ("bathroom", "unit bath"),
                ("flooring", "tatami flooring"),
            ]),
        ),
        (
            Region::Us,
            table(&[
                ("storage", "walk-in closet"),
                ("countertops", "granite countertops"),
            ]),
        ),
        (
            Region::Taiwan,
            table(&[("balcony", "balcony with laundry area")]),
        ),
    ])
}

/// Region detection from a free-text city, with `default` as the fallback.
pub fn detect_region_in(city: &str, default: Region) -> Region {
    let city = city.to_lowercase();
    CITY_HINTS
        .iter()
        .find(|(_, hints)| hints.iter().any(|hint| city.contains(hint)))
        .map(|(region, _)| *region)
        .unwrap_or(default)
}

/// Rewrite every label containing a generic term with its regional term.
///
/// Containment is checked case-insensitively against the label as rewritten
/// so far; the replacement itself is a plain substring replacement, so
/// successive pairs compose in table order.
pub fn adapt_with(labels: &[String], synonyms: &[(String, String)]) -> Vec<String> {
    labels
        .iter()
        .map(|label| {
            synonyms
                .iter()
                .fold(label.clone(), |current, (generic, regional)| {
                    if current.to_lowercase().contains(generic.as_str()) {
                        current.replace(generic.as_str(), regional)
                    } else {
                        current
                    }
                })
        })
        .collect()
}

/// Labels with their detected region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionContext {
    pub original_labels: Vec<String>,
    pub region: Region,
    pub adapted_labels: Vec<String>,
    pub region_vocabulary: Vec<String>,
}

/// Training-free label adaptation across regions.
#[derive(Debug, Clone)]
pub struct RegionAdapter {
    default_region: Region,
    synonyms: BTreeMap<Region, SynonymTable>,
    vocabulary: BTreeMap<Region, Vec<String>>,
}

impl Default for RegionAdapter {
    fn default() -> Self {
        Self::new(Region::default(), BTreeMap::new())
    }
}

impl RegionAdapter {
    pub fn new(default_region: Region, vocabulary: BTreeMap<Region, Vec<String>>) -> Self {
        Self {
            default_region,
            synonyms: default_synonyms(),
            vocabulary,
        }
    }

    pub fn from_config(config: &crate::config::RegionsConfig) -> Self {
        Self::new(config.default, config.region_vocab.clone())
    }

    pub fn detect_region(&self, metadata: &PropertyMetadata) -> Region {
        detect_region_in(&metadata.city, self.default_region)
    }

    pub fn adapt_labels(&self, labels: &[String], region: Region) -> Vec<String> {
        match self.synonyms.get(&region) {
            Some(table) => adapt_with(labels, table),
            None => labels.to_vec(),
        }
    }

    pub fn region_vocabulary(&self, region: Region) -> &[String] {
        self.vocabulary
            .get(&region)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn enrich(&self, labels: &[String], metadata: &PropertyMetadata) -> RegionContext {
        let region = self.detect_region(metadata);
        RegionContext {
            original_labels: labels.to_vec(),
            region,
            adapted_labels: self.adapt_labels(labels, region),
            region_vocabulary: self.region_vocabulary(region).to_vec(),
        }
    }

    /// CLIP prompt for `label` in the context of `region`.
    pub fn region_prompt(label: &str, region: Region) -> String {
        format!("a photo of {} {}", label, region.prompt_context())
    }
}
