//! Listing labels: tag generation, region adaptation and label quality.

pub mod listing;
pub mod quality;
pub mod region;
pub mod tags;

pub use listing::{Listing, PropertyDocument, PropertyMetadata};
pub use quality::{
    clip_consistency, coverage, diversity, grounding_errors, label_prompt, over_generic,
    redundancy, specificity, Grounding, LabelQuality,
};
pub use region::{Region, RegionAdapter, RegionContext};
pub use tags::{parse_tags, TagGenerator};
