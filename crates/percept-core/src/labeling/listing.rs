//! Property listing documents.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// A property listing as exported by the listing site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyDocument {
    pub listing: Listing,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Listing {
    pub property_id: String,
    pub title: String,
    pub property_type: String,
    pub city: String,
    pub district: String,
    pub num_bedroom: serde_json::Value,
    pub num_bathroom: serde_json::Value,
    pub interior_area: serde_json::Value,
    pub property_age: serde_json::Value,
    pub picture_list: Vec<String>,
}

/// The listing fields the labeling pipeline reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyMetadata {
    pub property_id: String,
    pub title: String,
    pub property_type: String,
    pub city: String,
    pub district: String,
    pub num_bedroom: serde_json::Value,
    pub num_bathroom: serde_json::Value,
    pub interior_area: serde_json::Value,
    pub property_age: serde_json::Value,
}

impl PropertyDocument {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read listing {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse listing {}", path.display()))
    }

    pub fn property_id(&self) -> &str {
        &self.listing.property_id
    }

    pub fn metadata(&self) -> PropertyMetadata {
        let l = &self.listing;
        PropertyMetadata {
            property_id: l.property_id.clone(),
            title: l.title.clone(),
            property_type: l.property_type.clone(),
            city: l.city.clone(),
            district: l.district.clone(),
            num_bedroom: l.num_bedroom.clone(),
            num_bathroom: l.num_bathroom.clone(),
            interior_area: l.interior_area.clone(),
            property_age: l.property_age.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_listing_with_loose_numbers() {
        let doc: PropertyDocument = serde_json::from_str(
            r#"{"listing": {
                "property_id": "P-17",
                "title": "Sunny corner unit",
                "city": "高雄市",
                "district": "楠梓區",
                "num_bedroom": 3,
                "interior_area": "32.5",
                "picture_list": ["https://img/1.jpg", "https://img/2.jpg"]
            }}"#,
        )
        .unwrap();

        assert_eq!(doc.property_id(), "P-17");
        assert_eq!(doc.listing.picture_list.len(), 2);

        let meta = doc.metadata();
        assert_eq!(meta.city, "高雄市");
        assert_eq!(meta.num_bedroom, serde_json::json!(3));
        assert_eq!(meta.interior_area, serde_json::json!("32.5"));
        assert!(meta.property_age.is_null());
    }
}
