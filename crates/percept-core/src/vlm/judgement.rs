//! Structured judgements parsed from free-form model output.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::VlmError;

/// Score substituted for anything the model did not provide.
///
/// Indistinguishable from a genuine mid-scale rating.
pub const NEUTRAL_SCORE: f64 = 5.0;

/// One defect or artifact check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefectFinding {
    pub present: bool,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subscores {
    pub geometry_score: Option<f64>,
    pub texture_score: Option<f64>,
    pub consistency_score: Option<f64>,
}

/// Bounds of the rating scale the model is asked to use.
pub const MIN_SCORE: f64 = 1.0;
pub const MAX_SCORE: f64 = 10.0;

/// A per-image judgement. Every field is optional; the accessors apply
/// [`NEUTRAL_SCORE`] where a score is missing and clamp the rest to
/// `[MIN_SCORE, MAX_SCORE]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VlmJudgement {
    pub overall_score: Option<f64>,
    #[serde(default)]
    pub structural_defects: BTreeMap<String, DefectFinding>,
    #[serde(default)]
    pub texture_artifacts: BTreeMap<String, DefectFinding>,
    #[serde(default)]
    pub subscores: Subscores,
    pub summary: Option<String>,
}

impl VlmJudgement {
    /// Parse the first `{` .. last `}` span of `response`.
    pub fn parse(response: &str) -> Result<Self, VlmError> {
        let json = extract_json_object(response).ok_or_else(|| {
            VlmError::MalformedResponse(format!("no JSON object in response: {}", preview(response)))
        })?;
        let value: Value = serde_json::from_str(json)
            .map_err(|e| VlmError::MalformedResponse(format!("{e}: {}", preview(response))))?;
        if !value.is_object() {
            return Err(VlmError::MalformedResponse("top-level JSON is not an object".into()));
        }
        Ok(Self::from_value(&value))
    }

    /// Best-effort key lookup; unknown or mistyped fields are left empty.
    pub fn from_value(value: &Value) -> Self {
        let subscores = value.get("subscores");
        Self {
            overall_score: number(value.get("overall_score")),
            structural_defects: findings(value.get("structural_defects")),
            texture_artifacts: findings(value.get("texture_artifacts")),
            subscores: Subscores {
                geometry_score: number(subscores.and_then(|s| s.get("geometry_score"))),
                texture_score: number(subscores.and_then(|s| s.get("texture_score"))),
                consistency_score: number(subscores.and_then(|s| s.get("consistency_score"))),
            },
            summary: value
                .get("summary")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    pub fn quality(&self) -> f64 {
        rating(self.overall_score)
    }

    pub fn geometry(&self) -> f64 {
        rating(self.subscores.geometry_score)
    }

    pub fn texture(&self) -> f64 {
        rating(self.subscores.texture_score)
    }

    /// `max(1, 11 - texture)`: 1 means no visible artifacts.
    pub fn artifact_severity(&self) -> f64 {
        (11.0 - self.texture()).max(1.0)
    }
}

/// Slice from the first `{` to the last `}` inclusive.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn rating(score: Option<f64>) -> f64 {
    score
        .map(|s| s.clamp(MIN_SCORE, MAX_SCORE))
        .unwrap_or(NEUTRAL_SCORE)
}

/// A finite number, or a string holding one. "NaN" and "inf" are rejected.
fn number(value: Option<&Value>) -> Option<f64> {
    let n = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    n.filter(|v| v.is_finite())
}

fn findings(value: Option<&Value>) -> BTreeMap<String, DefectFinding> {
    let Some(Value::Object(map)) = value else {
        return BTreeMap::new();
    };
    map.iter()
        .map(|(name, entry)| {
            let present = match entry.get("present") {
                Some(Value::Bool(b)) => *b,
                Some(Value::String(s)) => matches!(s.to_lowercase().as_str(), "true" | "yes"),
                _ => false,
            };
            let description = entry
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            (name.clone(), DefectFinding { present, description })
        })
        .collect()
}

fn preview(text: &str) -> String {
    const LIMIT: usize = 200;
    match text.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = r#"Here is my evaluation:
```json
{
  "overall_score": 7,
  "structural_defects": {
    "curved_or_warped_walls": { "present": true, "description": "left wall bows" },
    "misaligned_edges": { "present": false, "description": "" }
  },
  "texture_artifacts": { "floating_artifacts": { "present": "yes" } },
  "subscores": { "geometry_score": 6, "texture_score": "8", "consistency_score": 7 },
  "summary": "Mostly plausible."
}
```"#;

    #[test]
    fn parses_fenced_response() {
        let j = VlmJudgement::parse(RESPONSE).unwrap();
        assert_eq!(j.quality(), 7.0);
        assert_eq!(j.geometry(), 6.0);
        assert_eq!(j.texture(), 8.0);
        assert_eq!(j.artifact_severity(), 3.0);
        assert_eq!(j.subscores.consistency_score, Some(7.0));
        assert!(j.structural_defects["curved_or_warped_walls"].present);
        assert!(!j.structural_defects["misaligned_edges"].present);
        assert!(j.texture_artifacts["floating_artifacts"].present);
        assert_eq!(j.summary.as_deref(), Some("Mostly plausible."));
    }

    #[test]
    fn missing_fields_are_neutral() {
        let j = VlmJudgement::parse(r#"{"summary": "no scores"}"#).unwrap();
        assert_eq!(j.quality(), NEUTRAL_SCORE);
        assert_eq!(j.geometry(), NEUTRAL_SCORE);
        assert_eq!(j.artifact_severity(), 6.0);
    }

    #[test]
    fn perfect_texture_has_minimum_severity() {
        let j = VlmJudgement::parse(r#"{"subscores": {"texture_score": 10}}"#).unwrap();
        assert_eq!(j.artifact_severity(), 1.0);
    }

    #[test]
    fn severity_never_below_one() {
        let j = VlmJudgement::parse(r#"{"subscores": {"texture_score": 12}}"#).unwrap();
        assert_eq!(j.artifact_severity(), 1.0);
    }

    #[test]
    fn non_finite_strings_are_missing() {
        let j = VlmJudgement::parse(
            r#"{"overall_score": "NaN", "subscores": {"geometry_score": "inf", "texture_score": "-infinity"}}"#,
        )
        .unwrap();
        assert_eq!(j.overall_score, None);
        assert_eq!(j.subscores.geometry_score, None);
        assert_eq!(j.subscores.texture_score, None);
        assert_eq!(j.quality(), NEUTRAL_SCORE);
        assert_eq!(j.artifact_severity(), 6.0);
    }

    #[test]
    fn out_of_scale_scores_are_clamped() {
        let j = VlmJudgement::parse(
            r#"{"overall_score": 85, "subscores": {"geometry_score": 0, "texture_score": 80}}"#,
        )
        .unwrap();
        assert_eq!(j.quality(), MAX_SCORE);
        assert_eq!(j.geometry(), MIN_SCORE);
        assert_eq!(j.texture(), MAX_SCORE);
        assert_eq!(j.artifact_severity(), 1.0);
    }

    #[test]
    fn no_object_is_malformed() {
        assert!(matches!(
            VlmJudgement::parse("I cannot evaluate this image."),
            Err(VlmError::MalformedResponse(_))
        ));
        assert!(matches!(
            VlmJudgement::parse("} backwards {"),
            Err(VlmError::MalformedResponse(_))
        ));
        assert!(matches!(
            VlmJudgement::parse("{ not json }"),
            Err(VlmError::MalformedResponse(_))
        ));
    }

    #[test]
    fn extraction_spans_first_to_last_brace() {
        assert_eq!(extract_json_object("a {\"x\": {}} b"), Some("{\"x\": {}}"));
        assert_eq!(extract_json_object("none"), None);
    }
}
