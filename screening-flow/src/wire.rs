//! Request and response bodies of the prediction backend.
//!
//! Responses are decoded leniently: optional fields that are missing, null or
//! of the wrong type fall back to their defaults. Only `prediction` and
//! `confidence` are required, and an `error` field always means failure.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

use crate::{
    error::{Result, ScreeningError},
    model::{
        ImageAssessment, PredictionLabel, QuestionnaireAssessment, QuestionnaireSubmission,
        RegionalScore, RiskLevel,
    },
};

/// Total score at or above which an elevated questionnaire prediction is HIGH risk
pub const HIGH_RISK_TOTAL_SCORE: u32 = 7;

fn lenient<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionnaireRequestBody {
    pub age: i32,
    pub sex: &'static str,
    pub jaundice: &'static str,
    pub family_asd: &'static str,
    pub responses: BTreeMap<&'static str, &'static str>,
}

impl From<&QuestionnaireSubmission> for QuestionnaireRequestBody {
    fn from(submission: &QuestionnaireSubmission) -> Self {
        Self {
            age: submission.patient.age,
            sex: submission.patient.sex.as_str(),
            jaundice: yes_no(submission.patient.born_with_jaundice),
            family_asd: yes_no(submission.patient.family_history_asd),
            responses: submission
                .answers
                .iter()
                .map(|(id, answer)| (id.wire_key(), answer.as_str()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuestionnaireResponseBody {
    #[serde(default, deserialize_with = "lenient")]
    pub prediction: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    pub confidence: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub risk_level: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub total_score: Option<i64>,
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageResponseBody {
    #[serde(default, deserialize_with = "lenient")]
    pub prediction: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    pub confidence: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub attention_regions: Vec<Value>,
    #[serde(default, deserialize_with = "lenient")]
    pub heatmap_base64: String,
    #[serde(default, deserialize_with = "lenient")]
    pub lime_base64: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub llm_explanation: String,
    /// An array of regions, or an object when the backend has no regional data
    #[serde(default)]
    pub facial_regions: Value,
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FacialRegionBody {
    #[serde(default, deserialize_with = "lenient")]
    region: String,
    #[serde(default, deserialize_with = "lenient")]
    attention_score: f64,
    #[serde(default, deserialize_with = "lenient")]
    clinical_relevance: String,
}

/// Text of an `error` field, if the body carries one
pub fn reported_error(error: &Option<Value>) -> Option<String> {
    match error {
        None | Some(Value::Null) => None,
        Some(Value::String(reason)) if !reason.trim().is_empty() => Some(reason.clone()),
        Some(Value::String(_)) => Some("Prediction service reported an error".to_string()),
        Some(other) => Some(other.to_string()),
    }
}

fn required_label(prediction: Option<i64>) -> Result<PredictionLabel> {
    let prediction = prediction.ok_or_else(|| {
        ScreeningError::Service("Prediction service response is missing `prediction`".to_string())
    })?;
    u8::try_from(prediction)
        .map_err(|_| format!("prediction must be 0 or 1, got {}", prediction))
        .and_then(PredictionLabel::try_from)
        .map_err(ScreeningError::Service)
}

fn required_confidence(confidence: Option<f64>) -> Result<f64> {
    let confidence = confidence.ok_or_else(|| {
        ScreeningError::Service("Prediction service response is missing `confidence`".to_string())
    })?;
    if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
        return Err(ScreeningError::Service(format!(
            "Prediction service returned confidence {} outside [0, 1]",
            confidence
        )));
    }
    Ok(confidence)
}

/// Risk band the questionnaire backend itself would assign
pub fn derive_questionnaire_risk(label: PredictionLabel, total_score: u32) -> RiskLevel {
    match label {
        PredictionLabel::ElevatedRisk if total_score >= HIGH_RISK_TOTAL_SCORE => RiskLevel::High,
        PredictionLabel::ElevatedRisk => RiskLevel::Moderate,
        PredictionLabel::LowRisk => RiskLevel::Low,
    }
}

impl QuestionnaireResponseBody {
    pub fn into_assessment(self) -> Result<QuestionnaireAssessment> {
        if let Some(reason) = reported_error(&self.error) {
            return Err(ScreeningError::Service(reason));
        }
        let predicted_label = required_label(self.prediction)?;
        let confidence = required_confidence(self.confidence)?;
        let total_score = self
            .total_score
            .and_then(|score| u32::try_from(score).ok())
            .unwrap_or(0);

        let (risk_level, risk_level_derived) =
            match self.risk_level.as_deref().and_then(RiskLevel::parse) {
                Some(level) => (level, false),
                None => {
                    let derived = derive_questionnaire_risk(predicted_label, total_score);
                    warn!(
                        reported = ?self.risk_level,
                        derived = %derived,
                        "Questionnaire service returned no usable risk_level; derived from prediction and score"
                    );
                    (derived, true)
                }
            };

        Ok(QuestionnaireAssessment {
            predicted_label,
            confidence,
            risk_level,
            total_score,
            risk_level_derived,
        })
    }
}

fn decode_image(field: &str, encoded: &str) -> Option<Vec<u8>> {
    let encoded = encoded.trim();
    if encoded.is_empty() {
        return None;
    }
    // tolerate data URLs
    let payload = match encoded.split_once(";base64,") {
        Some((_, payload)) => payload,
        None => encoded,
    };
    match STANDARD.decode(payload) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!(field, error = %e, "Ignoring undecodable image payload");
            None
        }
    }
}

fn region_name(value: &Value) -> Option<String> {
    match value {
        Value::String(name) => Some(name.clone()),
        Value::Object(fields) => fields
            .get("region")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

fn regional_scores(facial_regions: Value) -> Vec<RegionalScore> {
    let Value::Array(entries) = facial_regions else {
        return Vec::new();
    };
    entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value::<FacialRegionBody>(entry).ok())
        .filter(|region| !region.region.is_empty())
        .map(|region| RegionalScore {
            region: region.region,
            attention_score: if region.attention_score.is_finite() {
                region.attention_score.clamp(0.0, 1.0)
            } else {
                0.0
            },
            clinical_note: region.clinical_relevance,
        })
        .collect()
}

impl ImageResponseBody {
    pub fn into_assessment(self) -> Result<ImageAssessment> {
        if let Some(reason) = reported_error(&self.error) {
            return Err(ScreeningError::Service(reason));
        }
        let predicted_label = required_label(self.prediction)?;
        let confidence = required_confidence(self.confidence)?;

        Ok(ImageAssessment {
            predicted_label,
            confidence,
            heatmap_image: decode_image("heatmap_base64", &self.heatmap_base64),
            lime_image: self
                .lime_base64
                .as_deref()
                .and_then(|encoded| decode_image("lime_base64", encoded)),
            attention_regions: self.attention_regions.iter().filter_map(region_name).collect(),
            explanation_text: self.llm_explanation,
            regional_scores: regional_scores(self.facial_regions),
        })
    }
}
