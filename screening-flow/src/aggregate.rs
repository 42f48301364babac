//! Combines the questionnaire and (optional) image assessments into one verdict.
//!
//! The weighting and thresholds are fixed at compile time so the same pair of
//! assessments always yields the same verdict.

use serde::Serialize;

use crate::model::{ImageAssessment, PredictionLabel, QuestionnaireAssessment, RiskLevel};

/// Weight of the questionnaire confidence when an image assessment is present
pub const QUESTIONNAIRE_WEIGHT: f64 = 0.4;
/// Weight of the image confidence
pub const IMAGE_WEIGHT: f64 = 0.6;
/// Combined confidence strictly above this is an elevated-risk prediction
pub const ELEVATED_RISK_THRESHOLD: f64 = 0.5;
/// Combined confidence strictly above this is HIGH risk
pub const HIGH_RISK_THRESHOLD: f64 = 0.75;

/// Final result of a screening session.
///
/// Only [`aggregate`] constructs a verdict, so one always carries the
/// questionnaire assessment it was derived from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinedVerdict {
    predicted_label: PredictionLabel,
    prediction_label: &'static str,
    risk_level: RiskLevel,
    combined_confidence: f64,
    questionnaire_contribution: f64,
    image_contribution: f64,
    questionnaire_assessment: QuestionnaireAssessment,
    image_assessment: Option<ImageAssessment>,
}

impl CombinedVerdict {
    pub fn predicted_label(&self) -> PredictionLabel {
        self.predicted_label
    }

    pub fn risk_level(&self) -> RiskLevel {
        self.risk_level
    }

    pub fn combined_confidence(&self) -> f64 {
        self.combined_confidence
    }

    pub fn questionnaire_contribution(&self) -> f64 {
        self.questionnaire_contribution
    }

    pub fn image_contribution(&self) -> f64 {
        self.image_contribution
    }

    pub fn questionnaire_assessment(&self) -> &QuestionnaireAssessment {
        &self.questionnaire_assessment
    }

    pub fn image_assessment(&self) -> Option<&ImageAssessment> {
        self.image_assessment.as_ref()
    }
}

/// Maps a combined confidence onto a risk band.
///
/// Boundaries belong to the lower band: exactly 0.75 is MODERATE and exactly
/// 0.5 is LOW.
pub fn classify(combined_confidence: f64) -> RiskLevel {
    if combined_confidence > HIGH_RISK_THRESHOLD {
        RiskLevel::High
    } else if combined_confidence > ELEVATED_RISK_THRESHOLD {
        RiskLevel::Moderate
    } else {
        RiskLevel::Low
    }
}

pub fn aggregate(
    questionnaire: &QuestionnaireAssessment,
    image: Option<&ImageAssessment>,
) -> CombinedVerdict {
    match image {
        None => CombinedVerdict {
            predicted_label: questionnaire.predicted_label,
            prediction_label: questionnaire.predicted_label.display_label(),
            risk_level: questionnaire.risk_level,
            combined_confidence: questionnaire.confidence,
            questionnaire_contribution: questionnaire.confidence,
            image_contribution: 0.0,
            questionnaire_assessment: questionnaire.clone(),
            image_assessment: None,
        },
        Some(image) => {
            let questionnaire_contribution = questionnaire.confidence * QUESTIONNAIRE_WEIGHT;
            let image_contribution = image.confidence * IMAGE_WEIGHT;
            let combined_confidence = questionnaire_contribution + image_contribution;

            let predicted_label = if combined_confidence > ELEVATED_RISK_THRESHOLD {
                PredictionLabel::ElevatedRisk
            } else {
                PredictionLabel::LowRisk
            };

            CombinedVerdict {
                predicted_label,
                prediction_label: predicted_label.display_label(),
                risk_level: classify(combined_confidence),
                combined_confidence,
                questionnaire_contribution,
                image_contribution,
                questionnaire_assessment: questionnaire.clone(),
                image_assessment: Some(image.clone()),
            }
        }
    }
}
