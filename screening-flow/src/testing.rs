//! Fixtures shared by the unit tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::{
    Assessor,
    error::{Result, ScreeningError},
    model::{
        ImageAssessment, PatientInfo, PredictionLabel, QuestionnaireAssessment,
        QuestionnaireSubmission, RegionalScore, RiskLevel, SelectedImage, Sex,
    },
};

/// Returns queued outcomes in order and counts every call
#[derive(Default)]
pub struct ScriptedAssessor {
    questionnaire: Mutex<VecDeque<Result<QuestionnaireAssessment>>>,
    image: Mutex<VecDeque<Result<ImageAssessment>>>,
    submissions: Mutex<Vec<QuestionnaireSubmission>>,
    image_calls: Mutex<usize>,
}

impl ScriptedAssessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_questionnaire(&self, outcome: Result<QuestionnaireAssessment>) {
        self.questionnaire.lock().unwrap().push_back(outcome);
    }

    pub fn push_image(&self, outcome: Result<ImageAssessment>) {
        self.image.lock().unwrap().push_back(outcome);
    }

    pub fn questionnaire_calls(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }

    pub fn image_calls(&self) -> usize {
        *self.image_calls.lock().unwrap()
    }

    pub fn last_submission(&self) -> Option<QuestionnaireSubmission> {
        self.submissions.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Assessor for ScriptedAssessor {
    async fn assess_questionnaire(
        &self,
        submission: &QuestionnaireSubmission,
    ) -> Result<QuestionnaireAssessment> {
        self.submissions.lock().unwrap().push(submission.clone());
        self.questionnaire
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ScreeningError::Service("no scripted response".to_string())))
    }

    async fn assess_image(&self, _image: &SelectedImage) -> Result<ImageAssessment> {
        *self.image_calls.lock().unwrap() += 1;
        self.image
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ScreeningError::Service("no scripted response".to_string())))
    }
}

pub fn sample_patient() -> PatientInfo {
    PatientInfo {
        age: 30,
        sex: Sex::Female,
        born_with_jaundice: false,
        family_history_asd: true,
    }
}

pub fn sample_image() -> SelectedImage {
    SelectedImage {
        bytes: vec![0x89, b'P', b'N', b'G'],
        file_name: "face.png".to_string(),
        content_type: "image/png".to_string(),
        preview: Some("blob:preview".to_string()),
    }
}

pub fn questionnaire_assessment(confidence: f64, risk_level: RiskLevel) -> QuestionnaireAssessment {
    QuestionnaireAssessment {
        predicted_label: if confidence > 0.5 {
            PredictionLabel::ElevatedRisk
        } else {
            PredictionLabel::LowRisk
        },
        confidence,
        risk_level,
        total_score: 5,
        risk_level_derived: false,
    }
}

pub fn image_assessment(confidence: f64) -> ImageAssessment {
    ImageAssessment {
        predicted_label: if confidence > 0.5 {
            PredictionLabel::ElevatedRisk
        } else {
            PredictionLabel::LowRisk
        },
        confidence,
        heatmap_image: None,
        lime_image: None,
        attention_regions: vec!["eyes_region".to_string()],
        explanation_text: "The network focused primarily on the eyes_region".to_string(),
        regional_scores: vec![RegionalScore {
            region: "eyes_region".to_string(),
            attention_score: 0.42,
            clinical_note: "Gaze pattern".to_string(),
        }],
    }
}
