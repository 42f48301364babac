//! Screening session state machine.
//!
//! A session moves through four steps. The current [`Step`] carries the data
//! that step needs: the image-analysis step owns the questionnaire assessment
//! and the results step owns the verdict, so a session on `results` without a
//! verdict cannot be represented. Operator inputs (patient info, answers,
//! selected image) live beside the step and survive backward navigation.
//!
//! Service calls are split into `begin_*`/`complete_*` pairs so a caller can
//! persist the pending marker while the call is in flight. The
//! `request_*` helpers run both halves against an [`Assessor`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    aggregate::{CombinedVerdict, aggregate},
    assessor::Assessor,
    error::{Result, ScreeningError},
    model::{
        Answer, ImageAssessment, PatientInfo, QuestionId, QuestionnaireAssessment,
        QuestionnaireResponses, QuestionnaireSubmission, SelectedImage,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StepKind {
    PatientInfo,
    Questionnaire,
    ImageAnalysis,
    Results,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKind::PatientInfo => write!(f, "patient information"),
            StepKind::Questionnaire => write!(f, "questionnaire"),
            StepKind::ImageAnalysis => write!(f, "image analysis"),
            StepKind::Results => write!(f, "results"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Step {
    PatientInfo,
    Questionnaire,
    ImageAnalysis {
        questionnaire: QuestionnaireAssessment,
    },
    Results {
        verdict: CombinedVerdict,
    },
}

impl Step {
    pub fn kind(&self) -> StepKind {
        match self {
            Step::PatientInfo => StepKind::PatientInfo,
            Step::Questionnaire => StepKind::Questionnaire,
            Step::ImageAnalysis { .. } => StepKind::ImageAnalysis,
            Step::Results { .. } => StepKind::Results,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestKind {
    Questionnaire,
    Image,
}

/// Marker for the one prediction request a session may have outstanding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRequest {
    pub ticket: Uuid,
    pub kind: RequestKind,
}

/// Issued by [`ScreeningSession::begin_questionnaire_request`]
#[derive(Debug, Clone)]
pub struct QuestionnaireTicket {
    ticket: Uuid,
    pub submission: QuestionnaireSubmission,
}

/// Issued by [`ScreeningSession::begin_image_request`]
#[derive(Debug, Clone)]
pub struct ImageTicket {
    ticket: Uuid,
    pub image: SelectedImage,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreeningSession {
    id: String,
    created_at: DateTime<Utc>,
    #[serde(rename = "currentStep")]
    step: Step,
    patient_info: Option<PatientInfo>,
    responses: QuestionnaireResponses,
    selected_image: Option<SelectedImage>,
    pending: Option<PendingRequest>,
    last_error: Option<String>,
}

impl ScreeningSession {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self::initial(id.into(), Utc::now())
    }

    fn initial(id: String, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at,
            step: Step::PatientInfo,
            patient_info: None,
            responses: QuestionnaireResponses::new(),
            selected_image: None,
            pending: None,
            last_error: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn step(&self) -> &Step {
        &self.step
    }

    pub fn current_step(&self) -> StepKind {
        self.step.kind()
    }

    pub fn patient_info(&self) -> Option<&PatientInfo> {
        self.patient_info.as_ref()
    }

    pub fn responses(&self) -> &QuestionnaireResponses {
        &self.responses
    }

    pub fn selected_image(&self) -> Option<&SelectedImage> {
        self.selected_image.as_ref()
    }

    pub fn questionnaire_assessment(&self) -> Option<&QuestionnaireAssessment> {
        match &self.step {
            Step::ImageAnalysis { questionnaire } => Some(questionnaire),
            Step::Results { verdict } => Some(verdict.questionnaire_assessment()),
            _ => None,
        }
    }

    pub fn image_assessment(&self) -> Option<&ImageAssessment> {
        self.combined_verdict().and_then(|v| v.image_assessment())
    }

    pub fn combined_verdict(&self) -> Option<&CombinedVerdict> {
        match &self.step {
            Step::Results { verdict } => Some(verdict),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending(&self) -> Option<&PendingRequest> {
        self.pending.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Records a rejected transition in `last_error` and hands the error back
    fn reject(&mut self, err: ScreeningError) -> ScreeningError {
        warn!(
            session_id = %self.id,
            step = ?self.step.kind(),
            error = %err,
            "Screening transition rejected"
        );
        self.last_error = Some(err.operator_message());
        err
    }

    pub fn submit_patient_info(&mut self, info: PatientInfo) -> Result<()> {
        let current = self.step.kind();
        if !matches!(current, StepKind::PatientInfo | StepKind::Questionnaire) {
            return Err(self.reject(ScreeningError::InvalidTransition(format!(
                "Patient information cannot be changed on the {} step",
                current
            ))));
        }
        if info.age <= 0 {
            return Err(self.reject(ScreeningError::Validation(
                "Age must be a positive number of months".to_string(),
            )));
        }

        info!(session_id = %self.id, age = info.age, "Patient information submitted");
        self.patient_info = Some(info);
        self.step = Step::Questionnaire;
        self.last_error = None;
        Ok(())
    }

    pub fn set_answer(&mut self, question: QuestionId, answer: Answer) -> Result<()> {
        if self.step.kind() != StepKind::Questionnaire {
            return Err(self.reject(ScreeningError::InvalidTransition(format!(
                "Answers can only be changed on the questionnaire step, not {}",
                self.step.kind()
            ))));
        }
        self.responses.set(question, answer);
        self.last_error = None;
        Ok(())
    }

    /// Replaces the selected image; `None` clears a prior selection
    pub fn select_image(&mut self, image: Option<SelectedImage>) -> Result<()> {
        if let Some(image) = &image {
            if image.bytes.is_empty() {
                return Err(self.reject(ScreeningError::Validation(
                    "Selected image is empty".to_string(),
                )));
            }
        }
        self.selected_image = image;
        Ok(())
    }

    fn ensure_idle(&mut self) -> Result<()> {
        if self.pending.is_some() {
            return Err(self.reject(ScreeningError::RequestInFlight));
        }
        Ok(())
    }

    /// Clears the pending marker if `ticket` is the outstanding request
    fn settle(&mut self, ticket: Uuid) -> bool {
        match &self.pending {
            Some(pending) if pending.ticket == ticket => {
                self.pending = None;
                true
            }
            _ => {
                warn!(session_id = %self.id, %ticket, "Discarding response for a superseded request");
                false
            }
        }
    }

    fn fail_request(&mut self, err: ScreeningError) -> ScreeningError {
        error!(session_id = %self.id, error = %err, "Prediction request failed");
        self.last_error = Some(err.operator_message());
        err
    }

    pub fn begin_questionnaire_request(&mut self) -> Result<QuestionnaireTicket> {
        self.ensure_idle()?;
        if self.step.kind() != StepKind::Questionnaire {
            return Err(self.reject(ScreeningError::InvalidTransition(format!(
                "The questionnaire can only be submitted from the questionnaire step, not {}",
                self.step.kind()
            ))));
        }
        let Some(patient) = self.patient_info.clone() else {
            return Err(self.reject(ScreeningError::Validation(
                "Patient information is required".to_string(),
            )));
        };
        let Some(answers) = self.responses.completed() else {
            let missing = self
                .responses
                .unanswered()
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(self.reject(ScreeningError::Validation(format!(
                "All questions must be answered (missing: {})",
                missing
            ))));
        };

        let ticket = Uuid::new_v4();
        self.pending = Some(PendingRequest {
            ticket,
            kind: RequestKind::Questionnaire,
        });
        self.last_error = None;
        info!(session_id = %self.id, %ticket, "Questionnaire assessment requested");

        Ok(QuestionnaireTicket {
            ticket,
            submission: QuestionnaireSubmission { patient, answers },
        })
    }

    pub fn complete_questionnaire_request(
        &mut self,
        ticket: &QuestionnaireTicket,
        outcome: Result<QuestionnaireAssessment>,
    ) -> Result<()> {
        if !self.settle(ticket.ticket) {
            return Ok(());
        }
        match outcome {
            Ok(assessment) => {
                if self.step.kind() != StepKind::Questionnaire {
                    warn!(session_id = %self.id, "Session left the questionnaire step; assessment discarded");
                    return Ok(());
                }
                info!(
                    session_id = %self.id,
                    confidence = assessment.confidence,
                    risk_level = %assessment.risk_level,
                    "Questionnaire assessment received"
                );
                self.step = Step::ImageAnalysis {
                    questionnaire: assessment,
                };
                Ok(())
            }
            Err(err) => Err(self.fail_request(err)),
        }
    }

    pub async fn request_questionnaire_assessment(&mut self, assessor: &dyn Assessor) -> Result<()> {
        let ticket = self.begin_questionnaire_request()?;
        let outcome = assessor.assess_questionnaire(&ticket.submission).await;
        self.complete_questionnaire_request(&ticket, outcome)
    }

    pub fn begin_image_request(&mut self) -> Result<ImageTicket> {
        self.ensure_idle()?;
        if self.step.kind() != StepKind::ImageAnalysis {
            return Err(self.reject(ScreeningError::InvalidTransition(format!(
                "A questionnaire assessment is required before image analysis (current step: {})",
                self.step.kind()
            ))));
        }
        let Some(image) = self.selected_image.clone() else {
            return Err(self.reject(ScreeningError::Validation(
                "An image must be selected before analysis".to_string(),
            )));
        };

        let ticket = Uuid::new_v4();
        self.pending = Some(PendingRequest {
            ticket,
            kind: RequestKind::Image,
        });
        self.last_error = None;
        info!(session_id = %self.id, %ticket, file_name = %image.file_name, "Image assessment requested");

        Ok(ImageTicket { ticket, image })
    }

    pub fn complete_image_request(
        &mut self,
        ticket: &ImageTicket,
        outcome: Result<ImageAssessment>,
    ) -> Result<()> {
        if !self.settle(ticket.ticket) {
            return Ok(());
        }
        match outcome {
            Ok(image) => {
                let Step::ImageAnalysis { questionnaire } = &self.step else {
                    warn!(session_id = %self.id, "Session left the image analysis step; assessment discarded");
                    return Ok(());
                };
                let verdict = aggregate(questionnaire, Some(&image));
                info!(
                    session_id = %self.id,
                    combined_confidence = verdict.combined_confidence(),
                    risk_level = %verdict.risk_level(),
                    "Combined verdict computed"
                );
                self.step = Step::Results { verdict };
                Ok(())
            }
            Err(err) => Err(self.fail_request(err)),
        }
    }

    pub async fn request_image_assessment(&mut self, assessor: &dyn Assessor) -> Result<()> {
        let ticket = self.begin_image_request()?;
        let outcome = assessor.assess_image(&ticket.image).await;
        self.complete_image_request(&ticket, outcome)
    }

    /// Produces the verdict from the questionnaire alone
    pub fn skip_image_analysis(&mut self) -> Result<()> {
        self.ensure_idle()?;
        let verdict = match &self.step {
            Step::ImageAnalysis { questionnaire } => aggregate(questionnaire, None),
            Step::Results { verdict } if verdict.image_assessment().is_none() => return Ok(()),
            other => {
                let kind = other.kind();
                return Err(self.reject(ScreeningError::InvalidTransition(format!(
                    "Image analysis can only be skipped after the questionnaire assessment (current step: {})",
                    kind
                ))));
            }
        };

        info!(
            session_id = %self.id,
            combined_confidence = verdict.combined_confidence(),
            risk_level = %verdict.risk_level(),
            "Image analysis skipped; verdict from questionnaire only"
        );
        self.step = Step::Results { verdict };
        self.last_error = None;
        Ok(())
    }

    /// Backward navigation; operator inputs are kept
    pub fn return_to_step(&mut self, target: StepKind) -> Result<()> {
        let current = self.step.kind();
        if target > current {
            return Err(self.reject(ScreeningError::InvalidTransition(format!(
                "Cannot move forward from {} to {}",
                current, target
            ))));
        }

        let next = match (target, &self.step) {
            (StepKind::PatientInfo, _) => Step::PatientInfo,
            (StepKind::Questionnaire, _) => Step::Questionnaire,
            (StepKind::ImageAnalysis, Step::Results { verdict }) => Step::ImageAnalysis {
                questionnaire: verdict.questionnaire_assessment().clone(),
            },
            _ => return Ok(()),
        };

        info!(session_id = %self.id, from = ?current, to = ?target, "Returned to earlier step");
        self.step = next;
        Ok(())
    }

    pub fn reset_session(&mut self) {
        info!(session_id = %self.id, "Session reset");
        *self = Self::initial(std::mem::take(&mut self.id), self.created_at);
    }
}

impl Default for ScreeningSession {
    fn default() -> Self {
        Self::new()
    }
}
