use screening_flow::{Answer, QuestionId, ScreeningSession, SelectedImage, StepKind, model::Scoring};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct AnswerRequest {
    pub answer: Answer,
}

/// `image: null` clears the current selection
#[derive(Debug, Serialize, Deserialize)]
pub struct ImageSelectionRequest {
    pub image: Option<SelectedImage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StepRequest {
    pub step: StepKind,
}

#[derive(Debug, Serialize)]
pub struct QuestionResponse {
    pub id: QuestionId,
    pub prompt: &'static str,
    pub scoring: Scoring,
}

impl From<QuestionId> for QuestionResponse {
    fn from(id: QuestionId) -> Self {
        Self {
            id,
            prompt: id.prompt(),
            scoring: id.scoring(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub status: String,
    pub current_step: StepKind,
    pub waiting_for_input: bool,
    pub session: ScreeningSession,
}

impl From<ScreeningSession> for SessionResponse {
    fn from(session: ScreeningSession) -> Self {
        let status = if session.is_pending() {
            "pending"
        } else if session.combined_verdict().is_some() {
            "completed"
        } else {
            "active"
        };

        Self {
            session_id: session.id().to_string(),
            status: status.to_string(),
            current_step: session.current_step(),
            waiting_for_input: !session.is_pending(),
            session,
        }
    }
}
