//! Session state machine and result aggregation for a four-step developmental
//! screening workflow: patient information, behavioral questionnaire, optional
//! facial-image analysis, and results.

pub mod aggregate;
pub mod assessor;
pub mod error;
pub mod model;
pub mod runner;
pub mod session;
pub mod storage;
pub mod wire;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use aggregate::{CombinedVerdict, aggregate};
pub use assessor::Assessor;
pub use error::{Result, ScreeningError};
pub use model::{
    Answer, ImageAssessment, PatientInfo, PredictionLabel, QuestionId, QuestionnaireAssessment,
    QuestionnaireResponses, QuestionnaireSubmission, RegionalScore, RiskLevel, SelectedImage, Sex,
};
pub use runner::ScreeningRunner;
pub use session::{ScreeningSession, Step, StepKind};
pub use storage::{InMemorySessionStorage, SessionStorage};
