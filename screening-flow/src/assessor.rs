use async_trait::async_trait;

use crate::{
    error::Result,
    model::{ImageAssessment, QuestionnaireAssessment, QuestionnaireSubmission, SelectedImage},
};

/// The two remote prediction services a screening session depends on.
///
/// Implementations report transport failures, non-success statuses and
/// service-reported errors as [`ScreeningError::Service`](crate::ScreeningError::Service).
#[async_trait]
pub trait Assessor: Send + Sync {
    async fn assess_questionnaire(
        &self,
        submission: &QuestionnaireSubmission,
    ) -> Result<QuestionnaireAssessment>;

    async fn assess_image(&self, image: &SelectedImage) -> Result<ImageAssessment>;
}
