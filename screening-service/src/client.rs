use async_trait::async_trait;
use reqwest::{
    Client, Response,
    multipart::{Form, Part},
};
use screening_flow::{
    Assessor, ImageAssessment, QuestionnaireAssessment, QuestionnaireSubmission, Result,
    ScreeningError, SelectedImage,
    wire::{ImageResponseBody, QuestionnaireRequestBody, QuestionnaireResponseBody, reported_error},
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{info, warn};

pub const QUESTIONNAIRE_PATH: &str = "/api/predict/questionnaire";
pub const IMAGE_PATH: &str = "/api/predict/image";
pub const HEALTH_PATH: &str = "/api/health";

/// Talks to the prediction backend over HTTP
#[derive(Clone)]
pub struct HttpAssessor {
    client: Client,
    base_url: String,
}

impl HttpAssessor {
    pub fn new(base_url: impl Into<String>, timeout: Option<Duration>) -> anyhow::Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Raw health report of the prediction backend
    pub async fn backend_health(&self) -> Result<Value> {
        let response = self
            .client
            .get(self.endpoint(HEALTH_PATH))
            .send()
            .await
            .map_err(|e| ScreeningError::Service(format!("Prediction backend unreachable: {}", e)))?;
        decode_response(response).await
    }
}

/// Turns an HTTP response into a body, preferring the service's own error text
async fn decode_response<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    let text = response.text().await.map_err(|e| {
        ScreeningError::Service(format!("Failed to read prediction service response: {}", e))
    })?;

    if !status.is_success() {
        let reason = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|body| reported_error(&body.get("error").cloned()))
            .unwrap_or_else(|| format!("Prediction service returned HTTP {}", status));
        return Err(ScreeningError::Service(reason));
    }

    serde_json::from_str(&text).map_err(|e| {
        ScreeningError::Service(format!("Malformed prediction service response: {}", e))
    })
}

fn image_part(image: &SelectedImage) -> Part {
    let file_name = if image.file_name.trim().is_empty() {
        "upload".to_string()
    } else {
        image.file_name.clone()
    };
    let part = Part::bytes(image.bytes.clone()).file_name(file_name.clone());
    match part.mime_str(&image.content_type) {
        Ok(part) => part,
        Err(e) => {
            warn!(content_type = %image.content_type, error = %e, "Sending image without content type");
            Part::bytes(image.bytes.clone()).file_name(file_name)
        }
    }
}

#[async_trait]
impl Assessor for HttpAssessor {
    async fn assess_questionnaire(
        &self,
        submission: &QuestionnaireSubmission,
    ) -> Result<QuestionnaireAssessment> {
        info!(url = %self.endpoint(QUESTIONNAIRE_PATH), "Calling questionnaire service");

        let response = self
            .client
            .post(self.endpoint(QUESTIONNAIRE_PATH))
            .json(&QuestionnaireRequestBody::from(submission))
            .send()
            .await
            .map_err(|e| ScreeningError::Service(format!("Questionnaire service unreachable: {}", e)))?;

        let body: QuestionnaireResponseBody = decode_response(response).await?;
        body.into_assessment()
    }

    async fn assess_image(&self, image: &SelectedImage) -> Result<ImageAssessment> {
        info!(
            url = %self.endpoint(IMAGE_PATH),
            bytes = image.bytes.len(),
            "Calling image service"
        );

        let form = Form::new().part("image", image_part(image));
        let response = self
            .client
            .post(self.endpoint(IMAGE_PATH))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ScreeningError::Service(format!("Image service unreachable: {}", e)))?;

        let body: ImageResponseBody = decode_response(response).await?;
        body.into_assessment()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        http::{HeaderMap, StatusCode, header},
        routing::{get, post},
    };
    use screening_flow::{Answer, PatientInfo, PredictionLabel, QuestionId, RiskLevel, Sex};
    use serde_json::json;
    use tokio::net::TcpListener;

    async fn spawn_stub(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn submission() -> QuestionnaireSubmission {
        QuestionnaireSubmission {
            patient: PatientInfo {
                age: 24,
                sex: Sex::Male,
                born_with_jaundice: true,
                family_history_asd: false,
            },
            answers: QuestionId::ALL.iter().map(|id| (*id, Answer::No)).collect(),
        }
    }

    fn image() -> SelectedImage {
        SelectedImage {
            bytes: vec![0x89, b'P', b'N', b'G'],
            file_name: "face.png".to_string(),
            content_type: "image/png".to_string(),
            preview: None,
        }
    }

    #[tokio::test]
    async fn questionnaire_round_trip_against_stub() {
        let app = Router::new().route(
            QUESTIONNAIRE_PATH,
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["sex"], "male");
                assert_eq!(body["jaundice"], "yes");
                assert_eq!(body["responses"]["A7"], "no");
                Json(json!({
                    "source": "questionnaire",
                    "prediction": 1,
                    "confidence": 0.9994,
                    "total_score": 9,
                    "risk_level": "HIGH"
                }))
            }),
        );
        let assessor = HttpAssessor::new(spawn_stub(app).await, None).unwrap();

        let assessment = assessor.assess_questionnaire(&submission()).await.unwrap();

        assert_eq!(assessment.predicted_label, PredictionLabel::ElevatedRisk);
        assert_eq!(assessment.risk_level, RiskLevel::High);
        assert_eq!(assessment.total_score, 9);
    }

    #[tokio::test]
    async fn error_status_propagates_service_reason() {
        let app = Router::new().route(
            QUESTIONNAIRE_PATH,
            post(|| async {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "'responses'" })),
                )
            }),
        );
        let assessor = HttpAssessor::new(spawn_stub(app).await, None).unwrap();

        let err = assessor.assess_questionnaire(&submission()).await.unwrap_err();

        assert_eq!(err, ScreeningError::Service("'responses'".to_string()));
    }

    #[tokio::test]
    async fn error_status_without_body_reports_status() {
        let app = Router::new().route(QUESTIONNAIRE_PATH, post(|| async { StatusCode::BAD_GATEWAY }));
        let assessor = HttpAssessor::new(spawn_stub(app).await, None).unwrap();

        let err = assessor.assess_questionnaire(&submission()).await.unwrap_err();

        match err {
            ScreeningError::Service(reason) => assert!(reason.contains("502")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn image_is_sent_as_multipart() {
        let app = Router::new().route(
            IMAGE_PATH,
            post(|headers: HeaderMap| async move {
                let content_type = headers
                    .get(header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                assert!(content_type.starts_with("multipart/form-data"));
                Json(json!({
                    "source": "image",
                    "prediction": 1,
                    "confidence": 0.8841,
                    "heatmap_base64": "AQID",
                    "attention_regions": [{ "region": "eyes_region", "attention_score": 0.5 }],
                    "llm_explanation": "Focused on the eyes_region",
                    "facial_regions": { "primary": "eyes_region" }
                }))
            }),
        );
        let assessor = HttpAssessor::new(spawn_stub(app).await, None).unwrap();

        let assessment = assessor.assess_image(&image()).await.unwrap();

        assert_eq!(assessment.confidence, 0.8841);
        assert_eq!(assessment.heatmap_image, Some(vec![1, 2, 3]));
        assert_eq!(assessment.attention_regions, vec!["eyes_region"]);
        assert!(assessment.regional_scores.is_empty());
    }

    #[tokio::test]
    async fn error_field_in_success_response_is_failure() {
        let app = Router::new().route(
            IMAGE_PATH,
            post(|| async {
                Json(json!({
                    "source": "image",
                    "prediction": 0,
                    "confidence": 0.0,
                    "error": "cannot identify image file",
                    "facial_regions": {}
                }))
            }),
        );
        let assessor = HttpAssessor::new(spawn_stub(app).await, None).unwrap();

        let err = assessor.assess_image(&image()).await.unwrap_err();

        assert_eq!(err, ScreeningError::Service("cannot identify image file".to_string()));
    }

    #[tokio::test]
    async fn non_json_success_is_service_error() {
        let app = Router::new().route(QUESTIONNAIRE_PATH, post(|| async { "<html>oops</html>" }));
        let assessor = HttpAssessor::new(spawn_stub(app).await, None).unwrap();

        let err = assessor.assess_questionnaire(&submission()).await.unwrap_err();

        assert!(matches!(err, ScreeningError::Service(_)));
    }

    #[tokio::test]
    async fn unreachable_backend_is_service_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let assessor = HttpAssessor::new(format!("http://{}", addr), Some(Duration::from_secs(2))).unwrap();

        let err = assessor.assess_image(&image()).await.unwrap_err();

        match err {
            ScreeningError::Service(reason) => assert!(reason.starts_with("Image service unreachable")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn health_is_passed_through() {
        let app = Router::new().route(
            HEALTH_PATH,
            get(|| async { Json(json!({ "status": "healthy", "models_loaded": { "ml_model": true } })) }),
        );
        let assessor = HttpAssessor::new(spawn_stub(app).await, None).unwrap();

        let health = assessor.backend_health().await.unwrap();

        assert_eq!(health["status"], "healthy");
    }
}
