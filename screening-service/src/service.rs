use axum::{
    Router,
    extract::{Path, Request, State},
    http::{HeaderValue, StatusCode},
    middleware::{Next, from_fn},
    response::{Json, Response},
    routing::{get, post, put},
};
use screening_flow::{
    InMemorySessionStorage, PatientInfo, QuestionId, ScreeningError, ScreeningRunner,
    ScreeningSession,
};
use serde_json::{Value, json};
use std::{sync::Arc, time::Duration};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Instrument, error, info, warn};
use uuid::Uuid;

use crate::{
    client::HttpAssessor,
    config::ServiceConfig,
    models::{AnswerRequest, ImageSelectionRequest, QuestionResponse, SessionResponse, StepRequest},
};

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;
type ApiError = (StatusCode, Json<Value>);

fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn screening_error(err: ScreeningError, session_id: &str) -> ApiError {
    let (status, kind) = match &err {
        ScreeningError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
        ScreeningError::InvalidTransition(_) => (StatusCode::CONFLICT, "invalid_transition"),
        ScreeningError::RequestInFlight => (StatusCode::CONFLICT, "request_in_flight"),
        ScreeningError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "session_not_found"),
        ScreeningError::Service(_) => (StatusCode::BAD_GATEWAY, "service"),
        ScreeningError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage"),
    };
    if status.is_server_error() {
        error!(session_id, error = %err, "Screening request failed");
    }
    (
        status,
        Json(json!({
            "error": err.operator_message(),
            "kind": kind,
            "session_id": session_id
        })),
    )
}

#[derive(Clone)]
pub struct AppState {
    pub runner: ScreeningRunner,
    /// Probed by the health endpoint when present
    pub backend: Option<Arc<HttpAssessor>>,
}

pub fn create_app(config: &ServiceConfig) -> anyhow::Result<Router> {
    let assessor = Arc::new(HttpAssessor::new(
        config.prediction_api_url.clone(),
        config.prediction_timeout,
    )?);
    let runner = ScreeningRunner::new(Arc::new(InMemorySessionStorage::new()), assessor.clone());
    if let Some(ttl) = config.session_ttl {
        spawn_session_sweeper(runner.clone(), ttl);
    }

    Ok(build_router(AppState {
        runner,
        backend: Some(assessor),
    }))
}

/// Periodically drops sessions older than `ttl`. Must be called inside a tokio runtime.
pub fn spawn_session_sweeper(runner: ScreeningRunner, ttl: Duration) -> tokio::task::JoinHandle<()> {
    let period = (ttl / 10).clamp(Duration::from_secs(1), Duration::from_secs(300));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            if let Err(e) = runner.purge_expired(ttl).await {
                warn!(error = %e, "Session expiry sweep failed");
            }
        }
    })
}

/// Adds a correlation ID header and a request span
async fn correlation_id_middleware(mut request: Request, next: Next) -> Response {
    let correlation_id = Uuid::new_v4().to_string();
    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        request.headers_mut().insert("x-correlation-id", value);
    }

    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);
    next.run(request).instrument(span).await
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/screening/questions", get(list_questions))
        .route("/screening/sessions", post(create_session))
        .route(
            "/screening/sessions/{session_id}",
            get(get_session).delete(delete_session),
        )
        .route("/screening/sessions/{session_id}/patient", post(submit_patient_info))
        .route(
            "/screening/sessions/{session_id}/answers/{question_id}",
            put(set_answer),
        )
        .route("/screening/sessions/{session_id}/image", put(select_image))
        .route(
            "/screening/sessions/{session_id}/questionnaire",
            post(request_questionnaire_assessment),
        )
        .route(
            "/screening/sessions/{session_id}/image-analysis",
            post(request_image_assessment),
        )
        .route("/screening/sessions/{session_id}/skip-image", post(skip_image_analysis))
        .route("/screening/sessions/{session_id}/step", post(return_to_step))
        .route("/screening/sessions/{session_id}/reset", post(reset_session))
        .layer(from_fn(correlation_id_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "service": "Developmental Screening Service",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Four-step screening workflow combining questionnaire and facial-image assessments",
        "endpoints": {
            "GET /screening/questions": "List the questionnaire items",
            "POST /screening/sessions": "Start a new screening session",
            "GET /screening/sessions/{session_id}": "Get session state and results",
            "POST /screening/sessions/{session_id}/patient": "Submit patient information",
            "PUT /screening/sessions/{session_id}/answers/{question_id}": "Answer one question",
            "PUT /screening/sessions/{session_id}/image": "Select or clear the facial image",
            "POST /screening/sessions/{session_id}/questionnaire": "Request the questionnaire assessment",
            "POST /screening/sessions/{session_id}/image-analysis": "Request the image assessment",
            "POST /screening/sessions/{session_id}/skip-image": "Finish with the questionnaire only",
            "POST /screening/sessions/{session_id}/step": "Return to an earlier step",
            "POST /screening/sessions/{session_id}/reset": "Discard the session's data",
            "GET /health": "Health check"
        }
    }))
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let backend = match &state.backend {
        Some(backend) => match backend.backend_health().await {
            Ok(report) => json!({ "reachable": true, "url": backend.base_url(), "report": report }),
            Err(e) => json!({ "reachable": false, "url": backend.base_url(), "error": e.operator_message() }),
        },
        None => json!({ "reachable": false, "error": "No prediction backend configured" }),
    };

    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "prediction_backend": backend
    }))
}

async fn list_questions() -> Json<Vec<QuestionResponse>> {
    Json(QuestionId::ALL.into_iter().map(QuestionResponse::from).collect())
}

async fn create_session(State(state): State<AppState>) -> ApiResult<SessionResponse> {
    let session = state
        .runner
        .create_session()
        .await
        .map_err(|e| screening_error(e, ""))?;
    info!(session_id = %session.id(), "Screening session started");
    Ok(Json(session.into()))
}

async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<SessionResponse> {
    let session = state
        .runner
        .load(&session_id)
        .await
        .map_err(|e| screening_error(e, &session_id))?;
    Ok(Json(session.into()))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .runner
        .delete_session(&session_id)
        .await
        .map_err(|e| screening_error(e, &session_id))?;
    info!(session_id = %session_id, "Screening session deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Runs one synchronous transition and returns the updated session
async fn apply<F>(state: &AppState, session_id: &str, transition: F) -> ApiResult<SessionResponse>
where
    F: FnOnce(&mut ScreeningSession) -> screening_flow::Result<()>,
{
    let (session, ()) = state
        .runner
        .update(session_id, transition)
        .await
        .map_err(|e| screening_error(e, session_id))?;
    Ok(Json(session.into()))
}

async fn submit_patient_info(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(info): Json<PatientInfo>,
) -> ApiResult<SessionResponse> {
    apply(&state, &session_id, |s| s.submit_patient_info(info)).await
}

async fn set_answer(
    State(state): State<AppState>,
    Path((session_id, question_id)): Path<(String, String)>,
    Json(request): Json<AnswerRequest>,
) -> ApiResult<SessionResponse> {
    let question: QuestionId = question_id
        .parse()
        .map_err(|e: String| bad_request_error(&e))?;
    apply(&state, &session_id, |s| s.set_answer(question, request.answer)).await
}

async fn select_image(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<ImageSelectionRequest>,
) -> ApiResult<SessionResponse> {
    apply(&state, &session_id, |s| s.select_image(request.image)).await
}

async fn request_questionnaire_assessment(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<SessionResponse> {
    info!(session_id = %session_id, "Questionnaire assessment requested");
    let session = state
        .runner
        .request_questionnaire_assessment(&session_id)
        .await
        .map_err(|e| screening_error(e, &session_id))?;
    Ok(Json(session.into()))
}

async fn request_image_assessment(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<SessionResponse> {
    info!(session_id = %session_id, "Image assessment requested");
    let session = state
        .runner
        .request_image_assessment(&session_id)
        .await
        .map_err(|e| screening_error(e, &session_id))?;
    Ok(Json(session.into()))
}

async fn skip_image_analysis(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<SessionResponse> {
    apply(&state, &session_id, |s| s.skip_image_analysis()).await
}

async fn return_to_step(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<StepRequest>,
) -> ApiResult<SessionResponse> {
    apply(&state, &session_id, |s| s.return_to_step(request.step)).await
}

async fn reset_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<SessionResponse> {
    apply(&state, &session_id, |s| {
        s.reset_session();
        Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::{body::Body, http::Request as HttpRequest};
    use screening_flow::{
        Assessor, ImageAssessment, PredictionLabel, QuestionnaireAssessment,
        QuestionnaireSubmission, Result as FlowResult, RiskLevel, SelectedImage,
    };
    use tower::ServiceExt;

    /// Fixed answers standing in for the prediction backend
    struct FixedAssessor;

    #[async_trait]
    impl Assessor for FixedAssessor {
        async fn assess_questionnaire(
            &self,
            _submission: &QuestionnaireSubmission,
        ) -> FlowResult<QuestionnaireAssessment> {
            Ok(QuestionnaireAssessment {
                predicted_label: PredictionLabel::LowRisk,
                confidence: 0.0004,
                risk_level: RiskLevel::Low,
                total_score: 1,
                risk_level_derived: false,
            })
        }

        async fn assess_image(&self, _image: &SelectedImage) -> FlowResult<ImageAssessment> {
            Err(ScreeningError::Service("CNN model not available".to_string()))
        }
    }

    fn test_app() -> Router {
        let runner = ScreeningRunner::new(
            Arc::new(InMemorySessionStorage::new()),
            Arc::new(FixedAssessor),
        );
        build_router(AppState {
            runner,
            backend: None,
        })
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = HttpRequest::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn started_session(app: &Router) -> String {
        let (status, body) = send(app, "POST", "/screening/sessions", None).await;
        assert_eq!(status, StatusCode::OK);
        body["session_id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn lists_ten_questions() {
        let app = test_app();
        let (status, body) = send(&app, "GET", "/screening/questions", None).await;

        assert_eq!(status, StatusCode::OK);
        let questions = body.as_array().unwrap();
        assert_eq!(questions.len(), 10);
        assert_eq!(questions[9]["id"], "Q10");
        assert_eq!(questions[9]["scoring"], "direct");
    }

    #[tokio::test]
    async fn wizard_flow_over_http() {
        let app = test_app();
        let id = started_session(&app).await;
        let base = format!("/screening/sessions/{}", id);

        let (status, body) = send(
            &app,
            "POST",
            &format!("{}/patient", base),
            Some(json!({ "age": 30, "sex": "female", "bornWithJaundice": false, "familyHistoryAsd": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["current_step"], "questionnaire");

        for n in 1..=10 {
            let (status, _) = send(
                &app,
                "PUT",
                &format!("{}/answers/Q{}", base, n),
                Some(json!({ "answer": "yes" })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, body) = send(&app, "POST", &format!("{}/questionnaire", base), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["current_step"], "imageAnalysis");

        let (status, body) = send(&app, "POST", &format!("{}/skip-image", base), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "completed");
        assert_eq!(body["session"]["currentStep"]["verdict"]["riskLevel"], "LOW");
        assert_eq!(body["session"]["currentStep"]["verdict"]["imageContribution"], 0.0);
    }

    #[tokio::test]
    async fn invalid_age_is_bad_request_and_recorded() {
        let app = test_app();
        let id = started_session(&app).await;

        let (status, body) = send(
            &app,
            "POST",
            &format!("/screening/sessions/{}/patient", id),
            Some(json!({ "age": 0, "sex": "male", "bornWithJaundice": false, "familyHistoryAsd": false })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "validation");

        let (_, body) = send(&app, "GET", &format!("/screening/sessions/{}", id), None).await;
        assert_eq!(body["current_step"], "patientInfo");
        assert!(body["session"]["lastError"].is_string());
    }

    #[tokio::test]
    async fn image_service_failure_is_bad_gateway() {
        let app = test_app();
        let id = started_session(&app).await;
        let base = format!("/screening/sessions/{}", id);
        send(
            &app,
            "POST",
            &format!("{}/patient", base),
            Some(json!({ "age": 40, "sex": "male", "bornWithJaundice": true, "familyHistoryAsd": false })),
        )
        .await;
        for n in 1..=10 {
            send(&app, "PUT", &format!("{}/answers/A{}", base, n), Some(json!({ "answer": "no" }))).await;
        }
        send(&app, "POST", &format!("{}/questionnaire", base), None).await;
        let (status, _) = send(
            &app,
            "PUT",
            &format!("{}/image", base),
            Some(json!({ "image": { "bytes": "AQID", "fileName": "face.png", "contentType": "image/png" } })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, "POST", &format!("{}/image-analysis", base), None).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "CNN model not available");

        let (_, body) = send(&app, "GET", &base, None).await;
        assert_eq!(body["current_step"], "imageAnalysis");
        assert_eq!(body["session"]["lastError"], "CNN model not available");
        assert_eq!(body["waiting_for_input"], true);
    }

    #[tokio::test]
    async fn unknown_question_and_session_are_rejected() {
        let app = test_app();
        let id = started_session(&app).await;

        let (status, _) = send(
            &app,
            "PUT",
            &format!("/screening/sessions/{}/answers/Q11", id),
            Some(json!({ "answer": "yes" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&app, "GET", "/screening/sessions/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "session_not_found");
    }

    #[tokio::test]
    async fn reset_and_delete() {
        let app = test_app();
        let id = started_session(&app).await;
        let base = format!("/screening/sessions/{}", id);
        send(
            &app,
            "POST",
            &format!("{}/patient", base),
            Some(json!({ "age": 18, "sex": "female", "bornWithJaundice": false, "familyHistoryAsd": false })),
        )
        .await;

        let (status, body) = send(&app, "POST", &format!("{}/reset", base), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["current_step"], "patientInfo");
        assert!(body["session"]["patientInfo"].is_null());

        let (status, _) = send(&app, "DELETE", &base, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, "GET", &base, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_without_backend() {
        let app = test_app();
        let (status, body) = send(&app, "GET", "/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["prediction_backend"]["reachable"], false);
    }

    #[tokio::test]
    async fn sweeper_drops_expired_sessions() {
        let runner = ScreeningRunner::new(
            Arc::new(InMemorySessionStorage::new()),
            Arc::new(FixedAssessor),
        );
        let app = build_router(AppState {
            runner: runner.clone(),
            backend: None,
        });
        let id = started_session(&app).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let sweeper = spawn_session_sweeper(runner.clone(), Duration::from_millis(1));
        let mut status = StatusCode::OK;
        for _ in 0..100 {
            status = send(&app, "GET", &format!("/screening/sessions/{}", id), None).await.0;
            if status == StatusCode::NOT_FOUND {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        sweeper.abort();

        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
