//! HTTP endpoints
//!
//! The engine boundary: `/engine/*` for the dialogue core, `/analytics/*`
//! for batch jobs, plus health, readiness and metrics.

use std::time::{Duration, Instant};

use axum::{
    extract::{Json, Path, State},
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use callguard_analytics::{AnalyticsError, CallRecord, Priority, QueuedTask, TaskKind};
use callguard_core::{phone_fingerprint, AiResponse, IntentResult, UserProfile};
use callguard_engine::{EngineError, TurnRequest};

use crate::metrics::metrics_handler;
use crate::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors_layer = build_cors_layer(
        &state.settings.server.cors_origins,
        state.settings.server.cors_enabled,
    );

    Router::new()
        // Dialogue core
        .route("/engine/process-conversation", post(process_conversation))
        .route("/engine/classify-intent", post(classify_intent))
        .route("/engine/check-termination", post(check_termination))
        .route("/engine/learn", post(learn))
        .route("/engine/batch-learn", post(batch_learn))
        .route("/engine/performance-metrics", get(performance_metrics))
        .route(
            "/engine/conversation-summary/:call_id",
            get(conversation_summary),
        )
        .route("/engine/export-learning-model", post(export_learning_model))
        .route("/engine/import-learning-model", post(import_learning_model))
        // Batch analytics
        .route("/analytics/batch", post(submit_batch))
        .route("/analytics/batch/:batch_id", get(batch_status))
        // Health
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        // Prometheus metrics
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(
            state.settings.server.request_timeout_secs,
        )))
        .layer(ConcurrencyLimitLayer::new(
            state.settings.server.concurrency_limit,
        ))
        .layer(CompressionLayer::new())
        .layer(cors_layer)
        .with_state(state)
}

/// Build the CORS layer from configured origins; permissive when disabled
/// (development only).
fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("CORS disabled - allowing all origins (NOT FOR PRODUCTION)");
        return CorsLayer::permissive();
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "invalid CORS origin");
                None
            }
        })
        .collect();

    if parsed.is_empty() {
        tracing::info!("no CORS origins configured, defaulting to localhost:3000");
        return CorsLayer::new()
            .allow_origin("http://localhost:3000".parse::<HeaderValue>().unwrap())
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any);
    }

    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

/// Boundary error with the §7 status mapping.
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let status = match &err {
            EngineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            EngineError::StateClosed(_) => StatusCode::CONFLICT,
            EngineError::UnknownCall(_) => StatusCode::NOT_FOUND,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<AnalyticsError> for ApiError {
    fn from(err: AnalyticsError) -> Self {
        let status = match &err {
            AnalyticsError::QueueFull(_) => StatusCode::TOO_MANY_REQUESTS,
            AnalyticsError::MissingCall(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

// ---------------------------------------------------------------------------
// Dialogue core handlers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ProcessConversationRequest {
    input_text: String,
    call_id: String,
    user_id: String,
    #[serde(default)]
    caller_phone: Option<String>,
    #[serde(default)]
    user_profile: Option<UserProfile>,
    #[serde(default)]
    context: Option<serde_json::Value>,
}

async fn process_conversation(
    State(state): State<AppState>,
    Json(request): Json<ProcessConversationRequest>,
) -> Result<Json<callguard_engine::TurnOutcome>, ApiError> {
    // The raw number is hashed at the boundary and dropped.
    let caller_fingerprint = request
        .caller_phone
        .as_deref()
        .map(|phone| phone_fingerprint(phone, &state.settings.store.fingerprint_salt));

    // Prior knowledge of this caller, written back by the post-call
    // pipeline.
    let spam_profile = match caller_fingerprint.as_deref() {
        Some(fingerprint) => state
            .store
            .get(&callguard_store::keys::spam_profile(fingerprint))
            .await
            .ok()
            .flatten()
            .and_then(|raw| serde_json::from_str(&raw).ok()),
        None => None,
    };

    let _ = request.context;
    let outcome = state
        .manager
        .process_turn(TurnRequest {
            call_id: request.call_id,
            user_id: request.user_id,
            input_text: request.input_text,
            caller_fingerprint,
            user_profile: request.user_profile,
            spam_profile,
        })
        .await?;

    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct ClassifyIntentRequest {
    transcript: String,
    #[serde(default)]
    call_id: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct ClassifyIntentResponse {
    #[serde(flatten)]
    result: IntentResult,
    processing_time_ms: u64,
}

async fn classify_intent(
    State(state): State<AppState>,
    Json(request): Json<ClassifyIntentRequest>,
) -> Result<Json<ClassifyIntentResponse>, ApiError> {
    let start = Instant::now();

    let context = match request.call_id.as_deref() {
        Some(call_id) => state.manager.tracker().snapshot(call_id).await.ok(),
        None => None,
    };
    let _ = request.user_id;

    let result = state
        .manager
        .classifier()
        .classify(&request.transcript, context.as_ref(), None)
        .await;

    Ok(Json(ClassifyIntentResponse {
        result,
        processing_time_ms: start.elapsed().as_millis() as u64,
    }))
}

#[derive(Debug, Deserialize)]
struct CheckTerminationRequest {
    call_id: String,
    #[serde(default)]
    current_response: Option<AiResponse>,
}

async fn check_termination(
    State(state): State<AppState>,
    Json(request): Json<CheckTerminationRequest>,
) -> Result<Json<callguard_engine::TerminationDecision>, ApiError> {
    let snapshot = state.manager.tracker().snapshot(&request.call_id).await?;

    // Without an explicit response, reconstruct one from the last AI turn.
    let response = request.current_response.unwrap_or_else(|| {
        let last_ai = snapshot
            .turns
            .iter()
            .rev()
            .find(|t| t.speaker == callguard_core::Speaker::Ai);
        AiResponse {
            text: last_ai.map(|t| t.text.clone()).unwrap_or_default(),
            intent: snapshot.intent_history.last().copied().unwrap_or_default(),
            confidence: last_ai.and_then(|t| t.emotion_confidence).unwrap_or(0.5),
            emotional_tone: last_ai.and_then(|t| t.emotion).unwrap_or_default(),
            strategy: last_ai
                .and_then(|t| t.strategy)
                .unwrap_or(callguard_core::ResponseStrategy::GentleDecline),
            should_terminate: false,
            next_stage: snapshot.stage,
            generation_time_ms: 0,
            cached: false,
            context_hash: String::new(),
        }
    });

    let decision = state.manager.decider().decide(&snapshot, &response);
    Ok(Json(decision))
}

#[derive(Debug, Deserialize)]
struct LearnRequest {
    call_record: CallRecord,
}

async fn learn(
    State(state): State<AppState>,
    Json(request): Json<LearnRequest>,
) -> Result<StatusCode, ApiError> {
    let call_id = request.call_record.call_id().to_string();

    // Learning is asynchronous: persist the record, then queue the full
    // analysis which feeds the learning system.
    state
        .repository
        .save_call_record(request.call_record)
        .await?;

    let task = QueuedTask::new(call_id.clone(), TaskKind::FullAnalysis, Priority::Normal);
    if let Err(e) = state.queue.enqueue(&task).await {
        // The record is saved; analysis can be re-queued later.
        tracing::warn!(call_id = %call_id, error = %e, "learn enqueue failed");
    }

    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize)]
struct BatchLearnRequest {
    call_records: Vec<CallRecord>,
}

async fn batch_learn(
    State(state): State<AppState>,
    Json(request): Json<BatchLearnRequest>,
) -> Result<Json<callguard_analytics::BatchLearningReport>, ApiError> {
    let report = state.learning.batch_learn(&request.call_records);

    // Applied insights feed termination threshold adaptation.
    let decider_stats = state.manager.decider().stats();
    state.manager.decider().adapt(
        state.learning.overall_success_rate(),
        decider_stats.termination_rate,
    );

    Ok(Json(report))
}

async fn performance_metrics(State(state): State<AppState>) -> Json<serde_json::Value> {
    let decider = state.manager.decider().stats();
    Json(serde_json::json!({
        "active_calls": state.manager.tracker().active_count(),
        "intent_accuracy": state.manager.classifier().accuracy(),
        "termination": decider,
        "learning": state.learning.metrics(),
        "service_status": "healthy",
    }))
}

async fn conversation_summary(
    State(state): State<AppState>,
    Path(call_id): Path<String>,
) -> Result<Json<callguard_core::CallSummary>, ApiError> {
    let summary = state.manager.conversation_summary(&call_id).await?;
    Ok(Json(summary))
}

async fn export_learning_model(State(state): State<AppState>) -> Result<Response, ApiError> {
    let raw = state
        .learning
        .export_model()
        .map_err(|e| ApiError::internal(e.to_string()))?;
    let value: serde_json::Value =
        serde_json::from_slice(&raw).map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(value).into_response())
}

async fn import_learning_model(
    State(state): State<AppState>,
    Json(model): Json<serde_json::Value>,
) -> Result<StatusCode, ApiError> {
    let raw = serde_json::to_vec(&model).map_err(|e| ApiError::internal(e.to_string()))?;
    state
        .learning
        .import_model(&raw)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Batch analytics handlers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SubmitBatchRequest {
    user_id: String,
    call_ids: Vec<String>,
    #[serde(default)]
    priority: Priority,
    #[serde(default)]
    callback_url: Option<String>,
}

async fn submit_batch(
    State(state): State<AppState>,
    Json(request): Json<SubmitBatchRequest>,
) -> Result<(StatusCode, Json<callguard_analytics::BatchJob>), ApiError> {
    let job = state
        .batch
        .submit(
            &request.user_id,
            request.call_ids,
            request.priority,
            request.callback_url,
        )
        .await?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}

async fn batch_status(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> Result<Json<callguard_analytics::BatchStatus>, ApiError> {
    match state.batch.status(&batch_id).await? {
        Some(status) => Ok(Json(status)),
        None => Err(ApiError::not_found(format!("batch {} not found", batch_id))),
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn readiness_check(State(state): State<AppState>) -> Response {
    match state.store.ping().await {
        Ok(()) => Json(serde_json::json!({ "ready": true })).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "ready": false, "error": e.to_string() })),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;
    use tower::ServiceExt;

    use callguard_analytics::InMemoryRepository;
    use callguard_config::Settings;
    use callguard_store::MemoryStore;

    fn test_router() -> Router {
        let mut settings = Settings::default();
        settings.llm.enabled = false;
        let state = AppState::build(
            settings,
            Arc::new(MemoryStore::new()),
            Arc::new(InMemoryRepository::new()),
        )
        .unwrap();
        create_router(state)
    }

    async fn post_json(
        router: Router,
        uri: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[test]
    fn test_error_status_mapping() {
        let err: ApiError = EngineError::InvalidInput("empty".into()).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err: ApiError = EngineError::StateClosed("c-1".into()).into();
        assert_eq!(err.status, StatusCode::CONFLICT);

        let err: ApiError = EngineError::UnknownCall("c-ghost".into()).into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let err: ApiError = AnalyticsError::QueueFull("bound".into()).into();
        assert_eq!(err.status, StatusCode::TOO_MANY_REQUESTS);

        let err: ApiError = AnalyticsError::MissingCall("c-ghost".into()).into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let err: ApiError = AnalyticsError::Task("handler blew up".into()).into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_process_conversation_route() {
        let (status, body) = post_json(
            test_router(),
            "/engine/process-conversation",
            json!({
                "input_text": "您好，我是银行的，有贷款需求吗？",
                "call_id": "http-call-1",
                "user_id": "user-1",
                "caller_phone": "+86 138 0013 8000",
            }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["intent"], "loan_offer");
        assert_eq!(body["next_state"], "handling_loan");
        assert_eq!(body["turn_count"], 1);
        assert_eq!(body["should_terminate"], false);
        assert!(!body["response"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_process_conversation_missing_call_id() {
        let (status, body) = post_json(
            test_router(),
            "/engine/process-conversation",
            json!({
                "input_text": "你好",
                "call_id": "  ",
                "user_id": "user-1",
            }),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_unknown_call_summary_is_404() {
        let router = test_router();
        let response = router
            .oneshot(
                Request::builder()
                    .method(Method::GET)
                    .uri("/engine/conversation-summary/ghost")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_classify_intent_route() {
        let (status, body) = post_json(
            test_router(),
            "/engine/classify-intent",
            json!({ "transcript": "股票基金投资，收益回报很高" }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["intent"], "investment_pitch");
        assert!(body["processing_time_ms"].is_number());
    }

    #[tokio::test]
    async fn test_health_and_ready() {
        let router = test_router();
        for uri in ["/health", "/ready"] {
            let response = router
                .clone()
                .oneshot(
                    Request::builder()
                        .method(Method::GET)
                        .uri(uri)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{} not ok", uri);
        }
    }
}
