//! REST API server for the BAS assistant
//!
//! Thin transport over the core: every handler converts JSON to core calls
//! and back. Sessions live in memory for the life of the process.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::collaborators::Collaborators;
use crate::config::AppConfig;
use crate::conversational::ConversationController;
use crate::error::BasError;
use crate::memory::SessionStore;
use crate::models::{InvoiceDocument, TurnResponse, Verbosity};
use crate::pipeline::{InvoicePipeline, PipelineOutcome};

/// =============================
/// Request Models
/// =============================

/// Either invoice text or an already extracted field map.
#[derive(Debug, Deserialize)]
pub struct InvoiceRequest {
    pub text: Option<String>,
    pub fields: Option<Value>,
    #[serde(default)]
    pub verbosity: Verbosity,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub invoices: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: Option<String>,
    #[serde(default)]
    pub message: String,
    pub invoice_text: Option<String>,
    #[serde(default)]
    pub invoice_texts: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatReply {
    #[serde(flatten)]
    pub turn: TurnResponse,
    pub session_id: Uuid,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Failed result that still carries its data.
    pub fn failure<T: Serialize>(message: String, data: T) -> Self {
        Self {
            success: false,
            data: serde_json::to_value(data).ok(),
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<ConversationController>,
    pub collaborators: Collaborators,
    pub sessions: SessionStore,
}

impl AppState {
    pub fn new(config: &AppConfig, collaborators: Collaborators) -> Self {
        let pipeline = Arc::new(InvoicePipeline::from_config(
            config,
            collaborators.explainer.clone(),
        ));

        Self {
            controller: Arc::new(ConversationController::new(pipeline, &collaborators)),
            collaborators,
            sessions: SessionStore::with_idle_ttl(config.session_idle_ttl),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config, Collaborators::from_config(config))
    }
}

/// =============================
/// Helpers
/// =============================

fn stable_uuid_from_string(input: &str) -> Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    Uuid::from_bytes(bytes)
}

/// Parse a UUID, hash any other non-blank string, mint a fresh id otherwise.
fn session_uuid(value: Option<&str>) -> Uuid {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Uuid::parse_str(v).unwrap_or_else(|_| stable_uuid_from_string(v)),
        _ => Uuid::new_v4(),
    }
}

/// Rounded copy of an outcome for display.
fn presented(outcome: PipelineOutcome) -> PipelineOutcome {
    match outcome {
        PipelineOutcome::Done(mut report) => {
            report.bas_summary = report.bas_summary.rounded();
            PipelineOutcome::Done(report)
        }
        failed => failed,
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Invoice Endpoints
/// =============================

async fn process_invoice(
    State(state): State<AppState>,
    Json(req): Json<InvoiceRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let pipeline = state.controller.pipeline();

    let outcome = match (req.fields, req.text) {
        (Some(fields), _) => pipeline.run(&fields, req.verbosity).await,
        (None, Some(text)) => {
            pipeline
                .process_text(&text, state.collaborators.fields.as_ref(), req.verbosity)
                .await
        }
        (None, None) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::error(
                    BasError::InvalidRequest("request needs either `text` or `fields`".into()).to_string(),
                )),
            );
        }
    };

    match presented(outcome) {
        PipelineOutcome::Failed(failure) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ApiResponse::failure(failure.error.clone(), failure)),
        ),
        done => (StatusCode::OK, Json(ApiResponse::success(done))),
    }
}

async fn process_batch(
    State(state): State<AppState>,
    Json(req): Json<BatchRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    info!(count = req.invoices.len(), "Received batch request");

    let documents = req
        .invoices
        .into_iter()
        .map(|text| InvoiceDocument::new(None, text))
        .collect();
    let report = state.controller.batch().process(documents).await;

    (StatusCode::OK, Json(ApiResponse::success(report)))
}

/// =============================
/// Chat Endpoints
/// =============================

async fn chat_handler(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let ChatRequest {
        session_id,
        message,
        invoice_text,
        invoice_texts,
    } = req;

    let documents: Vec<InvoiceDocument> = invoice_text
        .into_iter()
        .chain(invoice_texts)
        .map(|text| InvoiceDocument::new(None, text))
        .collect();

    if message.trim().is_empty() && documents.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(
                BasError::InvalidRequest("request needs a `message` or invoice text".into()).to_string(),
            )),
        );
    }

    let session_id = session_uuid(session_id.as_deref());
    let session = state.sessions.get_or_create(session_id).await;

    // Held for the whole turn: one in-flight turn per session.
    let mut conversation = session.lock().await;
    let turn = state
        .controller
        .handle_turn(&mut conversation, &message, documents)
        .await;
    drop(conversation);

    info!(%session_id, mode = ?turn.mode, "Chat turn complete");

    (
        StatusCode::OK,
        Json(ApiResponse::success(ChatReply { turn, session_id })),
    )
}

async fn end_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    let session_id = session_uuid(Some(&session_id));
    if state.sessions.end(session_id).await {
        (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({ "session_id": session_id }))),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(format!("Unknown session {}", session_id))),
        )
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/invoice", post(process_invoice))
        .route("/api/batch", post(process_batch))
        .route("/api/chat", post(chat_handler))
        .route("/api/session/:session_id", delete(end_session))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(state: AppState, port: u16) -> crate::Result<()> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> Router {
        create_router(AppState::new(&AppConfig::default(), Collaborators::offline()))
    }

    async fn post_json(router: Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    const PURCHASE: &str = "ABC Wholesale Supplies\nTAX INVOICE\nABN: 51 824 753 556\nDate: 14/08/2025\n\
                            Subtotal: $100.00\nGST: $10.00\nTotal: $110.00";

    #[test]
    fn test_stable_uuid_is_deterministic() {
        assert_eq!(stable_uuid_from_string("cafe"), stable_uuid_from_string("cafe"));
        assert_ne!(stable_uuid_from_string("cafe"), stable_uuid_from_string("bakery"));
        assert_eq!(stable_uuid_from_string("cafe").get_version_num(), 4);

        let id = Uuid::new_v4();
        assert_eq!(session_uuid(Some(&id.to_string())), id);
    }

    #[tokio::test]
    async fn test_anonymous_chats_do_not_accumulate_sessions() {
        let config = AppConfig {
            session_idle_ttl: std::time::Duration::ZERO,
            ..AppConfig::default()
        };
        let state = AppState::new(&config, Collaborators::offline());
        let router = create_router(state.clone());

        for _ in 0..50 {
            let (status, _) =
                post_json(router.clone(), "/api/chat", serde_json::json!({ "message": "hi" })).await;
            assert_eq!(status, StatusCode::OK);
        }

        assert_eq!(state.sessions.len().await, 1);
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_invoice_from_fields() {
        let (status, body) = post_json(
            app(),
            "/api/invoice",
            serde_json::json!({
                "fields": { "supplier": "ABC Wholesale Supplies", "gst": "10", "abn": "51 824 753 556" }
            }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "done");
        assert_eq!(body["data"]["classification"], "PURCHASE");
        assert_eq!(body["data"]["bas_summary"]["gst_paid"], "10.00");
        assert_eq!(body["data"]["invoice_data"]["abn_valid"], true);
    }

    #[tokio::test]
    async fn test_malformed_fields_are_unprocessable() {
        let (status, body) =
            post_json(app(), "/api/invoice", serde_json::json!({ "fields": [1, 2, 3] })).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["success"], false);
        assert_eq!(body["data"]["bas_summary"]["net_liability"], "0");
    }

    #[tokio::test]
    async fn test_empty_invoice_request_is_bad_request() {
        let (status, _) = post_json(app(), "/api/invoice", serde_json::json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_batch() {
        let (status, body) = post_json(
            app(),
            "/api/batch",
            serde_json::json!({ "invoices": [PURCHASE, ""] }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["aggregate_summary"]["invoice_count"], 2);
        assert_eq!(body["data"]["aggregate_summary"]["gst_paid"], "10.00");
        assert!(body["data"]["per_invoice_results"][1]["error"].is_string());
    }

    #[tokio::test]
    async fn test_chat_session_remembers_report() {
        let router = app();

        let (_, first) = post_json(
            router.clone(),
            "/api/chat",
            serde_json::json!({ "session_id": "luna-cafe", "message": "", "invoice_text": PURCHASE }),
        )
        .await;
        assert_eq!(first["data"]["mode"], "invoice");

        let (_, second) = post_json(
            router,
            "/api/chat",
            serde_json::json!({ "session_id": "luna-cafe", "message": "do I get a refund?" }),
        )
        .await;

        assert_eq!(second["data"]["mode"], "chat");
        assert_eq!(second["data"]["session_id"], first["data"]["session_id"]);
        assert!(second["data"]["response"]
            .as_str()
            .unwrap()
            .contains("refund of $10.00"));
    }
}
