//! Medq HTTP REST API
//!
//! Axum-based HTTP server over the query lifecycle: submission, triage,
//! suggestion generation, doctor review and admin housekeeping.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to an
//! inner function returning `(StatusCode, serde_json::Value)`. The inner
//! functions are directly testable without axum dispatch machinery.
//!
//! Endpoints:
//! - GET    /                           service banner
//! - GET    /health                     health check with storage status
//! - GET    /version                    server version info
//! - POST   /api/query                  submit a query
//! - GET    /api/query                  list queries (filters in the query string)
//! - GET    /api/query/:id              fetch one query
//! - PATCH  /api/query/:id/status       forward-only status change
//! - POST   /api/query/:id/documents    attach extracted document text
//! - GET    /api/query/:id/documents    list attached documents
//! - POST   /api/query/:id/suggestion   generate (or return) the suggestion
//! - GET    /api/query/:id/suggestion   fetch the stored suggestion
//! - POST   /api/triage/:id             classify and move to awaiting review
//! - PATCH  /api/triage/:id/priority    manual priority override
//! - POST   /api/review/:id             submit a doctor review
//! - GET    /api/review                 list reviews
//! - GET    /api/review/:id             fetch the review of a query
//! - DELETE /api/admin/awaiting         purge queries awaiting review

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Query as UrlQuery, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use medq_core::models::{QueryFilter, QueryPriority, QueryStatus, ReviewFilter};
use medq_core::{
    LlmBackend, MedqConfig, MedqError, QueryService, ReviewGate, ReviewInput, Store,
    SuggestionGenerator,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub queries: QueryService,
    pub generator: Arc<SuggestionGenerator>,
    pub reviews: ReviewGate,
    /// `None` when running on the in-memory store.
    pub pool: Option<PgPool>,
}

impl HttpState {
    pub fn new(
        store: Arc<dyn Store>,
        llm: Arc<dyn LlmBackend>,
        config: &MedqConfig,
        pool: Option<PgPool>,
    ) -> Self {
        Self {
            queries: QueryService::new(store.clone()),
            generator: Arc::new(SuggestionGenerator::new(
                llm,
                store.clone(),
                config.suggestion.clone(),
            )),
            reviews: ReviewGate::new(store),
            pool,
        }
    }
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/api/query", post(submit_handler).get(list_queries_handler))
        .route("/api/query/:id", get(get_query_handler))
        .route("/api/query/:id/status", patch(update_status_handler))
        .route(
            "/api/query/:id/documents",
            post(attach_document_handler).get(list_documents_handler),
        )
        .route(
            "/api/query/:id/suggestion",
            post(generate_suggestion_handler).get(get_suggestion_handler),
        )
        .route("/api/triage/:id", post(triage_handler))
        .route("/api/triage/:id/priority", patch(update_priority_handler))
        .route("/api/review", get(list_reviews_handler))
        .route(
            "/api/review/:id",
            post(submit_review_handler).get(get_review_handler),
        )
        .route("/api/admin/awaiting", delete(purge_awaiting_handler))
        .with_state(state)
}

/// Start the HTTP server on `addr`.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<HttpState>,
    addr: &str,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let app = build_router(state);
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Medq HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SubmitQueryRequest {
    pub patient_id: Uuid,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: QueryStatus,
}

#[derive(Debug, Deserialize)]
pub struct PriorityUpdateRequest {
    pub priority: QueryPriority,
}

/// Document text already extracted by the uploader.
#[derive(Debug, Deserialize)]
pub struct AttachDocumentRequest {
    pub filename: String,
    pub content_type: String,
    /// Size of the original file; defaults to the length of `text`.
    pub size_bytes: Option<u64>,
    pub text: Option<String>,
}

/// Standard HTTP error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            kind: kind.into(),
            status: "error".to_string(),
        }
    }
}

// ============================================================================
// Error mapping
// ============================================================================

pub fn status_for(e: &MedqError) -> StatusCode {
    match e {
        MedqError::NotFound { .. } => StatusCode::NOT_FOUND,
        MedqError::InvalidStateTransition { .. } | MedqError::Conflict(_) => StatusCode::CONFLICT,
        MedqError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        MedqError::TransientUpstreamFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
        MedqError::PermanentUpstreamFailure(_) => StatusCode::BAD_GATEWAY,
        MedqError::PersistenceFailure(_)
        | MedqError::Database(_)
        | MedqError::Config(_)
        | MedqError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Error kind plus a readable cause. Storage internals are logged, not returned.
pub fn error_body(e: &MedqError) -> (StatusCode, serde_json::Value) {
    let status = status_for(e);
    let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %e, kind = e.kind(), "Request failed");
        "internal storage error".to_string()
    } else {
        e.to_string()
    };
    let body = ErrorResponse::new(e.kind(), message);
    (status, serde_json::json!(body))
}

fn respond<T: Serialize>(
    result: medq_core::Result<T>,
    ok: StatusCode,
) -> (StatusCode, serde_json::Value) {
    match result {
        Ok(value) => (ok, serde_json::json!(value)),
        Err(e) => error_body(&e),
    }
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner health check. Probes the database when there is one.
pub async fn health_inner(state: &HttpState) -> (StatusCode, serde_json::Value) {
    let Some(pool) = &state.pool else {
        return (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "storage": "memory",
                "model": state.generator.model(),
            }),
        );
    };

    match medq_core::db::health_check(pool).await {
        Ok(pg_ver) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "storage": "postgresql",
                "postgresql": pg_ver,
                "model": state.generator.model(),
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "error": e.to_string(),
            }),
        ),
    }
}

/// Inner version. Returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "api": "medq/1",
    })
}

pub fn root_inner() -> serde_json::Value {
    serde_json::json!({
        "service": "medq",
        "message": "Medical query triage API. Drafts are reviewed by a doctor before release.",
    })
}

pub async fn submit_inner(
    state: &HttpState,
    req: SubmitQueryRequest,
) -> (StatusCode, serde_json::Value) {
    respond(
        state.queries.submit_query(req.patient_id, &req.content).await,
        StatusCode::CREATED,
    )
}

pub async fn list_queries_inner(
    state: &HttpState,
    filter: QueryFilter,
) -> (StatusCode, serde_json::Value) {
    respond(state.queries.list_queries(&filter).await, StatusCode::OK)
}

pub async fn get_query_inner(state: &HttpState, id: Uuid) -> (StatusCode, serde_json::Value) {
    respond(state.queries.get_query(id).await, StatusCode::OK)
}

pub async fn update_status_inner(
    state: &HttpState,
    id: Uuid,
    req: StatusUpdateRequest,
) -> (StatusCode, serde_json::Value) {
    respond(state.queries.update_status(id, req.status).await, StatusCode::OK)
}

pub async fn attach_document_inner(
    state: &HttpState,
    id: Uuid,
    req: AttachDocumentRequest,
) -> (StatusCode, serde_json::Value) {
    let size = req
        .size_bytes
        .unwrap_or_else(|| req.text.as_ref().map_or(0, |t| t.len() as u64));
    respond(
        state
            .queries
            .attach_document(id, &req.filename, &req.content_type, size, req.text)
            .await,
        StatusCode::CREATED,
    )
}

pub async fn list_documents_inner(
    state: &HttpState,
    id: Uuid,
) -> (StatusCode, serde_json::Value) {
    respond(state.queries.documents(id).await, StatusCode::OK)
}

pub async fn generate_suggestion_inner(
    state: &HttpState,
    id: Uuid,
) -> (StatusCode, serde_json::Value) {
    respond(state.generator.generate_for_query_id(id).await, StatusCode::OK)
}

pub async fn get_suggestion_inner(
    state: &HttpState,
    id: Uuid,
) -> (StatusCode, serde_json::Value) {
    respond(state.queries.suggestion_for_query(id).await, StatusCode::OK)
}

pub async fn triage_inner(state: &HttpState, id: Uuid) -> (StatusCode, serde_json::Value) {
    match state.queries.triage_query(id).await {
        Ok(outcome) => (
            StatusCode::OK,
            serde_json::json!({
                "query_id": outcome.query.id,
                "priority": outcome.triage.priority,
                "safety_score": outcome.triage.safety_score,
                "escalate": outcome.escalate,
                "status": outcome.query.status,
            }),
        ),
        Err(e) => error_body(&e),
    }
}

pub async fn update_priority_inner(
    state: &HttpState,
    id: Uuid,
    req: PriorityUpdateRequest,
) -> (StatusCode, serde_json::Value) {
    respond(state.queries.update_priority(id, req.priority).await, StatusCode::OK)
}

pub async fn submit_review_inner(
    state: &HttpState,
    id: Uuid,
    req: ReviewInput,
) -> (StatusCode, serde_json::Value) {
    respond(state.reviews.submit_review(id, req).await, StatusCode::CREATED)
}

pub async fn list_reviews_inner(
    state: &HttpState,
    filter: ReviewFilter,
) -> (StatusCode, serde_json::Value) {
    respond(state.reviews.list_reviews(&filter).await, StatusCode::OK)
}

pub async fn get_review_inner(state: &HttpState, id: Uuid) -> (StatusCode, serde_json::Value) {
    respond(state.reviews.review_for_query(id).await, StatusCode::OK)
}

pub async fn purge_awaiting_inner(state: &HttpState) -> (StatusCode, serde_json::Value) {
    match state.queries.purge_awaiting_review().await {
        Ok(removed) => (StatusCode::OK, serde_json::json!({ "removed": removed })),
        Err(e) => error_body(&e),
    }
}

// ============================================================================
// Axum handler wrappers (thin, delegating to inner functions)
// ============================================================================

pub async fn root_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(root_inner()))
}

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn submit_handler(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<SubmitQueryRequest>,
) -> impl IntoResponse {
    let (status, body) = submit_inner(&state, req).await;
    (status, Json(body))
}

pub async fn list_queries_handler(
    State(state): State<Arc<HttpState>>,
    UrlQuery(filter): UrlQuery<QueryFilter>,
) -> impl IntoResponse {
    let (status, body) = list_queries_inner(&state, filter).await;
    (status, Json(body))
}

pub async fn get_query_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = get_query_inner(&state, id).await;
    (status, Json(body))
}

pub async fn update_status_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<StatusUpdateRequest>,
) -> impl IntoResponse {
    let (status, body) = update_status_inner(&state, id, req).await;
    (status, Json(body))
}

pub async fn attach_document_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<AttachDocumentRequest>,
) -> impl IntoResponse {
    let (status, body) = attach_document_inner(&state, id, req).await;
    (status, Json(body))
}

pub async fn list_documents_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = list_documents_inner(&state, id).await;
    (status, Json(body))
}

pub async fn generate_suggestion_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = generate_suggestion_inner(&state, id).await;
    (status, Json(body))
}

pub async fn get_suggestion_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = get_suggestion_inner(&state, id).await;
    (status, Json(body))
}

pub async fn triage_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = triage_inner(&state, id).await;
    (status, Json(body))
}

pub async fn update_priority_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<PriorityUpdateRequest>,
) -> impl IntoResponse {
    let (status, body) = update_priority_inner(&state, id, req).await;
    (status, Json(body))
}

pub async fn submit_review_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReviewInput>,
) -> impl IntoResponse {
    let (status, body) = submit_review_inner(&state, id, req).await;
    (status, Json(body))
}

pub async fn list_reviews_handler(
    State(state): State<Arc<HttpState>>,
    UrlQuery(filter): UrlQuery<ReviewFilter>,
) -> impl IntoResponse {
    let (status, body) = list_reviews_inner(&state, filter).await;
    (status, Json(body))
}

pub async fn get_review_handler(
    State(state): State<Arc<HttpState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = get_review_inner(&state, id).await;
    (status, Json(body))
}

pub async fn purge_awaiting_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = purge_awaiting_inner(&state).await;
    (status, Json(body))
}

// ============================================================================
// Unit Tests (inner functions called directly)
// ============================================================================
