//! ESB management API
//!
//! HTTP endpoints for:
//! - Health
//! - Message processor status and lifecycle
//! - Dead-letter channel inspection, deletion and resend
//!
//! [`create_ingress_router`] additionally exposes the mediation engine itself
//! over HTTP.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::info;

use esb_store::{DeadLetterChannelView, ProcessorRegistry, ProcessorStatus};

pub mod error;
pub mod ingress;

pub use error::ApiError;
pub use ingress::create_ingress_router;

type ApiResult<T> = Result<T, ApiError>;

/// Shared state of the management handlers
#[derive(Clone)]
pub struct ApiState {
    pub processors: Arc<ProcessorRegistry>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub processors: usize,
}

#[derive(Debug, Serialize)]
pub struct SizeResponse {
    pub size: usize,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct EnvelopeResponse {
    pub message_id: String,
    pub envelope: String,
}

#[derive(Debug, Serialize)]
pub struct ResendResponse {
    pub message_id: String,
    pub resent: bool,
}

pub fn create_router(processors: Arc<ProcessorRegistry>) -> Router {
    let state = ApiState { processors };

    Router::new()
        .route("/health", get(health))
        .route("/processors", get(list_processors))
        .route("/processors/:name", get(get_processor))
        .route("/processors/:name/start", post(start_processor))
        .route("/processors/:name/stop", post(stop_processor))
        .route("/dlc/:processor/size", get(dlc_size))
        .route(
            "/dlc/:processor/messages",
            get(dlc_message_ids).delete(dlc_delete_all),
        )
        .route(
            "/dlc/:processor/messages/:id",
            get(dlc_envelope).delete(dlc_delete),
        )
        .route("/dlc/:processor/messages/:id/resend", post(dlc_resend))
        .route("/dlc/:processor/resend", post(dlc_resend_all))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Health / Processors
// ============================================================================

async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "UP",
        version: env!("CARGO_PKG_VERSION"),
        processors: state.processors.names().len(),
    })
}

async fn list_processors(State(state): State<ApiState>) -> Json<Vec<ProcessorStatus>> {
    Json(state.processors.statuses().await)
}

async fn get_processor(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> ApiResult<Json<ProcessorStatus>> {
    let processor = state
        .processors
        .get(&name)
        .ok_or_else(|| ApiError::unknown_processor(&name))?;
    Ok(Json(processor.status().await))
}

async fn start_processor(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> ApiResult<Json<ProcessorStatus>> {
    let processor = state
        .processors
        .get(&name)
        .ok_or_else(|| ApiError::unknown_processor(&name))?;
    processor.start().await;
    info!(processor = %name, "Processor started via API");
    Ok(Json(processor.status().await))
}

async fn stop_processor(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> ApiResult<Json<ProcessorStatus>> {
    let processor = state
        .processors
        .get(&name)
        .ok_or_else(|| ApiError::unknown_processor(&name))?;
    processor.stop().await;
    info!(processor = %name, "Processor stopped via API");
    Ok(Json(processor.status().await))
}

// ============================================================================
// Dead Letter Channel
// ============================================================================

fn view(state: &ApiState, processor: &str) -> ApiResult<DeadLetterChannelView> {
    state
        .processors
        .dead_letter_view(processor)
        .ok_or_else(|| ApiError::unknown_processor(processor))
}

async fn dlc_size(
    State(state): State<ApiState>,
    Path(processor): Path<String>,
) -> ApiResult<Json<SizeResponse>> {
    let size = view(&state, &processor)?.get_size().await?;
    Ok(Json(SizeResponse { size }))
}

async fn dlc_message_ids(
    State(state): State<ApiState>,
    Path(processor): Path<String>,
) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(view(&state, &processor)?.get_message_ids().await?))
}

async fn dlc_delete_all(
    State(state): State<ApiState>,
    Path(processor): Path<String>,
) -> ApiResult<Json<CountResponse>> {
    let count = view(&state, &processor)?.delete_all().await?;
    info!(processor = %processor, count, "Dead-letter store cleared via API");
    Ok(Json(CountResponse { count }))
}

async fn dlc_envelope(
    State(state): State<ApiState>,
    Path((processor, id)): Path<(String, String)>,
) -> ApiResult<Json<EnvelopeResponse>> {
    let envelope = view(&state, &processor)?
        .get_envelope(&id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Message '{}' not found", id)))?;
    Ok(Json(EnvelopeResponse {
        message_id: id,
        envelope,
    }))
}

async fn dlc_delete(
    State(state): State<ApiState>,
    Path((processor, id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    if view(&state, &processor)?.delete(&id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("Message '{}' not found", id)))
    }
}

async fn dlc_resend(
    State(state): State<ApiState>,
    Path((processor, id)): Path<(String, String)>,
) -> ApiResult<Json<ResendResponse>> {
    let view = view(&state, &processor)?;
    if view.get_message(&id).await?.is_none() {
        return Err(ApiError::not_found(format!("Message '{}' not found", id)));
    }
    if !view.resend(&id).await? {
        return Err(ApiError::conflict(format!(
            "Message '{}' could not be handed back to its processor",
            id
        )));
    }
    Ok(Json(ResendResponse {
        message_id: id,
        resent: true,
    }))
}

async fn dlc_resend_all(
    State(state): State<ApiState>,
    Path(processor): Path<String>,
) -> ApiResult<Json<CountResponse>> {
    let count = view(&state, &processor)?.resend_all().await?;
    Ok(Json(CountResponse { count }))
}
