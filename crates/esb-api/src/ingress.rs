//! HTTP transport into the mediation engine
//!
//! The request body becomes the envelope. A response sent back by the
//! pipeline (through `respond`, a cache hit or a proxy's target endpoint) is
//! returned to the caller; otherwise the request is acknowledged with 202.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use esb_common::Envelope;
use esb_mediation::{MediationEngine, MediationOutcome, MessageContext};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub message_id: String,
    pub outcome: &'static str,
}

#[derive(Debug, Serialize)]
struct DroppedResponse {
    error: &'static str,
    message: String,
    message_id: String,
}

pub fn create_ingress_router(engine: Arc<MediationEngine>) -> Router {
    Router::new()
        .route("/mediate", post(mediate))
        .route("/proxies/:name", post(receive))
        .with_state(engine)
}

async fn mediate(State(engine): State<Arc<MediationEngine>>, headers: HeaderMap, body: Bytes) -> Response {
    let (mut ctx, reply) = inbound(&engine, &headers, body);
    let outcome = engine.inject(&mut ctx).await;
    respond(ctx, reply, outcome)
}

async fn receive(
    State(engine): State<Arc<MediationEngine>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (mut ctx, reply) = inbound(&engine, &headers, body);
    let outcome = engine.receive(&name, &mut ctx).await;
    respond(ctx, reply, outcome)
}

fn inbound(
    engine: &MediationEngine,
    headers: &HeaderMap,
    body: Bytes,
) -> (MessageContext, oneshot::Receiver<Envelope>) {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_CONTENT_TYPE);

    let mut ctx = engine.new_context(Envelope::new(content_type, body));
    let (tx, rx) = oneshot::channel();
    ctx.attach_reply(tx);
    (ctx, rx)
}

fn respond(
    ctx: MessageContext,
    mut reply: oneshot::Receiver<Envelope>,
    outcome: MediationOutcome,
) -> Response {
    let message_id = ctx.message_id().to_string();
    drop(ctx);

    if let Ok(envelope) = reply.try_recv() {
        debug!(message_id = %message_id, "Returning mediated response to caller");
        let content_type = HeaderValue::from_str(&envelope.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
        return (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], envelope.body).into_response();
    }

    let outcome = match outcome {
        MediationOutcome::Continued => "continued",
        MediationOutcome::Stopped => "stopped",
        MediationOutcome::FaultHandled { .. } => "fault_handled",
        MediationOutcome::Dropped { error } => {
            warn!(message_id = %message_id, error = %error, "Inbound message dropped");
            let body = DroppedResponse {
                error: error.kind(),
                message: error.to_string(),
                message_id,
            };
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response();
        }
    };

    (StatusCode::ACCEPTED, Json(AcceptedResponse { message_id, outcome })).into_response()
}
