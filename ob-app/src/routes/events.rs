//! Ingress for bridges that normalize platform payloads themselves.

use crate::gateway::GatewayEvent;
use crate::server::ObserverState;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Extension, Json};
use ob_channels::{ButtonClick, InboundMessage};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/api/v1/observe/inbound", post(post_inbound))
        .route("/api/v1/observe/actions", post(post_action))
}

#[tracing::instrument(level = "info", skip_all)]
async fn post_inbound(
    Extension(state): Extension<Arc<ObserverState>>,
    Json(inbound): Json<InboundMessage>,
) -> (StatusCode, Json<serde_json::Value>) {
    tracing::debug!(
        channel_id = %inbound.channel_id,
        sender_id = %inbound.sender_id,
        "inbound message received"
    );
    if inbound.text.trim().is_empty() {
        return rejected(StatusCode::BAD_REQUEST, "text is required");
    }
    enqueue(&state, GatewayEvent::Inbound(inbound))
}

#[tracing::instrument(level = "info", skip_all)]
async fn post_action(
    Extension(state): Extension<Arc<ObserverState>>,
    Json(click): Json<ButtonClick>,
) -> (StatusCode, Json<serde_json::Value>) {
    tracing::debug!(user_id = %click.user_id, "button click received");
    if click.value.trim().is_empty() {
        return rejected(StatusCode::BAD_REQUEST, "value is required");
    }
    enqueue(&state, GatewayEvent::Action(click))
}

fn enqueue(state: &ObserverState, event: GatewayEvent) -> (StatusCode, Json<serde_json::Value>) {
    match state.events.try_send(event) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "status": "queued" })),
        ),
        Err(TrySendError::Full(_)) => {
            tracing::warn!(
                queue_capacity = state.queue_capacity,
                "inbound queue full; rejecting event"
            );
            rejected(StatusCode::SERVICE_UNAVAILABLE, "inbound queue full")
        }
        Err(TrySendError::Closed(_)) => {
            tracing::warn!("gateway stopped; rejecting event");
            rejected(StatusCode::SERVICE_UNAVAILABLE, "shutting down")
        }
    }
}

fn rejected(status: StatusCode, error: &str) -> (StatusCode, Json<serde_json::Value>) {
    (
        status,
        Json(serde_json::json!({ "status": "error", "error": error })),
    )
}
