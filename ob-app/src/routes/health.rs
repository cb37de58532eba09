use crate::server::ObserverState;
use axum::routing::get;
use axum::{Extension, Json};
use chrono::Utc;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new().route("/api/v1/observe/health", get(get_health))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_health(Extension(state): Extension<Arc<ObserverState>>) -> Json<serde_json::Value> {
    let queue_remaining = state.events.capacity();
    let accepting = !state.events.is_closed();

    Json(serde_json::json!({
        "status": if accepting { "ok" } else { "draining" },
        "ready": accepting,
        "checked_at": Utc::now(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "queue": {
            "capacity": state.queue_capacity,
            "remaining": queue_remaining,
        },
        "stores": state.observer.store_sizes(),
    }))
}
