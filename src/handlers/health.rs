use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::{json, Value};

use crate::handlers::AppState;

pub async fn liveness() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    // Check document store
    let documents_status = match state.documents.ping().await {
        Ok(()) => "healthy",
        Err(e) => {
            tracing::warn!("Document store not ready: {}", e);
            "unhealthy"
        }
    };

    // Check device store
    let devices_status = match state.devices.ping().await {
        Ok(()) => "healthy",
        Err(e) => {
            tracing::warn!("Device store not ready: {}", e);
            "unhealthy"
        }
    };

    let ready = documents_status == "healthy" && devices_status == "healthy";
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if ready { "ready" } else { "not_ready" },
            "checks": {
                "documents": documents_status,
                "devices": devices_status
            },
            "timestamp": chrono::Utc::now().to_rfc3339()
        })),
    )
}
