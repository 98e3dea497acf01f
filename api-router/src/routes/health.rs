use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use backend_registry::ModelState;
use serde_json::json;

use crate::api_state::ApiState;

/// `GET /health`: overall status, loaded models, cache reachability.
pub async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let loaded_models: Vec<String> = state
        .engine
        .registry()
        .list()
        .into_iter()
        .filter(|status| status.state == ModelState::Ready)
        .map(|status| status.name)
        .collect();

    let l2_ok = state.engine.cache().l2_healthy().await;
    let status = if loaded_models.is_empty() || !l2_ok {
        "degraded"
    } else {
        "ok"
    };

    let code = if status == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(json!({
            "status": status,
            "loaded_models": loaded_models,
            "cache_health": {
                "l1_entries": state.engine.cache().l1_len(),
                "l2": if l2_ok { "ok" } else { "unreachable" },
            }
        })),
    )
}

/// Liveness probe: always returns 200 to indicate the process is running.
pub async fn live() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

/// Readiness probe: returns 200 if core dependencies are ready, else 503.
pub async fn ready(State(state): State<ApiState>) -> impl IntoResponse {
    if state.engine.cache().l2_healthy().await {
        (
            StatusCode::OK,
            Json(json!({ "status": "ok", "checks": { "kv": "ok" } })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "error", "checks": { "kv": "fail" } })),
        )
    }
}
