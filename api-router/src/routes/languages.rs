use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::{api_state::ApiState, error::ApiError};

/// `GET /languages`: the canonical code set the gateway understands.
pub async fn list_languages(State(state): State<ApiState>) -> impl IntoResponse {
    let languages = state.engine.languages().known_languages().clone();
    (StatusCode::OK, Json(json!({ "languages": languages })))
}

/// `GET /languages/{backend}`: canonical codes a backend declares support
/// for.
pub async fn list_backend_languages(
    State(state): State<ApiState>,
    Path(backend): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let known = state
        .engine
        .registry()
        .list()
        .iter()
        .any(|status| status.name == backend);
    if !known {
        return Err(ApiError::NotFound(format!("backend '{backend}' not registered")));
    }

    let languages = state.engine.languages().list_supported(&backend);
    Ok((
        StatusCode::OK,
        Json(json!({ "backend": backend, "languages": languages })),
    ))
}
