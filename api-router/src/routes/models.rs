use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use tracing::info;

use crate::{api_state::ApiState, error::ApiError};

/// `GET /models`: every registered model with its lifecycle state.
pub async fn list_models(State(state): State<ApiState>) -> impl IntoResponse {
    let models = state.engine.registry().list();
    (StatusCode::OK, Json(json!({ "models": models })))
}

/// `POST /models/{name}/load`: bring a registered backend to `Ready`.
/// Concurrent calls for the same name share one load.
pub async fn load_model(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.engine.registry().load(&name).await?;

    // A (re)load is a version change: cached entries for this backend are
    // stale.
    state.engine.cache().invalidate_backend(&name).await?;

    info!(model = name, "model loaded via API");
    Ok((StatusCode::OK, Json(json!({ "status": "loaded", "model": name }))))
}

/// `DELETE /models/{name}`: unload an idle backend and purge its cache.
pub async fn unload_model(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.engine.registry().unload(&name)?;
    state.engine.cache().invalidate_backend(&name).await?;

    info!(model = name, "model unloaded via API");
    Ok((StatusCode::OK, Json(json!({ "status": "unloaded", "model": name }))))
}
