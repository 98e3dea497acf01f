use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use common::types::{
    quality::Grade,
    request::{Budgets, Preference, TranslationRequest},
    result::{TranslationPath, TranslationResult},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct TranslateBody {
    pub text: String,
    pub source_lang: Option<String>,
    pub target_lang: String,
    pub backend: Option<String>,
    pub preference: Option<Preference>,
    pub default_source: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AdaptiveBody {
    #[serde(flatten)]
    pub base: TranslateBody,
    pub max_latency_ms: Option<u64>,
    pub max_optimisation_ms: Option<u64>,
    pub allow_optimisation: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct TranslateResponse {
    pub translated_text: String,
    pub detected_source: String,
    pub quality_grade: Grade,
    pub processing_ms: u64,
    pub cache_hit: bool,
    pub path: TranslationPath,
    pub warnings: Vec<usize>,
}

impl From<TranslationResult> for TranslateResponse {
    fn from(result: TranslationResult) -> Self {
        Self {
            translated_text: result.text,
            detected_source: result.detected_source,
            quality_grade: result.quality.grade,
            processing_ms: result.processing_ms,
            cache_hit: result.cache_hit,
            path: result.path,
            warnings: result.warnings,
        }
    }
}

fn build_request(body: TranslateBody) -> TranslationRequest {
    TranslationRequest {
        text: body.text,
        source_lang: body.source_lang.unwrap_or_else(|| "auto".to_string()),
        target_lang: body.target_lang,
        backend_hint: body.backend,
        preference: body.preference.unwrap_or_default(),
        budgets: Budgets::default(),
        default_source: body.default_source,
    }
}

fn build_adaptive_request(body: AdaptiveBody) -> TranslationRequest {
    let mut request = build_request(body.base);
    if let Some(max_latency_ms) = body.max_latency_ms {
        request.budgets.max_latency_ms = max_latency_ms;
    }
    if let Some(max_optimisation_ms) = body.max_optimisation_ms {
        request.budgets.max_optimisation_ms = max_optimisation_ms;
    }
    if let Some(allow) = body.allow_optimisation {
        request.budgets.allow_optimisation = allow;
    }
    request
}

/// `POST /translate`: single-pass translation, optimisation disabled.
pub async fn translate(
    State(state): State<ApiState>,
    Json(body): Json<TranslateBody>,
) -> Result<impl IntoResponse, ApiError> {
    let mut request = build_request(body);
    request.budgets.allow_optimisation = false;

    let result = state.engine.translate(&request).await?;
    Ok((StatusCode::OK, Json(TranslateResponse::from(result))))
}

/// `POST /translate/adaptive`: full controller flow with per-request budgets.
pub async fn translate_adaptive(
    State(state): State<ApiState>,
    Json(body): Json<AdaptiveBody>,
) -> Result<impl IntoResponse, ApiError> {
    let request = build_adaptive_request(body);

    let result = state.engine.translate(&request).await?;
    Ok((StatusCode::OK, Json(TranslateResponse::from(result))))
}

/// `POST /translate/adaptive/progressive`: staged results as one JSON object
/// per line. Client disconnect cancels outstanding chunk translations.
pub async fn translate_progressive(
    State(state): State<ApiState>,
    Json(body): Json<AdaptiveBody>,
) -> Result<Response, ApiError> {
    let request = build_adaptive_request(body);
    info!(chars = request.text.chars().count(), "progressive translation requested");

    let (tx, rx) = mpsc::channel(32);
    let cancel = CancellationToken::new();
    let engine = std::sync::Arc::clone(&state.engine);

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            engine.translate_progressive(request, tx, cancel).await;
        });
    }

    // Dropping the response body (client gone) drops the guard, which
    // cancels the producer and aborts in-flight backend calls.
    let guard = cancel.drop_guard();
    let lines = ReceiverStream::new(rx).map(move |event| {
        let _alive = &guard;
        let mut line = serde_json::to_string(&event).unwrap_or_else(|err| {
            format!("{{\"event\":\"error\",\"kind\":\"internal\",\"message\":\"{err}\"}}")
        });
        line.push('\n');
        Ok::<Bytes, std::convert::Infallible>(Bytes::from(line))
    });

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .body(Body::from_stream(lines))
        .map_err(|err| {
            ApiError::App(common::error::AppError::InternalError(err.to_string()))
        })?;
    Ok(response)
}
