use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::{AppError, ErrorKind};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    App(#[from] AppError),
}

/// Wire shape of every error response: `{error, kind, retryable}`.
#[derive(Serialize, Debug)]
struct ErrorResponse {
    error: String,
    kind: ErrorKind,
    retryable: bool,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::Unauthorized(message) => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse {
                    error: message,
                    kind: ErrorKind::InvalidRequest,
                    retryable: false,
                },
            ),
            Self::NotFound(message) => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    error: message,
                    kind: ErrorKind::InvalidRequest,
                    retryable: false,
                },
            ),
            Self::App(err) => {
                let kind = err.kind();
                let retryable = err.retryable();
                let status = status_for(kind);
                let error = if status == StatusCode::INTERNAL_SERVER_ERROR {
                    // Internals stay in the logs, not on the wire.
                    tracing::error!("Internal error: {:?}", err);
                    "Internal server error".to_string()
                } else {
                    err.to_string()
                };
                (
                    status,
                    ErrorResponse {
                        error,
                        kind,
                        retryable,
                    },
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

const fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidRequest
        | ErrorKind::UnknownLanguage
        | ErrorKind::UnsupportedLanguagePair
        | ErrorKind::TextTooLong => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::ModelNotLoaded | ErrorKind::ModelLoadFailed => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::LanguageDetectionFailed => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::BackendTransient | ErrorKind::BackendFatal => StatusCode::BAD_GATEWAY,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
