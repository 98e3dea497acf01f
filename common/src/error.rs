use async_openai::error::OpenAIError;
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Unknown language: {0}")]
    UnknownLanguage(String),
    #[error("Unsupported language pair: {0}")]
    UnsupportedLanguagePair(String),
    #[error("Text too long: {chars} characters exceeds limit of {limit}")]
    TextTooLong { chars: usize, limit: usize },
    #[error("Model not loaded: {0}")]
    ModelNotLoaded(String),
    #[error("Model load failed for '{name}': {reason}")]
    ModelLoadFailed { name: String, reason: String },
    #[error("Deadline exceeded")]
    DeadlineExceeded,
    #[error("Rate limited")]
    RateLimited,
    #[error("Language detection failed")]
    LanguageDetectionFailed,
    #[error("Cancelled by consumer")]
    Cancelled,
    #[error("Transient backend error: {0}")]
    BackendTransient(String),
    #[error("Fatal backend error: {0}")]
    BackendFatal(String),
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

/// Wire-stable error kind, surfaced to clients as `{error, kind, retryable}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    UnknownLanguage,
    UnsupportedLanguagePair,
    TextTooLong,
    ModelNotLoaded,
    ModelLoadFailed,
    DeadlineExceeded,
    RateLimited,
    LanguageDetectionFailed,
    BackendTransient,
    BackendFatal,
    Internal,
}

impl ErrorKind {
    /// Stable label, also used for telemetry dimensions.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::UnknownLanguage => "unknown_language",
            Self::UnsupportedLanguagePair => "unsupported_language_pair",
            Self::TextTooLong => "text_too_long",
            Self::ModelNotLoaded => "model_not_loaded",
            Self::ModelLoadFailed => "model_load_failed",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::RateLimited => "rate_limited",
            Self::LanguageDetectionFailed => "language_detection_failed",
            Self::BackendTransient => "backend_transient",
            Self::BackendFatal => "backend_fatal",
            Self::Internal => "internal",
        }
    }
}

impl AppError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::UnknownLanguage(_) => ErrorKind::UnknownLanguage,
            Self::UnsupportedLanguagePair(_) => ErrorKind::UnsupportedLanguagePair,
            Self::TextTooLong { .. } => ErrorKind::TextTooLong,
            Self::ModelNotLoaded(_) => ErrorKind::ModelNotLoaded,
            Self::ModelLoadFailed { .. } => ErrorKind::ModelLoadFailed,
            Self::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            Self::RateLimited => ErrorKind::RateLimited,
            Self::LanguageDetectionFailed => ErrorKind::LanguageDetectionFailed,
            Self::BackendTransient(_) => ErrorKind::BackendTransient,
            Self::BackendFatal(_) => ErrorKind::BackendFatal,
            _ => ErrorKind::Internal,
        }
    }

    /// Whether a client (or the per-chunk retry loop) may retry the operation.
    pub const fn retryable(&self) -> bool {
        matches!(self, Self::RateLimited | Self::BackendTransient(_))
    }

    /// Validation errors never hit a backend and map to 4xx at the API edge.
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest(_)
                | Self::UnknownLanguage(_)
                | Self::UnsupportedLanguagePair(_)
                | Self::TextTooLong { .. }
        )
    }
}
