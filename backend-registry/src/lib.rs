pub mod backends;
pub mod registry;

use std::collections::BTreeSet;

use async_trait::async_trait;
use common::error::AppError;
use serde::{Deserialize, Serialize};

pub use backends::{llm::LlmTranslator, mock::MockTranslator, nllb::NllbHttpTranslator};
pub use registry::{ModelGuard, ModelRegistry, ModelState, ModelStatus};

/// Output of translating one chunk of text.
#[derive(Debug, Clone)]
pub struct TranslatedChunk {
    pub text: String,
    pub confidence: Option<f32>,
}

/// What a backend declares about itself at registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendCapabilities {
    pub languages: BTreeSet<String>,
    pub max_input_chars: usize,
    pub supports_confidence: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendHealth {
    Ready,
    Degraded,
    Down,
}

/// Plug-in contract: one instance per loaded model.
///
/// `translate` must not truncate silently; input over `max_input_chars` is
/// rejected with a fatal input-too-long error so the controller re-chunks.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(
        &self,
        chunk_text: &str,
        src: &str,
        tgt: &str,
    ) -> Result<TranslatedChunk, AppError>;

    /// Best-effort language detection; may return `"unknown"`.
    async fn detect(&self, text: &str) -> Result<String, AppError>;

    fn capabilities(&self) -> BackendCapabilities;

    async fn health(&self) -> BackendHealth;
}

/// Marker carried by input-too-long rejections so the controller can tell
/// them apart from other fatal errors and re-chunk instead of failing.
pub const INPUT_TOO_LONG: &str = "input too long";

pub fn input_too_long_error(chars: usize, limit: usize) -> AppError {
    AppError::BackendFatal(format!("{INPUT_TOO_LONG}: {chars} chars exceeds {limit}"))
}

pub fn is_input_too_long(err: &AppError) -> bool {
    matches!(err, AppError::BackendFatal(msg) if msg.starts_with(INPUT_TOO_LONG))
}

/// Descriptor recorded by `ModelRegistry::register`; the registry builds the
/// backend from it on the first `load`.
#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    pub name: String,
    pub kind: BackendKind,
}

/// Supported backend families.
#[derive(Debug, Clone)]
pub enum BackendKind {
    /// Seq2seq translation server with an NLLB-style HTTP API.
    NllbLike { url: String },
    /// Instruct-tuned LLM behind an OpenAI-compatible API.
    LlmInstructTuned {
        base_url: String,
        api_key: String,
        model: String,
    },
    /// Deterministic in-process backend for tests and smoke deployments.
    Mock(backends::mock::MockConfig),
}
