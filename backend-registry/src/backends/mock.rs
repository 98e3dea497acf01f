use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use common::error::AppError;

use crate::{
    input_too_long_error, BackendCapabilities, BackendHealth, TranslatedChunk, Translator,
};

/// Script controlling the mock's behaviour, used by tests to exercise the
/// retry, budget and failure paths deterministically.
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Simulated per-call latency.
    pub latency_ms: u64,
    /// Confidence reported for every chunk; `None` mimics a backend without
    /// confidence support.
    pub confidence: Option<f32>,
    /// Language reported by `detect`.
    pub detected_language: String,
    /// Chunks containing this substring fail with a transient error for the
    /// first `transient_failures` calls.
    pub fail_substring: Option<String>,
    pub transient_failures: u32,
    pub max_input_chars: usize,
    /// When set, confidence decays with chunk length as
    /// `1 - len / scale` (clamped to [0.1, 1]), overriding `confidence`.
    /// Gives the chunk-size optimiser a curve to search in tests.
    pub confidence_scale_chars: Option<usize>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            latency_ms: 0,
            confidence: Some(0.9),
            detected_language: "en".to_string(),
            fail_substring: None,
            transient_failures: 0,
            max_input_chars: 5_000,
            confidence_scale_chars: None,
        }
    }
}

/// Deterministic echo backend: the "translation" is the source text, which
/// keeps length, structure and entities intact for the quality assessor.
pub struct MockTranslator {
    config: MockConfig,
    failure_counts: Mutex<HashMap<String, u32>>,
}

impl MockTranslator {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config,
            failure_counts: Mutex::new(HashMap::new()),
        }
    }

    fn should_fail(&self, chunk_text: &str) -> bool {
        let Some(marker) = &self.config.fail_substring else {
            return false;
        };
        if !chunk_text.contains(marker.as_str()) {
            return false;
        }
        let mut counts = self.failure_counts.lock().unwrap_or_else(|e| e.into_inner());
        let seen = counts.entry(chunk_text.to_string()).or_insert(0);
        if *seen < self.config.transient_failures {
            *seen += 1;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl Translator for MockTranslator {
    async fn translate(
        &self,
        chunk_text: &str,
        _src: &str,
        _tgt: &str,
    ) -> Result<TranslatedChunk, AppError> {
        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }

        let chars = chunk_text.chars().count();
        if chars > self.config.max_input_chars {
            return Err(input_too_long_error(chars, self.config.max_input_chars));
        }

        if self.should_fail(chunk_text) {
            return Err(AppError::BackendTransient(
                "scripted transient failure".to_string(),
            ));
        }

        let confidence = match self.config.confidence_scale_chars {
            Some(scale) if scale > 0 => {
                #[allow(clippy::cast_precision_loss)]
                let decayed = 1.0 - chars as f32 / scale as f32;
                Some(decayed.clamp(0.1, 1.0))
            }
            _ => self.config.confidence,
        };

        Ok(TranslatedChunk {
            text: chunk_text.to_string(),
            confidence,
        })
    }

    async fn detect(&self, _text: &str) -> Result<String, AppError> {
        Ok(self.config.detected_language.clone())
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            languages: common::language::default_mapping_for("mock")
                .into_keys()
                .collect(),
            max_input_chars: self.config.max_input_chars,
            supports_confidence: self.config.confidence.is_some(),
        }
    }

    async fn health(&self) -> BackendHealth {
        BackendHealth::Ready
    }
}
