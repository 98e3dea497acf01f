use serde::{Deserialize, Serialize};

use super::quality::QualityReport;

/// Which controller path produced the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationPath {
    Cached,
    Fast,
    Optimised,
    Streamed,
}

impl TranslationPath {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cached => "cached",
            Self::Fast => "fast",
            Self::Optimised => "optimised",
            Self::Streamed => "streamed",
        }
    }
}

/// Final outcome of one translation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationResult {
    pub text: String,
    pub detected_source: String,
    pub quality: QualityReport,
    pub path: TranslationPath,
    pub chunks_used: usize,
    pub optimisation_applied: bool,
    pub processing_ms: u64,
    pub cache_hit: bool,
    /// Indices of chunks that fell back to untranslated source text.
    #[serde(default)]
    pub warnings: Vec<usize>,
}

impl TranslationResult {
    /// Copy re-labelled as a cache hit, as returned on the cached path.
    pub fn as_cached(mut self, processing_ms: u64) -> Self {
        self.path = TranslationPath::Cached;
        self.cache_hit = true;
        self.processing_ms = processing_ms;
        self
    }
}
