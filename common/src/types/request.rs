use serde::{Deserialize, Serialize};

use crate::{error::AppError, language::AUTO};

/// Client-declared latency/quality trade-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Preference {
    Fast,
    #[default]
    Balanced,
    Quality,
}

impl Preference {
    /// Minimum stored quality a cache entry must carry to satisfy a request
    /// with this preference. The stable key format carries no floor, so this
    /// is enforced as a read-time filter.
    pub const fn quality_floor(self) -> f32 {
        match self {
            Self::Fast => 0.0,
            Self::Balanced => 0.55,
            Self::Quality => 0.8,
        }
    }
}

/// Time and cost budgets for one translation request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Budgets {
    pub max_latency_ms: u64,
    pub max_optimisation_ms: u64,
    pub allow_optimisation: bool,
}

impl Default for Budgets {
    fn default() -> Self {
        Self {
            max_latency_ms: 30_000,
            max_optimisation_ms: 5_000,
            allow_optimisation: true,
        }
    }
}

/// Authenticated, typed translation request as consumed by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationRequest {
    pub text: String,
    /// Canonical code or `"auto"`.
    pub source_lang: String,
    pub target_lang: String,
    pub backend_hint: Option<String>,
    #[serde(default)]
    pub preference: Preference,
    #[serde(default)]
    pub budgets: Budgets,
    /// Fallback when detection reports `"unknown"` for an `"auto"` source.
    pub default_source: Option<String>,
}

impl TranslationRequest {
    pub fn new(text: impl Into<String>, source_lang: &str, target_lang: &str) -> Self {
        Self {
            text: text.into(),
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
            backend_hint: None,
            preference: Preference::default(),
            budgets: Budgets::default(),
            default_source: None,
        }
    }

    pub fn with_preference(mut self, preference: Preference) -> Self {
        self.preference = preference;
        self
    }

    pub fn with_budgets(mut self, budgets: Budgets) -> Self {
        self.budgets = budgets;
        self
    }

    /// Structural validation, before any language or backend resolution.
    pub fn validate(&self, max_text_chars: usize) -> Result<(), AppError> {
        if self.text.is_empty() {
            return Err(AppError::InvalidRequest("text must not be empty".into()));
        }
        let chars = self.text.chars().count();
        if chars > max_text_chars {
            return Err(AppError::TextTooLong {
                chars,
                limit: max_text_chars,
            });
        }
        if self.target_lang.trim().eq_ignore_ascii_case(AUTO) {
            return Err(AppError::InvalidRequest(
                "target_lang must not be 'auto'".into(),
            ));
        }
        if self.budgets.max_latency_ms == 0 {
            return Err(AppError::InvalidRequest(
                "max_latency_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
