use std::collections::{BTreeSet, HashMap};

use crate::error::AppError;

/// Sentinel accepted in place of a source language, resolved by detection.
pub const AUTO: &str = "auto";

/// Canonical language codes known to the gateway: lowercase two-letter
/// primary tag plus an optional title-case script tag (`zh-Hant`).
const KNOWN_LANGUAGES: &[&str] = &[
    "ar", "cs", "de", "en", "es", "fi", "fr", "hi", "it", "ja", "ko", "nl", "pl", "pt", "ru",
    "sv", "tr", "uk", "zh", "zh-Hans", "zh-Hant",
];

/// Canonical language code set plus per-backend conversion tables.
///
/// Backends declare their mapping at registration; a canonical code without a
/// mapping yields `UnsupportedLanguagePair`.
#[derive(Debug, Default)]
pub struct LanguageRegistry {
    known: BTreeSet<String>,
    backend_maps: HashMap<String, HashMap<String, String>>,
}

impl LanguageRegistry {
    pub fn new() -> Self {
        Self {
            known: KNOWN_LANGUAGES.iter().map(|s| (*s).to_string()).collect(),
            backend_maps: HashMap::new(),
        }
    }

    /// Record a backend's canonical → backend-specific code table.
    pub fn register_backend(&mut self, backend: &str, mapping: HashMap<String, String>) {
        self.backend_maps.insert(backend.to_string(), mapping);
    }

    /// Normalize a user-supplied code to canonical form. `"auto"` passes
    /// through unchanged so callers can resolve it via detection.
    ///
    /// Only the shape is validated here; whether a backend supports the code
    /// is a `to_backend` concern, so a well-formed but unmapped tag fails
    /// there with `UnsupportedLanguagePair` and never reaches a backend.
    pub fn canonicalise(&self, code_or_auto: &str) -> Result<String, AppError> {
        let trimmed = code_or_auto.trim();
        if trimmed.eq_ignore_ascii_case(AUTO) {
            return Ok(AUTO.to_string());
        }

        normalise_tag(trimmed).ok_or_else(|| AppError::UnknownLanguage(code_or_auto.to_string()))
    }

    /// Convert a canonical code to the backend-specific one.
    pub fn to_backend(&self, canonical: &str, backend: &str) -> Result<String, AppError> {
        self.backend_maps
            .get(backend)
            .and_then(|mapping| mapping.get(canonical))
            .cloned()
            .ok_or_else(|| {
                AppError::UnsupportedLanguagePair(format!(
                    "backend '{backend}' does not support '{canonical}'"
                ))
            })
    }

    /// Canonical codes a backend has declared a mapping for.
    pub fn list_supported(&self, backend: &str) -> BTreeSet<String> {
        self.backend_maps
            .get(backend)
            .map(|mapping| mapping.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn known_languages(&self) -> &BTreeSet<String> {
        &self.known
    }
}

/// `xx` or `xx-Yyyy`: lowercase primary tag, title-case script tag.
fn normalise_tag(raw: &str) -> Option<String> {
    let mut parts = raw.split(['-', '_']);
    let primary = parts.next()?;
    if primary.len() != 2 || !primary.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let primary = primary.to_ascii_lowercase();

    match parts.next() {
        None => Some(primary),
        Some(script) => {
            if parts.next().is_some() {
                return None;
            }
            if script.len() != 4 || !script.chars().all(|c| c.is_ascii_alphabetic()) {
                return None;
            }
            let mut normalised = primary;
            normalised.push('-');
            let mut chars = script.chars();
            if let Some(first) = chars.next() {
                normalised.push(first.to_ascii_uppercase());
            }
            for c in chars {
                normalised.push(c.to_ascii_lowercase());
            }
            Some(normalised)
        }
    }
}

/// Default canonical → backend tables for the bundled backends.
pub fn default_mapping_for(backend: &str) -> HashMap<String, String> {
    match backend {
        // NLLB uses Flores-200 style codes.
        name if name.contains("nllb") => [
            ("en", "eng_Latn"),
            ("ru", "rus_Cyrl"),
            ("de", "deu_Latn"),
            ("fr", "fra_Latn"),
            ("es", "spa_Latn"),
            ("it", "ita_Latn"),
            ("pt", "por_Latn"),
            ("zh", "zho_Hans"),
            ("zh-Hans", "zho_Hans"),
            ("zh-Hant", "zho_Hant"),
            ("ja", "jpn_Jpan"),
            ("ko", "kor_Hang"),
            ("ar", "arb_Arab"),
            ("hi", "hin_Deva"),
            ("uk", "ukr_Cyrl"),
        ]
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect(),
        // LLM-instructed and mock backends take canonical codes as-is.
        _ => KNOWN_LANGUAGES
            .iter()
            .map(|code| ((*code).to_string(), (*code).to_string()))
            .collect(),
    }
}
