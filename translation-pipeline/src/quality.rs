use std::collections::HashSet;
use std::sync::Arc;

use common::{
    types::chunk::ChunkTranslation,
    types::quality::{Grade, QualityComponents, QualityReport},
    utils::embedding::{cosine_similarity, Embedder},
};
use tracing::warn;

use crate::chunker::TERMINATORS;

// Composite weights without a semantic signal.
const W_CONFIDENCE: f32 = 0.3;
const W_LENGTH: f32 = 0.2;
const W_STRUCTURE: f32 = 0.2;
const W_ENTITIES: f32 = 0.2;
const W_BOUNDARY: f32 = 0.1;

// Rebalanced weights when an embedder contributed semantic coherence.
const WS_CONFIDENCE: f32 = 0.25;
const WS_LENGTH: f32 = 0.15;
const WS_STRUCTURE: f32 = 0.15;
const WS_ENTITIES: f32 = 0.15;
const WS_BOUNDARY: f32 = 0.05;
const WS_SEMANTIC: f32 = 0.25;

/// Composite scorer over a (source, translation, chunk translations) triple.
/// The embedder is optional; without it the composite rebalances.
#[derive(Clone, Default)]
pub struct Assessor {
    embedder: Option<Arc<dyn Embedder>>,
}

impl Assessor {
    pub fn new(embedder: Option<Arc<dyn Embedder>>) -> Self {
        Self { embedder }
    }

    pub async fn assess(
        &self,
        source: &str,
        translation: &str,
        chunks: &[ChunkTranslation],
    ) -> QualityReport {
        let confidence = confidence_score(chunks);
        let length_consistency = length_score(source, translation);
        let structure_integrity = structure_score(translation);
        let entity_preservation = entity_score(source, translation);
        let boundary_coherence = boundary_score(chunks);
        let semantic_coherence = self.semantic_score(source, translation).await;

        let components = QualityComponents {
            confidence,
            length_consistency,
            structure_integrity,
            entity_preservation,
            boundary_coherence,
            semantic_coherence,
        };

        let composite = match semantic_coherence {
            Some(semantic) => {
                confidence * WS_CONFIDENCE
                    + length_consistency * WS_LENGTH
                    + structure_integrity * WS_STRUCTURE
                    + entity_preservation * WS_ENTITIES
                    + boundary_coherence * WS_BOUNDARY
                    + semantic * WS_SEMANTIC
            }
            None => {
                confidence * W_CONFIDENCE
                    + length_consistency * W_LENGTH
                    + structure_integrity * W_STRUCTURE
                    + entity_preservation * W_ENTITIES
                    + boundary_coherence * W_BOUNDARY
            }
        }
        .clamp(0.0, 1.0);

        QualityReport {
            composite,
            grade: Grade::from_composite(composite),
            components,
        }
    }

    async fn semantic_score(&self, source: &str, translation: &str) -> Option<f32> {
        let embedder = self.embedder.as_ref()?;
        let (source_vec, translation_vec) =
            futures::join!(embedder.embed(source), embedder.embed(translation));
        match (source_vec, translation_vec) {
            (Ok(a), Ok(b)) => Some(cosine_similarity(&a, &b)),
            (Err(err), _) | (_, Err(err)) => {
                // Embedder outage neutralises the component, nothing more.
                warn!(error = %err, "embedder unavailable, semantic coherence skipped");
                None
            }
        }
    }
}

/// Mean backend confidence; neutral 0.5 when no chunk reported one.
fn confidence_score(chunks: &[ChunkTranslation]) -> f32 {
    let reported: Vec<f32> = chunks.iter().filter_map(|c| c.confidence).collect();
    if reported.is_empty() {
        return 0.5;
    }
    #[allow(clippy::cast_precision_loss)]
    let mean = reported.iter().sum::<f32>() / reported.len() as f32;
    mean.clamp(0.0, 1.0)
}

/// Piecewise curve over the length ratio r = |translation| / |source|:
/// flat 1.0 on [0.8, 1.5], linear decay to 0 at r <= 0.3 and r >= 3.0.
fn length_score(source: &str, translation: &str) -> f32 {
    let source_len = source.chars().count();
    let translation_len = translation.chars().count();
    if source_len == 0 {
        return 0.0;
    }

    #[allow(clippy::cast_precision_loss)]
    let r = translation_len as f32 / source_len as f32;

    if (0.8..=1.5).contains(&r) {
        1.0
    } else if r <= 0.3 || r >= 3.0 {
        0.0
    } else if r < 0.8 {
        (r - 0.3) / 0.5
    } else {
        (3.0 - r) / 1.5
    }
}

/// 1.0 minus fixed deductions for incomplete sentences, repeated phrases and
/// basic grammar flags, floored at 0.
fn structure_score(translation: &str) -> f32 {
    let incomplete = incomplete_sentence_count(translation);
    let repeated = repeated_phrase_count(translation);
    let grammar = grammar_flag_count(translation);

    #[allow(clippy::cast_precision_loss)]
    let score = 1.0 - 0.1 * incomplete as f32 - 0.05 * repeated as f32 - 0.03 * grammar as f32;
    score.max(0.0)
}

fn incomplete_sentence_count(text: &str) -> usize {
    let trimmed = text.trim_end();
    if trimmed.is_empty() {
        return 0;
    }
    // Sentence completeness uses the chunker's terminator set; interior
    // segments end with one by construction, so only the tail can dangle.
    let ends_complete = trimmed
        .chars()
        .last()
        .is_some_and(|c| TERMINATORS.contains(&c) || matches!(c, '"' | '\'' | '»' | ')'));
    usize::from(!ends_complete)
}

/// Count distinct token trigrams that occur more than once.
fn repeated_phrase_count(text: &str) -> usize {
    let tokens: Vec<String> = text
        .split_whitespace()
        .map(str::to_lowercase)
        .collect();
    if tokens.len() < 6 {
        return 0;
    }

    let mut seen: HashSet<(&str, &str, &str)> = HashSet::new();
    let mut repeated: HashSet<(&str, &str, &str)> = HashSet::new();
    for window in tokens.windows(3) {
        let gram = (window[0].as_str(), window[1].as_str(), window[2].as_str());
        if !seen.insert(gram) {
            repeated.insert(gram);
        }
    }
    repeated.len()
}

fn grammar_flag_count(text: &str) -> usize {
    let mut flags = 0usize;

    // Immediate word duplication ("the the").
    let tokens: Vec<String> = text
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .collect();
    for pair in tokens.windows(2) {
        if !pair[0].is_empty() && pair[0] == pair[1] {
            flags += 1;
        }
    }

    // Whitespace before closing punctuation.
    for marker in [" ,", " .", " !", " ?", " ;", " :"] {
        flags += text.matches(marker).count();
    }

    flags
}

/// Distinct proper-noun-like tokens, digit-bearing tokens and quoted spans of
/// the source that survive into the translation (case-insensitive, edit
/// distance <= 1). 1.0 when the source has none.
fn entity_score(source: &str, translation: &str) -> f32 {
    let entities = extract_entities(source);
    if entities.is_empty() {
        return 1.0;
    }

    let translation_lower = translation.to_lowercase();
    let translation_tokens: Vec<String> = translation_lower
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|t| !t.is_empty())
        .collect();

    let mut preserved = 0usize;
    for entity in &entities {
        let found = translation_lower.contains(entity.as_str())
            || translation_tokens
                .iter()
                .any(|token| levenshtein_within_one(token, entity));
        if found {
            preserved += 1;
        }
    }

    #[allow(clippy::cast_precision_loss)]
    let score = preserved as f32 / entities.len() as f32;
    score
}

fn extract_entities(source: &str) -> HashSet<String> {
    let mut entities = HashSet::new();

    let mut sentence_start = true;
    for raw in source.split_whitespace() {
        let token = raw.trim_matches(|c: char| !c.is_alphanumeric());
        if token.is_empty() {
            sentence_start = raw.chars().any(|c| TERMINATORS.contains(&c));
            continue;
        }

        let first_upper = token.chars().next().is_some_and(char::is_uppercase);
        let has_digit = token.chars().any(|c| c.is_ascii_digit());
        let all_upper = token.chars().all(|c| !c.is_alphabetic() || c.is_uppercase())
            && token.chars().count() > 1;

        // Sentence-initial capitals are ordinary words, not entities, unless
        // the token is fully uppercase (acronyms).
        if has_digit || all_upper || (first_upper && !sentence_start) {
            entities.insert(token.to_lowercase());
        }

        sentence_start = raw
            .chars()
            .last()
            .is_some_and(|c| TERMINATORS.contains(&c));
    }

    // Quoted spans count whole.
    for quote_pair in [('"', '"'), ('«', '»')] {
        let mut rest = source;
        while let Some(open) = rest.find(quote_pair.0) {
            let after = &rest[open + quote_pair.0.len_utf8()..];
            let Some(close) = after.find(quote_pair.1) else {
                break;
            };
            let span = after[..close].trim();
            if !span.is_empty() && span.chars().count() <= 80 {
                entities.insert(span.to_lowercase());
            }
            rest = &after[close + quote_pair.1.len_utf8()..];
        }
    }

    entities
}

fn levenshtein_within_one(a: &str, b: &str) -> bool {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let (short, long) = if a_chars.len() <= b_chars.len() {
        (&a_chars, &b_chars)
    } else {
        (&b_chars, &a_chars)
    };

    match long.len() - short.len() {
        0 => {
            let mismatches = short
                .iter()
                .zip(long.iter())
                .filter(|(x, y)| x != y)
                .count();
            mismatches <= 1
        }
        1 => {
            // One insertion: advance past at most one extra char in `long`.
            let mut i = 0;
            let mut j = 0;
            let mut skipped = false;
            while i < short.len() && j < long.len() {
                if short[i] == long[j] {
                    i += 1;
                    j += 1;
                } else if skipped {
                    return false;
                } else {
                    skipped = true;
                    j += 1;
                }
            }
            true
        }
        _ => false,
    }
}

/// For each inter-chunk boundary: 1 when the preceding translation ends with
/// a terminator or the following starts with an uppercase letter (caseless
/// scripts pass). Average over boundaries; 1.0 for a single chunk.
fn boundary_score(chunks: &[ChunkTranslation]) -> f32 {
    if chunks.len() <= 1 {
        return 1.0;
    }

    let mut coherent = 0usize;
    let boundaries = chunks.len() - 1;
    for pair in chunks.windows(2) {
        let prev_ends_terminated = pair[0]
            .text
            .trim_end()
            .chars()
            .last()
            .is_some_and(|c| TERMINATORS.contains(&c) || matches!(c, '"' | '»' | ')'));

        let next_starts_upper = pair[1]
            .text
            .trim_start()
            .chars()
            .find(|c| c.is_alphabetic())
            .is_none_or(|c| {
                // Scripts without case pass the check by construction.
                c.is_uppercase() || (c.to_lowercase().eq(c.to_uppercase()))
            });

        if prev_ends_terminated || next_starts_upper {
            coherent += 1;
        }
    }

    #[allow(clippy::cast_precision_loss)]
    let score = coherent as f32 / boundaries as f32;
    score
}
