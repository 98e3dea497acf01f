use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Coarse content classification driving the pattern key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentClass {
    Emotional,
    Technical,
    General,
}

/// Small lexicon of emotionally loaded tokens; enough for bucketing, not
/// sentiment analysis.
const EMOTIONAL_TOKENS: &[&str] = &[
    "love", "hate", "happy", "sad", "angry", "wonderful", "terrible", "amazing", "awful",
    "люблю", "ненавижу", "счастлив", "грустно", "прекрасно", "ужасно",
];

pub fn classify_content(text: &str) -> ContentClass {
    let total_chars = text.chars().count().max(1);
    let exclamations = text.chars().filter(|c| *c == '!').count();

    let lowered = text.to_lowercase();
    let emotional_hits = EMOTIONAL_TOKENS
        .iter()
        .filter(|token| lowered.contains(*token))
        .count();
    if emotional_hits >= 2 || (exclamations >= 2 && exclamations * 200 / total_chars >= 1) {
        return ContentClass::Emotional;
    }

    let digit_tokens = text
        .split_whitespace()
        .filter(|token| token.chars().any(|c| c.is_ascii_digit()))
        .count();
    let symbol_tokens = text
        .split_whitespace()
        .filter(|token| token.contains(['_', '/', '(', ')', '=', '<', '>']))
        .count();
    let token_count = text.split_whitespace().count().max(1);
    if (digit_tokens + symbol_tokens) * 100 / token_count >= 15 {
        return ContentClass::Technical;
    }

    ContentClass::General
}

/// Pattern key: content features, not content. Two texts of similar shape
/// share an entry even when their bytes differ.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PatternKey {
    pub length_bucket: usize,
    pub sentence_bucket: usize,
    pub content_class: ContentClass,
    pub src: String,
    pub tgt: String,
}

impl PatternKey {
    pub fn from_text(text: &str, src: &str, tgt: &str) -> Self {
        let chars = text.chars().count();
        let sentences = text
            .chars()
            .filter(|c| matches!(c, '.' | '!' | '?'))
            .count()
            .max(1);
        Self {
            length_bucket: chars / 250,
            sentence_bucket: sentences / 5,
            content_class: classify_content(text),
            src: src.to_string(),
            tgt: tgt.to_string(),
        }
    }
}

/// What the optimiser learned for texts of this shape.
#[derive(Debug, Clone, Copy)]
pub struct PatternEntry {
    pub optimal_chunk_size: usize,
    pub expected_quality: f32,
    stored_at: DateTime<Utc>,
    ttl_ms: u64,
}

impl PatternEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let ttl = Duration::milliseconds(i64::try_from(self.ttl_ms).unwrap_or(i64::MAX));
        now >= self.stored_at + ttl
    }
}

/// Stores optimal chunk sizes keyed by content shape. Writes are serialized
/// per cache (a single lock), so concurrent optimiser outcomes for the same
/// key coalesce into one visible value.
pub struct PatternCache {
    entries: Mutex<HashMap<PatternKey, PatternEntry>>,
    ttl_ms: u64,
}

impl PatternCache {
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl_ms,
        }
    }

    pub fn lookup(&self, key: &PatternKey) -> Option<PatternEntry> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let expired = entries
            .get(key)
            .is_some_and(|entry| entry.is_expired(Utc::now()));
        if expired {
            entries.remove(key);
            return None;
        }
        entries.get(key).copied()
    }

    /// Record an optimiser outcome; a later, better outcome for the same key
    /// wins, a worse one is kept only when the stored entry expired.
    pub fn store(&self, key: PatternKey, optimal_chunk_size: usize, expected_quality: f32) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let replace = match entries.get(&key) {
            Some(existing) if !existing.is_expired(Utc::now()) => {
                expected_quality >= existing.expected_quality
            }
            _ => true,
        };
        if replace {
            entries.insert(
                key,
                PatternEntry {
                    optimal_chunk_size,
                    expected_quality,
                    stored_at: Utc::now(),
                    ttl_ms: self.ttl_ms,
                },
            );
        }
    }

    pub fn purge_expired(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        entries.retain(|_, entry| !entry.is_expired(now));
    }
}
