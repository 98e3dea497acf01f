use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::result::TranslationResult;

/// Stored translation plus the metadata the cache layers need for TTL and
/// store-if-better decisions. `ttl_ms` grows monotonically with
/// `quality_at_store` (see `translation-cache`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub result: TranslationResult,
    pub quality_at_store: f32,
    pub stored_at: DateTime<Utc>,
    pub ttl_ms: u64,
    pub hit_count: u64,
}

impl CacheEntry {
    pub fn new(key: String, result: TranslationResult, ttl_ms: u64) -> Self {
        let quality_at_store = result.quality.composite;
        Self {
            key,
            result,
            quality_at_store,
            stored_at: Utc::now(),
            ttl_ms,
            hit_count: 0,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let ttl = Duration::milliseconds(i64::try_from(self.ttl_ms).unwrap_or(i64::MAX));
        now >= self.stored_at + ttl
    }
}
