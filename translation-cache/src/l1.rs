use std::collections::HashMap;

use chrono::Utc;
use common::types::cache_entry::CacheEntry;

/// Bounded in-process exact cache with least-recently-used eviction.
///
/// Recency is a monotone tick per access; eviction scans for the minimum,
/// which is fine at the capacities this cache runs at.
pub struct LruCache {
    capacity: usize,
    entries: HashMap<String, (CacheEntry, u64)>,
    tick: u64,
}

impl LruCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            tick: 0,
        }
    }

    pub fn get(&mut self, key: &str) -> Option<&CacheEntry> {
        // Expired entries are dropped on access rather than swept.
        let expired = self
            .entries
            .get(key)
            .is_some_and(|(entry, _)| entry.is_expired(Utc::now()));
        if expired {
            self.entries.remove(key);
            return None;
        }

        self.tick += 1;
        let tick = self.tick;
        self.entries.get_mut(key).map(|(entry, seen)| {
            *seen = tick;
            entry.hit_count += 1;
            &*entry
        })
    }

    /// Stored quality of a live entry, without touching recency.
    pub fn peek_quality(&self, key: &str) -> Option<(f32, common::types::result::TranslationPath)> {
        self.entries.get(key).and_then(|(entry, _)| {
            if entry.is_expired(Utc::now()) {
                None
            } else {
                Some((entry.quality_at_store, entry.result.path))
            }
        })
    }

    pub fn insert(&mut self, key: String, entry: CacheEntry) {
        self.tick += 1;
        self.entries.insert(key, (entry, self.tick));

        if self.entries.len() > self.capacity {
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, (_, seen))| *seen)
                .map(|(key, _)| key.clone())
            {
                self.entries.remove(&oldest);
            }
        }
    }

    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&str) -> bool,
    {
        self.entries.retain(|key, _| keep(key));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::quality::QualityReport;
    use common::types::result::{TranslationPath, TranslationResult};

    fn entry(key: &str, ttl_ms: u64) -> CacheEntry {
        CacheEntry::new(
            key.to_string(),
            TranslationResult {
                text: format!("translation for {key}"),
                detected_source: "en".to_string(),
                quality: QualityReport::neutral(),
                path: TranslationPath::Fast,
                chunks_used: 1,
                optimisation_applied: false,
                processing_ms: 1,
                cache_hit: false,
                warnings: Vec::new(),
            },
            ttl_ms,
        )
    }

    #[test]
    fn evicts_least_recently_used_at_capacity() {
        let mut cache = LruCache::new(2);
        cache.insert("a".to_string(), entry("a", 60_000));
        cache.insert("b".to_string(), entry("b", 60_000));

        // Touch "a" so "b" becomes the eviction candidate.
        assert!(cache.get("a").is_some());
        cache.insert("c".to_string(), entry("c", 60_000));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn expired_entries_miss_and_drop() {
        let mut cache = LruCache::new(4);
        cache.insert("gone".to_string(), entry("gone", 0));
        assert!(cache.get("gone").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn get_increments_hit_count() {
        let mut cache = LruCache::new(4);
        cache.insert("k".to_string(), entry("k", 60_000));
        assert!(cache.get("k").is_some());
        let entry = cache.get("k").expect("entry");
        assert_eq!(entry.hit_count, 2);
    }

    #[test]
    fn retain_filters_by_key() {
        let mut cache = LruCache::new(4);
        cache.insert("v1:mock:en:ru:x".to_string(), entry("x", 60_000));
        cache.insert("v1:other:en:ru:y".to_string(), entry("y", 60_000));

        cache.retain(|key| !key.starts_with("v1:mock:"));
        assert_eq!(cache.len(), 1);
        assert!(cache.get("v1:other:en:ru:y").is_some());
    }
}
