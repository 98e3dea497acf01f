pub mod key;
pub mod l1;
pub mod pattern;

use std::sync::{Arc, Mutex};

use common::{
    error::AppError,
    storage::kv::KvStore,
    types::{cache_entry::CacheEntry, result::TranslationPath, result::TranslationResult},
};
use tracing::{debug, warn};

use l1::LruCache;
use pattern::{PatternCache, PatternKey};

pub use pattern::{classify_content, ContentClass, PatternEntry};

/// Which layer satisfied a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitLayer {
    L1,
    L2,
}

impl HitLayer {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::L1 => "l1",
            Self::L2 => "l2",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub base_ttl_ms: u64,
    pub l1_capacity: usize,
    /// Results below this composite are never stored.
    pub min_store_quality: f32,
    /// An optimised result replaces a stored fast-path result only when it
    /// improves on it by at least this much.
    pub min_overwrite_improvement: f32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            base_ttl_ms: 3_600_000,
            l1_capacity: 1_024,
            min_store_quality: 0.55,
            min_overwrite_improvement: 0.05,
        }
    }
}

/// Layered translation cache: L1 exact in-process, L2 exact behind the
/// injected `KvStore`, plus the pattern cache of optimal chunk sizes.
pub struct TranslationCache {
    l1: Mutex<LruCache>,
    kv: Arc<dyn KvStore>,
    pattern: PatternCache,
    config: CacheConfig,
}

impl TranslationCache {
    pub fn new(kv: Arc<dyn KvStore>, config: CacheConfig) -> Self {
        Self {
            l1: Mutex::new(LruCache::new(config.l1_capacity)),
            kv,
            pattern: PatternCache::new(config.base_ttl_ms),
            config,
        }
    }

    /// Look up an exact entry satisfying `quality_floor`, trying L1 then L2.
    /// An L2 hit is promoted into L1.
    pub async fn get(
        &self,
        backend: &str,
        src: &str,
        tgt: &str,
        text: &str,
        quality_floor: f32,
    ) -> Result<Option<(TranslationResult, HitLayer)>, AppError> {
        let key = key::exact_key(backend, src, tgt, text);

        {
            let mut l1 = self.l1.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = l1.get(&key) {
                if entry.quality_at_store >= quality_floor {
                    return Ok(Some((entry.result.clone(), HitLayer::L1)));
                }
                // Present but below the floor; L2 holds the same entry, so a
                // deeper lookup cannot do better.
                return Ok(None);
            }
        }

        let Some(raw) = self.kv.get(&key).await? else {
            return Ok(None);
        };

        let entry: CacheEntry = match serde_json::from_slice(&raw) {
            Ok(entry) => entry,
            Err(err) => {
                // Corrupt L2 payloads are dropped, not fatal.
                warn!(key, error = %err, "discarding unreadable cache entry");
                self.kv.delete_prefix(&key).await?;
                return Ok(None);
            }
        };

        if entry.quality_at_store < quality_floor {
            return Ok(None);
        }

        let result = entry.result.clone();
        {
            let mut l1 = self.l1.lock().unwrap_or_else(|e| e.into_inner());
            l1.insert(key, entry);
        }
        Ok(Some((result, HitLayer::L2)))
    }

    /// Store a successful result in both exact layers, subject to the quality
    /// floor and the optimised-overwrite rule. Returns whether it was stored.
    pub async fn put(
        &self,
        backend: &str,
        src: &str,
        tgt: &str,
        text: &str,
        result: &TranslationResult,
    ) -> Result<bool, AppError> {
        let composite = result.quality.composite;
        if composite < self.config.min_store_quality {
            debug!(composite, "result below storage floor, not cached");
            return Ok(false);
        }

        let key = key::exact_key(backend, src, tgt, text);
        let ttl_ms = quality_weighted_ttl(self.config.base_ttl_ms, composite);

        // The store-if-better decision and the L1 write happen under one lock.
        {
            let mut l1 = self.l1.lock().unwrap_or_else(|e| e.into_inner());
            if let Some((stored_quality, stored_path)) = l1.peek_quality(&key) {
                let replaces_fast = result.path == TranslationPath::Optimised
                    && stored_path == TranslationPath::Fast;
                if replaces_fast
                    && composite < stored_quality + self.config.min_overwrite_improvement
                {
                    return Ok(false);
                }
            }
            let entry = CacheEntry::new(key.clone(), sanitized_for_store(result), ttl_ms);
            l1.insert(key.clone(), entry);
        }

        let entry = CacheEntry::new(key.clone(), sanitized_for_store(result), ttl_ms);
        let raw = serde_json::to_vec(&entry)?;
        self.kv.put(&key, raw, ttl_ms).await?;
        Ok(true)
    }

    /// Purge every entry written for `backend`, in both exact layers.
    pub async fn invalidate_backend(&self, backend: &str) -> Result<(), AppError> {
        let prefix = key::backend_prefix(backend);
        {
            let mut l1 = self.l1.lock().unwrap_or_else(|e| e.into_inner());
            l1.retain(|key| !key.starts_with(&prefix));
        }
        self.kv.delete_prefix(&prefix).await
    }

    /// Optimal chunk size learned for texts shaped like this one.
    pub fn pattern_lookup(&self, text: &str, src: &str, tgt: &str) -> Option<PatternEntry> {
        let key = PatternKey::from_text(text, src, tgt);
        self.pattern.lookup(&key)
    }

    pub fn pattern_store(
        &self,
        text: &str,
        src: &str,
        tgt: &str,
        optimal_chunk_size: usize,
        expected_quality: f32,
    ) {
        let key = PatternKey::from_text(text, src, tgt);
        self.pattern.store(key, optimal_chunk_size, expected_quality);
    }

    pub fn pattern_purge_expired(&self) {
        self.pattern.purge_expired();
    }

    pub fn l1_len(&self) -> usize {
        self.l1.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Cheap reachability probe against the L2 store, for health reporting.
    pub async fn l2_healthy(&self) -> bool {
        self.kv.get("__health_probe").await.is_ok()
    }
}

/// TTL grows monotonically with quality: `base · (1 + composite)`.
fn quality_weighted_ttl(base_ttl_ms: u64, composite: f32) -> u64 {
    let factor = 1.0 + f64::from(composite.clamp(0.0, 1.0));
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let ttl = (base_ttl_ms as f64 * factor) as u64;
    ttl
}

/// Stored copies never claim to be cache hits themselves.
fn sanitized_for_store(result: &TranslationResult) -> TranslationResult {
    let mut copy = result.clone();
    copy.cache_hit = false;
    copy
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::kv::SurrealKvClient;
    use common::types::quality::{Grade, QualityComponents, QualityReport};
    use uuid::Uuid;

    async fn setup_cache() -> TranslationCache {
        let kv = SurrealKvClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        TranslationCache::new(Arc::new(kv), CacheConfig::default())
    }

    fn result_with_quality(composite: f32, path: TranslationPath) -> TranslationResult {
        let components = QualityComponents {
            confidence: composite,
            length_consistency: composite,
            structure_integrity: composite,
            entity_preservation: composite,
            boundary_coherence: composite,
            semantic_coherence: None,
        };
        TranslationResult {
            text: "Привет, мир".to_string(),
            detected_source: "en".to_string(),
            quality: QualityReport {
                composite,
                grade: Grade::from_composite(composite),
                components,
            },
            path,
            chunks_used: 1,
            optimisation_applied: path == TranslationPath::Optimised,
            processing_ms: 5,
            cache_hit: false,
            warnings: Vec::new(),
        }
    }

    #[tokio::test]
    async fn store_then_hit_l1() {
        let cache = setup_cache().await;
        let result = result_with_quality(0.9, TranslationPath::Fast);

        let stored = cache
            .put("mock", "en", "ru", "Hello world", &result)
            .await
            .expect("put");
        assert!(stored);

        let (hit, layer) = cache
            .get("mock", "en", "ru", "Hello world", 0.0)
            .await
            .expect("get")
            .expect("hit");
        assert_eq!(layer, HitLayer::L1);
        assert_eq!(hit.text, "Привет, мир");
        assert!(!hit.cache_hit);
    }

    #[tokio::test]
    async fn l2_hit_promotes_into_l1() {
        let kv = Arc::new(
            SurrealKvClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("Failed to start in-memory surrealdb"),
        );
        let writer = TranslationCache::new(Arc::clone(&kv) as Arc<dyn KvStore>, CacheConfig::default());
        let result = result_with_quality(0.9, TranslationPath::Fast);
        writer
            .put("mock", "en", "ru", "Hello world", &result)
            .await
            .expect("put");

        // Fresh cache instance sharing the KV: empty L1, populated L2.
        let reader = TranslationCache::new(kv, CacheConfig::default());
        let (_, layer) = reader
            .get("mock", "en", "ru", "Hello world", 0.0)
            .await
            .expect("get")
            .expect("hit");
        assert_eq!(layer, HitLayer::L2);

        let (_, layer) = reader
            .get("mock", "en", "ru", "Hello world", 0.0)
            .await
            .expect("get")
            .expect("hit");
        assert_eq!(layer, HitLayer::L1);
    }

    #[tokio::test]
    async fn low_quality_results_are_not_stored() {
        let cache = setup_cache().await;
        let result = result_with_quality(0.5, TranslationPath::Fast);

        let stored = cache
            .put("mock", "en", "ru", "Hello world", &result)
            .await
            .expect("put");
        assert!(!stored);
        assert!(cache
            .get("mock", "en", "ru", "Hello world", 0.0)
            .await
            .expect("get")
            .is_none());
    }

    #[tokio::test]
    async fn quality_floor_filters_hits() {
        let cache = setup_cache().await;
        let result = result_with_quality(0.7, TranslationPath::Fast);
        cache
            .put("mock", "en", "ru", "Hello world", &result)
            .await
            .expect("put");

        assert!(cache
            .get("mock", "en", "ru", "Hello world", 0.8)
            .await
            .expect("get")
            .is_none());
        assert!(cache
            .get("mock", "en", "ru", "Hello world", 0.55)
            .await
            .expect("get")
            .is_some());
    }

    #[tokio::test]
    async fn optimised_overwrites_fast_only_on_clear_improvement() {
        let cache = setup_cache().await;
        cache
            .put(
                "mock",
                "en",
                "ru",
                "Hello world",
                &result_with_quality(0.8, TranslationPath::Fast),
            )
            .await
            .expect("put");

        // 0.82 is within the 0.05 band: rejected.
        let stored = cache
            .put(
                "mock",
                "en",
                "ru",
                "Hello world",
                &result_with_quality(0.82, TranslationPath::Optimised),
            )
            .await
            .expect("put");
        assert!(!stored);

        let stored = cache
            .put(
                "mock",
                "en",
                "ru",
                "Hello world",
                &result_with_quality(0.86, TranslationPath::Optimised),
            )
            .await
            .expect("put");
        assert!(stored);

        let (hit, _) = cache
            .get("mock", "en", "ru", "Hello world", 0.0)
            .await
            .expect("get")
            .expect("hit");
        assert_eq!(hit.path, TranslationPath::Optimised);
    }

    #[tokio::test]
    async fn invalidate_backend_purges_both_layers() {
        let cache = setup_cache().await;
        cache
            .put(
                "mock",
                "en",
                "ru",
                "Hello world",
                &result_with_quality(0.9, TranslationPath::Fast),
            )
            .await
            .expect("put");
        cache
            .put(
                "other",
                "en",
                "ru",
                "Hello world",
                &result_with_quality(0.9, TranslationPath::Fast),
            )
            .await
            .expect("put");

        cache.invalidate_backend("mock").await.expect("invalidate");

        assert!(cache
            .get("mock", "en", "ru", "Hello world", 0.0)
            .await
            .expect("get")
            .is_none());
        assert!(cache
            .get("other", "en", "ru", "Hello world", 0.0)
            .await
            .expect("get")
            .is_some());
    }

    #[tokio::test]
    async fn pattern_roundtrip() {
        let cache = setup_cache().await;
        let text = "One sentence here. Another one there. And a third for shape.";

        assert!(cache.pattern_lookup(text, "en", "ru").is_none());
        cache.pattern_store(text, "en", "ru", 320, 0.85);

        let entry = cache.pattern_lookup(text, "en", "ru").expect("entry");
        assert_eq!(entry.optimal_chunk_size, 320);
    }
}
