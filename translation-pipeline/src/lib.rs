pub mod chunker;
pub mod optimiser;
pub mod pipeline;
pub mod quality;
pub mod stream;

use std::sync::Arc;
use std::time::Instant;

use backend_registry::{ModelGuard, ModelRegistry};
use common::{
    error::AppError,
    language::{LanguageRegistry, AUTO},
    telemetry::{self, Telemetry},
    types::request::{Preference, TranslationRequest},
    types::result::TranslationResult,
    utils::config::AppConfig,
    utils::embedding::Embedder,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use translation_cache::TranslationCache;

use pipeline::{run_with_driver, AdaptiveDriver, FastPathDriver, PipelineContext};
use quality::Assessor;
use stream::StreamEvent;

/// Engine tunables, lifted from the application configuration.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub default_backend: String,
    pub max_text_chars: usize,
    pub fast_path_threshold: usize,
    pub default_chunk_size: usize,
    pub quality_threshold: f32,
    pub max_chunk_concurrency: usize,
    pub max_probe_concurrency: usize,
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            default_backend: config.default_backend.clone(),
            max_text_chars: config.max_text_chars,
            fast_path_threshold: config.fast_path_threshold,
            default_chunk_size: config.default_chunk_size,
            quality_threshold: config.quality_threshold,
            max_chunk_concurrency: config.max_chunk_concurrency,
            max_probe_concurrency: config.max_probe_concurrency,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// The adaptive controller: orchestrates cache lookup, path selection,
/// parallel chunk translation, the quality gate, optimisation and storage.
/// All collaborators are injected; the engine owns none of them.
pub struct TranslationEngine {
    pub(crate) registry: Arc<ModelRegistry>,
    pub(crate) languages: Arc<LanguageRegistry>,
    pub(crate) cache: Arc<TranslationCache>,
    pub(crate) assessor: Assessor,
    pub(crate) telemetry: Arc<dyn Telemetry>,
    pub(crate) settings: EngineSettings,
}

impl TranslationEngine {
    pub fn new(
        registry: Arc<ModelRegistry>,
        languages: Arc<LanguageRegistry>,
        cache: Arc<TranslationCache>,
        embedder: Option<Arc<dyn Embedder>>,
        telemetry: Arc<dyn Telemetry>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            registry,
            languages,
            cache,
            assessor: Assessor::new(embedder),
            telemetry,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn languages(&self) -> &Arc<LanguageRegistry> {
        &self.languages
    }

    pub fn cache(&self) -> &Arc<TranslationCache> {
        &self.cache
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Translate one request to completion.
    #[instrument(skip_all, fields(target = %request.target_lang))]
    pub async fn translate(&self, request: &TranslationRequest) -> Result<TranslationResult, AppError> {
        let started = Instant::now();
        let backend_label = self.backend_for(request);

        let outcome = self
            .translate_inner(request, started, None, CancellationToken::new(), false)
            .await;

        if let Ok(result) = &outcome {
            self.record_completion(result, &backend_label);
        }
        outcome
    }

    /// Progressive variant: stages stream out as events; the terminal event
    /// is `final` or `error`. A cancelled consumer ends the run silently and
    /// nothing is cached.
    pub async fn translate_progressive(
        &self,
        request: TranslationRequest,
        events: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) {
        let started = Instant::now();
        let backend_label = self.backend_for(&request);

        let outcome = self
            .translate_inner(&request, started, Some(events.clone()), cancel, true)
            .await;

        match outcome {
            Ok(result) => {
                if result.cache_hit {
                    // The pipeline never ran, so the protocol preamble is
                    // emitted here.
                    let preamble = StreamEvent::Start {
                        request_id: uuid::Uuid::new_v4().to_string(),
                        planned_chunks: result.chunks_used,
                    };
                    if events.send(preamble).await.is_err() {
                        return;
                    }
                }
                self.record_completion(&result, &backend_label);
                let _ = events.send(StreamEvent::Final { result }).await;
            }
            Err(AppError::Cancelled) => {
                info!("progressive translation cancelled by consumer");
            }
            Err(err) => {
                let _ = events.send(StreamEvent::from_error(&err)).await;
            }
        }
    }

    async fn translate_inner(
        &self,
        request: &TranslationRequest,
        started: Instant,
        events: Option<mpsc::Sender<StreamEvent>>,
        cancel: CancellationToken,
        stream_mode: bool,
    ) -> Result<TranslationResult, AppError> {
        request.validate(self.settings.max_text_chars)?;

        let tgt = self.languages.canonicalise(&request.target_lang)?;
        let src_or_auto = self.languages.canonicalise(&request.source_lang)?;
        let backend_name = self.backend_for(request);

        let guard = self.registry.acquire(&backend_name)?;

        let src = if src_or_auto == AUTO {
            self.resolve_detected(&guard, request).await?
        } else {
            src_or_auto
        };

        let src_code = self.languages.to_backend(&src, &backend_name)?;
        let tgt_code = self.languages.to_backend(&tgt, &backend_name)?;

        let floor = request.preference.quality_floor();
        if let Some((result, layer)) = self
            .cache
            .get(&backend_name, &src, &tgt, &request.text, floor)
            .await?
        {
            self.telemetry
                .incr_counter(telemetry::CACHE_HITS_TOTAL, &[("layer", layer.as_str())]);
            #[allow(clippy::cast_possible_truncation)]
            let processing_ms = started.elapsed().as_millis() as u64;
            return Ok(result.as_cached(processing_ms));
        }

        let chars = request.text.chars().count();
        let fast = chars < self.settings.fast_path_threshold
            || request.preference == Preference::Fast;
        let chunk_size = if fast {
            self.settings.default_chunk_size
        } else {
            self.cache
                .pattern_lookup(&request.text, &src, &tgt)
                .map_or(self.settings.default_chunk_size, |entry| {
                    entry.optimal_chunk_size
                })
        };

        let mut ctx = PipelineContext::new(
            self,
            request,
            &guard,
            backend_name,
            src,
            tgt,
            src_code,
            tgt_code,
            chunk_size,
            fast,
            started,
        );
        ctx.events = events;
        ctx.cancel = cancel;
        ctx.stream_mode = stream_mode;

        let run = if fast {
            run_with_driver(&FastPathDriver, &mut ctx).await
        } else {
            run_with_driver(&AdaptiveDriver, &mut ctx).await
        };

        match run {
            Ok(()) => ctx
                .take_final_result()
                .ok_or_else(|| AppError::InternalError("pipeline produced no result".into())),
            // Deadline expiry hands back the best committed result.
            Err(AppError::DeadlineExceeded) if ctx.has_committed() => {
                let path = ctx.final_path();
                ctx.build_result(path)
                    .ok_or(AppError::DeadlineExceeded)
            }
            Err(err) => Err(err),
        }
    }

    fn backend_for(&self, request: &TranslationRequest) -> String {
        request
            .backend_hint
            .clone()
            .unwrap_or_else(|| self.settings.default_backend.clone())
    }

    /// Resolve an `"auto"` source through the selected backend's detector.
    /// `"unknown"` (or an unusable detector answer) falls back to the
    /// request's declared default source.
    async fn resolve_detected(
        &self,
        guard: &ModelGuard,
        request: &TranslationRequest,
    ) -> Result<String, AppError> {
        let detected = guard.backend().detect(&request.text).await?;

        if detected != "unknown" {
            if let Ok(code) = self.languages.canonicalise(&detected) {
                if code != AUTO {
                    return Ok(code);
                }
            }
        }

        match &request.default_source {
            Some(fallback) => {
                let code = self.languages.canonicalise(fallback)?;
                if code == AUTO {
                    Err(AppError::LanguageDetectionFailed)
                } else {
                    Ok(code)
                }
            }
            None => Err(AppError::LanguageDetectionFailed),
        }
    }

    fn record_completion(&self, result: &TranslationResult, backend: &str) {
        self.telemetry.incr_counter(
            telemetry::TRANSLATIONS_TOTAL,
            &[("path", result.path.as_str()), ("backend", backend)],
        );
        #[allow(clippy::cast_precision_loss)]
        self.telemetry.record_histogram(
            telemetry::TRANSLATION_DURATION_MS,
            result.processing_ms as f64,
            &[("backend", backend)],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend_registry::{backends::mock::MockConfig, BackendKind, ModelDescriptor};
    use common::language::default_mapping_for;
    use common::storage::kv::SurrealKvClient;
    use common::telemetry::RecordingTelemetry;
    use common::types::quality::Grade;
    use common::types::request::Budgets;
    use common::types::result::TranslationPath;
    use translation_cache::CacheConfig;
    use uuid::Uuid;

    async fn engine_with_mock(
        mock: MockConfig,
        settings: EngineSettings,
    ) -> (TranslationEngine, Arc<RecordingTelemetry>) {
        let registry = Arc::new(ModelRegistry::new());
        registry
            .register(ModelDescriptor {
                name: "mock".to_string(),
                kind: BackendKind::Mock(mock),
            })
            .expect("register");
        registry.load("mock").await.expect("load");

        let mut languages = LanguageRegistry::new();
        languages.register_backend("mock", default_mapping_for("mock"));

        let kv = SurrealKvClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        let cache = Arc::new(TranslationCache::new(Arc::new(kv), CacheConfig::default()));

        let recording = Arc::new(RecordingTelemetry::new());
        let telemetry: Arc<dyn Telemetry> = Arc::clone(&recording) as Arc<dyn Telemetry>;

        let engine = TranslationEngine::new(
            registry,
            Arc::new(languages),
            cache,
            None,
            telemetry,
            settings,
        );
        (engine, recording)
    }

    fn long_text(sentences: usize) -> String {
        let mut text = String::new();
        for i in 0..sentences {
            if i > 0 {
                text.push(' ');
            }
            text.push_str(
                "Сегодня мы обсуждали планы на следующую неделю и договорились встретиться \
                 снова после праздников в старом парке у реки.",
            );
        }
        text
    }

    #[tokio::test]
    async fn short_fast_path_with_detection_and_cache_hit() {
        let (engine, telemetry) =
            engine_with_mock(MockConfig::default(), EngineSettings::default()).await;

        let request = TranslationRequest::new("Hello world", AUTO, "ru")
            .with_preference(Preference::Fast);

        let first = engine.translate(&request).await.expect("translate");
        assert_eq!(first.path, TranslationPath::Fast);
        assert_eq!(first.chunks_used, 1);
        assert_eq!(first.detected_source, "en");
        assert!(matches!(first.quality.grade, Grade::A | Grade::B));
        assert!(!first.cache_hit);
        assert!(first.warnings.is_empty());

        let second = engine.translate(&request).await.expect("translate");
        assert!(second.cache_hit);
        assert_eq!(second.path, TranslationPath::Cached);
        assert_eq!(second.text, first.text);

        assert_eq!(telemetry.counter_total(telemetry::CACHE_HITS_TOTAL), 1);
        assert_eq!(telemetry.counter_total(telemetry::TRANSLATIONS_TOTAL), 2);
    }

    #[tokio::test]
    async fn long_text_adaptive_path_applies_optimisation() {
        // Confidence decays with chunk length, so smaller chunks score
        // better and the optimiser has a slope to climb.
        let mock = MockConfig {
            confidence_scale_chars: Some(500),
            ..MockConfig::default()
        };
        let (engine, telemetry) = engine_with_mock(mock, EngineSettings::default()).await;

        let text = long_text(12);
        assert!(text.chars().count() > 1_000);
        let request = TranslationRequest::new(text, "ru", "en");

        let result = engine.translate(&request).await.expect("translate");
        assert_eq!(result.path, TranslationPath::Optimised);
        assert!(result.optimisation_applied);
        assert!(result.chunks_used >= 4);
        assert!(result.warnings.is_empty());

        let improvements = telemetry.histogram_values(telemetry::OPTIMISATION_IMPROVEMENT);
        assert_eq!(improvements.len(), 1);
        // Monotone quality: an applied optimisation improved by >= 0.05.
        assert!(improvements[0] >= 0.05);
    }

    #[tokio::test]
    async fn expired_optimisation_budget_keeps_fast_result() {
        // Low confidence keeps the initial composite under the quality gate,
        // so the optimiser is actually consulted and hits its budget.
        let mock = MockConfig {
            confidence: Some(0.2),
            ..MockConfig::default()
        };
        let (engine, _) = engine_with_mock(mock, EngineSettings::default()).await;

        let text = long_text(20);
        let request = TranslationRequest::new(text, "ru", "en").with_budgets(Budgets {
            max_latency_ms: 30_000,
            max_optimisation_ms: 1,
            allow_optimisation: true,
        });

        let result = engine.translate(&request).await.expect("translate");
        assert!(!result.optimisation_applied);
        assert_eq!(result.path, TranslationPath::Fast);
        assert!(result.processing_ms < request.budgets.max_latency_ms);
    }

    #[tokio::test]
    async fn optimisation_disallowed_is_never_run() {
        let mock = MockConfig {
            confidence: Some(0.5),
            ..MockConfig::default()
        };
        let (engine, telemetry) = engine_with_mock(mock, EngineSettings::default()).await;

        let request = TranslationRequest::new(long_text(12), "ru", "en").with_budgets(Budgets {
            max_latency_ms: 30_000,
            max_optimisation_ms: 5_000,
            allow_optimisation: false,
        });

        let result = engine.translate(&request).await.expect("translate");
        assert!(!result.optimisation_applied);
        assert!(telemetry
            .histogram_values(telemetry::OPTIMISATION_IMPROVEMENT)
            .is_empty());
    }

    #[tokio::test]
    async fn transient_chunk_failures_recover_silently() {
        let mock = MockConfig {
            fail_substring: Some("планы".to_string()),
            transient_failures: 2,
            ..MockConfig::default()
        };
        // Small chunks put the failing sentence in a chunk of its own.
        let mut settings = EngineSettings::default();
        settings.default_chunk_size = 80;
        let (engine, telemetry) = engine_with_mock(mock, settings).await;

        // One sentence carries the failure marker; it fails twice and then
        // succeeds inside the retry loop.
        let text = "Сегодня хорошая погода стоит в городе у моря и в горах тоже тепло. \
                    Мы обсуждали планы на следующую неделю во время обеда в старом кафе. \
                    Затем все вернулись к работе и закончили день довольно поздно вечером."
            .to_string();
        let request = TranslationRequest::new(text, "ru", "en")
            .with_budgets(Budgets {
                max_latency_ms: 30_000,
                max_optimisation_ms: 0,
                allow_optimisation: false,
            });

        let result = engine.translate(&request).await.expect("translate");
        assert!(result.warnings.is_empty());
        assert!(!result.text.contains(pipeline::UNTRANSLATED_MARKER));
        assert_eq!(
            telemetry.counter_total(telemetry::BACKEND_ERRORS_TOTAL),
            2
        );
    }

    #[tokio::test]
    async fn exhausted_chunk_falls_back_to_source_with_warning() {
        let mock = MockConfig {
            fail_substring: Some("планы".to_string()),
            transient_failures: 50,
            ..MockConfig::default()
        };
        let mut settings = EngineSettings::default();
        settings.default_chunk_size = 80;
        let (engine, _) = engine_with_mock(mock, settings).await;

        let text = "Сегодня хорошая погода стоит в городе у моря и в горах тоже тепло. \
                    Мы обсуждали планы на следующую неделю во время обеда в старом кафе. \
                    Затем все вернулись к работе и закончили день довольно поздно вечером."
            .to_string();
        let request = TranslationRequest::new(text, "ru", "en").with_budgets(Budgets {
            max_latency_ms: 30_000,
            max_optimisation_ms: 0,
            allow_optimisation: false,
        });

        let result = engine.translate(&request).await.expect("translate");
        assert!(!result.warnings.is_empty());
        assert!(result.text.contains(pipeline::UNTRANSLATED_MARKER));
        // Tainted results stay out of the cache.
        let second = engine.translate(&request).await.expect("translate");
        assert!(!second.cache_hit);
    }

    #[tokio::test]
    async fn unsupported_target_fails_before_any_backend_call() {
        let (engine, telemetry) =
            engine_with_mock(MockConfig::default(), EngineSettings::default()).await;

        let request = TranslationRequest::new("Hello world", "en", "xx");
        let err = engine.translate(&request).await.expect_err("must fail");
        assert!(matches!(err, AppError::UnsupportedLanguagePair(_)));
        assert_eq!(telemetry.counter_total(telemetry::TRANSLATIONS_TOTAL), 0);
    }

    #[tokio::test]
    async fn unknown_detection_uses_declared_default() {
        let mock = MockConfig {
            detected_language: "unknown".to_string(),
            ..MockConfig::default()
        };
        let (engine, _) = engine_with_mock(mock, EngineSettings::default()).await;

        let mut request = TranslationRequest::new("Bonjour tout le monde", AUTO, "en");
        request.default_source = Some("fr".to_string());
        let result = engine.translate(&request).await.expect("translate");
        assert_eq!(result.detected_source, "fr");

        let request = TranslationRequest::new("Bonjour tout le monde encore", AUTO, "en");
        let err = engine.translate(&request).await.expect_err("must fail");
        assert!(matches!(err, AppError::LanguageDetectionFailed));
    }

    #[tokio::test]
    async fn progressive_stream_orders_events() {
        let (engine, _) = engine_with_mock(MockConfig::default(), EngineSettings::default()).await;

        let (tx, mut rx) = mpsc::channel(64);
        let request = TranslationRequest::new(long_text(8), "ru", "en");
        engine
            .translate_progressive(request, tx, CancellationToken::new())
            .await;

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        assert!(matches!(events.first(), Some(StreamEvent::Start { .. })));
        assert!(matches!(events.last(), Some(StreamEvent::Final { .. })));

        let chunk_count = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::Chunk { .. }))
            .count();
        assert!(chunk_count >= 1);

        let partial_pos = events
            .iter()
            .position(|e| matches!(e, StreamEvent::Partial { .. }))
            .expect("partial event");
        let last_chunk_pos = events
            .iter()
            .rposition(|e| matches!(e, StreamEvent::Chunk { .. }))
            .expect("chunk event");
        assert!(partial_pos > last_chunk_pos);

        if let Some(StreamEvent::Final { result }) = events.last() {
            assert_eq!(result.path, TranslationPath::Streamed);
        }
    }

    #[tokio::test]
    async fn cancelled_stream_stores_nothing() {
        let mock = MockConfig {
            latency_ms: 30,
            ..MockConfig::default()
        };
        let (engine, _) = engine_with_mock(mock, EngineSettings::default()).await;

        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let request = TranslationRequest::new(long_text(10), "ru", "en");

        let run = {
            let cancel = cancel.clone();
            async move {
                engine.translate_progressive(request, tx, cancel).await;
                engine
            }
        };
        let consumer = async {
            // Read two chunk events, then walk away.
            let mut seen_chunks = 0;
            while let Some(event) = rx.recv().await {
                if matches!(event, StreamEvent::Chunk { .. }) {
                    seen_chunks += 1;
                    if seen_chunks == 2 {
                        break;
                    }
                }
            }
            drop(rx);
            cancel.cancel();
        };

        let (engine, ()) = tokio::join!(run, consumer);
        assert_eq!(engine.cache().l1_len(), 0);
    }

    #[tokio::test]
    async fn idempotent_requests_hit_the_cache_byte_identically() {
        let (engine, _) = engine_with_mock(MockConfig::default(), EngineSettings::default()).await;

        let request = TranslationRequest::new(long_text(6), "ru", "en");
        let first = engine.translate(&request).await.expect("translate");
        let second = engine.translate(&request).await.expect("translate");

        assert_eq!(first.text, second.text);
        assert!(second.cache_hit);
        assert_eq!(second.path, TranslationPath::Cached);
    }

    #[tokio::test]
    async fn missing_backend_is_a_resource_error() {
        let (engine, _) = engine_with_mock(MockConfig::default(), EngineSettings::default()).await;

        let mut request = TranslationRequest::new("Hello world", "en", "ru");
        request.backend_hint = Some("absent".to_string());
        let err = engine.translate(&request).await.expect_err("must fail");
        assert!(matches!(err, AppError::ModelNotLoaded(_)));
    }
}
