use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use backend_registry::{is_input_too_long, ModelGuard, Translator};
use common::{
    error::AppError,
    telemetry::{self, Telemetry},
    types::chunk::{Chunk, ChunkKind, ChunkTranslation, Segmentation},
    types::quality::QualityReport,
    types::request::TranslationRequest,
    types::result::{TranslationPath, TranslationResult},
};
use futures::{stream, StreamExt};
use tokio::sync::mpsc;
use tokio_retry::{strategy::ExponentialBackoff, RetryIf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    chunker::{chunk_text, MIN_CHUNK_SIZE},
    optimiser::{self, ProbeOutcome, ProbeRecord},
    stream::StreamEvent,
    TranslationEngine,
};

use super::{PipelineStage, PipelineStageTimings, StageKind};

/// Marker prepended when a chunk exhausted every recovery path and fell back
/// to its untranslated source text.
pub const UNTRANSLATED_MARKER: &str = "[untranslated]";

/// Mutable state threaded through one request's stages.
pub struct PipelineContext<'a> {
    pub engine: &'a TranslationEngine,
    pub request: &'a TranslationRequest,
    pub guard: &'a ModelGuard,
    pub request_id: String,
    pub backend_name: String,
    pub src: String,
    pub tgt: String,
    pub src_code: String,
    pub tgt_code: String,
    pub chunk_size: usize,
    pub single_chunk: bool,
    pub stream_mode: bool,
    pub started: Instant,
    pub deadline: Instant,
    pub segmentation: Option<Segmentation>,
    pub translations: Vec<ChunkTranslation>,
    pub assembled: Option<String>,
    pub report: Option<QualityReport>,
    pub warnings: Vec<usize>,
    pub optimisation_applied: bool,
    pub trace: Vec<ProbeRecord>,
    pub events: Option<mpsc::Sender<StreamEvent>>,
    pub stream_started: bool,
    pub cancel: CancellationToken,
    final_result: Option<TranslationResult>,
    stage_timings: PipelineStageTimings,
}

#[allow(clippy::too_many_arguments)]
impl<'a> PipelineContext<'a> {
    pub(crate) fn new(
        engine: &'a TranslationEngine,
        request: &'a TranslationRequest,
        guard: &'a ModelGuard,
        backend_name: String,
        src: String,
        tgt: String,
        src_code: String,
        tgt_code: String,
        chunk_size: usize,
        single_chunk: bool,
        started: Instant,
    ) -> Self {
        let deadline = started + Duration::from_millis(request.budgets.max_latency_ms);
        Self {
            engine,
            request,
            guard,
            request_id: uuid::Uuid::new_v4().to_string(),
            backend_name,
            src,
            tgt,
            src_code,
            tgt_code,
            chunk_size,
            single_chunk,
            stream_mode: false,
            started,
            deadline,
            segmentation: None,
            translations: Vec::new(),
            assembled: None,
            report: None,
            warnings: Vec::new(),
            optimisation_applied: false,
            trace: Vec::new(),
            events: None,
            stream_started: false,
            cancel: CancellationToken::new(),
            final_result: None,
            stage_timings: PipelineStageTimings::default(),
        }
    }

    pub fn deadline_exceeded(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub(crate) fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub(crate) fn record_stage_duration(&mut self, kind: StageKind, duration: Duration) {
        self.stage_timings.record(kind, duration);
    }

    pub fn take_stage_timings(&mut self) -> PipelineStageTimings {
        std::mem::take(&mut self.stage_timings)
    }

    /// A fast-path result exists that could be committed right now.
    pub(crate) fn has_committed(&self) -> bool {
        self.assembled.is_some() && self.report.is_some()
    }

    pub(crate) fn build_result(&self, path: TranslationPath) -> Option<TranslationResult> {
        let text = self.assembled.clone()?;
        let quality = self.report.as_ref().copied()?;
        #[allow(clippy::cast_possible_truncation)]
        let processing_ms = self.started.elapsed().as_millis() as u64;
        Some(TranslationResult {
            text,
            detected_source: self.src.clone(),
            quality,
            path,
            chunks_used: self.translations.len(),
            optimisation_applied: self.optimisation_applied,
            processing_ms,
            cache_hit: false,
            warnings: self.warnings.clone(),
        })
    }

    pub(crate) fn final_path(&self) -> TranslationPath {
        if self.stream_mode {
            TranslationPath::Streamed
        } else if self.optimisation_applied {
            TranslationPath::Optimised
        } else {
            TranslationPath::Fast
        }
    }

    pub(crate) fn take_final_result(&mut self) -> Option<TranslationResult> {
        self.final_result.take()
    }

    fn translation_env(&self) -> TranslationEnv<'_> {
        TranslationEnv {
            backend: self.guard.backend(),
            backend_name: &self.backend_name,
            src_code: &self.src_code,
            tgt_code: &self.tgt_code,
            concurrency: self.engine.settings.max_chunk_concurrency,
            telemetry: &self.engine.telemetry,
        }
    }
}

/// Everything a chunk-translation fan-out needs, detached from the context so
/// optimiser probes can run the same code path.
#[derive(Clone, Copy)]
pub(crate) struct TranslationEnv<'a> {
    pub backend: &'a Arc<dyn Translator>,
    pub backend_name: &'a str,
    pub src_code: &'a str,
    pub tgt_code: &'a str,
    pub concurrency: usize,
    pub telemetry: &'a Arc<dyn Telemetry>,
}

pub(crate) struct ChunkStage;

#[async_trait]
impl PipelineStage for ChunkStage {
    fn kind(&self) -> StageKind {
        StageKind::Chunk
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        let text = &ctx.request.text;
        let max_input = ctx.guard.backend().capabilities().max_input_chars;

        let segmentation = if ctx.single_chunk && text.chars().count() <= max_input {
            whole_text_segmentation(text)
        } else {
            chunk_text(text, ctx.chunk_size)?
        };

        debug!(
            chunks = segmentation.len(),
            chunk_size = ctx.chunk_size,
            "text segmented"
        );
        ctx.segmentation = Some(segmentation);
        Ok(())
    }
}

fn whole_text_segmentation(text: &str) -> Segmentation {
    Segmentation {
        chunks: vec![Chunk {
            index: 0,
            text: text.to_string(),
            byte_range: 0..text.len(),
            kind: ChunkKind::Paragraph,
        }],
        separators: Vec::new(),
    }
}

pub(crate) struct TranslateStage;

#[async_trait]
impl PipelineStage for TranslateStage {
    fn kind(&self) -> StageKind {
        StageKind::Translate
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        let segmentation = ctx
            .segmentation
            .clone()
            .ok_or_else(|| AppError::InternalError("translate stage before chunking".into()))?;

        if let Some(events) = ctx.events.clone() {
            if !ctx.stream_started {
                ctx.stream_started = true;
                let event = StreamEvent::Start {
                    request_id: ctx.request_id.clone(),
                    planned_chunks: segmentation.len(),
                };
                if events.send(event).await.is_err() {
                    return Err(AppError::Cancelled);
                }
            }
        }

        let env = ctx.translation_env();
        let translations = translate_segmentation(
            &env,
            &segmentation,
            ctx.deadline,
            &ctx.cancel,
            ctx.events.as_ref(),
        )
        .await?;

        ctx.warnings = translations
            .iter()
            .filter(|t| t.failed())
            .map(|t| t.index)
            .collect();
        ctx.assembled = Some(assemble(&segmentation, &translations));
        ctx.translations = translations;
        Ok(())
    }
}

pub(crate) struct AssessStage;

#[async_trait]
impl PipelineStage for AssessStage {
    fn kind(&self) -> StageKind {
        StageKind::Assess
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        let assembled = ctx
            .assembled
            .clone()
            .ok_or_else(|| AppError::InternalError("assess stage before assembly".into()))?;

        let report = ctx
            .engine
            .assessor
            .assess(&ctx.request.text, &assembled, &ctx.translations)
            .await;
        ctx.report = Some(report);

        if let Some(events) = ctx.events.clone() {
            let event = StreamEvent::Partial {
                text: assembled,
                preliminary_quality: report.composite,
            };
            if events.send(event).await.is_err() {
                return Err(AppError::Cancelled);
            }
        }
        Ok(())
    }
}

pub(crate) struct OptimiseStage;

#[async_trait]
impl PipelineStage for OptimiseStage {
    fn kind(&self) -> StageKind {
        StageKind::Optimise
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        let initial = ctx
            .report
            .ok_or_else(|| AppError::InternalError("optimise stage before assessment".into()))?;

        let text_chars = ctx.request.text.chars().count();
        let settings = &ctx.engine.settings;

        // Quality gate plus the optimiser's own contract.
        if initial.composite >= settings.quality_threshold
            || !optimiser::should_optimise(
                ctx.request.budgets.allow_optimisation,
                text_chars,
                initial.composite,
            )
        {
            return Ok(());
        }

        #[allow(clippy::cast_possible_truncation)]
        let remaining_ms = ctx.remaining().as_millis() as u64;
        let budget_ms = ctx.request.budgets.max_optimisation_ms.min(remaining_ms);
        if budget_ms == 0 {
            return Ok(());
        }

        let engine = ctx.engine;
        let request = ctx.request;
        let env = ctx.translation_env();
        let deadline = ctx.deadline;
        let cancel = ctx.cancel.clone();

        let probe = move |size: usize| {
            let env = env;
            let cancel = cancel.clone();
            async move {
                let segmentation = chunk_text(&request.text, size)?;
                let translations =
                    translate_segmentation(&env, &segmentation, deadline, &cancel, None).await?;
                let assembled = assemble(&segmentation, &translations);
                let report = engine
                    .assessor
                    .assess(&request.text, &assembled, &translations)
                    .await;
                Ok(ProbeOutcome {
                    quality: report.composite,
                    result: (segmentation, translations, assembled, report),
                })
            }
        };

        let outcome = match optimiser::optimise(
            text_chars,
            budget_ms,
            settings.max_probe_concurrency,
            probe,
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(AppError::Cancelled) => return Err(AppError::Cancelled),
            Err(err) => {
                // Optimisation is best-effort; the committed fast-path result
                // stands.
                warn!(error = %err, "optimisation abandoned");
                return Ok(());
            }
        };

        engine.cache.pattern_store(
            &request.text,
            &ctx.src,
            &ctx.tgt,
            outcome.best_size,
            outcome.best_quality,
        );
        ctx.trace = outcome.trace;

        let improvement = outcome.best_quality - initial.composite;
        if improvement >= 0.05 {
            let (segmentation, translations, assembled, report) = outcome.best_result;
            engine.telemetry.record_histogram(
                telemetry::OPTIMISATION_IMPROVEMENT,
                f64::from(improvement),
                &[("backend", ctx.backend_name.as_str())],
            );

            ctx.warnings = translations
                .iter()
                .filter(|t| t.failed())
                .map(|t| t.index)
                .collect();
            ctx.segmentation = Some(segmentation);
            ctx.translations = translations;
            ctx.assembled = Some(assembled.clone());
            ctx.report = Some(report);
            ctx.optimisation_applied = true;

            if let Some(events) = ctx.events.clone() {
                let event = StreamEvent::Improved {
                    text: assembled,
                    quality: report.composite,
                };
                if events.send(event).await.is_err() {
                    return Err(AppError::Cancelled);
                }
            }
        }
        Ok(())
    }
}

pub(crate) struct StoreStage;

#[async_trait]
impl PipelineStage for StoreStage {
    fn kind(&self) -> StageKind {
        StageKind::Store
    }

    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError> {
        if ctx.cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let path = ctx.final_path();
        let result = ctx
            .build_result(path)
            .ok_or_else(|| AppError::InternalError("store stage before assessment".into()))?;

        // Partial failures taint the text; only clean results are cached.
        if ctx.warnings.is_empty() {
            if let Err(err) = ctx
                .engine
                .cache
                .put(&ctx.backend_name, &ctx.src, &ctx.tgt, &ctx.request.text, &result)
                .await
            {
                warn!(error = %err, "cache store failed");
            }
        }

        ctx.final_result = Some(result);
        Ok(())
    }
}

/// Translate every chunk of a segmentation, at most `concurrency` in flight,
/// reassembling strictly by index. Observes the deadline and the consumer's
/// cancellation at every completion.
pub(crate) async fn translate_segmentation(
    env: &TranslationEnv<'_>,
    segmentation: &Segmentation,
    deadline: Instant,
    cancel: &CancellationToken,
    events: Option<&mpsc::Sender<StreamEvent>>,
) -> Result<Vec<ChunkTranslation>, AppError> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(AppError::DeadlineExceeded);
    }

    let planned = segmentation.len();
    let fan_out = async {
        let pending: Vec<Pin<Box<dyn Future<Output = Result<ChunkTranslation, AppError>> + Send + '_>>> =
            segmentation
                .chunks
                .iter()
                .map(|chunk| Box::pin(translate_chunk_with_recovery(env, chunk)) as _)
                .collect();
        let mut in_flight = stream::iter(pending).buffer_unordered(env.concurrency.max(1));

        let mut slots: Vec<Option<ChunkTranslation>> = Vec::new();
        slots.resize_with(planned, || None);
        let mut completed = 0usize;

        while let Some(outcome) = in_flight.next().await {
            let translation = outcome?;
            completed += 1;

            if let Some(tx) = events {
                #[allow(clippy::cast_precision_loss)]
                let progress = completed as f32 / planned.max(1) as f32;
                let event = StreamEvent::Chunk {
                    index: translation.index,
                    text: translation.text.clone(),
                    cumulative_progress: progress,
                };
                if tx.send(event).await.is_err() {
                    return Err(AppError::Cancelled);
                }
            }

            let index = translation.index;
            *slots
                .get_mut(index)
                .ok_or_else(|| AppError::InternalError(format!("chunk index {index} out of range")))? =
                Some(translation);
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| AppError::InternalError(format!("chunk {index} never completed")))
            })
            .collect::<Result<Vec<_>, _>>()
    };

    tokio::select! {
        () = cancel.cancelled() => Err(AppError::Cancelled),
        outcome = tokio::time::timeout(remaining, fan_out) => match outcome {
            Err(_) => Err(AppError::DeadlineExceeded),
            Ok(result) => result,
        },
    }
}

/// Join chunk translations in index order with the segmentation's declared
/// separators.
pub(crate) fn assemble(segmentation: &Segmentation, translations: &[ChunkTranslation]) -> String {
    let mut out = String::new();
    for (i, translation) in translations.iter().enumerate() {
        if i > 0 {
            match segmentation.separators.get(i - 1) {
                Some(sep) if !sep.is_empty() => out.push_str(sep),
                _ => out.push(' '),
            }
        }
        out.push_str(&translation.text);
    }
    out
}

/// Per-chunk policy: two retries with exponential backoff on transient
/// errors, then one forced re-split, then fall back to the source text with
/// an inline marker. Fatal errors (other than input-too-long) propagate and
/// fail the request.
async fn translate_chunk_with_recovery(
    env: &TranslationEnv<'_>,
    chunk: &Chunk,
) -> Result<ChunkTranslation, AppError> {
    let started = Instant::now();

    let attempt = || async {
        match env
            .backend
            .translate(&chunk.text, env.src_code, env.tgt_code)
            .await
        {
            Ok(translated) => Ok(translated),
            Err(err) => {
                record_backend_error(env, &err);
                Err(err)
            }
        }
    };

    // 50ms then 100ms between attempts.
    let strategy = ExponentialBackoff::from_millis(2).factor(25).take(2);
    let first_try = RetryIf::spawn(strategy, attempt, |err: &AppError| err.retryable()).await;

    #[allow(clippy::cast_possible_truncation)]
    let elapsed = |started: Instant| started.elapsed().as_millis() as u64;

    match first_try {
        Ok(translated) => Ok(ChunkTranslation {
            index: chunk.index,
            text: translated.text,
            confidence: translated.confidence,
            elapsed_ms: elapsed(started),
            error: None,
        }),
        Err(err) if err.retryable() || is_input_too_long(&err) => {
            debug!(chunk = chunk.index, error = %err, "retries exhausted, splitting once");
            match translate_split_fallback(env, chunk).await {
                Ok((text, confidence)) => Ok(ChunkTranslation {
                    index: chunk.index,
                    text,
                    confidence,
                    elapsed_ms: elapsed(started),
                    error: None,
                }),
                Err(split_err) if split_err.retryable() || is_input_too_long(&split_err) => {
                    warn!(chunk = chunk.index, error = %split_err, "chunk failed, keeping source text");
                    Ok(ChunkTranslation {
                        index: chunk.index,
                        text: format!("{UNTRANSLATED_MARKER} {}", chunk.text),
                        confidence: Some(0.0),
                        elapsed_ms: elapsed(started),
                        error: Some(split_err.to_string()),
                    })
                }
                Err(fatal) => Err(fatal),
            }
        }
        Err(fatal) => Err(fatal),
    }
}

/// The one forced re-split: halve the chunk and translate the halves with a
/// single attempt each.
async fn translate_split_fallback(
    env: &TranslationEnv<'_>,
    chunk: &Chunk,
) -> Result<(String, Option<f32>), AppError> {
    let chars = chunk.text.chars().count();
    let half = (chars / 2).max(MIN_CHUNK_SIZE);
    let sub = chunk_text(&chunk.text, half)?;

    let mut parts = Vec::with_capacity(sub.len());
    let mut confidences = Vec::new();
    for sub_chunk in &sub.chunks {
        let translated = match env
            .backend
            .translate(&sub_chunk.text, env.src_code, env.tgt_code)
            .await
        {
            Ok(translated) => translated,
            Err(err) => {
                record_backend_error(env, &err);
                return Err(err);
            }
        };
        if let Some(confidence) = translated.confidence {
            confidences.push(confidence);
        }
        parts.push(translated.text);
    }

    let mut text = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            match sub.separators.get(i - 1) {
                Some(sep) if !sep.is_empty() => text.push_str(sep),
                _ => text.push(' '),
            }
        }
        text.push_str(part);
    }

    #[allow(clippy::cast_precision_loss)]
    let confidence = if confidences.is_empty() {
        None
    } else {
        Some(confidences.iter().sum::<f32>() / confidences.len() as f32)
    };
    Ok((text, confidence))
}

fn record_backend_error(env: &TranslationEnv<'_>, err: &AppError) {
    env.telemetry.incr_counter(
        telemetry::BACKEND_ERRORS_TOTAL,
        &[
            ("kind", err.kind().as_str()),
            ("backend", env.backend_name),
        ],
    );
}
