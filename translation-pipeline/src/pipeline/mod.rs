mod stages;

pub use stages::{PipelineContext, UNTRANSLATED_MARKER};

use std::time::{Duration, Instant};

use async_trait::async_trait;
use common::error::AppError;

pub(crate) use stages::{
    AssessStage, ChunkStage, OptimiseStage, StoreStage, TranslateStage,
};

// Stage type enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Chunk,
    Translate,
    Assess,
    Optimise,
    Store,
}

// Pipeline stage trait
#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn kind(&self) -> StageKind;
    async fn execute(&self, ctx: &mut PipelineContext<'_>) -> Result<(), AppError>;
}

// Type alias for boxed stages
pub type BoxedStage = Box<dyn PipelineStage>;

/// A driver names the stages of one controller path.
pub trait StrategyDriver: Send + Sync {
    fn stages(&self) -> Vec<BoxedStage>;
}

/// Fast path: single-pass translation without optimisation, for short text
/// or `preference = fast`.
pub struct FastPathDriver;

impl StrategyDriver for FastPathDriver {
    fn stages(&self) -> Vec<BoxedStage> {
        vec![
            Box::new(ChunkStage),
            Box::new(TranslateStage),
            Box::new(AssessStage),
            Box::new(StoreStage),
        ]
    }
}

/// Adaptive path: the fast-path stages plus the optimiser loop behind the
/// quality gate.
pub struct AdaptiveDriver;

impl StrategyDriver for AdaptiveDriver {
    fn stages(&self) -> Vec<BoxedStage> {
        vec![
            Box::new(ChunkStage),
            Box::new(TranslateStage),
            Box::new(AssessStage),
            Box::new(OptimiseStage),
            Box::new(StoreStage),
        ]
    }
}

// Pipeline stage timings tracker
#[derive(Debug, Default, Clone)]
pub struct PipelineStageTimings {
    timings: Vec<(StageKind, Duration)>,
}

impl PipelineStageTimings {
    pub fn record(&mut self, kind: StageKind, duration: Duration) {
        self.timings.push((kind, duration));
    }

    pub fn into_vec(self) -> Vec<(StageKind, Duration)> {
        self.timings
    }

    fn get_stage_ms(&self, kind: StageKind) -> u128 {
        self.timings
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, d)| d.as_millis())
            .unwrap_or(0)
    }

    pub fn translate_ms(&self) -> u128 {
        self.get_stage_ms(StageKind::Translate)
    }

    pub fn optimise_ms(&self) -> u128 {
        self.get_stage_ms(StageKind::Optimise)
    }
}

/// Run a driver's stages in order, recording per-stage timings. Deadline
/// checks sit at stage boundaries; stages observe it themselves mid-flight.
pub async fn run_with_driver<D: StrategyDriver>(
    driver: &D,
    ctx: &mut PipelineContext<'_>,
) -> Result<(), AppError> {
    for stage in driver.stages() {
        if ctx.deadline_exceeded() {
            return Err(AppError::DeadlineExceeded);
        }
        let start = Instant::now();
        stage.execute(ctx).await?;
        ctx.record_stage_duration(stage.kind(), start.elapsed());
    }
    Ok(())
}
