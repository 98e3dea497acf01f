use std::collections::HashMap;
use std::time::{Duration, Instant};

use common::error::AppError;
use futures::{stream, StreamExt};
use serde::Serialize;
use tracing::debug;

use crate::chunker::{MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};

/// Optimisation never runs outside these text lengths.
pub const MIN_OPTIMISABLE_CHARS: usize = 100;
pub const MAX_OPTIMISABLE_CHARS: usize = 10_000;
/// Initial quality at or above this leaves nothing worth searching for.
pub const SKIP_QUALITY: f32 = 0.85;
/// A probe at or above this ends the search immediately.
const EARLY_EXIT_QUALITY: f32 = 0.9;
/// Probes within this of the best define the optimal region.
const REGION_TOLERANCE: f32 = 0.1;
/// Refinement steps after the initial five-point sample.
const MAX_REFINE_ITERATIONS: usize = 4;
/// Hard bound on the recorded trace.
pub const MAX_TRACE_LEN: usize = 8;

/// One probe of the quality curve.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeRecord {
    pub size: usize,
    pub quality: f32,
    pub elapsed_ms: u64,
}

/// What a probe produced, kept so the winning probe's translation is reused
/// instead of re-run.
pub struct ProbeOutcome<R> {
    pub quality: f32,
    pub result: R,
}

pub struct OptimiserOutcome<R> {
    pub best_size: usize,
    pub best_quality: f32,
    pub best_result: R,
    pub trace: Vec<ProbeRecord>,
}

/// Whether the optimiser contract allows a run at all.
pub fn should_optimise(allow: bool, text_chars: usize, initial_quality: f32) -> bool {
    allow
        && (MIN_OPTIMISABLE_CHARS..=MAX_OPTIMISABLE_CHARS).contains(&text_chars)
        && initial_quality < SKIP_QUALITY
}

/// Binary-search the chunk size that maximises assessed quality, within a
/// time budget. `probe` chunks, translates and assesses at one size.
///
/// Sampling: five sizes across `[50, min(2000, len)]`, at most three probes
/// in flight; then up to four refinement probes inside the region within 0.1
/// of the best. Ties prefer the larger size (fewer backend calls).
pub async fn optimise<R, F, Fut>(
    text_chars: usize,
    budget_ms: u64,
    max_probe_concurrency: usize,
    probe: F,
) -> Result<OptimiserOutcome<R>, AppError>
where
    R: Send,
    F: Fn(usize) -> Fut,
    Fut: std::future::Future<Output = Result<ProbeOutcome<R>, AppError>> + Send,
{
    let started = Instant::now();
    let min = MIN_CHUNK_SIZE;
    let max = MAX_CHUNK_SIZE.min(text_chars).max(min);
    let span = max - min;

    let mut sample_sizes = vec![
        min,
        min + span / 4,
        min + span / 2,
        min + 3 * span / 4,
        max,
    ];
    sample_sizes.dedup();

    let mut trace: Vec<ProbeRecord> = Vec::new();
    // Request-scoped memo: one probe per size, however the search revisits it.
    let mut outcomes: HashMap<usize, ProbeOutcome<R>> = HashMap::new();

    let concurrency = max_probe_concurrency.clamp(1, 3);
    let mut sampled = stream::iter(sample_sizes.clone())
        .map(|size| {
            let probe = &probe;
            let started = &started;
            async move {
                // A probe that would start past the budget is skipped, so an
                // expired budget aborts with best-so-far instead of running
                // the full sample.
                if u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX) >= budget_ms {
                    return (size, Duration::ZERO, None);
                }
                let probe_started = Instant::now();
                let outcome = probe(size).await;
                (size, probe_started.elapsed(), Some(outcome))
            }
        })
        .buffer_unordered(concurrency);

    let mut early_exit = false;
    while let Some((size, elapsed, outcome)) = sampled.next().await {
        let Some(outcome) = outcome else {
            break;
        };
        let outcome = outcome?;
        #[allow(clippy::cast_possible_truncation)]
        let elapsed_ms = elapsed.as_millis() as u64;
        trace.push(ProbeRecord {
            size,
            quality: outcome.quality,
            elapsed_ms,
        });
        let quality = outcome.quality;
        outcomes.insert(size, outcome);
        if quality >= EARLY_EXIT_QUALITY {
            early_exit = true;
            break;
        }
    }
    drop(sampled);

    let budget_spent = || u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    if !early_exit && budget_spent() < budget_ms {
        // Optimal region: every sampled size within tolerance of the best.
        let best_quality = outcomes
            .values()
            .map(|o| o.quality)
            .fold(f32::MIN, f32::max);
        let region: Vec<usize> = outcomes
            .iter()
            .filter(|(_, o)| o.quality >= best_quality - REGION_TOLERANCE)
            .map(|(size, _)| *size)
            .collect();
        let mut lo = region.iter().copied().min().unwrap_or(min);
        let mut hi = region.iter().copied().max().unwrap_or(max);

        for _ in 0..MAX_REFINE_ITERATIONS {
            if trace.len() >= MAX_TRACE_LEN || budget_spent() >= budget_ms {
                break;
            }
            let mid = lo + (hi - lo) / 2;
            if outcomes.contains_key(&mid) || hi - lo < 2 {
                break;
            }

            let probe_started = Instant::now();
            let outcome = probe(mid).await?;
            #[allow(clippy::cast_possible_truncation)]
            let elapsed_ms = probe_started.elapsed().as_millis() as u64;
            trace.push(ProbeRecord {
                size: mid,
                quality: outcome.quality,
                elapsed_ms,
            });
            let mid_quality = outcome.quality;
            outcomes.insert(mid, outcome);

            if mid_quality >= EARLY_EXIT_QUALITY {
                break;
            }

            // Walk towards the better edge of the region.
            let lo_quality = outcomes.get(&lo).map_or(f32::MIN, |o| o.quality);
            let hi_quality = outcomes.get(&hi).map_or(f32::MIN, |o| o.quality);
            if lo_quality <= hi_quality {
                lo = mid;
            } else {
                hi = mid;
            }
        }
    }

    // Equal quality prefers the larger size.
    let (best_size, _) = outcomes
        .iter()
        .map(|(size, outcome)| (*size, outcome.quality))
        .max_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        })
        // No probe fit the budget: nothing to return, the caller keeps its
        // committed result.
        .ok_or(AppError::DeadlineExceeded)?;

    let best = outcomes
        .remove(&best_size)
        .ok_or_else(|| AppError::InternalError("optimiser lost its best probe".to_string()))?;

    debug!(
        best_size,
        best_quality = best.quality,
        probes = trace.len(),
        "optimisation finished"
    );

    Ok(OptimiserOutcome {
        best_size,
        best_quality: best.quality,
        best_result: best.result,
        trace,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn quality_peak_at(peak: usize) -> impl Fn(usize) -> f32 {
        move |size: usize| {
            let distance = size.abs_diff(peak);
            #[allow(clippy::cast_precision_loss)]
            let penalty = distance as f32 / 4_000.0;
            (0.85 - penalty).max(0.1)
        }
    }

    #[test]
    fn gating_follows_contract() {
        assert!(should_optimise(true, 500, 0.7));
        assert!(!should_optimise(false, 500, 0.7));
        assert!(!should_optimise(true, 99, 0.7));
        assert!(!should_optimise(true, 10_001, 0.7));
        assert!(!should_optimise(true, 500, 0.85));
        assert!(should_optimise(true, 100, 0.84));
        assert!(should_optimise(true, 10_000, 0.5));
    }

    #[tokio::test]
    async fn samples_five_sizes_and_refines() {
        let calls = Arc::new(AtomicUsize::new(0));
        let curve = quality_peak_at(1_000);
        let calls_probe = Arc::clone(&calls);

        let outcome = optimise(2_000, 60_000, 3, |size| {
            let calls = Arc::clone(&calls_probe);
            let quality = curve(size);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(ProbeOutcome {
                    quality,
                    result: size,
                })
            }
        })
        .await
        .expect("optimise");

        assert!(outcome.trace.len() >= 5);
        assert!(outcome.trace.len() <= MAX_TRACE_LEN);
        assert_eq!(calls.load(Ordering::SeqCst), outcome.trace.len());
        // The peak sits at 1000; the winner should land near it.
        assert!(outcome.best_size >= 500, "best was {}", outcome.best_size);
        assert_eq!(outcome.best_result, outcome.best_size);
    }

    #[tokio::test]
    async fn early_exit_on_excellent_probe() {
        let outcome = optimise(2_000, 60_000, 1, |size| async move {
            Ok(ProbeOutcome {
                quality: 0.95,
                result: size,
            })
        })
        .await
        .expect("optimise");

        // The very first probe ends the search.
        assert_eq!(outcome.trace.len(), 1);
        assert!((outcome.best_quality - 0.95).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn equal_quality_prefers_larger_size() {
        let outcome = optimise(2_000, 60_000, 3, |size| async move {
            Ok(ProbeOutcome {
                quality: 0.6,
                result: size,
            })
        })
        .await
        .expect("optimise");

        assert_eq!(outcome.best_size, 2_000);
    }

    #[tokio::test]
    async fn zero_budget_aborts_without_probing() {
        let result: Result<OptimiserOutcome<usize>, AppError> =
            optimise(2_000, 0, 3, |size| async move {
                Ok(ProbeOutcome {
                    quality: 0.5,
                    result: size,
                })
            })
            .await;
        assert!(matches!(result, Err(AppError::DeadlineExceeded)));
    }

    #[tokio::test]
    async fn generous_budget_refines_within_trace_bound() {
        let curve = quality_peak_at(800);
        let outcome = optimise(2_000, 60_000, 3, |size| {
            let quality = curve(size);
            async move {
                Ok(ProbeOutcome {
                    quality,
                    result: size,
                })
            }
        })
        .await
        .expect("optimise");

        assert!(outcome.trace.len() >= 5);
        assert!(outcome.trace.len() <= MAX_TRACE_LEN);
    }

    #[tokio::test]
    async fn short_text_collapses_probe_range() {
        let outcome = optimise(60, 60_000, 3, |size| async move {
            assert!(size >= MIN_CHUNK_SIZE);
            assert!(size <= 60);
            Ok(ProbeOutcome {
                quality: 0.6,
                result: size,
            })
        })
        .await
        .expect("optimise");

        assert!(outcome.best_size <= 60);
    }

    #[tokio::test]
    async fn probe_error_propagates() {
        let result: Result<OptimiserOutcome<usize>, AppError> =
            optimise(2_000, 60_000, 3, |_size| async move {
                Err(AppError::BackendFatal("auth rejected".to_string()))
            })
            .await;
        assert!(result.is_err());
    }
}
