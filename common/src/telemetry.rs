use std::collections::HashMap;
use std::sync::Mutex;

pub const TRANSLATIONS_TOTAL: &str = "translations_total";
pub const TRANSLATION_DURATION_MS: &str = "translation_duration_ms";
pub const OPTIMISATION_IMPROVEMENT: &str = "optimisation_improvement";
pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
pub const BACKEND_ERRORS_TOTAL: &str = "backend_errors_total";

/// Sink for counters and histograms emitted by the core.
///
/// The gateway never aggregates metrics itself; it hands every observation to
/// the injected sink so deployments can wire up their own exporter.
pub trait Telemetry: Send + Sync {
    fn incr_counter(&self, name: &str, labels: &[(&str, &str)]);
    fn record_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]);
}

/// Default sink: structured `tracing` events at debug level.
#[derive(Debug, Default, Clone)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn incr_counter(&self, name: &str, labels: &[(&str, &str)]) {
        tracing::debug!(metric = name, labels = ?labels, "counter");
    }

    fn record_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        tracing::debug!(metric = name, value, labels = ?labels, "histogram");
    }
}

/// In-memory sink used by tests to assert on emitted metrics.
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    counters: Mutex<HashMap<String, u64>>,
    histograms: Mutex<HashMap<String, Vec<f64>>>,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter_value(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        counters.get(&flatten(name, labels)).copied().unwrap_or(0)
    }

    /// Sum of a counter across all label sets.
    pub fn counter_total(&self, name: &str) -> u64 {
        let counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        counters
            .iter()
            .filter(|(key, _)| key.starts_with(name))
            .map(|(_, v)| *v)
            .sum()
    }

    pub fn histogram_values(&self, name: &str) -> Vec<f64> {
        let histograms = self.histograms.lock().unwrap_or_else(|e| e.into_inner());
        histograms
            .iter()
            .filter(|(key, _)| key.starts_with(name))
            .flat_map(|(_, values)| values.iter().copied())
            .collect()
    }
}

impl Telemetry for RecordingTelemetry {
    fn incr_counter(&self, name: &str, labels: &[(&str, &str)]) {
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        *counters.entry(flatten(name, labels)).or_insert(0) += 1;
    }

    fn record_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let mut histograms = self.histograms.lock().unwrap_or_else(|e| e.into_inner());
        histograms.entry(flatten(name, labels)).or_default().push(value);
    }
}

fn flatten(name: &str, labels: &[(&str, &str)]) -> String {
    let mut key = name.to_string();
    for (label, value) in labels {
        key.push_str(&format!("{{{label}={value}}}"));
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_accumulates_counters() {
        let sink = RecordingTelemetry::new();
        sink.incr_counter(TRANSLATIONS_TOTAL, &[("path", "fast"), ("backend", "mock")]);
        sink.incr_counter(TRANSLATIONS_TOTAL, &[("path", "fast"), ("backend", "mock")]);
        sink.incr_counter(TRANSLATIONS_TOTAL, &[("path", "optimised"), ("backend", "mock")]);

        assert_eq!(
            sink.counter_value(TRANSLATIONS_TOTAL, &[("path", "fast"), ("backend", "mock")]),
            2
        );
        assert_eq!(sink.counter_total(TRANSLATIONS_TOTAL), 3);
    }

    #[test]
    fn recording_sink_collects_histograms() {
        let sink = RecordingTelemetry::new();
        sink.record_histogram(TRANSLATION_DURATION_MS, 12.0, &[]);
        sink.record_histogram(TRANSLATION_DURATION_MS, 48.0, &[]);

        let values = sink.histogram_values(TRANSLATION_DURATION_MS);
        assert_eq!(values.len(), 2);
    }
}
