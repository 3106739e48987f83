//! Metrics sink consumed by the pipeline.
//!
//! The pipeline only emits named counters and durations; exporting them is
//! the caller's concern. [`NoopMetrics`] is the default and
//! [`InMemoryMetrics`] keeps totals in memory for tests and CLI summaries.

use std::collections::BTreeMap;
use std::sync::Mutex;

/// Receiver for pipeline metrics.
///
/// Implementations must be cheap and non-blocking; they are called on every
/// backend request.
pub trait MetricsSink: Send + Sync {
    /// Record how long an operation took.
    fn record_duration(&self, name: &str, labels: &[(&str, &str)], seconds: f64);

    /// Increment a named counter by one.
    fn increment_counter(&self, name: &str, labels: &[(&str, &str)]);
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_duration(&self, _name: &str, _labels: &[(&str, &str)], _seconds: f64) {}

    fn increment_counter(&self, _name: &str, _labels: &[(&str, &str)]) {}
}

/// Sink that aggregates in memory, keyed by `name{k=v,...}`.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: Mutex<BTreeMap<String, u64>>,
    durations: Mutex<BTreeMap<String, Vec<f64>>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter (0 if never incremented).
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = series_key(name, labels);
        self.counters
            .lock()
            .map(|c| c.get(&key).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Sum of a counter across every label set.
    pub fn counter_total(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .map(|c| {
                c.iter()
                    .filter(|(k, _)| series_name(k) == name)
                    .map(|(_, v)| *v)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Number of durations recorded for a series.
    pub fn duration_count(&self, name: &str, labels: &[(&str, &str)]) -> usize {
        let key = series_key(name, labels);
        self.durations
            .lock()
            .map(|d| d.get(&key).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }

    /// Snapshot of all counters.
    pub fn counters(&self) -> BTreeMap<String, u64> {
        self.counters.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl MetricsSink for InMemoryMetrics {
    fn record_duration(&self, name: &str, labels: &[(&str, &str)], seconds: f64) {
        if let Ok(mut durations) = self.durations.lock() {
            durations
                .entry(series_key(name, labels))
                .or_default()
                .push(seconds);
        }
    }

    fn increment_counter(&self, name: &str, labels: &[(&str, &str)]) {
        if let Ok(mut counters) = self.counters.lock() {
            *counters.entry(series_key(name, labels)).or_insert(0) += 1;
        }
    }
}

fn series_key(name: &str, labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    let mut sorted: Vec<_> = labels.to_vec();
    sorted.sort();
    let rendered: Vec<String> = sorted.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{}{{{}}}", name, rendered.join(","))
}

fn series_name(key: &str) -> &str {
    key.split('{').next().unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_labels_are_order_independent() {
        let metrics = InMemoryMetrics::new();
        metrics.increment_counter("errors", &[("model", "m"), ("kind", "x")]);
        metrics.increment_counter("errors", &[("kind", "x"), ("model", "m")]);
        assert_eq!(metrics.counter("errors", &[("model", "m"), ("kind", "x")]), 2);
    }

    #[test]
    fn test_counter_total_sums_series() {
        let metrics = InMemoryMetrics::new();
        metrics.increment_counter("hits", &[("model", "a")]);
        metrics.increment_counter("hits", &[("model", "b")]);
        metrics.increment_counter("hits_other", &[]);
        assert_eq!(metrics.counter_total("hits"), 2);
    }

    #[test]
    fn test_durations_recorded() {
        let metrics = InMemoryMetrics::new();
        metrics.record_duration("latency", &[("model", "a")], 0.25);
        metrics.record_duration("latency", &[("model", "a")], 0.5);
        assert_eq!(metrics.duration_count("latency", &[("model", "a")]), 2);
        assert_eq!(metrics.duration_count("latency", &[]), 0);
    }

    #[test]
    fn test_noop_is_silent() {
        let metrics = NoopMetrics;
        metrics.increment_counter("x", &[]);
        metrics.record_duration("y", &[], 1.0);
    }
}
