// Prometheus metrics for the edge pipeline
//
// Counters are registered once in the default registry and shared through a
// process-wide singleton.

use prometheus::{register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec};
use std::sync::OnceLock;

pub struct EdgeMetrics {
    /// Cache operations by operation (get, put, refresh) and result
    pub cache_operations: IntCounterVec,

    /// Source fetch attempts by source type and outcome
    pub source_attempts: IntCounterVec,

    /// Transformation proxy outcomes
    pub proxy_outcomes: IntCounterVec,

    /// Write retries against the rate-limited store, by severity
    pub write_retries: IntCounterVec,

    /// Background task outcomes (completed, failed, dropped)
    pub background_tasks: IntCounterVec,

    /// End-to-end delivery duration by result
    pub delivery_duration: HistogramVec,
}

static METRICS: OnceLock<EdgeMetrics> = OnceLock::new();

impl EdgeMetrics {
    /// Initialize and return the global metrics instance
    pub fn global() -> &'static Self {
        METRICS.get_or_init(|| {
            let cache_operations = register_int_counter_vec!(
                "kitsune_cache_operations_total",
                "Total number of cache operations by type and result",
                &["operation", "result"]
            )
            .expect("Failed to register cache_operations_total metric");

            let source_attempts = register_int_counter_vec!(
                "kitsune_source_attempts_total",
                "Source fetch attempts by source type and outcome",
                &["source_type", "outcome"]
            )
            .expect("Failed to register source_attempts_total metric");

            let proxy_outcomes = register_int_counter_vec!(
                "kitsune_proxy_outcomes_total",
                "Transformation proxy responses by classified outcome",
                &["outcome"]
            )
            .expect("Failed to register proxy_outcomes_total metric");

            let write_retries = register_int_counter_vec!(
                "kitsune_write_retries_total",
                "Backing store write retries after rate limiting",
                &["severity"]
            )
            .expect("Failed to register write_retries_total metric");

            let background_tasks = register_int_counter_vec!(
                "kitsune_background_tasks_total",
                "Background task outcomes",
                &["outcome"]
            )
            .expect("Failed to register background_tasks_total metric");

            let delivery_duration = register_histogram_vec!(
                "kitsune_delivery_duration_seconds",
                "Duration of media deliveries in seconds",
                &["result"],
                vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
            )
            .expect("Failed to register delivery_duration_seconds metric");

            EdgeMetrics {
                cache_operations,
                source_attempts,
                proxy_outcomes,
                write_retries,
                background_tasks,
                delivery_duration,
            }
        })
    }

    pub fn record_cache_operation(&self, operation: &str, result: &str) {
        self.cache_operations
            .with_label_values(&[operation, result])
            .inc();
    }

    pub fn record_source_attempt(&self, source_type: &str, outcome: &str) {
        self.source_attempts
            .with_label_values(&[source_type, outcome])
            .inc();
    }

    pub fn record_proxy_outcome(&self, outcome: &str) {
        self.proxy_outcomes.with_label_values(&[outcome]).inc();
    }

    pub fn record_write_retry(&self, severity: &str) {
        self.write_retries.with_label_values(&[severity]).inc();
    }

    pub fn record_background_task(&self, outcome: &str) {
        self.background_tasks.with_label_values(&[outcome]).inc();
    }

    pub fn observe_delivery(&self, result: &str, seconds: f64) {
        self.delivery_duration
            .with_label_values(&[result])
            .observe(seconds);
    }
}

/// Render every registered metric in the Prometheus text format
pub fn render() -> String {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
