//! Prometheus metrics for batch query execution
//!
//! Collectors are registered in the default registry on first use.
//! [`gather_metrics`] renders them in text exposition format.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec,
    Encoder, HistogramVec, TextEncoder,
};

lazy_static! {
    /// Queries finished, by outcome (`success`, `parse_error`,
    /// `execution_error`, `cancelled`, `timeout`, `internal`)
    pub static ref QUERIES_TOTAL: CounterVec = register_counter_vec!(
        "warehouse_series_queries_total",
        "Total queries processed by outcome",
        &["outcome"]
    ).unwrap();

    /// End-to-end query duration
    pub static ref QUERY_DURATION: HistogramVec = register_histogram_vec!(
        "warehouse_series_query_duration_seconds",
        "Query latency from parse to transformed series, in seconds",
        &["outcome"],
        vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]
    ).unwrap();

    /// Rows decoded from warehouse cursors
    pub static ref ROWS_TOTAL: Counter = register_counter!(
        "warehouse_series_rows_total",
        "Total rows read from warehouse result cursors"
    ).unwrap();

    /// Batches dispatched
    pub static ref BATCHES_TOTAL: Counter = register_counter!(
        "warehouse_series_batches_total",
        "Total query batches dispatched"
    ).unwrap();

    /// Payloads that left `format` empty
    pub static ref FORMAT_DEFAULTED_TOTAL: Counter = register_counter!(
        "warehouse_series_format_defaulted_total",
        "Query payloads with an empty format defaulted to time series"
    ).unwrap();

    /// Health probes answered
    pub static ref HEALTH_CHECKS_TOTAL: CounterVec = register_counter_vec!(
        "warehouse_series_health_checks_total",
        "Total health checks by status",
        &["status"]
    ).unwrap();
}

/// Render every registered metric in Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
