use prometheus::{Encoder, Histogram, IntCounter, IntCounterVec, Opts, TextEncoder};
use std::env;

use crate::errors::ErrorCategory;

lazy_static::lazy_static! {
    pub static ref METRIC_NAMESPACE: String =
        env::var("METRIC_NAMESPACE").unwrap_or_else(|_| "fetch_harness".to_string());

    pub static ref REQUEST_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("requests_total", "Total number of HTTP requests made")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref REQUEST_STATUS_CODES: IntCounterVec =
        IntCounterVec::new(
            Opts::new("requests_status_codes_total", "Number of HTTP responses by status code")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["status_code"]
        ).unwrap();

    pub static ref REQUEST_ERRORS_BY_CATEGORY: IntCounterVec =
        IntCounterVec::new(
            Opts::new("request_errors_by_category_total", "Number of failed fetches by error category")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["category"]
        ).unwrap();

    pub static ref REQUEST_DURATION_SECONDS: Histogram =
        Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "request_duration_seconds",
                "HTTP request latencies in seconds."
            ).namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();
}

/// Registers all metrics with the default registry. Call once per process.
pub fn register_metrics() -> Result<(), prometheus::Error> {
    let registry = prometheus::default_registry();
    registry.register(Box::new(REQUEST_TOTAL.clone()))?;
    registry.register(Box::new(REQUEST_STATUS_CODES.clone()))?;
    registry.register(Box::new(REQUEST_ERRORS_BY_CATEGORY.clone()))?;
    registry.register(Box::new(REQUEST_DURATION_SECONDS.clone()))?;
    Ok(())
}

/// Failed fetches so far, per category with at least one failure.
pub fn error_breakdown() -> Vec<(ErrorCategory, u64)> {
    ErrorCategory::all()
        .into_iter()
        .map(|category| {
            let count = REQUEST_ERRORS_BY_CATEGORY
                .with_label_values(&[category.label()])
                .get();
            (category, count)
        })
        .filter(|(_, count)| *count > 0)
        .collect()
}

/// Renders the default registry in the Prometheus text format.
pub fn gather_metrics_string() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_else(|e| format!("# metrics were not UTF-8: {}", e))
}
