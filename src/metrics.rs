//! Prometheus metrics for the prepgate server.
//!
//! Provides counters and histograms for monitoring feedback requests,
//! cache performance, payment flow outcomes, and rate limiting.

use metrics::{counter, histogram};

/// Record a feedback request, with whether it was served from cache.
pub fn record_feedback_request(cached: bool, duration_ms: u64) {
    counter!("feedback_requests_total", "cached" => cached.to_string()).increment(1);
    histogram!("feedback_request_duration_ms").record(duration_ms as f64);
}

/// Record a call out to the AI feedback generator.
pub fn record_generation(success: bool, duration_ms: u64) {
    counter!("feedback_generations_total", "success" => success.to_string()).increment(1);
    histogram!("feedback_generation_duration_ms").record(duration_ms as f64);
}

/// Record a cache hit.
pub fn record_cache_hit() {
    counter!("cache_hits_total").increment(1);
}

/// Record a cache miss.
pub fn record_cache_miss() {
    counter!("cache_misses_total").increment(1);
}

/// Record a payment initiation attempt.
pub fn record_payment_initiation(result: &str) {
    counter!("payment_initiations_total", "result" => result.to_string()).increment(1);
}

/// Record a gateway callback by its applied outcome.
pub fn record_payment_callback(outcome: &str) {
    counter!("payment_callbacks_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record an access gate check result.
pub fn record_access_check(granted: bool) {
    counter!("access_checks_total", "granted" => granted.to_string()).increment(1);
}

/// Record a rate limit hit.
pub fn record_rate_limit_hit() {
    counter!("rate_limit_hits_total").increment(1);
}

/// Install the Prometheus metrics exporter and return the recorder handle.
pub fn install_prometheus_recorder() -> metrics_exporter_prometheus::PrometheusHandle {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    builder
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}
