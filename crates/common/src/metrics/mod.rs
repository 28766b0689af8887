//! Metrics and observability utilities
//!
//! Provides Prometheus metrics for the study set pipeline with
//! standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all StudyForge metrics
pub const METRICS_PREFIX: &str = "studyforge";

/// Buckets for request and stage latency (in seconds)
///
/// Generation dominates: most runs land between 5s and 60s.
pub const LATENCY_BUCKETS: &[f64] = &[
    0.010,  // 10ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.500,  // 2.5s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
    60.00,  // 60s
    120.0,  // 120s - lock TTL
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Pipeline metrics
    describe_counter!(
        format!("{}_pipeline_runs_total", METRICS_PREFIX),
        Unit::Count,
        "Pipeline runs by outcome code"
    );

    describe_histogram!(
        format!("{}_pipeline_stage_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Per-stage pipeline latency in seconds"
    );

    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Requests served from an already-published study set"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Requests that required generation"
    );

    // Lock metrics
    describe_counter!(
        format!("{}_lock_acquisitions_total", METRICS_PREFIX),
        Unit::Count,
        "Generation lock acquisition attempts by result"
    );

    // Publish metrics
    describe_counter!(
        format!("{}_race_resolutions_total", METRICS_PREFIX),
        Unit::Count,
        "Publishes that lost the write race and converged on the winner"
    );

    // Provider metrics
    describe_histogram!(
        format!("{}_provider_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Generation provider latency in seconds"
    );

    describe_counter!(
        format!("{}_provider_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Generation provider errors"
    );

    // Staging metrics
    describe_counter!(
        format!("{}_staged_bytes_total", METRICS_PREFIX),
        Unit::Bytes,
        "Bytes uploaded to staging"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Times one pipeline stage; records on `finish`
pub struct StageTimer {
    start: Instant,
    stage: &'static str,
}

impl StageTimer {
    pub fn start(stage: &'static str) -> Self {
        Self {
            start: Instant::now(),
            stage,
        }
    }

    pub fn finish(self) {
        histogram!(
            format!("{}_pipeline_stage_duration_seconds", METRICS_PREFIX),
            "stage" => self.stage
        )
        .record(self.start.elapsed().as_secs_f64());
    }
}

/// Helper to record a finished pipeline run; `outcome` is "ok" or an error code
pub fn record_pipeline_run(outcome: &str, cached: bool) {
    counter!(
        format!("{}_pipeline_runs_total", METRICS_PREFIX),
        "outcome" => outcome.to_string(),
        "cached" => cached.to_string()
    )
    .increment(1);
}

/// Helper to record cache metrics
pub fn record_cache(hit: bool) {
    if hit {
        counter!(format!("{}_cache_hits_total", METRICS_PREFIX)).increment(1);
    } else {
        counter!(format!("{}_cache_misses_total", METRICS_PREFIX)).increment(1);
    }
}

/// Helper to record lock acquisition attempts
pub fn record_lock_acquisition(acquired: bool) {
    let result = if acquired { "acquired" } else { "contended" };
    counter!(
        format!("{}_lock_acquisitions_total", METRICS_PREFIX),
        "result" => result
    )
    .increment(1);
}

/// Helper to record race resolutions
pub fn record_race_resolution(resolved: bool) {
    let result = if resolved { "resolved" } else { "unresolved" };
    counter!(
        format!("{}_race_resolutions_total", METRICS_PREFIX),
        "result" => result
    )
    .increment(1);
}

/// Helper to record provider metrics
pub fn record_provider(duration_secs: f64, model: &str, success: bool) {
    if success {
        histogram!(
            format!("{}_provider_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
    } else {
        counter!(
            format!("{}_provider_errors_total", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .increment(1);
    }
}

/// Helper to record staged bytes
pub fn record_staged_bytes(bytes: usize) {
    counter!(format!("{}_staged_bytes_total", METRICS_PREFIX)).increment(bytes as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_buckets() {
        // Verify buckets are sorted
        let mut prev = 0.0;
        for &bucket in LATENCY_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }

        // Lock TTL should be the last bucket
        assert_eq!(LATENCY_BUCKETS.last(), Some(&120.0));
    }

    #[test]
    fn test_request_metrics() {
        let metrics = RequestMetrics::start("POST", "/v1/study-sets/generate");
        std::thread::sleep(std::time::Duration::from_millis(10));
        metrics.finish(200);
        // Just verify it runs without panic
    }

    #[test]
    fn test_stage_timer() {
        let timer = StageTimer::start("generate");
        timer.finish();
        record_pipeline_run("ok", false);
        record_lock_acquisition(true);
        record_race_resolution(true);
    }
}
