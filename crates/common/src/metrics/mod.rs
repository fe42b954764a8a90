//! Metrics and observability utilities
//!
//! Prometheus metrics with standardized naming for the ingestion and
//! export pipelines.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all GraphVault metrics
pub const METRICS_PREFIX: &str = "graphvault";

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_counter!(
        format!("{}_ingest_jobs_total", METRICS_PREFIX),
        Unit::Count,
        "Ingestion jobs processed, labeled by outcome"
    );

    describe_counter!(
        format!("{}_export_batches_total", METRICS_PREFIX),
        Unit::Count,
        "Export note batches processed, labeled by outcome"
    );

    describe_histogram!(
        format!("{}_pipeline_stage_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Duration of individual ingestion pipeline stages"
    );

    describe_histogram!(
        format!("{}_llm_call_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Latency of LLM generation calls"
    );
}

/// Record a completed pipeline stage
pub fn record_stage(stage: &'static str, started: Instant) {
    histogram!(
        format!("{}_pipeline_stage_duration_seconds", METRICS_PREFIX),
        "stage" => stage
    )
    .record(started.elapsed().as_secs_f64());
}

/// Count a finished ingestion job
pub fn record_ingest_outcome(outcome: &'static str) {
    counter!(
        format!("{}_ingest_jobs_total", METRICS_PREFIX),
        "outcome" => outcome
    )
    .increment(1);
}

/// Count a finished export batch
pub fn record_export_outcome(outcome: &'static str) {
    counter!(
        format!("{}_export_batches_total", METRICS_PREFIX),
        "outcome" => outcome
    )
    .increment(1);
}
