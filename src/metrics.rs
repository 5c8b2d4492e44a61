//! Metrics collection for batch submission
//!
//! Provides Prometheus-compatible counters for batch lifecycles and
//! per-submission outcomes.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter_vec, register_int_gauge, Encoder, Histogram,
    IntCounterVec, IntGauge, TextEncoder,
};

use crate::{QueueError, Result};

lazy_static! {
    /// Counter for batches by terminal status
    static ref BATCHES: IntCounterVec = register_int_counter_vec!(
        "submission_queue_batches_total",
        "Total number of batches by terminal status",
        &["status"]
    ).unwrap();

    /// Counter for submission outcomes
    static ref SUBMISSIONS: IntCounterVec = register_int_counter_vec!(
        "submission_queue_submissions_total",
        "Total number of submission outcomes received",
        &["status"]
    ).unwrap();

    /// Gauge for batches currently in flight
    static ref IN_FLIGHT: IntGauge = register_int_gauge!(
        "submission_queue_batches_in_flight",
        "Number of batches currently executing"
    ).unwrap();

    /// Gauge for queued submissions
    static ref QUEUE_DEPTH: IntGauge = register_int_gauge!(
        "submission_queue_depth",
        "Number of submissions waiting in the queue"
    ).unwrap();

    /// Histogram for batch duration
    static ref BATCH_DURATION: Histogram = register_histogram!(
        "submission_queue_batch_duration_seconds",
        "Batch duration in seconds, start to finish or cancellation",
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0]
    ).unwrap();
}

pub(crate) fn record_batch_started() {
    IN_FLIGHT.inc();
}

pub(crate) fn record_batch_ended(status: &str, duration_secs: f64) {
    IN_FLIGHT.dec();
    BATCHES.with_label_values(&[status]).inc();
    BATCH_DURATION.observe(duration_secs);
}

pub(crate) fn record_submission(status: &str) {
    SUBMISSIONS.with_label_values(&[status]).inc();
}

pub(crate) fn set_queue_depth(depth: usize) {
    QUEUE_DEPTH.set(depth as i64);
}

/// Export metrics in Prometheus text format
pub fn export_metrics() -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder.encode(&metric_families, &mut buffer)?;

    String::from_utf8(buffer)
        .map_err(|e| QueueError::Internal(format!("metrics are not valid UTF-8: {}", e)))
}
