// Prometheus metrics for admission and task processing
//
// Exposed on the /metrics route:
// - Submissions by outcome (counter)
// - Task completions, failures and redeliveries (counters)
// - Queue depth and in-flight tasks (gauges)
// - Task execution time (histogram)
// - Running worker units (gauge)

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    // Admission metrics
    pub static ref SUBMISSIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("submissions_total", "Task submissions by admission outcome"),
        &["outcome"]
    ).expect("Failed to create submissions metric");

    // Queue metrics
    pub static ref QUEUE_DEPTH: IntGauge = IntGauge::new(
        "queue_depth",
        "Number of tasks waiting to be claimed"
    ).expect("Failed to create queue depth metric");

    pub static ref TASKS_IN_FLIGHT: IntGauge = IntGauge::new(
        "tasks_in_flight",
        "Number of claimed tasks not yet acknowledged"
    ).expect("Failed to create in-flight metric");

    pub static ref TASKS_REDELIVERED_TOTAL: IntCounter = IntCounter::new(
        "tasks_redelivered_total",
        "Tasks returned to the queue after their lease expired"
    ).expect("Failed to create redelivered metric");

    // Worker metrics
    pub static ref TASKS_COMPLETED_TOTAL: IntCounter = IntCounter::new(
        "tasks_completed_total",
        "Tasks whose handler completed successfully"
    ).expect("Failed to create completed metric");

    pub static ref TASKS_FAILED_TOTAL: IntCounter = IntCounter::new(
        "tasks_failed_total",
        "Tasks whose handler failed"
    ).expect("Failed to create failed metric");

    pub static ref TASK_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new("task_duration_seconds", "Task handler execution time in seconds"),
    ).expect("Failed to create task duration metric");

    pub static ref ACTIVE_WORKERS: IntGauge = IntGauge::new(
        "active_workers",
        "Number of running worker units"
    ).expect("Failed to create active workers metric");
}

/// Submission outcome label values
pub mod outcome {
    pub const ADMITTED: &str = "admitted";
    pub const REJECTED: &str = "rejected";
    pub const INVALID: &str = "invalid";
    pub const QUEUE_UNAVAILABLE: &str = "queue_unavailable";
}

/// Initialize metrics registry - must be called once at startup
pub fn init() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(SUBMISSIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(QUEUE_DEPTH.clone()))?;
    REGISTRY.register(Box::new(TASKS_IN_FLIGHT.clone()))?;
    REGISTRY.register(Box::new(TASKS_REDELIVERED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TASKS_COMPLETED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TASKS_FAILED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TASK_DURATION_SECONDS.clone()))?;
    REGISTRY.register(Box::new(ACTIVE_WORKERS.clone()))?;
    Ok(())
}

/// Count one submission outcome
pub fn record_submission(outcome: &str) {
    SUBMISSIONS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}
