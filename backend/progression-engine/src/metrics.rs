use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder,
    HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    // Event pipeline
    pub static ref EVENTS_PROCESSED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "progression_events_processed_total",
        "Total number of learning events processed",
        &["event", "status"]
    )
    .unwrap();

    pub static ref EVENT_REPLAYS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "progression_event_replays_total",
        "Events answered from a stored result because their idempotency key was seen before",
        &["event"]
    )
    .unwrap();

    pub static ref CONCURRENCY_CONFLICTS_TOTAL: IntCounter = register_int_counter!(
        "progression_concurrency_conflicts_total",
        "Optimistic-concurrency conflicts detected while committing a unit of work"
    )
    .unwrap();

    // Business Metrics
    pub static ref XP_AWARDED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "progression_xp_awarded_total",
        "Total XP awarded",
        &["source"]
    )
    .unwrap();

    pub static ref LEVEL_UPS_TOTAL: IntCounter = register_int_counter!(
        "progression_level_ups_total",
        "Number of events that raised a user's level"
    )
    .unwrap();

    pub static ref STREAK_OUTCOMES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "progression_streak_outcomes_total",
        "Streak checks by path and outcome",
        &["path", "outcome"]
    )
    .unwrap();

    pub static ref ACHIEVEMENTS_UNLOCKED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "progression_achievements_unlocked_total",
        "Achievements unlocked",
        &["key"]
    )
    .unwrap();

    pub static ref CATALOG_MISMATCHES_TOTAL: IntCounter = register_int_counter!(
        "progression_catalog_mismatches_total",
        "Achievement keys skipped because no rule or definition matched"
    )
    .unwrap();

    // Storage
    pub static ref STORE_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "progression_store_operations_total",
        "Total number of store operations",
        &["operation", "status"]
    )
    .unwrap();

    pub static ref STORE_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "progression_store_operation_duration_seconds",
        "Store operation duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Helper: track store operation with metrics
pub async fn track_store_operation<F, T, E>(operation: &str, future: F) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    STORE_OPERATIONS_TOTAL
        .with_label_values(&[operation, status])
        .inc();

    STORE_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration);

    result
}

pub fn record_event(event: &str, status: &str) {
    EVENTS_PROCESSED_TOTAL
        .with_label_values(&[event, status])
        .inc();
}
