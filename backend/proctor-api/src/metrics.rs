use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // Assessment Metrics
    pub static ref SESSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "assessment_sessions_total",
        "Total number of assessment sessions by lifecycle event",
        &["status"]
    )
    .unwrap();

    pub static ref SESSIONS_ACTIVE: IntGauge = register_int_gauge!(
        "assessment_sessions_active",
        "Number of assessment sessions currently in progress"
    )
    .unwrap();

    pub static ref ANSWERS_RECORDED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "answers_recorded_total",
        "Total number of answers frozen by advancing past a question",
        &["outcome"]
    )
    .unwrap();

    pub static ref DEADLINE_EXPIRIES_TOTAL: IntCounter = register_int_counter!(
        "deadline_expiries_total",
        "Total number of questions auto-submitted by the clock driver"
    )
    .unwrap();

    pub static ref SESSIONS_EVICTED_TOTAL: IntCounter = register_int_counter!(
        "assessment_sessions_evicted_total",
        "Total number of retired attempts removed from the session table"
    )
    .unwrap();

    // Proctoring Metrics
    pub static ref PROCTORING_VIOLATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "proctoring_violations_total",
        "Total number of proctoring violations recorded",
        &["kind"]
    )
    .unwrap();

    pub static ref MONITOR_POLLS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "monitor_polls_total",
        "Total number of presence monitor polls",
        &["result"]
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
