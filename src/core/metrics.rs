//! Prometheus metrics for the download-and-deliver pipeline
//!
//! - Pipeline outcomes and durations
//! - Delivery routes and transcode results
//! - Retries at the fetch and transport boundaries
//! - In-flight request gauge

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram_vec, register_int_counter, CounterVec, Gauge,
    HistogramVec, IntCounter,
};

lazy_static! {
    /// Finished requests by result
    /// Labels: result (delivered/rejected/fetch_failed/delivery_failed/timed_out)
    pub static ref PIPELINE_OUTCOMES_TOTAL: CounterVec = register_counter_vec!(
        "fetchgram_pipeline_outcomes_total",
        "Total number of finished pipeline runs by result",
        &["result"]
    )
    .unwrap();

    /// Rejected links by reason
    pub static ref REJECTIONS_TOTAL: CounterVec = register_counter_vec!(
        "fetchgram_rejections_total",
        "Links rejected by the classifier",
        &["reason"]
    )
    .unwrap();

    /// Wall time of each stage
    /// Labels: stage (classify/fetch/transcode/deliver)
    pub static ref STAGE_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "fetchgram_stage_duration_seconds",
        "Time spent in each pipeline stage",
        &["stage"],
        vec![0.1, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]
    )
    .unwrap();

    /// Failed fetches by error kind
    pub static ref FETCH_FAILURES_TOTAL: CounterVec = register_counter_vec!(
        "fetchgram_fetch_failures_total",
        "Fetch failures by category",
        &["kind"]
    )
    .unwrap();

    /// Failed deliveries by error kind
    pub static ref DELIVERY_FAILURES_TOTAL: CounterVec = register_counter_vec!(
        "fetchgram_delivery_failures_total",
        "Delivery failures by category",
        &["kind"]
    )
    .unwrap();

    /// Routes chosen by the delivery decider
    pub static ref DELIVERY_ROUTES_TOTAL: CounterVec = register_counter_vec!(
        "fetchgram_delivery_routes_total",
        "Delivery routes chosen by artifact size",
        &["route"]
    )
    .unwrap();

    /// Transcode attempts by result (success/failed/not_smaller)
    pub static ref TRANSCODE_RESULTS_TOTAL: CounterVec = register_counter_vec!(
        "fetchgram_transcode_results_total",
        "Transcode attempts by result",
        &["result"]
    )
    .unwrap();

    /// Retries by operation (fetch/send)
    pub static ref RETRIES_TOTAL: CounterVec = register_counter_vec!(
        "fetchgram_retries_total",
        "Retried attempts by operation",
        &["operation"]
    )
    .unwrap();

    /// Requests currently inside the pipeline
    pub static ref IN_FLIGHT_REQUESTS: Gauge = register_gauge!(
        "fetchgram_in_flight_requests",
        "Requests currently being processed"
    )
    .unwrap();

    /// Dispatcher restarts after a panic
    pub static ref DISPATCHER_RESTARTS_TOTAL: IntCounter = register_int_counter!(
        "fetchgram_dispatcher_restarts_total",
        "Number of times the update dispatcher was restarted"
    )
    .unwrap();
}

/// Touches every metric so it shows up in `/metrics` before the first request.
pub fn init_metrics() {
    lazy_static::initialize(&PIPELINE_OUTCOMES_TOTAL);
    lazy_static::initialize(&REJECTIONS_TOTAL);
    lazy_static::initialize(&STAGE_DURATION_SECONDS);
    lazy_static::initialize(&FETCH_FAILURES_TOTAL);
    lazy_static::initialize(&DELIVERY_FAILURES_TOTAL);
    lazy_static::initialize(&DELIVERY_ROUTES_TOTAL);
    lazy_static::initialize(&TRANSCODE_RESULTS_TOTAL);
    lazy_static::initialize(&RETRIES_TOTAL);
    lazy_static::initialize(&IN_FLIGHT_REQUESTS);
    lazy_static::initialize(&DISPATCHER_RESTARTS_TOTAL);
    log::debug!("Metrics registry initialized");
}

/// Keeps the in-flight gauge balanced across every exit path of a request.
pub struct InFlightGuard;

impl InFlightGuard {
    pub fn enter() -> Self {
        IN_FLIGHT_REQUESTS.inc();
        InFlightGuard
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        IN_FLIGHT_REQUESTS.dec();
    }
}
