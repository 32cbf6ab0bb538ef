//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Pipeline Metrics
    pub static ref APPLICATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("philosopher_applications_total", "Code applications by outcome"),
        &["outcome"]
    ).expect("metric can be created");
    pub static ref CODES_ISSUED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("philosopher_codes_issued_total", "Access codes minted"),
        &["source"]
    ).expect("metric can be created");
    pub static ref ACTIVATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("philosopher_activations_total", "Code verification attempts by result"),
        &["result"]
    ).expect("metric can be created");
    pub static ref RATE_LIMITED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("philosopher_rate_limited_total", "Requests rejected by the rate limiter"),
        &["route"]
    ).expect("metric can be created");

    // Vision API Metrics
    pub static ref VISION_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("philosopher_vision_requests_total", "Vision API calls by status"),
        &["status"]
    ).expect("metric can be created");
    pub static ref VISION_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "philosopher_vision_request_duration_seconds",
            "Vision API call duration in seconds"
        ).buckets(vec![0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0]),
        &["model"]
    ).expect("metric can be created");

    // Storage Metrics
    pub static ref SCREENSHOTS_STORED_TOTAL: IntCounter = IntCounter::new(
        "philosopher_screenshots_stored_total",
        "Screenshots written to disk"
    ).expect("metric can be created");
    pub static ref STORE_CONFLICTS_TOTAL: IntCounter = IntCounter::new(
        "philosopher_store_conflicts_total",
        "Optimistic store transactions retried after a conflict"
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("philosopher_errors_total", "Total number of errors"),
        &["error_type"]
    ).expect("metric can be created");
}

static INIT: Once = Once::new();

/// Initialize metrics registry.
///
/// Safe to call more than once; only the first call registers.
pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(APPLICATIONS_TOTAL.clone()))
            .expect("APPLICATIONS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(CODES_ISSUED_TOTAL.clone()))
            .expect("CODES_ISSUED_TOTAL can be registered");
        REGISTRY
            .register(Box::new(ACTIVATIONS_TOTAL.clone()))
            .expect("ACTIVATIONS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(RATE_LIMITED_TOTAL.clone()))
            .expect("RATE_LIMITED_TOTAL can be registered");
        REGISTRY
            .register(Box::new(VISION_REQUESTS_TOTAL.clone()))
            .expect("VISION_REQUESTS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(VISION_REQUEST_DURATION_SECONDS.clone()))
            .expect("VISION_REQUEST_DURATION_SECONDS can be registered");
        REGISTRY
            .register(Box::new(SCREENSHOTS_STORED_TOTAL.clone()))
            .expect("SCREENSHOTS_STORED_TOTAL can be registered");
        REGISTRY
            .register(Box::new(STORE_CONFLICTS_TOTAL.clone()))
            .expect("STORE_CONFLICTS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(ERRORS_TOTAL.clone()))
            .expect("ERRORS_TOTAL can be registered");

        tracing::info!("Metrics registry initialized");
    });
}
