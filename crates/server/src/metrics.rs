//! Prometheus metrics for the hatch server.
//!
//! Exposes counters for manifest and asset traffic, publish outcomes and lock
//! contention, plus publish and drain latency histograms.
//!
//! The `/metrics` endpoint is unauthenticated. It carries no bundle contents,
//! only aggregate counts, but should still be restricted to the scraper's
//! network.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::{LazyLock, Once};
use std::time::Duration;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Read path
pub static MANIFESTS_SERVED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "hatch_manifests_served_total",
            "Total number of manifests served, by whether they were signed",
        ),
        &["signed"],
    )
    .expect("metric creation failed")
});

pub static LOCK_CONFLICTS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hatch_lock_conflicts_total",
        "Total number of reads refused because an update was in progress",
    )
    .expect("metric creation failed")
});

pub static ASSETS_SERVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("hatch_assets_served_total", "Total number of assets served")
        .expect("metric creation failed")
});

pub static ASSETS_NOT_FOUND: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hatch_assets_not_found_total",
        "Total number of asset requests answered with 404",
    )
    .expect("metric creation failed")
});

// Publish path
pub static PUBLISHES_COMMITTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hatch_publishes_committed_total",
        "Total number of bundles published and swapped live",
    )
    .expect("metric creation failed")
});

pub static PUBLISH_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "hatch_publish_failures_total",
            "Total number of failed publishes by failing step",
        ),
        &["step"],
    )
    .expect("metric creation failed")
});

pub static UPLOAD_LOCKS_STRANDED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "hatch_upload_locks_stranded_total",
        "Total number of publishes that swapped but could not clear the upload lock",
    )
    .expect("metric creation failed")
});

pub static PUBLISH_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "hatch_publish_duration_seconds",
            "Time from publisher lock to swap completion",
        )
        .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0]),
    )
    .expect("metric creation failed")
});

pub static DRAIN_WAIT_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "hatch_drain_wait_seconds",
            "Time a publish waited for in-flight reads to finish",
        )
        .buckets(vec![0.01, 0.1, 1.0, 10.0, 30.0, 60.0, 300.0, 900.0]),
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Safe to call more than once.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(MANIFESTS_SERVED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(LOCK_CONFLICTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ASSETS_SERVED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ASSETS_NOT_FOUND.clone()))
            .expect("metric registration failed");

        REGISTRY
            .register(Box::new(PUBLISHES_COMMITTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PUBLISH_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_LOCKS_STRANDED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PUBLISH_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(DRAIN_WAIT_DURATION.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

pub fn record_manifest_served(signed: bool) {
    MANIFESTS_SERVED
        .with_label_values(&[if signed { "true" } else { "false" }])
        .inc();
}

pub fn record_publish_failure(step: &str) {
    PUBLISH_FAILURES.with_label_values(&[step]).inc();
}

pub fn record_publish_committed(elapsed: Duration, drain_wait: Duration) {
    PUBLISHES_COMMITTED.inc();
    PUBLISH_DURATION.observe(elapsed.as_secs_f64());
    DRAIN_WAIT_DURATION.observe(drain_wait.as_secs_f64());
}
