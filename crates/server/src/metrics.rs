//! Prometheus metrics for the chunkd server.
//!
//! Exposes counters for ingested uploads, stored chunks and manifest lookups,
//! plus an ingestion latency histogram.
//!
//! The `/metrics` endpoint is unauthenticated. It carries aggregate counts
//! only, but should still be reachable from the scraper network alone.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Ingestion metrics
pub static UPLOADS_INGESTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "chunkd_uploads_ingested_total",
        "Total number of uploads ingested and registered",
    )
    .expect("metric creation failed")
});

pub static UPLOADS_CHUNKED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "chunkd_uploads_chunked_total",
        "Total number of uploads that were split into chunks",
    )
    .expect("metric creation failed")
});

pub static CHUNKS_STORED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "chunkd_chunks_stored_total",
        "Total number of chunks written to storage",
    )
    .expect("metric creation failed")
});

pub static BYTES_INGESTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "chunkd_bytes_ingested_total",
        "Total bytes of successfully ingested uploads",
    )
    .expect("metric creation failed")
});

pub static INGEST_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "chunkd_ingest_failures_total",
            "Total failed uploads by error type",
        ),
        &["error_type"],
    )
    .expect("metric creation failed")
});

// Retrieval metrics
pub static MANIFEST_LOOKUPS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "chunkd_manifest_lookups_total",
            "Manifest lookups by where they were answered (cache, durable, missing)",
        ),
        &["source"],
    )
    .expect("metric creation failed")
});

// Timing metrics
pub static INGEST_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "chunkd_ingest_duration_seconds",
            "Time taken to ingest one upload, body transfer included",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry. Safe to call repeatedly.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(UPLOADS_INGESTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOADS_CHUNKED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHUNKS_STORED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_INGESTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(INGEST_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(MANIFEST_LOOKUPS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(INGEST_DURATION.clone()))
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

/// Helper to record ingestion failures by type.
pub fn record_ingest_failure(error_type: &str) {
    INGEST_FAILURES.with_label_values(&[error_type]).inc();
}

/// Helper to record where a manifest lookup was answered.
pub fn record_manifest_lookup(source: &str) {
    MANIFEST_LOOKUPS.with_label_values(&[source]).inc();
}
