// src/core/metrics.rs

//! Defines and registers Prometheus metrics for proxy monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only once
//! globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, TextEncoder, register_counter, register_counter_vec,
    register_gauge, register_histogram,
};

lazy_static! {
    // --- Data-path counters ---
    /// The total number of proxied requests, labeled by distribution and cache outcome.
    pub static ref REQUESTS_TOTAL: CounterVec =
        register_counter_vec!("pakmirror_requests_total", "Total number of proxied requests, labeled by distribution and cache outcome.", &["distribution", "outcome"]).unwrap();
    /// The total number of successful cache lookups.
    pub static ref CACHE_HITS_TOTAL: Counter =
        register_counter!("pakmirror_cache_hits_total", "Total number of cache hits.").unwrap();
    /// The total number of failed cache lookups.
    pub static ref CACHE_MISSES_TOTAL: Counter =
        register_counter!("pakmirror_cache_misses_total", "Total number of cache misses.").unwrap();
    /// The total number of cache entries evicted to satisfy the size bound.
    pub static ref CACHE_EVICTIONS_TOTAL: Counter =
        register_counter!("pakmirror_cache_evictions_total", "Total number of cache entries evicted by the size bound.").unwrap();
    /// The total number of cache store failures (response served, bytes not kept).
    pub static ref CACHE_STORE_FAILURES_TOTAL: Counter =
        register_counter!("pakmirror_cache_store_failures_total", "Total number of cache store failures.").unwrap();
    /// The total number of upstream request retries issued by the transport.
    pub static ref UPSTREAM_RETRIES_TOTAL: Counter =
        register_counter!("pakmirror_upstream_retries_total", "Total number of upstream request retries.").unwrap();
    /// The total number of successful 304 revalidations.
    pub static ref REVALIDATIONS_TOTAL: Counter =
        register_counter!("pakmirror_revalidations_total", "Total number of successful 304 revalidations.").unwrap();

    // --- Gauges ---
    /// The total number of bytes currently stored in the cache.
    pub static ref CACHE_SIZE_BYTES: Gauge =
        register_gauge!("pakmirror_cache_size_bytes", "Total bytes currently stored in the cache.").unwrap();
    /// The number of cache entries currently indexed.
    pub static ref CACHE_ITEMS: Gauge =
        register_gauge!("pakmirror_cache_items", "Number of cache entries currently indexed.").unwrap();

    // --- Histograms ---
    /// A histogram of mirror benchmark probe latencies.
    pub static ref BENCHMARK_PROBE_SECONDS: Histogram =
        register_histogram!("pakmirror_benchmark_probe_seconds", "Latency of mirror benchmark probes in seconds.").unwrap();
    /// A histogram of end-to-end request latencies.
    pub static ref REQUEST_LATENCY_SECONDS: Histogram =
        register_histogram!("pakmirror_request_latency_seconds", "Latency of request processing in seconds.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}
