//! Prometheus metrics for GC worker cycles.

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts};
use std::sync::LazyLock;

const RUN_DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

pub(crate) struct GCMetrics {
    pub run_duration_seconds: HistogramVec,
    pub cycles_total: IntCounterVec,
}

// Registered once per process on the default registry; duplicate
// registration (tests building several workers) is ignored.
#[allow(clippy::panic)] // metric descriptors are literals, creation cannot fail
pub(crate) static METRICS: LazyLock<GCMetrics> = LazyLock::new(|| {
    let run_duration_seconds = HistogramVec::new(
        HistogramOpts::new(
            "gc_run_duration_seconds",
            "Duration of one GC worker cycle in seconds",
        )
        .namespace("stevedore")
        .buckets(RUN_DURATION_BUCKETS.to_vec()),
        &["worker"],
    )
    .unwrap_or_else(|e| panic!("gc run duration histogram: {e}"));

    let cycles_total = IntCounterVec::new(
        Opts::new("gc_cycles_total", "GC worker cycles by outcome").namespace("stevedore"),
        &["worker", "result"],
    )
    .unwrap_or_else(|e| panic!("gc cycle counter: {e}"));

    let registry = prometheus::default_registry();
    let _ = registry.register(Box::new(run_duration_seconds.clone()));
    let _ = registry.register(Box::new(cycles_total.clone()));

    GCMetrics {
        run_duration_seconds,
        cycles_total,
    }
});
