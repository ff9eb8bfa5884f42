//! Prometheus metrics for import runs.

use prometheus::{Histogram, HistogramOpts};
use std::sync::LazyLock;

const COUNT_BUCKETS: &[f64] = &[0.0, 1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0];
const TRANSFER_DURATION_BUCKETS: &[f64] = &[
    0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];
const TRANSFER_SIZE_BUCKETS: &[f64] = &[
    1024.0,
    16384.0,
    262144.0,
    1048576.0,
    16777216.0,
    268435456.0,
    1073741824.0,
];

pub(crate) struct ImportMetrics {
    pub tags_per_repository: Histogram,
    pub layers_per_manifest: Histogram,
    pub blob_transfer_duration_seconds: Histogram,
    pub blob_transfer_size_bytes: Histogram,
}

#[allow(clippy::panic)] // metric descriptors are literals, creation cannot fail
fn histogram(name: &str, help: &str, buckets: &[f64]) -> Histogram {
    Histogram::with_opts(
        HistogramOpts::new(name, help)
            .namespace("stevedore")
            .buckets(buckets.to_vec()),
    )
    .unwrap_or_else(|e| panic!("import metric {name}: {e}"))
}

// Registered once per process on the default registry; duplicate
// registration is ignored.
pub(crate) static METRICS: LazyLock<ImportMetrics> = LazyLock::new(|| {
    let tags_per_repository = histogram(
        "import_tags_per_repository",
        "Number of tags found per imported repository",
        COUNT_BUCKETS,
    );
    let layers_per_manifest = histogram(
        "import_layers_per_manifest",
        "Number of layers referenced per imported manifest",
        COUNT_BUCKETS,
    );
    let blob_transfer_duration_seconds = histogram(
        "import_blob_transfer_duration_seconds",
        "Duration of one blob transfer in seconds",
        TRANSFER_DURATION_BUCKETS,
    );
    let blob_transfer_size_bytes = histogram(
        "import_blob_transfer_size_bytes",
        "Size of one transferred blob in bytes",
        TRANSFER_SIZE_BUCKETS,
    );

    let registry = prometheus::default_registry();
    let _ = registry.register(Box::new(tags_per_repository.clone()));
    let _ = registry.register(Box::new(layers_per_manifest.clone()));
    let _ = registry.register(Box::new(blob_transfer_duration_seconds.clone()));
    let _ = registry.register(Box::new(blob_transfer_size_bytes.clone()));

    ImportMetrics {
        tags_per_repository,
        layers_per_manifest,
        blob_transfer_duration_seconds,
        blob_transfer_size_bytes,
    }
});
