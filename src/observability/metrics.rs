//! # Metrics
//!
//! Prometheus metrics for the operator and the webhook.
//!
//! ## Metrics Exposed
//!
//! - `rodoo_reconciliations_total` - Total number of reconciliation passes
//! - `rodoo_reconciliation_errors_total` - Passes that ended in an error
//! - `rodoo_reconciliation_duration_seconds` - Duration of a pass
//! - `rodoo_child_operations_total` - Child ensure results by kind and action
//! - `rodoo_cert_rotations_total` - Serving certificates issued
//! - `rodoo_status_writes_total` - Status subresource writes
//! - `rodoo_requeues_total` - Requeues by trigger
//! - `rodoo_admission_requests_total` - Admission reviews by outcome
//! - `rodoo_admission_duration_seconds` - Admission review handling time
//! - `rodoo_configuration_reloads_total` - Webhook configuration reloads by result

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "rodoo_reconciliations_total",
        "Total number of reconciliation passes",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "rodoo_reconciliation_errors_total",
        "Total number of reconciliation passes that returned an error",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "rodoo_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static CHILD_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "rodoo_child_operations_total",
            "Child ensure results by kind and action",
        ),
        &["kind", "action"],
    )
    .expect("Failed to create CHILD_OPERATIONS_TOTAL metric - this should never happen")
});

static CERT_ROTATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "rodoo_cert_rotations_total",
        "Total number of serving certificates issued",
    )
    .expect("Failed to create CERT_ROTATIONS_TOTAL metric - this should never happen")
});

static STATUS_WRITES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "rodoo_status_writes_total",
        "Total number of status subresource writes",
    )
    .expect("Failed to create STATUS_WRITES_TOTAL metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new("rodoo_requeues_total", "Total number of requeues by trigger"),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

static ADMISSION_REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "rodoo_admission_requests_total",
            "Admission reviews handled by outcome",
        ),
        &["outcome"],
    )
    .expect("Failed to create ADMISSION_REQUESTS_TOTAL metric - this should never happen")
});

static ADMISSION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "rodoo_admission_duration_seconds",
            "Time spent handling an admission review in seconds",
        )
        .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]),
    )
    .expect("Failed to create ADMISSION_DURATION metric - this should never happen")
});

static CONFIGURATION_RELOADS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "rodoo_configuration_reloads_total",
            "Webhook configuration reloads by result",
        ),
        &["result"],
    )
    .expect("Failed to create CONFIGURATION_RELOADS_TOTAL metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(CHILD_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CERT_ROTATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STATUS_WRITES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ADMISSION_REQUESTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ADMISSION_DURATION.clone()))?;
    REGISTRY.register(Box::new(CONFIGURATION_RELOADS_TOTAL.clone()))?;

    Ok(())
}

/// Snapshot of every registered metric family
#[must_use]
pub fn gather() -> Vec<prometheus::proto::MetricFamily> {
    REGISTRY.gather()
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_child_operations(kind: &str, action: &str) {
    CHILD_OPERATIONS_TOTAL
        .with_label_values(&[kind, action])
        .inc();
}

pub fn increment_cert_rotations() {
    CERT_ROTATIONS_TOTAL.inc();
}

pub fn increment_status_writes() {
    STATUS_WRITES_TOTAL.inc();
}

pub fn increment_requeues_total(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

pub fn increment_admission_requests(outcome: &str) {
    ADMISSION_REQUESTS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn observe_admission_duration(duration: f64) {
    ADMISSION_DURATION.observe(duration);
}

pub fn increment_configuration_reloads(result: &str) {
    CONFIGURATION_RELOADS_TOTAL
        .with_label_values(&[result])
        .inc();
}
