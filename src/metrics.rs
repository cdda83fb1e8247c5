// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the services controller.
//!
//! All metrics carry the namespace prefix `ovn_services_controller_`.
//!
//! # Metrics Categories
//!
//! - **Sync Metrics** - Outcome and duration of each Service sync
//! - **Northbound Metrics** - Operations written to the northbound database
//! - **Topology Metrics** - Nodes tracked in the local zone
//! - **Error Metrics** - Failures by reason, and Services stuck past the retry ceiling
//!
//! # Example
//!
//! ```rust,no_run
//! use ovn_services_controller::metrics::record_sync_success;
//!
//! record_sync_success(std::time::Duration::from_millis(12));
//! ```

use crate::northbound::Operation;
use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::LazyLock;
use std::time::Duration;

// ============================================================================
// Metric Name Constants
// ============================================================================

/// Namespace prefix for all controller metrics
const METRICS_NAMESPACE: &str = "ovn_services_controller";

// ============================================================================
// Global Metrics Registry
// ============================================================================

/// Global Prometheus metrics registry
///
/// All metrics are registered in this registry and exposed via `/metrics` endpoint.
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Sync Metrics
// ============================================================================

/// Total number of Service syncs by outcome
///
/// Labels:
/// - `status`: Outcome (`success`, `error`)
pub static SYNC_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_syncs_total"),
        "Total number of Service syncs by status",
    );
    let counter = CounterVec::new(opts, &["status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Duration of Service syncs in seconds
///
/// Labels:
/// - `status`: Outcome (`success`, `error`)
pub static SYNC_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_sync_duration_seconds"),
        "Duration of Service syncs in seconds",
    )
    .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]);
    let histogram = HistogramVec::new(opts, &["status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

// ============================================================================
// Northbound Metrics
// ============================================================================

/// Total number of northbound operations committed
///
/// Labels:
/// - `kind`: Operation kind (e.g. `create_load_balancer`, `add_to_group`)
pub static NORTHBOUND_OPERATIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_northbound_operations_total"),
        "Total number of northbound operations committed by kind",
    );
    let counter = CounterVec::new(opts, &["kind"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Topology Metrics
// ============================================================================

/// Number of nodes currently tracked in the local zone
pub static TRACKED_NODES: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge = Gauge::new(
        format!("{METRICS_NAMESPACE}_tracked_nodes"),
        "Number of nodes tracked in the local zone",
    )
    .unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

// ============================================================================
// Error Metrics
// ============================================================================

/// Total number of sync errors by reason
///
/// Labels:
/// - `reason`: Error reason (e.g. `TransientBackendError`, `InvalidServiceInput`)
pub static ERRORS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_errors_total"),
        "Total number of sync errors by reason",
    );
    let counter = CounterVec::new(opts, &["reason"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Number of Services that reached the retry ceiling and are still failing
pub static STALLED_SERVICES: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge = Gauge::new(
        format!("{METRICS_NAMESPACE}_stalled_services"),
        "Number of Services past the retry ceiling",
    )
    .unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

// ============================================================================
// Helper Functions
// ============================================================================

/// Record a successful sync
pub fn record_sync_success(duration: Duration) {
    SYNC_TOTAL.with_label_values(&["success"]).inc();
    SYNC_DURATION_SECONDS
        .with_label_values(&["success"])
        .observe(duration.as_secs_f64());
}

/// Record a failed sync
///
/// # Arguments
/// * `reason` - Error reason, see [`crate::sync_errors::SyncError::status_reason`]
/// * `duration` - Duration of the sync before failure
pub fn record_sync_error(reason: &str, duration: Duration) {
    SYNC_TOTAL.with_label_values(&["error"]).inc();
    SYNC_DURATION_SECONDS
        .with_label_values(&["error"])
        .observe(duration.as_secs_f64());
    record_error(reason);
}

/// Count committed northbound operations by kind
pub fn record_operations(operations: &[Operation]) {
    for op in operations {
        NORTHBOUND_OPERATIONS_TOTAL
            .with_label_values(&[op.kind()])
            .inc();
    }
}

/// Record an error outside of a Service sync (e.g. a node that failed to parse)
pub fn record_error(reason: &str) {
    ERRORS_TOTAL.with_label_values(&[reason]).inc();
}

#[allow(clippy::cast_precision_loss)]
pub fn set_tracked_nodes(count: usize) {
    TRACKED_NODES.set(count as f64);
}

#[allow(clippy::cast_precision_loss)]
pub fn set_stalled_services(count: usize) {
    STALLED_SERVICES.set(count as f64);
}

/// Gather and encode all metrics in Prometheus text format
///
/// # Returns
/// Prometheus-formatted metrics as a String
///
/// # Errors
/// Returns error if encoding fails
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
}
