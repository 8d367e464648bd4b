//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes the counters and gauges the copy engine reports.

use std::sync::Arc;

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Prometheus-backed metrics registry shared by the engine and its workers.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    copy_operations_total: IntCounterVec,
    entity_copies_total: IntCounterVec,
    blob_copies_total: IntCounterVec,
    active_copy_operations: IntGauge,
    queue_depth: IntGauge,
}

/// Snapshot of selected gauges and counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Operations currently being run.
    pub active_copy_operations: i64,
    /// Operations waiting for a worker.
    pub queue_depth: i64,
    /// Operations that finished `COMPLETED`.
    pub operations_completed: u64,
    /// Operations that finished `FAILED`.
    pub operations_failed: u64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let copy_operations_total = register(
            &registry,
            "copy_operations_total",
            IntCounterVec::new(
                Opts::new(
                    "copy_operations_total",
                    "Pipeline copy runs finished, by terminal status",
                ),
                &["status"],
            ),
        )?;
        let entity_copies_total = register(
            &registry,
            "entity_copies_total",
            IntCounterVec::new(
                Opts::new(
                    "entity_copies_total",
                    "Entity copy attempts, by entity type and outcome",
                ),
                &["entity_type", "status"],
            ),
        )?;
        let blob_copies_total = register(
            &registry,
            "blob_copies_total",
            IntCounterVec::new(
                Opts::new("blob_copies_total", "Blob copies, by outcome"),
                &["status"],
            ),
        )?;
        let active_copy_operations = register(
            &registry,
            "active_copy_operations",
            IntGauge::with_opts(Opts::new(
                "active_copy_operations",
                "Copy operations currently running",
            )),
        )?;
        let queue_depth = register(
            &registry,
            "copy_queue_depth",
            IntGauge::with_opts(Opts::new(
                "copy_queue_depth",
                "Copy operations waiting for a worker",
            )),
        )?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                copy_operations_total,
                entity_copies_total,
                blob_copies_total,
                active_copy_operations,
                queue_depth,
            }),
        })
    }

    /// Count a finished run by terminal status label.
    pub fn inc_operation(&self, status: &str) {
        self.inner
            .copy_operations_total
            .with_label_values(&[status])
            .inc();
    }

    /// Count an entity copy attempt.
    pub fn inc_entity_copy(&self, entity_type: &str, status: &str) {
        self.inner
            .entity_copies_total
            .with_label_values(&[entity_type, status])
            .inc();
    }

    /// Count a blob copy (`copied`, `skipped`, or `failed`).
    pub fn inc_blob_copy(&self, status: &str) {
        self.inner
            .blob_copies_total
            .with_label_values(&[status])
            .inc();
    }

    /// Adjust the running-operations gauge.
    pub fn add_active_operations(&self, delta: i64) {
        self.inner.active_copy_operations.add(delta);
    }

    /// Set the queue depth gauge.
    pub fn set_queue_depth(&self, depth: i64) {
        self.inner.queue_depth.set(depth);
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Take a point-in-time snapshot of the most relevant gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let finished = |status: &str| {
            self.inner
                .copy_operations_total
                .with_label_values(&[status])
                .get()
        };
        MetricsSnapshot {
            active_copy_operations: self.inner.active_copy_operations.get(),
            queue_depth: self.inner.queue_depth.get(),
            operations_completed: finished("completed"),
            operations_failed: finished("failed"),
        }
    }
}

fn register<C>(
    registry: &Registry,
    name: &'static str,
    collector: std::result::Result<C, prometheus::Error>,
) -> Result<C>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    let collector =
        collector.map_err(|source| TelemetryError::MetricsRegister { name, source })?;
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })?;
    Ok(collector)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_appear_in_rendered_output() {
        let metrics = Metrics::new().expect("metrics registry");
        metrics.inc_operation("completed");
        metrics.inc_entity_copy("dataset", "completed");
        metrics.inc_blob_copy("skipped");
        metrics.add_active_operations(2);
        metrics.add_active_operations(-1);
        metrics.set_queue_depth(3);

        let rendered = metrics.render().expect("render metrics");
        assert!(rendered.contains("copy_operations_total{status=\"completed\"} 1"));
        assert!(rendered.contains("entity_copies_total"));
        assert!(rendered.contains("blob_copies_total{status=\"skipped\"} 1"));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.active_copy_operations, 1);
        assert_eq!(snapshot.queue_depth, 3);
        assert_eq!(snapshot.operations_completed, 1);
        assert_eq!(snapshot.operations_failed, 0);
        let json = serde_json::to_value(&snapshot).expect("serialize snapshot");
        assert_eq!(json["queue_depth"], 3);
    }

    #[test]
    fn registries_are_independent() {
        let first = Metrics::new().expect("first registry");
        let second = Metrics::new().expect("second registry");
        first.inc_operation("failed");
        assert_eq!(first.snapshot().operations_failed, 1);
        assert_eq!(second.snapshot().operations_failed, 0);
    }
}
