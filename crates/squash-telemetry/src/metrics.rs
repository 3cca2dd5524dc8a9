//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes the counters and gauges the relay reports on: notifications,
//!   jobs, failures, republishes, byte volume and pool occupancy.

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Prometheus-backed metrics registry shared across the relay.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    notifications_total: IntCounterVec,
    jobs_total: IntCounterVec,
    pipeline_failures_total: IntCounterVec,
    republish_total: IntCounterVec,
    bytes_read_total: IntCounter,
    bytes_written_total: IntCounter,
    queue_depth: IntGauge,
    active_jobs: IntGauge,
}

/// Snapshot of selected gauges and counters for health reporting.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Jobs that finished compress-then-delete.
    pub jobs_completed: u64,
    /// Jobs handed to the failure handler.
    pub jobs_failed: u64,
    /// Notifications republished to the recovery topic.
    pub republished: u64,
    /// Republish attempts that failed.
    pub republish_failed: u64,
    /// Bytes read from source objects.
    pub bytes_read: u64,
    /// Compressed bytes written to destination objects.
    pub bytes_written: u64,
    /// Jobs waiting in the queue.
    pub queue_depth: i64,
    /// Jobs currently executing.
    pub active_jobs: i64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let notifications_total = counter_vec(
            "notifications_total",
            "Storage notifications received by outcome",
            &["outcome"],
        )?;
        let jobs_total = counter_vec("jobs_total", "Jobs finished by outcome", &["outcome"])?;
        let pipeline_failures_total = counter_vec(
            "pipeline_failures_total",
            "Transfer pipeline failures by kind",
            &["kind"],
        )?;
        let republish_total = counter_vec(
            "republish_total",
            "Republish attempts for interrupted jobs by outcome",
            &["outcome"],
        )?;
        let bytes_read_total = IntCounter::with_opts(Opts::new(
            "bytes_read_total",
            "Uncompressed bytes read from source objects",
        ))
        .map_err(|source| collector_error("bytes_read_total", source))?;
        let bytes_written_total = IntCounter::with_opts(Opts::new(
            "bytes_written_total",
            "Compressed bytes written to destination objects",
        ))
        .map_err(|source| collector_error("bytes_written_total", source))?;
        let queue_depth = IntGauge::with_opts(Opts::new("queue_depth", "Jobs waiting for a worker"))
            .map_err(|source| collector_error("queue_depth", source))?;
        let active_jobs = IntGauge::with_opts(Opts::new("active_jobs", "Jobs currently executing"))
            .map_err(|source| collector_error("active_jobs", source))?;

        register(&registry, "notifications_total", &notifications_total)?;
        register(&registry, "jobs_total", &jobs_total)?;
        register(&registry, "pipeline_failures_total", &pipeline_failures_total)?;
        register(&registry, "republish_total", &republish_total)?;
        register(&registry, "bytes_read_total", &bytes_read_total)?;
        register(&registry, "bytes_written_total", &bytes_written_total)?;
        register(&registry, "queue_depth", &queue_depth)?;
        register(&registry, "active_jobs", &active_jobs)?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                notifications_total,
                jobs_total,
                pipeline_failures_total,
                republish_total,
                bytes_read_total,
                bytes_written_total,
                queue_depth,
                active_jobs,
            }),
        })
    }

    /// Count a notification by its dispatch outcome (`accepted` or a rejection reason).
    pub fn inc_notification(&self, outcome: &str) {
        self.inner
            .notifications_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Count a finished job by outcome (`completed`, `resumed`, `failed`).
    pub fn inc_job(&self, outcome: &str) {
        self.inner.jobs_total.with_label_values(&[outcome]).inc();
    }

    /// Count a pipeline failure by error kind.
    pub fn inc_pipeline_failure(&self, kind: &str) {
        self.inner
            .pipeline_failures_total
            .with_label_values(&[kind])
            .inc();
    }

    /// Count a republish attempt by outcome (`published`, `failed`).
    pub fn inc_republish(&self, outcome: &str) {
        self.inner.republish_total.with_label_values(&[outcome]).inc();
    }

    /// Add the byte volume of one transfer.
    pub fn add_transfer_bytes(&self, read: u64, written: u64) {
        self.inner.bytes_read_total.inc_by(read);
        self.inner.bytes_written_total.inc_by(written);
    }

    /// Set the queue depth gauge.
    pub fn set_queue_depth(&self, depth: usize) {
        self.inner
            .queue_depth
            .set(i64::try_from(depth).unwrap_or(i64::MAX));
    }

    /// Mark a job as started.
    pub fn job_started(&self) {
        self.inner.active_jobs.inc();
    }

    /// Mark a job as finished, whatever its outcome.
    pub fn job_finished(&self) {
        self.inner.active_jobs.dec();
    }

    /// Render all metrics in Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or the output is not UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.inner.registry.gather(), &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Capture a point-in-time snapshot of the headline numbers.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let jobs = &self.inner.jobs_total;
        let republish = &self.inner.republish_total;
        MetricsSnapshot {
            jobs_completed: jobs.with_label_values(&["completed"]).get()
                + jobs.with_label_values(&["resumed"]).get(),
            jobs_failed: jobs.with_label_values(&["failed"]).get(),
            republished: republish.with_label_values(&["published"]).get(),
            republish_failed: republish.with_label_values(&["failed"]).get(),
            bytes_read: self.inner.bytes_read_total.get(),
            bytes_written: self.inner.bytes_written_total.get(),
            queue_depth: self.inner.queue_depth.get(),
            active_jobs: self.inner.active_jobs.get(),
        }
    }
}

fn counter_vec(name: &'static str, help: &str, labels: &[&str]) -> Result<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help), labels).map_err(|source| collector_error(name, source))
}

const fn collector_error(name: &'static str, source: prometheus::Error) -> TelemetryError {
    TelemetryError::MetricsCollector { name, source }
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> Result<()>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_feed_snapshot_and_render() -> Result<()> {
        let metrics = Metrics::new()?;
        metrics.inc_notification("accepted");
        metrics.inc_notification("bucket_mismatch");
        metrics.inc_job("completed");
        metrics.inc_job("resumed");
        metrics.inc_job("failed");
        metrics.inc_pipeline_failure("source_unavailable");
        metrics.inc_republish("published");
        metrics.add_transfer_bytes(10_000, 120);
        metrics.set_queue_depth(3);
        metrics.job_started();
        metrics.job_started();
        metrics.job_finished();

        let snapshot = metrics.snapshot();
        assert_eq!(
            snapshot,
            MetricsSnapshot {
                jobs_completed: 2,
                jobs_failed: 1,
                republished: 1,
                republish_failed: 0,
                bytes_read: 10_000,
                bytes_written: 120,
                queue_depth: 3,
                active_jobs: 1,
            }
        );

        let rendered = metrics.render()?;
        assert!(rendered.contains(r#"notifications_total{outcome="bucket_mismatch"} 1"#));
        assert!(rendered.contains(r#"pipeline_failures_total{kind="source_unavailable"} 1"#));
        assert!(rendered.contains("bytes_read_total 10000"));
        Ok(())
    }

    #[test]
    fn snapshot_serializes() -> std::result::Result<(), serde_json::Error> {
        let value = serde_json::to_value(MetricsSnapshot::default())?;
        assert_eq!(value["jobs_completed"], 0);
        Ok(())
    }
}
