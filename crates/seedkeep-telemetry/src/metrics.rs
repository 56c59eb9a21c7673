//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes only the counters and gauges the orchestrator updates.

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Prometheus-backed metrics registry shared across the orchestrator.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    events_emitted_total: IntCounterVec,
    alerts_dispatched_total: IntCounterVec,
    alerts_dropped_total: IntCounter,
    persistence_failures_total: IntCounterVec,
    active_torrents: IntGauge,
    resume_data_pending: IntGauge,
}

/// Snapshot of selected gauges and counters for health reporting.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Torrents currently registered.
    pub active_torrents: i64,
    /// Recovery data requests awaiting confirmation.
    pub resume_data_pending: i64,
    /// Alerts dropped because their torrent was no longer registered.
    pub alerts_dropped_total: u64,
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

        let events_emitted_total = counter_vec(
            "events_emitted_total",
            "Domain events emitted by type",
            &["type"],
        )?;
        let alerts_dispatched_total = counter_vec(
            "alerts_dispatched_total",
            "Engine alerts dispatched to handlers by type",
            &["type"],
        )?;
        let alerts_dropped_total = IntCounter::with_opts(Opts::new(
            "alerts_dropped_total",
            "Engine alerts dropped because the torrent was not registered",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "alerts_dropped_total",
            source,
        })?;
        let persistence_failures_total = counter_vec(
            "persistence_failures_total",
            "Failed writes of persisted artifacts",
            &["artifact"],
        )?;
        let active_torrents = gauge("active_torrents", "Number of registered torrents")?;
        let resume_data_pending = gauge(
            "resume_data_pending",
            "Recovery data requests awaiting confirmation",
        )?;

        register(&registry, "events_emitted_total", &events_emitted_total)?;
        register(&registry, "alerts_dispatched_total", &alerts_dispatched_total)?;
        register(&registry, "alerts_dropped_total", &alerts_dropped_total)?;
        register(
            &registry,
            "persistence_failures_total",
            &persistence_failures_total,
        )?;
        register(&registry, "active_torrents", &active_torrents)?;
        register(&registry, "resume_data_pending", &resume_data_pending)?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                events_emitted_total,
                alerts_dispatched_total,
                alerts_dropped_total,
                persistence_failures_total,
                active_torrents,
                resume_data_pending,
            }),
        })
    }

    /// Increment the emitted event counter for the specific event type.
    pub fn inc_event(&self, event_type: &str) {
        self.inner
            .events_emitted_total
            .with_label_values(&[event_type])
            .inc();
    }

    /// Increment the dispatched alert counter for the specific alert type.
    pub fn inc_alert(&self, alert_type: &str) {
        self.inner
            .alerts_dispatched_total
            .with_label_values(&[alert_type])
            .inc();
    }

    /// Increment the dropped alert counter.
    pub fn inc_alert_dropped(&self) {
        self.inner.alerts_dropped_total.inc();
    }

    /// Increment the persistence failure counter for an artifact.
    pub fn inc_persistence_failure(&self, artifact: &str) {
        self.inner
            .persistence_failures_total
            .with_label_values(&[artifact])
            .inc();
    }

    /// Set the registered torrent gauge.
    pub fn set_active_torrents(&self, count: usize) {
        self.inner
            .active_torrents
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Set the outstanding recovery data gauge.
    pub fn set_resume_data_pending(&self, count: usize) {
        self.inner
            .resume_data_pending
            .set(i64::try_from(count).unwrap_or(i64::MAX));
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
        MetricsSnapshot {
            active_torrents: self.inner.active_torrents.get(),
            resume_data_pending: self.inner.resume_data_pending.get(),
            alerts_dropped_total: self.inner.alerts_dropped_total.get(),
        }
    }
}

fn counter_vec(name: &'static str, help: &str, labels: &[&str]) -> Result<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help), labels)
        .map_err(|source| TelemetryError::MetricsCollector { name, source })
}

fn gauge(name: &'static str, help: &str) -> Result<IntGauge> {
    IntGauge::with_opts(Opts::new(name, help))
        .map_err(|source| TelemetryError::MetricsCollector { name, source })
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
    fn metrics_snapshot_reflects_updates() -> Result<()> {
        let metrics = Metrics::new()?;
        metrics.inc_event("torrent_added");
        metrics.inc_alert("paused");
        metrics.inc_alert_dropped();
        metrics.inc_alert_dropped();
        metrics.inc_persistence_failure("state");
        metrics.set_active_torrents(5);
        metrics.set_resume_data_pending(2);

        let snapshot = metrics.snapshot();
        assert_eq!(
            snapshot,
            MetricsSnapshot {
                active_torrents: 5,
                resume_data_pending: 2,
                alerts_dropped_total: 2,
            }
        );

        let rendered = metrics.render()?;
        assert!(rendered.contains("events_emitted_total"));
        assert!(rendered.contains("alerts_dispatched_total"));
        assert!(rendered.contains("persistence_failures_total"));
        Ok(())
    }

    #[test]
    fn separate_instances_do_not_share_state() -> Result<()> {
        let first = Metrics::new()?;
        let second = Metrics::new()?;
        first.set_active_torrents(3);
        assert_eq!(second.snapshot().active_torrents, 0);
        Ok(())
    }
}
