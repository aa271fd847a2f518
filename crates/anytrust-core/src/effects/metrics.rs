//! Metrics effects
//!
//! Counters, gauges and histograms are recorded through an injected
//! [`MetricsEffects`] handler instead of a process-wide registry. Metric names
//! are slash-separated paths such as
//! `anytrust/aggregator/store/{label}/success/total`.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Sink for counters, gauges and histograms
pub trait MetricsEffects: Send + Sync {
    /// Add `value` to a counter
    fn increment_counter(&self, name: &str, value: u64);

    /// Set a gauge to `value`
    fn set_gauge(&self, name: &str, value: f64);

    /// Record one histogram observation
    fn observe_histogram(&self, name: &str, value: f64);
}

impl<T: MetricsEffects + ?Sized> MetricsEffects for Arc<T> {
    fn increment_counter(&self, name: &str, value: u64) {
        (**self).increment_counter(name, value);
    }

    fn set_gauge(&self, name: &str, value: f64) {
        (**self).set_gauge(name, value);
    }

    fn observe_histogram(&self, name: &str, value: f64) {
        (**self).observe_histogram(name, value);
    }
}

/// Discards every record
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl MetricsEffects for NoopMetrics {
    fn increment_counter(&self, _name: &str, _value: u64) {}
    fn set_gauge(&self, _name: &str, _value: f64) {}
    fn observe_histogram(&self, _name: &str, _value: f64) {}
}

/// Stateless handler that emits each record as a `tracing` event
///
/// An external subscriber (log shipper, metrics bridge) is expected to pick
/// the events up; nothing is kept in memory.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingMetrics;

impl MetricsEffects for TracingMetrics {
    fn increment_counter(&self, name: &str, value: u64) {
        tracing::trace!(metric_name = name, value, "counter incremented");
    }

    fn set_gauge(&self, name: &str, value: f64) {
        tracing::trace!(metric_name = name, value, "gauge set");
    }

    fn observe_histogram(&self, name: &str, value: f64) {
        tracing::trace!(metric_name = name, value, "histogram observed");
    }
}

/// Point-in-time copy of an [`InMemoryMetrics`] registry
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricsSnapshot {
    /// Counter totals by name
    pub counters: BTreeMap<String, u64>,
    /// Last gauge value by name
    pub gauges: BTreeMap<String, f64>,
    /// Every histogram observation by name, in arrival order
    pub histograms: BTreeMap<String, Vec<f64>>,
}

impl MetricsSnapshot {
    /// Counter value, zero when never incremented
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    /// Gauge value if it was ever set
    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.gauges.get(name).copied()
    }
}

/// Handler that keeps every record in memory for later inspection
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    inner: Mutex<MetricsSnapshot>,
}

impl InMemoryMetrics {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy out the current state
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().clone()
    }

    /// Counter value, zero when never incremented
    pub fn counter(&self, name: &str) -> u64 {
        self.inner.lock().counter(name)
    }

    /// Gauge value if it was ever set
    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.inner.lock().gauge(name)
    }
}

impl MetricsEffects for InMemoryMetrics {
    fn increment_counter(&self, name: &str, value: u64) {
        *self
            .inner
            .lock()
            .counters
            .entry(name.to_string())
            .or_default() += value;
    }

    fn set_gauge(&self, name: &str, value: f64) {
        self.inner.lock().gauges.insert(name.to_string(), value);
    }

    fn observe_histogram(&self, name: &str, value: f64) {
        self.inner
            .lock()
            .histograms
            .entry(name.to_string())
            .or_default()
            .push(value);
    }
}
