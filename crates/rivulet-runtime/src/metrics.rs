//! Prometheus metrics for rivulet flows

use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;

const LATENCY_BUCKETS: &[f64] = &[0.00001, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1];

/// Metrics collection shared by every flow of an engine
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    pub records_in: IntCounterVec,
    pub records_out: IntCounterVec,
    pub late_drops: IntCounterVec,
    pub sink_drops: IntCounterVec,
    pub eval_errors: IntCounterVec,
    pub active_groups: IntGaugeVec,
    pub processing_latency: HistogramVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let records_in = IntCounterVec::new(
            Opts::new("rivulet_records_in_total", "Records taken by a node"),
            &["node"],
        )
        .expect("failed to create records_in counter");

        let records_out = IntCounterVec::new(
            Opts::new("rivulet_records_out_total", "Records emitted by a node"),
            &["node"],
        )
        .expect("failed to create records_out counter");

        let late_drops = IntCounterVec::new(
            Opts::new(
                "rivulet_late_drops_total",
                "Events dropped because they arrived outside the window",
            ),
            &["node"],
        )
        .expect("failed to create late_drops counter");

        let sink_drops = IntCounterVec::new(
            Opts::new(
                "rivulet_sink_drops_total",
                "Output records dropped from the external sink path",
            ),
            &["node"],
        )
        .expect("failed to create sink_drops counter");

        let eval_errors = IntCounterVec::new(
            Opts::new("rivulet_eval_errors_total", "Expression evaluation errors"),
            &["node"],
        )
        .expect("failed to create eval_errors counter");

        let active_groups = IntGaugeVec::new(
            Opts::new("rivulet_active_groups", "Live aggregation groups"),
            &["node"],
        )
        .expect("failed to create active_groups gauge");

        let processing_latency = HistogramVec::new(
            HistogramOpts::new(
                "rivulet_processing_latency_seconds",
                "Time spent in a single take_event call",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["node"],
        )
        .expect("failed to create processing_latency histogram");

        registry
            .register(Box::new(records_in.clone()))
            .expect("failed to register records_in");
        registry
            .register(Box::new(records_out.clone()))
            .expect("failed to register records_out");
        registry
            .register(Box::new(late_drops.clone()))
            .expect("failed to register late_drops");
        registry
            .register(Box::new(sink_drops.clone()))
            .expect("failed to register sink_drops");
        registry
            .register(Box::new(eval_errors.clone()))
            .expect("failed to register eval_errors");
        registry
            .register(Box::new(active_groups.clone()))
            .expect("failed to register active_groups");
        registry
            .register(Box::new(processing_latency.clone()))
            .expect("failed to register processing_latency");

        Self {
            registry: Arc::new(registry),
            records_in,
            records_out,
            late_drops,
            sink_drops,
            eval_errors,
            active_groups,
            processing_latency,
        }
    }

    /// Counters for one node, labelled with its name.
    pub fn node(&self, name: &str) -> NodeMetrics {
        NodeMetrics {
            records_in: self.records_in.with_label_values(&[name]),
            records_out: self.records_out.with_label_values(&[name]),
            late_drops: self.late_drops.with_label_values(&[name]),
            sink_drops: self.sink_drops.with_label_values(&[name]),
            eval_errors: self.eval_errors.with_label_values(&[name]),
            active_groups: self.active_groups.with_label_values(&[name]),
            processing_latency: self.processing_latency.with_label_values(&[name]),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Get Prometheus text output
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if encoder.encode(&metric_families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-node metric handles.
#[derive(Debug, Clone)]
pub struct NodeMetrics {
    pub records_in: IntCounter,
    pub records_out: IntCounter,
    pub late_drops: IntCounter,
    pub sink_drops: IntCounter,
    pub eval_errors: IntCounter,
    pub active_groups: IntGauge,
    pub processing_latency: Histogram,
}

impl NodeMetrics {
    /// Handles not registered anywhere; still counted, never exported.
    pub fn detached() -> Self {
        Metrics::new().node("detached")
    }
}
