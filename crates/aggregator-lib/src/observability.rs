//! Observability infrastructure for the aggregator
//!
//! Provides:
//! - Prometheus metrics (detection latency, node call latency, node failures,
//!   arbitration outcomes, decisions, batch items, trained nodes)
//! - Structured JSON logging with tracing

use crate::models::Verdict;
use prometheus::{
    register_histogram, register_int_counter_vec, register_int_gauge, Histogram, IntCounterVec,
    IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AggregatorMetricsInner> = OnceLock::new();

struct AggregatorMetricsInner {
    detection_latency_seconds: Histogram,
    node_call_latency_seconds: Histogram,
    node_failures: IntCounterVec,
    arbitrations: IntCounterVec,
    decisions: IntCounterVec,
    batch_items: IntCounterVec,
    trained_nodes: IntGauge,
}

impl AggregatorMetricsInner {
    fn new() -> Self {
        Self {
            detection_latency_seconds: register_histogram!(
                "fraud_aggregator_detection_latency_seconds",
                "End-to-end time to score and decide one transaction",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register detection_latency_seconds"),

            node_call_latency_seconds: register_histogram!(
                "fraud_aggregator_node_call_latency_seconds",
                "Time spent waiting on a single node prediction call",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register node_call_latency_seconds"),

            node_failures: register_int_counter_vec!(
                "fraud_aggregator_node_failures_total",
                "Prediction calls excluded from aggregation because the node was unavailable",
                &["node"]
            )
            .expect("Failed to register node_failures"),

            arbitrations: register_int_counter_vec!(
                "fraud_aggregator_arbitrations_total",
                "Rule evaluator invocations by outcome",
                &["outcome"]
            )
            .expect("Failed to register arbitrations"),

            decisions: register_int_counter_vec!(
                "fraud_aggregator_decisions_total",
                "Final decisions by verdict",
                &["decision"]
            )
            .expect("Failed to register decisions"),

            batch_items: register_int_counter_vec!(
                "fraud_aggregator_batch_items_total",
                "Batch items processed by outcome",
                &["outcome"]
            )
            .expect("Failed to register batch_items"),

            trained_nodes: register_int_gauge!(
                "fraud_aggregator_trained_nodes",
                "Number of nodes currently in trained status"
            )
            .expect("Failed to register trained_nodes"),
        }
    }
}

/// Aggregator metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the same
/// underlying metrics.
#[derive(Clone)]
pub struct AggregatorMetrics {
    _private: (),
}

impl Default for AggregatorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregatorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AggregatorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AggregatorMetricsInner {
        GLOBAL_METRICS.get_or_init(AggregatorMetricsInner::new)
    }

    pub fn observe_detection_latency(&self, duration_secs: f64) {
        self.inner().detection_latency_seconds.observe(duration_secs);
    }

    pub fn observe_node_call_latency(&self, duration_secs: f64) {
        self.inner().node_call_latency_seconds.observe(duration_secs);
    }

    pub fn inc_node_failures(&self, node_id: &str) {
        self.inner().node_failures.with_label_values(&[node_id]).inc();
    }

    /// Record an evaluator call; `decided` is false when it was unavailable
    pub fn inc_arbitrations(&self, decided: bool) {
        let outcome = if decided { "decided" } else { "unavailable" };
        self.inner().arbitrations.with_label_values(&[outcome]).inc();
    }

    pub fn inc_decisions(&self, decision: Verdict) {
        self.inner()
            .decisions
            .with_label_values(&[decision.as_str()])
            .inc();
    }

    pub fn inc_batch_items(&self, succeeded: bool) {
        let outcome = if succeeded { "detected" } else { "failed" };
        self.inner().batch_items.with_label_values(&[outcome]).inc();
    }

    pub fn set_trained_nodes(&self, count: i64) {
        self.inner().trained_nodes.set(count);
    }
}

/// Structured logger for aggregator events
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_startup(&self, version: &str, nodes: usize) {
        info!(
            event = "aggregator_started",
            instance = %self.instance,
            version = %version,
            nodes = nodes,
            "Fraud aggregator started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "aggregator_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Fraud aggregator shutting down"
        );
    }

    pub fn log_detection(
        &self,
        aggregated_score: f64,
        decision: Verdict,
        predictions: usize,
        arbitrated: bool,
        duration_ms: u64,
    ) {
        info!(
            event = "detection_completed",
            instance = %self.instance,
            aggregated_score = aggregated_score,
            decision = %decision,
            predictions = predictions,
            arbitrated = arbitrated,
            duration_ms = duration_ms,
            "Transaction scored"
        );
    }

    pub fn log_node_unavailable(&self, node_id: &str, reason: &str) {
        warn!(
            event = "node_unavailable",
            instance = %self.instance,
            node_id = %node_id,
            reason = %reason,
            "Node excluded from aggregation"
        );
    }

    pub fn log_arbitration_unavailable(&self, score: f64, reason: &str) {
        warn!(
            event = "arbitration_unavailable",
            instance = %self.instance,
            score = score,
            reason = %reason,
            "Rule evaluator unavailable, score-only decision applied"
        );
    }

    pub fn log_metrics_recorded(&self, node_id: &str, f1_score: f64, data_volume: u64) {
        info!(
            event = "node_metrics_recorded",
            instance = %self.instance,
            node_id = %node_id,
            f1_score = f1_score,
            data_volume = data_volume,
            "Node metrics received"
        );
    }

    pub fn log_status_changed(&self, node_id: &str, model_status: &str, sync_status: &str) {
        info!(
            event = "node_status_changed",
            instance = %self.instance,
            node_id = %node_id,
            model_status = %model_status,
            sync_status = %sync_status,
            "Node status updated"
        );
    }

    pub fn log_batch(&self, submitted: usize, processed: usize, failed: usize, duration_ms: u64) {
        if failed > 0 {
            warn!(
                event = "batch_completed",
                instance = %self.instance,
                submitted = submitted,
                processed = processed,
                failed = failed,
                duration_ms = duration_ms,
                "Batch completed with failed items"
            );
        } else {
            info!(
                event = "batch_completed",
                instance = %self.instance,
                submitted = submitted,
                processed = processed,
                failed = failed,
                duration_ms = duration_ms,
                "Batch completed"
            );
        }
    }

    pub fn log_settings_updated(&self, policy: &str, low: f64, high: f64, arbitration: bool) {
        info!(
            event = "settings_updated",
            instance = %self.instance,
            weighting_policy = %policy,
            ambiguous_low = low,
            ambiguous_high = high,
            arbitration_enabled = arbitration,
            "Detection settings updated"
        );
    }
}
