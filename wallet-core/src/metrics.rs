//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `wallet_mutations_total` - Committed mutations, labelled by kind
//! - `wallet_rejections_total` - Business rejections, labelled by kind
//! - `wallet_infra_failures_total` - Infrastructure failures
//! - `wallet_op_duration_seconds` - Histogram of operation latencies
//! - `wallet_activity_log_failures_total` - Best-effort activity writes lost

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Committed mutations by transaction kind
    pub mutations_total: IntCounterVec,

    /// Business rejections by transaction kind
    pub rejections_total: IntCounterVec,

    /// Infrastructure failures
    pub infra_failures_total: IntCounter,

    /// Operation latency histogram
    pub op_duration: Histogram,

    /// Activity-log writes that failed (logged, never propagated)
    pub activity_log_failures_total: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let mutations_total = IntCounterVec::new(
            Opts::new("wallet_mutations_total", "Committed balance mutations"),
            &["kind"],
        )?;
        registry.register(Box::new(mutations_total.clone()))?;

        let rejections_total = IntCounterVec::new(
            Opts::new("wallet_rejections_total", "Business rejections"),
            &["kind"],
        )?;
        registry.register(Box::new(rejections_total.clone()))?;

        let infra_failures_total = IntCounter::new(
            "wallet_infra_failures_total",
            "Infrastructure failures surfaced to callers",
        )?;
        registry.register(Box::new(infra_failures_total.clone()))?;

        let op_duration = Histogram::with_opts(
            HistogramOpts::new("wallet_op_duration_seconds", "Operation latencies").buckets(vec![
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0,
            ]),
        )?;
        registry.register(Box::new(op_duration.clone()))?;

        let activity_log_failures_total = IntCounter::new(
            "wallet_activity_log_failures_total",
            "Best-effort activity log writes that failed",
        )?;
        registry.register(Box::new(activity_log_failures_total.clone()))?;

        Ok(Self {
            mutations_total,
            rejections_total,
            infra_failures_total,
            op_duration,
            activity_log_failures_total,
            registry,
        })
    }

    /// Record a committed mutation
    pub fn record_mutation(&self, kind: &str) {
        self.mutations_total.with_label_values(&[kind]).inc();
    }

    /// Record a business rejection
    pub fn record_rejection(&self, kind: &str) {
        self.rejections_total.with_label_values(&[kind]).inc();
    }

    /// Record an infrastructure failure
    pub fn record_infra_failure(&self) {
        self.infra_failures_total.inc();
    }

    /// Record operation duration
    pub fn record_op_duration(&self, duration_seconds: f64) {
        self.op_duration.observe(duration_seconds);
    }

    /// Record a lost activity-log write
    pub fn record_activity_log_failure(&self) {
        self.activity_log_failures_total.inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("metrics registration cannot fail on a fresh registry")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.infra_failures_total.get(), 0);
        assert_eq!(metrics.activity_log_failures_total.get(), 0);
    }

    #[test]
    fn test_record_mutation_by_kind() {
        let metrics = Metrics::new().unwrap();
        metrics.record_mutation("deposit");
        metrics.record_mutation("deposit");
        metrics.record_mutation("transfer");
        assert_eq!(
            metrics.mutations_total.with_label_values(&["deposit"]).get(),
            2
        );
        assert_eq!(
            metrics.mutations_total.with_label_values(&["transfer"]).get(),
            1
        );
    }

    #[test]
    fn test_record_rejection_and_failures() {
        let metrics = Metrics::new().unwrap();
        metrics.record_rejection("withdraw");
        metrics.record_infra_failure();
        metrics.record_activity_log_failure();
        assert_eq!(
            metrics.rejections_total.with_label_values(&["withdraw"]).get(),
            1
        );
        assert_eq!(metrics.infra_failures_total.get(), 1);
        assert_eq!(metrics.activity_log_failures_total.get(), 1);
    }
}
