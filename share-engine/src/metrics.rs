//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring allocation.
//!
//! # Metrics
//!
//! - `share_purchases_total` - Successful purchases
//! - `share_sales_total` - Successful sales
//! - `share_claim_conflicts_total` - Claims lost to a concurrent buyer
//! - `share_rejections_total{reason}` - Caller-correctable rejections
//! - `share_integrity_errors_total` - Partial multi-step failures
//! - `share_purchase_duration_seconds` - Histogram of purchase latencies

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Successful purchases
    pub purchases_total: IntCounter,

    /// Successful sales
    pub sales_total: IntCounter,

    /// Claims lost to a concurrent buyer
    pub claim_conflicts_total: IntCounter,

    /// Rejections by reason code
    pub rejections_total: IntCounterVec,

    /// Integrity failures
    pub integrity_errors_total: IntCounter,

    /// Purchase duration histogram
    pub purchase_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("purchases_total", &self.purchases_total.get())
            .field("sales_total", &self.sales_total.get())
            .finish()
    }
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let purchases_total =
            IntCounter::new("share_purchases_total", "Total number of successful purchases")?;
        registry.register(Box::new(purchases_total.clone()))?;

        let sales_total = IntCounter::new("share_sales_total", "Total number of successful sales")?;
        registry.register(Box::new(sales_total.clone()))?;

        let claim_conflicts_total = IntCounter::new(
            "share_claim_conflicts_total",
            "Claims lost to a concurrent buyer",
        )?;
        registry.register(Box::new(claim_conflicts_total.clone()))?;

        let rejections_total = IntCounterVec::new(
            Opts::new("share_rejections_total", "Rejected operations by reason"),
            &["reason"],
        )?;
        registry.register(Box::new(rejections_total.clone()))?;

        let integrity_errors_total = IntCounter::new(
            "share_integrity_errors_total",
            "Partial multi-step failures requiring reconciliation",
        )?;
        registry.register(Box::new(integrity_errors_total.clone()))?;

        let purchase_duration = Histogram::with_opts(
            HistogramOpts::new(
                "share_purchase_duration_seconds",
                "Histogram of purchase latencies",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.010, 0.050, 0.100, 0.500]),
        )?;
        registry.register(Box::new(purchase_duration.clone()))?;

        Ok(Self {
            purchases_total,
            sales_total,
            claim_conflicts_total,
            rejections_total,
            integrity_errors_total,
            purchase_duration,
            registry,
        })
    }

    /// Record a purchase outcome and its duration
    pub fn record_purchase(&self, outcome: &crate::Result<crate::types::AllocatedItem>, seconds: f64) {
        self.purchase_duration.observe(seconds);
        match outcome {
            Ok(_) => self.purchases_total.inc(),
            Err(err) => self.record_error(err),
        }
    }

    /// Record a sale outcome
    pub fn record_sale(&self, outcome: &crate::Result<crate::types::SaleReceipt>) {
        match outcome {
            Ok(_) => self.sales_total.inc(),
            Err(err) => self.record_error(err),
        }
    }

    /// Record a lost claim race
    pub fn record_claim_conflict(&self) {
        self.claim_conflicts_total.inc();
    }

    fn record_error(&self, err: &crate::Error) {
        match err.kind() {
            crate::ErrorKind::Integrity => self.integrity_errors_total.inc(),
            _ => self.rejections_total.with_label_values(&[err.code()]).inc(),
        }
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}
