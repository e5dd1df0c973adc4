//! Counters for reconciliation ticks and transaction outcomes.

use crate::transaction::TransactionId;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Where the reconciler and executor report what happened.
pub trait MetricsSink: Send + Sync {
    /// One reconciliation tick finished, `outcome` is `ok` or `error`.
    fn record_tick(&self, outcome: &str);

    /// One `apply_idempotent` call returned, `outcome` is the outcome label.
    fn record_transaction(&self, transaction: TransactionId, outcome: &str);

    /// One rollback call returned.
    fn record_rollback(&self, transaction: TransactionId, succeeded: bool);

    /// One workspace pass finished, `outcome` is `advanced`, `pending` or `failed`.
    fn record_workspace(&self, outcome: &str);

    fn record_reservation_created(&self);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_tick(&self, _outcome: &str) {}

    fn record_transaction(&self, _transaction: TransactionId, _outcome: &str) {}

    fn record_rollback(&self, _transaction: TransactionId, _succeeded: bool) {}

    fn record_workspace(&self, _outcome: &str) {}

    fn record_reservation_created(&self) {}
}

/// Prometheus counters registered into their own [`Registry`].
#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    ticks_total: IntCounterVec,
    transactions_total: IntCounterVec,
    rollbacks_total: IntCounterVec,
    workspaces_total: IntCounterVec,
    reservations_created_total: IntCounter,
}

impl PrometheusMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("govern".to_string()), None)?;

        let ticks_total = IntCounterVec::new(
            Opts::new("reconcile_ticks_total", "Reconciliation ticks"),
            &["outcome"],
        )?;
        registry.register(Box::new(ticks_total.clone()))?;

        let transactions_total = IntCounterVec::new(
            Opts::new("transaction_applies_total", "Transaction apply calls"),
            &["transaction", "outcome"],
        )?;
        registry.register(Box::new(transactions_total.clone()))?;

        let rollbacks_total = IntCounterVec::new(
            Opts::new("transaction_rollbacks_total", "Transaction rollback calls"),
            &["transaction", "outcome"],
        )?;
        registry.register(Box::new(rollbacks_total.clone()))?;

        let workspaces_total = IntCounterVec::new(
            Opts::new("workspace_passes_total", "Per-workspace reconciliation passes"),
            &["outcome"],
        )?;
        registry.register(Box::new(workspaces_total.clone()))?;

        let reservations_created_total = IntCounter::new(
            "reservations_created_total",
            "Spare workspaces created by the reservation pool",
        )?;
        registry.register(Box::new(reservations_created_total.clone()))?;

        Ok(Self {
            registry,
            ticks_total,
            transactions_total,
            rollbacks_total,
            workspaces_total,
            reservations_created_total,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn export(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl MetricsSink for PrometheusMetrics {
    fn record_tick(&self, outcome: &str) {
        self.ticks_total.with_label_values(&[outcome]).inc();
    }

    fn record_transaction(&self, transaction: TransactionId, outcome: &str) {
        self.transactions_total
            .with_label_values(&[transaction.as_str(), outcome])
            .inc();
    }

    fn record_rollback(&self, transaction: TransactionId, succeeded: bool) {
        let outcome = if succeeded { "ok" } else { "error" };
        self.rollbacks_total
            .with_label_values(&[transaction.as_str(), outcome])
            .inc();
    }

    fn record_workspace(&self, outcome: &str) {
        self.workspaces_total.with_label_values(&[outcome]).inc();
    }

    fn record_reservation_created(&self) {
        self.reservations_created_total.inc();
    }
}
