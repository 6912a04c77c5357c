//! Engine Metrics
//!
//! Prometheus collectors registered on a per-orchestrator registry.

use crate::error::{Error, Result};
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry};
use std::time::Duration;

const NAMESPACE: &str = "storage_orchestrator";

pub struct EngineMetrics {
    registry: Registry,
    /// Engine operations by op and outcome
    operations: IntCounterVec,
    /// Backend call latency by driver operation
    backend_call_seconds: HistogramVec,
    /// Transactions begun but not yet committed
    pending_transactions: IntGauge,
    /// Operations currently holding the in-progress guard
    in_flight: IntGauge,
    /// Transactions resolved during bootstrap by op and action
    recovered_transactions: IntCounterVec,
}

fn register_err(e: prometheus::Error) -> Error {
    Error::Internal(format!("failed to register metrics: {}", e))
}

impl EngineMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let operations = IntCounterVec::new(
            Opts::new("operations_total", "Engine operations by outcome").namespace(NAMESPACE),
            &["op", "outcome"],
        )
        .map_err(register_err)?;

        let backend_call_seconds = HistogramVec::new(
            HistogramOpts::new("backend_call_duration_seconds", "Backend call latency")
                .namespace(NAMESPACE)
                .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]),
            &["op"],
        )
        .map_err(register_err)?;

        let pending_transactions = IntGauge::with_opts(
            Opts::new("pending_transactions", "Transactions awaiting commit").namespace(NAMESPACE),
        )
        .map_err(register_err)?;

        let in_flight = IntGauge::with_opts(
            Opts::new("in_flight_operations", "Operations in progress").namespace(NAMESPACE),
        )
        .map_err(register_err)?;

        let recovered_transactions = IntCounterVec::new(
            Opts::new("recovered_transactions_total", "Transactions resolved at bootstrap")
                .namespace(NAMESPACE),
            &["op", "action"],
        )
        .map_err(register_err)?;

        registry
            .register(Box::new(operations.clone()))
            .map_err(register_err)?;
        registry
            .register(Box::new(backend_call_seconds.clone()))
            .map_err(register_err)?;
        registry
            .register(Box::new(pending_transactions.clone()))
            .map_err(register_err)?;
        registry
            .register(Box::new(in_flight.clone()))
            .map_err(register_err)?;
        registry
            .register(Box::new(recovered_transactions.clone()))
            .map_err(register_err)?;

        Ok(Self {
            registry,
            operations,
            backend_call_seconds,
            pending_transactions,
            in_flight,
            recovered_transactions,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Count an engine operation by its outcome
    pub fn record_operation<T>(&self, op: &str, result: &Result<T>) {
        let outcome = match result {
            Ok(_) => "success",
            Err(e) => e.label(),
        };
        self.operations.with_label_values(&[op, outcome]).inc();
    }

    pub fn observe_backend_call(&self, op: &str, elapsed: Duration) {
        self.backend_call_seconds
            .with_label_values(&[op])
            .observe(elapsed.as_secs_f64());
    }

    pub fn transaction_begun(&self) {
        self.pending_transactions.inc();
    }

    pub fn transaction_finished(&self) {
        self.pending_transactions.dec();
    }

    pub fn set_pending_transactions(&self, count: usize) {
        self.pending_transactions.set(count as i64);
    }

    pub fn set_in_flight(&self, count: usize) {
        self.in_flight.set(count as i64);
    }

    pub fn record_recovery(&self, op: &str, action: &str) {
        self.recovered_transactions
            .with_label_values(&[op, action])
            .inc();
    }

    pub fn operation_count(&self, op: &str, outcome: &str) -> u64 {
        self.operations.with_label_values(&[op, outcome]).get()
    }

    pub fn pending_transactions(&self) -> i64 {
        self.pending_transactions.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_outcomes() {
        let metrics = EngineMetrics::new().unwrap();

        metrics.record_operation("add_volume", &Ok::<(), Error>(()));
        metrics.record_operation::<()>("add_volume", &Err(Error::NotReady));
        metrics.record_operation::<()>("add_volume", &Err(Error::NotReady));

        assert_eq!(metrics.operation_count("add_volume", "success"), 1);
        assert_eq!(metrics.operation_count("add_volume", "not_ready"), 2);
    }

    #[test]
    fn test_registries_are_independent() {
        let a = EngineMetrics::new().unwrap();
        let b = EngineMetrics::new().unwrap();

        a.transaction_begun();
        assert_eq!(a.pending_transactions(), 1);
        assert_eq!(b.pending_transactions(), 0);

        let families = a.registry().gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "storage_orchestrator_pending_transactions"));
    }
}
