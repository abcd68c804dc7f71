//! Prometheus Metrics
//!
//! Metrics tracked:
//! - `capdo_reconcile_total` - counter of reconcile passes by kind and result
//! - `capdo_reconcile_errors_total` - counter of failed passes by kind and error class
//! - `capdo_reconcile_duration_seconds` - histogram of pass durations by kind
//!
//! Rendered in the text exposition format on `/metrics` by the probe server.

use crate::error::ControllerError;
use crate::reconciler::Action;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Duration;

/// Reconcile metrics on a private registry
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    reconcile_total: IntCounterVec,
    reconcile_errors_total: IntCounterVec,
    reconcile_duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconcile_total = IntCounterVec::new(
            Opts::new("capdo_reconcile_total", "Total number of reconcile passes"),
            &["kind", "result"],
        )?;
        let reconcile_errors_total = IntCounterVec::new(
            Opts::new("capdo_reconcile_errors_total", "Total number of failed reconcile passes"),
            &["kind", "class"],
        )?;
        let reconcile_duration = HistogramVec::new(
            HistogramOpts::new(
                "capdo_reconcile_duration_seconds",
                "Duration of reconcile passes in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["kind"],
        )?;

        registry.register(Box::new(reconcile_total.clone()))?;
        registry.register(Box::new(reconcile_errors_total.clone()))?;
        registry.register(Box::new(reconcile_duration.clone()))?;

        Ok(Self {
            registry,
            reconcile_total,
            reconcile_errors_total,
            reconcile_duration,
        })
    }

    /// Records the outcome of one reconcile pass
    pub fn observe(&self, kind: &str, result: &Result<Action, ControllerError>, elapsed: Duration) {
        let outcome = match result {
            Ok(Action::Requeue(_)) => "requeue",
            Ok(Action::AwaitChange) => "success",
            Err(e) => {
                self.reconcile_errors_total
                    .with_label_values(&[kind, e.class().as_str()])
                    .inc();
                "error"
            }
        };
        self.reconcile_total.with_label_values(&[kind, outcome]).inc();
        self.reconcile_duration
            .with_label_values(&[kind])
            .observe(elapsed.as_secs_f64());
    }

    /// Text exposition of all metrics
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}
