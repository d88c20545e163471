//! Metrics collection and export module

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder};
use std::time::Duration;

/// Engine metrics registry
///
/// One instance per process, shared through [`crate::context::DeployerContext`].
pub struct EngineMetrics {
    registry: Registry,

    // Transactions
    pub tx_submitted: IntCounter,
    pub tx_confirmed: IntCounter,
    pub tx_failed: IntCounter,
    pub tx_timed_out: IntCounter,

    // Deployment lifecycle
    pub start_attempts: IntCounter,
    pub restart_attempts: IntCounter,
    pub status_polls: IntCounter,

    // Histograms
    pub confirmation_latency: Histogram,
}

impl EngineMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let tx_submitted = IntCounter::with_opts(Opts::new(
            "tx_submitted_total",
            "Transactions handed to the ledger",
        ))?;
        let tx_confirmed = IntCounter::with_opts(Opts::new(
            "tx_confirmed_total",
            "Transactions confirmed at confirmed or finalized commitment",
        ))?;
        let tx_failed = IntCounter::with_opts(Opts::new(
            "tx_failed_total",
            "Transactions that landed with a program error",
        ))?;
        let tx_timed_out = IntCounter::with_opts(Opts::new(
            "tx_timed_out_total",
            "Transactions without a terminal status before the confirmation timeout",
        ))?;

        let start_attempts = IntCounter::with_opts(Opts::new(
            "deployment_start_attempts_total",
            "Outer start attempts made by the start controller",
        ))?;
        let restart_attempts = IntCounter::with_opts(Opts::new(
            "deployment_restart_attempts_total",
            "Restart calls issued after a confirmation-timeout diagnosis",
        ))?;
        let status_polls = IntCounter::with_opts(Opts::new(
            "deployment_status_polls_total",
            "Deployment status reads",
        ))?;

        let confirmation_latency = Histogram::with_opts(
            HistogramOpts::new(
                "tx_confirmation_latency_seconds",
                "Time from submission to confirmation",
            )
            .buckets(vec![0.5, 1.0, 2.0, 4.0, 8.0, 15.0, 30.0, 60.0]),
        )?;

        registry.register(Box::new(tx_submitted.clone()))?;
        registry.register(Box::new(tx_confirmed.clone()))?;
        registry.register(Box::new(tx_failed.clone()))?;
        registry.register(Box::new(tx_timed_out.clone()))?;
        registry.register(Box::new(start_attempts.clone()))?;
        registry.register(Box::new(restart_attempts.clone()))?;
        registry.register(Box::new(status_polls.clone()))?;
        registry.register(Box::new(confirmation_latency.clone()))?;

        Ok(Self {
            registry,
            tx_submitted,
            tx_confirmed,
            tx_failed,
            tx_timed_out,
            start_attempts,
            restart_attempts,
            status_polls,
            confirmation_latency,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn observe_confirmation(&self, elapsed: Duration) {
        self.tx_confirmed.inc();
        self.confirmation_latency.observe(elapsed.as_secs_f64());
    }

    /// Render the registry in the Prometheus text exposition format
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl std::fmt::Debug for EngineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineMetrics")
            .field("tx_submitted", &self.tx_submitted.get())
            .field("tx_confirmed", &self.tx_confirmed.get())
            .field("start_attempts", &self.start_attempts.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_text_lists_counters() {
        let metrics = EngineMetrics::new().unwrap();
        metrics.tx_submitted.inc();
        metrics.observe_confirmation(Duration::from_secs(3));

        let text = metrics.encode_text().unwrap();
        assert!(text.contains("tx_submitted_total 1"));
        assert!(text.contains("tx_confirmed_total 1"));
        assert!(text.contains("tx_confirmation_latency_seconds_count 1"));
    }

    #[test]
    fn test_instances_are_independent() {
        let a = EngineMetrics::new().unwrap();
        let b = EngineMetrics::new().unwrap();
        a.restart_attempts.inc();
        assert_eq!(a.restart_attempts.get(), 1);
        assert_eq!(b.restart_attempts.get(), 0);
    }
}
