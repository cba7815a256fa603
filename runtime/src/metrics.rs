//! Prometheus metrics for the reservation runtime.
//!
//! Metric names:
//! - `reservation_transitions_total{to}`
//! - `reservation_transition_duration_seconds`
//! - `reservation_claims_total{outcome}` with outcome `won`, `lost`,
//!   `self_claim` or `rejected`
//! - `reservation_store_retries_total{operation}`
//! - `reservation_notifications_total{outcome}` with outcome `delivered` or
//!   `dropped`
//!
//! The recording helpers work whether or not a recorder is installed; without
//! one they are no-ops.
//!
//! # Example
//!
//! ```rust,no_run
//! use reservation_runtime::metrics::MetricsExporter;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let exporter = MetricsExporter::install()?;
//! println!("{}", exporter.render());
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Installed Prometheus recorder.
///
/// The hosting application decides how to expose [`render`](Self::render)'s
/// output (an HTTP endpoint, a log line, ...).
#[derive(Clone)]
pub struct MetricsExporter {
    handle: PrometheusHandle,
}

impl MetricsExporter {
    /// Register metric descriptions and install a global Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Install`] if a recorder is already installed in
    /// this process.
    pub fn install() -> Result<Self, MetricsError> {
        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = builder
            .install_recorder()
            .map_err(|e| MetricsError::Install(e.to_string()))?;
        register_metrics();
        tracing::info!("Metrics recorder installed");
        Ok(Self { handle })
    }

    /// Render current metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

impl std::fmt::Debug for MetricsExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsExporter").finish_non_exhaustive()
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    describe_counter!(
        "reservation_transitions_total",
        "Committed request transitions, labelled by target status"
    );
    describe_histogram!(
        "reservation_transition_duration_seconds",
        "Time from command issue to committed transition"
    );
    describe_counter!(
        "reservation_claims_total",
        "Claim attempts, labelled by outcome"
    );
    describe_counter!(
        "reservation_store_retries_total",
        "Store operations retried after a transient failure"
    );
    describe_counter!(
        "reservation_notifications_total",
        "Transition events handed to the notification bridge"
    );
}

/// Lifecycle metrics.
pub mod transitions {
    use super::Duration;
    use reservation_core::RequestStatus;

    /// Record a committed transition into `to`.
    pub fn record(to: RequestStatus, duration: Option<Duration>) {
        metrics::counter!("reservation_transitions_total", "to" => to.as_str()).increment(1);
        if let Some(duration) = duration {
            metrics::histogram!("reservation_transition_duration_seconds")
                .record(duration.as_secs_f64());
        }
    }
}

/// Claim arbitration metrics.
pub mod claims {
    /// Record a claim outcome.
    pub fn record(outcome: &'static str) {
        metrics::counter!("reservation_claims_total", "outcome" => outcome).increment(1);
    }
}

/// Store retry metrics.
pub mod store {
    /// Record one retry of `operation`.
    pub fn record_retry(operation: &'static str) {
        metrics::counter!("reservation_store_retries_total", "operation" => operation)
            .increment(1);
    }
}

/// Notification bridge metrics.
pub mod notifications {
    /// Record a published event that reached at least one observer.
    pub fn record_delivered() {
        metrics::counter!("reservation_notifications_total", "outcome" => "delivered")
            .increment(1);
    }

    /// Record a published event nobody was listening for.
    pub fn record_dropped() {
        metrics::counter!("reservation_notifications_total", "outcome" => "dropped").increment(1);
    }
}
