//! Prometheus metrics for reconciliation passes.
//!
//! Provides metrics for:
//! - Pass count and duration
//! - Volumes discovered, deleted and forgotten
//! - Failures by stage
//! - Notification delivery failures
//!
//! Every recording function is a no-op without the `prometheus` feature.

#[cfg(feature = "prometheus")]
use metrics::{counter, gauge, histogram};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::{config::MetricsConfig, reconciler::PassResult};

/// Install the Prometheus recorder and start its scrape endpoint.
///
/// Must be called from within a Tokio runtime.
#[cfg(feature = "prometheus")]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if !config.enabled {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(config.listen)
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Suffix("_duration_seconds".to_string()),
            &config.pass_duration_buckets_secs,
        )
        .map_err(|e| MetricsError::Setup(e.to_string()))?
        .install()
        .map_err(MetricsError::Install)?;

    tracing::info!(listen = %config.listen, "Prometheus metrics endpoint started");

    Ok(())
}

/// Initialize the metrics system (no-op without prometheus feature).
#[cfg(not(feature = "prometheus"))]
pub fn init_metrics(config: &MetricsConfig) -> Result<(), MetricsError> {
    if config.enabled {
        tracing::warn!(
            "Metrics are enabled in config but the 'prometheus' feature is not compiled. \
            Rebuild with: cargo build --features prometheus"
        );
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Metric Recording Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Record a finished reconciliation pass.
///
/// # Arguments
/// * `result` - The pass summary
/// * `duration_secs` - Wall-clock time of the pass
pub fn record_pass(result: &PassResult, duration_secs: f64) {
    #[cfg(feature = "prometheus")]
    {
        let outcome = if result.aborted {
            "aborted"
        } else if result.has_failures() {
            "partial"
        } else {
            "success"
        };

        counter!("reconciler_passes_total", "outcome" => outcome).increment(1);
        histogram!("reconciler_pass_duration_seconds").record(duration_secs);

        gauge!("reconciler_candidates").set(result.candidates.len() as f64);
        gauge!("reconciler_waiting_volumes").set(result.waiting as f64);

        counter!("reconciler_volumes_deleted_total").increment(result.deleted.len() as u64);
        counter!("reconciler_volumes_would_delete_total")
            .increment(result.would_delete.len() as u64);
        counter!("reconciler_records_forgotten_total").increment(result.forgotten.len() as u64);

        for failure in &result.failures {
            counter!("reconciler_failures_total", "stage" => failure.stage.as_str()).increment(1);
        }
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (result, duration_secs);
    }
}

/// Record a pass summary that could not be delivered.
pub fn record_notification_failure(notifier: &str) {
    #[cfg(feature = "prometheus")]
    {
        counter!(
            "reconciler_notification_failures_total",
            "notifier" => notifier.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = notifier;
    }
}

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to set up metrics: {0}")]
    Setup(String),

    #[cfg(feature = "prometheus")]
    #[error("Failed to install metrics recorder: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}
