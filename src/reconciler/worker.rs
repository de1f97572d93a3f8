//! Long-running reconciler worker.
//!
//! Runs one pass per configured interval until shut down. A pass in flight
//! when shutdown is requested is aborted, and its partial summary is still
//! published.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::{PassResult, Reconciler};

/// Starts the reconciler loop. Returns once `shutdown` is cancelled.
pub async fn start_reconciler_worker(reconciler: Arc<Reconciler>, shutdown: CancellationToken) {
    let config = reconciler.config();

    let dry_run_msg = if config.dry_run { " (DRY RUN)" } else { "" };

    tracing::info!(
        interval_hours = config.interval_hours,
        concurrency = config.concurrency,
        pass_timeout_secs = config.pass_timeout_secs,
        max_deletes_per_run = config.max_deletes_per_run,
        dry_run = config.dry_run,
        "Starting reconciler worker{}",
        dry_run_msg
    );

    let interval = config.interval();

    loop {
        let result = reconciler.run_pass_at(Utc::now(), &shutdown).await;
        log_pass(&result, dry_run_msg);

        if shutdown.is_cancelled() {
            break;
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    tracing::info!("Reconciler worker stopped");
}

fn log_pass(result: &PassResult, dry_run_msg: &str) {
    if result.aborted {
        tracing::warn!(
            pass_id = %result.pass_id,
            deleted = result.deleted.len(),
            failures = result.failures.len(),
            "Reconciliation pass aborted{}",
            dry_run_msg
        );
    } else if result.has_deletions() || result.has_failures() {
        tracing::info!(
            pass_id = %result.pass_id,
            candidates = result.candidates.len(),
            deleted = result.deleted.len(),
            would_delete = result.would_delete.len(),
            forgotten = result.forgotten.len(),
            waiting = result.waiting,
            failures = result.failures.len(),
            "Reconciliation pass complete{}",
            dry_run_msg
        );
    } else {
        tracing::debug!(
            pass_id = %result.pass_id,
            candidates = result.candidates.len(),
            waiting = result.waiting,
            "Reconciliation pass complete, nothing to delete"
        );
    }
}
