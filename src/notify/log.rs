use async_trait::async_trait;

use super::{Notifier, NotifyResult};
use crate::reconciler::PassResult;

/// Writes the pass summary to the log. Used when no channel is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn publish(&self, summary: &PassResult) -> NotifyResult<()> {
        tracing::info!(
            pass_id = %summary.pass_id,
            candidates = ?summary.candidates,
            deleted = ?summary.deleted,
            failures = summary.failures.len(),
            aborted = summary.aborted,
            "{}",
            super::render_subject(summary)
        );
        Ok(())
    }
}
