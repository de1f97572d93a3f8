//! Pass summary notifications.
//!
//! Notifications are fire-and-forget: the reconciler logs a failed delivery
//! and carries on.
//!
//! Supports multiple channels:
//! - Log output (default)
//! - In-memory (for testing)
//! - HTTP webhook (JSON body)
//! - AWS SNS topic - requires `aws` feature

mod log;
mod memory;
#[cfg(feature = "aws")]
mod sns;
mod webhook;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::SecondsFormat;
pub use log::LogNotifier;
pub use memory::MemoryNotifier;
#[cfg(feature = "aws")]
pub use sns::SnsNotifier;
use thiserror::Error;
pub use webhook::WebhookNotifier;

use crate::{config::NotificationConfig, reconciler::PassResult};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Notification channel unavailable: {0}")]
    Unavailable(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Notification rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid notification configuration: {0}")]
    Config(String),
}

pub type NotifyResult<T> = Result<T, NotifyError>;

/// A channel that receives one summary per reconciliation pass.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Short name used in logs and metrics.
    fn name(&self) -> &str;

    async fn publish(&self, summary: &PassResult) -> NotifyResult<()>;
}

/// One-line subject for a pass summary.
pub fn render_subject(summary: &PassResult) -> String {
    let mut subject = format!(
        "Volume cleanup: {} deleted, {} marked for deletion",
        summary.deleted.len(),
        summary.candidates.len()
    );
    if !summary.failures.is_empty() {
        subject.push_str(&format!(", {} failures", summary.failures.len()));
    }
    if summary.aborted {
        subject.push_str(" (aborted)");
    }
    subject
}

/// Human-readable body for a pass summary.
pub fn render_message(summary: &PassResult) -> String {
    let mut message = format!(
        "Reconciliation pass {} finished at {}.\n\n",
        summary.pass_id,
        summary
            .finished_at
            .to_rfc3339_opts(SecondsFormat::Secs, true)
    );

    push_list(&mut message, "Deleted volumes", &summary.deleted);
    push_list(
        &mut message,
        "Unattached volumes tagged for deletion",
        &summary.candidates,
    );

    if !summary.failures.is_empty() {
        message.push_str("Failures:\n");
        for failure in &summary.failures {
            message.push_str(&format!(
                "  - {}: {}\n",
                failure.volume_id.as_deref().unwrap_or("(pass)"),
                failure.reason
            ));
        }
    }

    if summary.aborted {
        message.push_str("\nThe pass was aborted before all tracked volumes were validated.\n");
    }

    message
}

fn push_list(out: &mut String, title: &str, ids: &[String]) {
    if ids.is_empty() {
        out.push_str(&format!("{title}: none\n\n"));
    } else {
        out.push_str(&format!("{title} ({}):\n", ids.len()));
        for id in ids {
            out.push_str(&format!("  - {id}\n"));
        }
        out.push('\n');
    }
}

/// Create a notifier from configuration.
pub async fn create_notifier(config: &NotificationConfig) -> NotifyResult<Arc<dyn Notifier>> {
    let notifier: Arc<dyn Notifier> = match config {
        NotificationConfig::Log => Arc::new(LogNotifier),

        NotificationConfig::Webhook(webhook) => Arc::new(WebhookNotifier::from_config(
            reqwest::Client::new(),
            webhook,
        )?),

        #[cfg(feature = "aws")]
        NotificationConfig::Sns(sns) => Arc::new(SnsNotifier::new(sns).await),
        #[cfg(not(feature = "aws"))]
        NotificationConfig::Sns(_) => {
            return Err(NotifyError::Config(
                "SNS notifications configured but the 'aws' feature is not enabled. \
                Rebuild with: cargo build --features aws"
                    .to_string(),
            ));
        }
    };

    Ok(notifier)
}
