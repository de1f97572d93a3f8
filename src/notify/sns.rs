//! AWS SNS notifier, for e-mail style summaries.

use async_trait::async_trait;
use aws_sdk_sns::Client;
use tracing::instrument;

use super::{Notifier, NotifyError, NotifyResult, render_message, render_subject};
use crate::{config::SnsNotificationConfig, reconciler::PassResult};

/// SNS subjects are limited to 100 characters.
const MAX_SUBJECT_LEN: usize = 100;

/// Publishes pass summaries to an SNS topic.
pub struct SnsNotifier {
    client: Client,
    topic_arn: String,
}

impl SnsNotifier {
    pub async fn new(config: &SnsNotificationConfig) -> Self {
        let sdk_config = crate::aws::load_sdk_config(&config.client).await;

        let mut sns_config = aws_sdk_sns::config::Builder::from(&sdk_config);
        if let Some(endpoint_url) = &config.client.endpoint_url {
            sns_config = sns_config.endpoint_url(endpoint_url);
        }

        Self {
            client: Client::from_conf(sns_config.build()),
            topic_arn: config.topic_arn.clone(),
        }
    }
}

fn truncate_subject(subject: String) -> String {
    if subject.len() <= MAX_SUBJECT_LEN {
        return subject;
    }
    let cut = subject.floor_char_boundary(MAX_SUBJECT_LEN);
    subject[..cut].to_string()
}

#[async_trait]
impl Notifier for SnsNotifier {
    fn name(&self) -> &str {
        "sns"
    }

    #[instrument(skip(self, summary), fields(topic_arn = %self.topic_arn, pass_id = %summary.pass_id))]
    async fn publish(&self, summary: &PassResult) -> NotifyResult<()> {
        self.client
            .publish()
            .topic_arn(&self.topic_arn)
            .subject(truncate_subject(render_subject(summary)))
            .message(render_message(summary))
            .send()
            .await
            .map_err(|e| NotifyError::Unavailable(format!("SNS publish failed: {}", e.into_service_error())))?;

        Ok(())
    }
}
