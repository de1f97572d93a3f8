//! Pass summary notification configuration.
//!
//! # Example
//!
//! ```toml
//! [notification]
//! type = "webhook"
//! url = "https://hooks.example.com/cleanup"
//! api_key = "${WEBHOOK_TOKEN}"
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{AwsClientConfig, ConfigError};

/// Where pass summaries are sent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationConfig {
    /// Log the summary at INFO level.
    #[default]
    Log,

    /// POST the summary as JSON.
    Webhook(WebhookNotificationConfig),

    /// Publish to an SNS topic - requires `aws` feature.
    Sns(SnsNotificationConfig),
}

impl NotificationConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Webhook(webhook) if webhook.url.is_empty() => Err(ConfigError::Validation(
                "notification.url must not be empty".into(),
            )),
            Self::Sns(sns) if sns.topic_arn.is_empty() => Err(ConfigError::Validation(
                "notification.topic_arn must not be empty".into(),
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookNotificationConfig {
    pub url: String,

    /// Sent as `Authorization: Bearer <api_key>`.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Extra request headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Default: 5000
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnsNotificationConfig {
    #[serde(flatten)]
    pub client: AwsClientConfig,

    pub topic_arn: String,
}

fn default_timeout_ms() -> u64 {
    5000
}
