//! HTTP webhook notifier.
//!
//! Posts each pass summary as JSON:
//!
//! ```json
//! {
//!     "subject": "Volume cleanup: 1 deleted, 2 marked for deletion",
//!     "message": "Reconciliation pass ... finished at ...",
//!     "summary": { "candidates": ["vol-a"], "deleted": ["vol-b"], "failures": [] }
//! }
//! ```

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::instrument;

use super::{Notifier, NotifyError, NotifyResult, render_message, render_subject};
use crate::{config::WebhookNotificationConfig, reconciler::PassResult};

/// Posts pass summaries to an HTTP endpoint.
pub struct WebhookNotifier {
    client: Client,
    url: String,
    api_key: Option<String>,
    headers: HashMap<String, String>,
    timeout: Duration,
}

#[derive(Serialize)]
struct WebhookBody<'a> {
    subject: String,
    message: String,
    summary: &'a PassResult,
}

impl WebhookNotifier {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            api_key: None,
            headers: HashMap::new(),
            timeout: Duration::from_millis(5000),
        }
    }

    /// Sets the bearer token sent in the `Authorization` header.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout = Duration::from_millis(timeout_ms);
        self
    }

    pub fn from_config(client: Client, config: &WebhookNotificationConfig) -> NotifyResult<Self> {
        if config.url.is_empty() {
            return Err(NotifyError::Config(
                "Webhook notifier requires a URL".to_string(),
            ));
        }

        let mut notifier = Self::new(client, &config.url)
            .with_headers(config.headers.clone())
            .with_timeout_ms(config.timeout_ms);

        if let Some(ref api_key) = config.api_key {
            notifier = notifier.with_api_key(api_key);
        }

        Ok(notifier)
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    #[instrument(skip(self, summary), fields(url = %self.url, pass_id = %summary.pass_id))]
    async fn publish(&self, summary: &PassResult) -> NotifyResult<()> {
        let body = WebhookBody {
            subject: render_subject(summary),
            message: render_message(summary),
            summary,
        };

        let mut req_builder = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(&body);

        if let Some(ref api_key) = self.api_key {
            req_builder = req_builder.header("Authorization", format!("Bearer {}", api_key));
        }

        for (key, value) in &self.headers {
            req_builder = req_builder.header(key, value);
        }

        let response = req_builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_partial_json, header, method, path},
    };

    use super::*;

    fn summary() -> PassResult {
        let mut result = PassResult::begin(chrono::Utc::now());
        result.candidates = vec!["vol-a".into()];
        result.deleted = vec!["vol-b".into()];
        result
    }

    #[tokio::test]
    async fn test_posts_summary_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/cleanup"))
            .and(header("Authorization", "Bearer secret"))
            .and(header("X-Team", "storage"))
            .and(body_partial_json(serde_json::json!({
                "subject": "Volume cleanup: 1 deleted, 1 marked for deletion",
                "summary": { "candidates": ["vol-a"], "deleted": ["vol-b"] }
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(Client::new(), format!("{}/hooks/cleanup", server.uri()))
            .with_api_key("secret")
            .with_headers(HashMap::from([("X-Team".to_string(), "storage".to_string())]));

        notifier.publish(&summary()).await.unwrap();
    }

    #[tokio::test]
    async fn test_non_success_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let notifier = WebhookNotifier::new(Client::new(), server.uri());
        let err = notifier.publish(&summary()).await.unwrap_err();

        assert!(matches!(err, NotifyError::Rejected { status: 500, ref body } if body == "boom"));
    }

    #[test]
    fn test_from_config_requires_url() {
        let config = WebhookNotificationConfig {
            url: String::new(),
            api_key: None,
            headers: HashMap::new(),
            timeout_ms: 1000,
        };
        assert!(WebhookNotifier::from_config(Client::new(), &config).is_err());
    }
}
