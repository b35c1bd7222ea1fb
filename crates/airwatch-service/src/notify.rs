//! Alert delivery backends.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info};

use airwatch_core::{AlertMessage, Error, Notifier, Result, Subscription};

use crate::config::{NotifierConfig, NotifierKind};

/// Build the notifier selected by the configuration.
///
/// The configuration is expected to have passed validation.
pub fn build_notifier(config: &NotifierConfig) -> Result<Arc<dyn Notifier>> {
    match config.kind {
        NotifierKind::Log => Ok(Arc::new(LogNotifier)),
        NotifierKind::Webhook => {
            let url = config
                .webhook_url
                .as_deref()
                .ok_or_else(|| Error::delivery("webhook notifier requires a URL"))?;
            Ok(Arc::new(WebhookNotifier::new(url, config.timeout())?))
        }
    }
}

/// Writes alerts to the log instead of delivering them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, message: &AlertMessage, subscription: &Subscription) -> Result<()> {
        info!(
            "ALERT to {} (subscription {}): {}",
            subscription.email, subscription.id, message.subject
        );
        debug!("{}", message.body);
        Ok(())
    }
}

/// JSON body POSTed by [`WebhookNotifier`].
#[derive(Debug, Serialize)]
pub struct WebhookPayload<'a> {
    pub subscription_id: i64,
    pub email: &'a str,
    #[serde(flatten)]
    pub message: &'a AlertMessage,
}

/// POSTs each alert as JSON to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
    timeout: Duration,
}

impl WebhookNotifier {
    /// Create a webhook notifier with a per-request timeout.
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(Error::delivery(format!(
                "URL must start with http:// or https://, got: {}",
                url
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::delivery(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.to_string(),
            timeout,
        })
    }

    /// Target URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, message: &AlertMessage, subscription: &Subscription) -> Result<()> {
        let payload = WebhookPayload {
            subscription_id: subscription.id,
            email: &subscription.email,
            message,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout {
                        operation: "webhook".to_string(),
                        duration: self.timeout,
                    }
                } else {
                    Error::delivery(format!("webhook request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::delivery(format!(
                "webhook {} returned {}",
                self.url, status
            )));
        }

        debug!(
            "Webhook accepted alert for subscription {}",
            subscription.id
        );
        Ok(())
    }
}
