//! HTTP webhook destination.
//!
//! Sends each record as a JSON body to the configured URL. Transient
//! failures (timeouts, connection errors, 429, 5xx) are retried with
//! exponential backoff before the delivery is reported as failed; a failed
//! record stays unsent in the log and the bus retry sweep picks it up again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::Retryable;
use reqwest::{Client, Method};
use tracing::{debug, info, warn};

use super::{
    Destination, DestinationError, DestinationOptions, Lifecycle, LifecycleState, Result,
    TransportOptions, WebhookOptions,
};
use crate::bus::ConfirmCallback;
use crate::event::{ConfirmSource, EventRecord};
use crate::utils::retry::{delivery_backoff, is_retryable_status};

pub struct WebhookDestination {
    options: DestinationOptions,
    webhook: WebhookOptions,
    method: Method,
    client: Client,
    lifecycle: Lifecycle,
}

impl WebhookDestination {
    pub fn new(options: DestinationOptions, drain_timeout: Duration) -> Result<Self> {
        let TransportOptions::Webhook(webhook) = &options.transport else {
            return Err(DestinationError::Config(format!(
                "destination '{}' is not a webhook",
                options.id
            )));
        };
        let webhook = webhook.clone();

        if webhook.url.is_empty() {
            return Err(DestinationError::Config(format!(
                "webhook destination '{}' has no url",
                options.id
            )));
        }

        let method = Method::from_bytes(webhook.method.to_uppercase().as_bytes())
            .map_err(|_| DestinationError::Config(format!("invalid HTTP method '{}'", webhook.method)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(webhook.timeout_secs))
            .build()?;

        Ok(Self {
            options,
            webhook,
            method,
            client,
            lifecycle: Lifecycle::new(drain_timeout),
        })
    }

    fn is_retryable(err: &DestinationError) -> bool {
        match err {
            DestinationError::Http(e) => e.is_timeout() || e.is_connect(),
            DestinationError::Delivery { retryable, .. } => *retryable,
            _ => false,
        }
    }

    async fn post(&self, body: &str) -> Result<()> {
        let mut request = self
            .client
            .request(self.method.clone(), &self.webhook.url)
            .header("Content-Type", "application/json")
            .body(body.to_string());

        for (key, value) in &self.webhook.headers {
            request = request.header(key, value);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        Err(DestinationError::Delivery {
            id: self.options.id.clone(),
            message: format!(
                "HTTP {} - {}",
                status,
                text.chars().take(200).collect::<String>()
            ),
            retryable: is_retryable_status(status),
        })
    }
}

#[async_trait]
impl Destination for WebhookDestination {
    fn id(&self) -> &str {
        &self.options.id
    }

    fn options(&self) -> &DestinationOptions {
        &self.options
    }

    fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    async fn start(&self) -> Result<()> {
        if !self.lifecycle.start() {
            return Err(DestinationError::Closed(self.options.id.clone()));
        }
        info!(
            destination = %self.options.id,
            url = %self.webhook.url,
            "Webhook destination listening"
        );
        Ok(())
    }

    async fn deliver(&self, record: Arc<EventRecord>, confirm: ConfirmCallback) -> Result<bool> {
        let Some(_guard) = self.lifecycle.begin_delivery() else {
            return Ok(false);
        };

        let body = serde_json::to_string(record.as_ref())?;

        (|| async { self.post(&body).await })
            .retry(delivery_backoff())
            .when(Self::is_retryable)
            .notify(|err, delay| {
                warn!(
                    destination = %self.options.id,
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "Webhook delivery failed, retrying"
                );
            })
            .await?;

        debug!(destination = %self.options.id, id = %record.id, "Webhook delivered");

        let source = ConfirmSource::new(&self.options.id, self.options.display_name());
        if let Err(e) = confirm.confirm(source).await {
            warn!(destination = %self.options.id, error = %e, "Failed to confirm delivery");
        }
        Ok(true)
    }

    async fn close(&self) -> Result<()> {
        if self.lifecycle.close().await {
            info!(destination = %self.options.id, "Webhook destination closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(url: &str) -> DestinationOptions {
        DestinationOptions::new("hook-1", TransportOptions::Webhook(WebhookOptions::new(url)))
    }

    #[test]
    fn test_retryable_errors() {
        let retryable = DestinationError::Delivery {
            id: "hook-1".to_string(),
            message: "HTTP 503 Service Unavailable - ".to_string(),
            retryable: true,
        };
        let rejected = DestinationError::Delivery {
            id: "hook-1".to_string(),
            message: "HTTP 400 Bad Request - ".to_string(),
            retryable: false,
        };

        assert!(WebhookDestination::is_retryable(&retryable));
        assert!(!WebhookDestination::is_retryable(&rejected));
        assert!(!WebhookDestination::is_retryable(&DestinationError::Closed(
            "hook-1".to_string()
        )));
    }

    #[test]
    fn test_invalid_method_rejected() {
        let mut opts = options("http://localhost:9/events");
        if let TransportOptions::Webhook(webhook) = &mut opts.transport {
            webhook.method = "NOT A METHOD".to_string();
        }

        let result = WebhookDestination::new(opts, Duration::from_millis(10));
        assert!(matches!(result, Err(DestinationError::Config(_))));
    }

    #[test]
    fn test_non_webhook_transport_rejected() {
        let result = WebhookDestination::new(
            DestinationOptions::new("log", TransportOptions::Log),
            Duration::from_millis(10),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_reports_failure() {
        let destination =
            WebhookDestination::new(options("http://127.0.0.1:9/events"), Duration::from_millis(10))
                .unwrap();
        destination.start().await.unwrap();

        let record = Arc::new(EventRecord::generic("generic.ping"));
        let (callback, probe) = ConfirmCallback::probe(record.id);

        assert!(destination.deliver(record, callback).await.is_err());
        assert!(!probe.is_confirmed());
    }
}
