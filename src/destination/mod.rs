//! Destinations: pluggable sinks that receive event records.
//!
//! Every destination implements the same contract: a subscription predicate,
//! a `start`/`close` lifecycle, and `deliver`. Delivery and confirmation are
//! decoupled: `deliver` reports whether the destination accepted the record,
//! and the destination confirms through the [`ConfirmCallback`] once the
//! record actually reached its target.
//!
//! Implementations:
//! - [`LogDestination`]: writes records to the tracing output
//! - [`WebhookDestination`]: POSTs records to an HTTP endpoint
//! - [`MockDestination`]: in-memory recorder for tests

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::bus::ConfirmCallback;
use crate::event::EventRecord;

mod filter;
mod lifecycle;
mod log;
mod mock;
mod registry;
mod webhook;

pub use filter::{event_matches, SubscriptionFilter};
pub use lifecycle::{DeliveryGuard, Lifecycle, LifecycleState};
pub use log::LogDestination;
pub use mock::MockDestination;
pub use registry::DestinationRegistry;
pub use webhook::WebhookDestination;

/// Result type for destination operations.
pub type Result<T> = std::result::Result<T, DestinationError>;

/// Errors raised by destinations.
#[derive(Debug, thiserror::Error)]
pub enum DestinationError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The target answered but did not accept the record. `retryable` marks
    /// transient refusals (throttling, server errors).
    #[error("Delivery to '{id}' failed: {message}")]
    Delivery {
        id: String,
        message: String,
        retryable: bool,
    },

    #[error("Destination '{0}' is closed")]
    Closed(String),

    #[error("Destination store error: {0}")]
    Store(#[from] crate::storage::StorageError),
}

/// Persisted destination configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationOptions {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub subscription: SubscriptionFilter,
    pub transport: TransportOptions,
}

fn default_enabled() -> bool {
    true
}

impl DestinationOptions {
    pub fn new(id: impl Into<String>, transport: TransportOptions) -> Self {
        Self {
            id: id.into(),
            label: String::new(),
            enabled: true,
            subscription: SubscriptionFilter::default(),
            transport,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_subscription(mut self, subscription: SubscriptionFilter) -> Self {
        self.subscription = subscription;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Destination type name, used for stable listing order.
    pub fn type_name(&self) -> &'static str {
        self.transport.type_name()
    }

    /// Name reported in confirmation markers.
    pub fn display_name(&self) -> &str {
        if self.label.is_empty() {
            &self.id
        } else {
            &self.label
        }
    }

    pub fn matches(&self, record: &EventRecord) -> bool {
        self.enabled && self.subscription.matches(record)
    }
}

/// Transport-specific settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportOptions {
    Log,
    Webhook(WebhookOptions),
}

impl TransportOptions {
    pub fn type_name(&self) -> &'static str {
        match self {
            TransportOptions::Log => "log",
            TransportOptions::Webhook(_) => "webhook",
        }
    }
}

/// Webhook transport settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookOptions {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl WebhookOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: default_method(),
            headers: BTreeMap::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Delivery contract shared by all sinks.
#[async_trait]
pub trait Destination: Send + Sync {
    fn id(&self) -> &str;

    /// Configuration this destination was built from.
    fn options(&self) -> &DestinationOptions;

    fn state(&self) -> LifecycleState;

    /// Subscription predicate: whether `record` should be fanned out here.
    fn matches(&self, record: &EventRecord) -> bool {
        self.options().matches(record)
    }

    /// Begin listening. Deliveries before `start` are refused.
    async fn start(&self) -> Result<()>;

    /// Hand one record to the destination. `Ok(true)` means accepted; the
    /// destination calls `confirm` once the record is actually delivered.
    async fn deliver(&self, record: Arc<EventRecord>, confirm: ConfirmCallback) -> Result<bool>;

    /// Stop listening and drain in-flight deliveries. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// Build a destination from its persisted configuration.
pub fn from_options(
    options: DestinationOptions,
    drain_timeout: std::time::Duration,
) -> Result<Arc<dyn Destination>> {
    if options.id.is_empty() {
        return Err(DestinationError::Config("destination id is empty".to_string()));
    }

    match &options.transport {
        TransportOptions::Log => Ok(Arc::new(LogDestination::new(options, drain_timeout))),
        TransportOptions::Webhook(_) => {
            Ok(Arc::new(WebhookDestination::new(options, drain_timeout)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_options_json_shape() {
        let options = DestinationOptions::new(
            "hook-1",
            TransportOptions::Webhook(WebhookOptions::new("http://localhost:9/events")),
        )
        .with_subscription(SubscriptionFilter::events(["node."]));

        let json = serde_json::to_value(&options).unwrap();
        assert_eq!(json["transport"]["type"], "webhook");
        assert_eq!(json["transport"]["method"], "POST");

        let parsed: DestinationOptions = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, options);
    }

    #[test]
    fn test_options_defaults_from_minimal_json() {
        let parsed: DestinationOptions =
            serde_json::from_str(r#"{"id":"d1","transport":{"type":"log"}}"#).unwrap();

        assert!(parsed.enabled);
        assert_eq!(parsed.type_name(), "log");
        assert_eq!(parsed.display_name(), "d1");
        assert_eq!(parsed.subscription, SubscriptionFilter::default());
    }

    #[test]
    fn test_disabled_destination_matches_nothing() {
        let options = DestinationOptions::new("d1", TransportOptions::Log)
            .with_subscription(SubscriptionFilter::all())
            .with_enabled(false);

        assert!(!options.matches(&EventRecord::generic("generic.ping")));
    }

    #[test]
    fn test_from_options_rejects_empty_id() {
        let result = from_options(
            DestinationOptions::new("", TransportOptions::Log),
            Duration::from_millis(10),
        );
        assert!(matches!(result, Err(DestinationError::Config(_))));
    }

    #[test]
    fn test_from_options_rejects_empty_webhook_url() {
        let result = from_options(
            DestinationOptions::new("hook", TransportOptions::Webhook(WebhookOptions::new(""))),
            Duration::from_millis(10),
        );
        assert!(matches!(result, Err(DestinationError::Config(_))));
    }
}
