//! Mock destination for testing.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::warn;

use super::{
    Destination, DestinationError, DestinationOptions, Lifecycle, LifecycleState, Result,
    SubscriptionFilter, TransportOptions,
};
use crate::bus::ConfirmCallback;
use crate::event::{ConfirmSource, EventRecord};

/// Mock destination that records deliveries in memory.
///
/// Can be told to fail its next N deliveries, or to accept records without
/// confirming them. Persists as a `log` destination.
pub struct MockDestination {
    options: DestinationOptions,
    lifecycle: Lifecycle,
    delivered: RwLock<Vec<EventRecord>>,
    attempts: AtomicUsize,
    fail_remaining: AtomicUsize,
    confirm: AtomicBool,
}

impl MockDestination {
    pub fn new(id: impl Into<String>, subscription: SubscriptionFilter) -> Self {
        Self {
            options: DestinationOptions::new(id, TransportOptions::Log)
                .with_subscription(subscription),
            lifecycle: Lifecycle::new(Duration::from_millis(500)),
            delivered: RwLock::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            fail_remaining: AtomicUsize::new(0),
            confirm: AtomicBool::new(true),
        }
    }

    /// Fail the next `times` deliveries.
    pub fn failing(self, times: usize) -> Self {
        self.fail_remaining.store(times, Ordering::SeqCst);
        self
    }

    /// Accept deliveries without confirming them.
    pub fn without_confirm(self) -> Self {
        self.confirm.store(false, Ordering::SeqCst);
        self
    }

    /// Records accepted so far, in delivery order.
    pub async fn delivered(&self) -> Vec<EventRecord> {
        self.delivered.read().await.clone()
    }

    pub async fn delivered_count(&self) -> usize {
        self.delivered.read().await.len()
    }

    /// Delivery attempts, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Poll until at least `count` records were accepted or `timeout` passes.
    pub async fn wait_for_deliveries(&self, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            while self.delivered_count().await < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok()
    }

    fn take_failure(&self) -> bool {
        self.fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Destination for MockDestination {
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
        Ok(())
    }

    async fn deliver(&self, record: Arc<EventRecord>, confirm: ConfirmCallback) -> Result<bool> {
        let Some(_guard) = self.lifecycle.begin_delivery() else {
            return Ok(false);
        };
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if self.take_failure() {
            return Err(DestinationError::Delivery {
                id: self.options.id.clone(),
                message: "mock delivery failure".to_string(),
                retryable: true,
            });
        }

        self.delivered.write().await.push(record.as_ref().clone());

        if self.confirm.load(Ordering::SeqCst) {
            let source = ConfirmSource::new(&self.options.id, self.options.display_name());
            if let Err(e) = confirm.confirm(source).await {
                warn!(destination = %self.options.id, error = %e, "Failed to confirm delivery");
            }
        }
        Ok(true)
    }

    async fn close(&self) -> Result<()> {
        self.lifecycle.close().await;
        Ok(())
    }
}
