//! Destination lifecycle and in-flight delivery tracking.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;
use tracing::warn;

/// `created → listening → closed`. Never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Created,
    Listening,
    Closed,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LifecycleState::Created,
            1 => LifecycleState::Listening,
            _ => LifecycleState::Closed,
        }
    }
}

const CREATED: u8 = 0;
const LISTENING: u8 = 1;
const CLOSED: u8 = 2;

const DRAIN_POLL: Duration = Duration::from_millis(10);

/// Shared lifecycle bookkeeping for destination implementations.
///
/// Deliveries register through [`Lifecycle::begin_delivery`]; `close` stops
/// new deliveries and then waits (bounded) for registered ones to finish.
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
    in_flight: AtomicUsize,
    drain_timeout: Duration,
}

impl Lifecycle {
    pub fn new(drain_timeout: Duration) -> Self {
        Self {
            state: AtomicU8::new(CREATED),
            in_flight: AtomicUsize::new(0),
            drain_timeout,
        }
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Move to `listening`. Returns false if the destination is already
    /// closed.
    pub fn start(&self) -> bool {
        match self
            .state
            .compare_exchange(CREATED, LISTENING, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => true,
            Err(current) => current == LISTENING,
        }
    }

    /// Register a delivery. `None` unless the destination is listening.
    pub fn begin_delivery(&self) -> Option<DeliveryGuard<'_>> {
        // Increment first so a concurrent close either waits for us or we
        // observe the closed state and back out.
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = DeliveryGuard { lifecycle: self };
        if self.state.load(Ordering::SeqCst) != LISTENING {
            return None;
        }
        Some(guard)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Stop accepting deliveries and drain the ones in progress. Returns
    /// false if an earlier call already closed it.
    pub async fn close(&self) -> bool {
        if self.state.swap(CLOSED, Ordering::SeqCst) == CLOSED {
            return false;
        }

        let drained = tokio::time::timeout(self.drain_timeout, async {
            while self.in_flight() > 0 {
                tokio::time::sleep(DRAIN_POLL).await;
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                in_flight = self.in_flight(),
                timeout_ms = self.drain_timeout.as_millis() as u64,
                "Destination closed with deliveries still in flight"
            );
        }
        true
    }
}

/// Decrements the in-flight count when dropped.
#[derive(Debug)]
pub struct DeliveryGuard<'a> {
    lifecycle: &'a Lifecycle,
}

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        self.lifecycle.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
