//! Log destination.
//!
//! Writes every matching record to the tracing output under the
//! `logstream::stream` target and confirms it immediately. Useful for
//! debugging event flow and as the zero-infrastructure default sink.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{Destination, DestinationOptions, Lifecycle, LifecycleState, Result};
use crate::bus::ConfirmCallback;
use crate::event::{ConfirmSource, EventRecord};

pub struct LogDestination {
    options: DestinationOptions,
    lifecycle: Lifecycle,
}

impl LogDestination {
    pub fn new(options: DestinationOptions, drain_timeout: Duration) -> Self {
        Self {
            options,
            lifecycle: Lifecycle::new(drain_timeout),
        }
    }
}

#[async_trait]
impl Destination for LogDestination {
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
            return Err(super::DestinationError::Closed(self.options.id.clone()));
        }
        info!(destination = %self.options.id, "Log destination listening");
        Ok(())
    }

    async fn deliver(&self, record: Arc<EventRecord>, confirm: ConfirmCallback) -> Result<bool> {
        let Some(_guard) = self.lifecycle.begin_delivery() else {
            return Ok(false);
        };

        let payload = serde_json::to_string(&record.payload)?;
        info!(
            target: "logstream::stream",
            destination = %self.options.id,
            id = %record.id,
            event = %record.event_name,
            kind = %record.kind,
            timestamp = %record.timestamp.to_rfc3339(),
            payload = %payload,
            "event"
        );

        let source = ConfirmSource::new(&self.options.id, self.options.display_name());
        if let Err(e) = confirm.confirm(source).await {
            warn!(destination = %self.options.id, error = %e, "Failed to confirm delivery");
        }
        Ok(true)
    }

    async fn close(&self) -> Result<()> {
        if self.lifecycle.close().await {
            info!(destination = %self.options.id, "Log destination closed");
        }
        Ok(())
    }
}
