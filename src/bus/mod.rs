//! Event bus orchestrator.
//!
//! Single write and fan-out entry point. Every record is appended to the
//! [`LogWriter`] before `send` returns; fan-out to subscribed destinations
//! runs in background tasks and each destination confirms through a
//! [`ConfirmCallback`]. A record with no subscribed destination is confirmed
//! immediately with the synthetic bus source.
//!
//! Per record:
//! ```text
//! created -> logged -> (fanned out) -> confirmed
//! ```
//!
//! Unconfirmed records are re-sent by the periodic sweep (when
//! `check_unsent_interval_ms > 0`) and once at startup by the
//! [`RecoveryEngine`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::destination::{
    self, Destination, DestinationError, DestinationOptions, DestinationRegistry,
};
use crate::event::{ConfirmSource, EventKind, EventRecord, DESTINATION_TEST};
use crate::execution::RunExecutionData;
use crate::log::{LogError, LogWriter, UnfinishedExecutions};
use crate::recovery::{RecoveryEngine, RecoveryReport};
use crate::storage::{self, DestinationStore, ExecutionStore, StorageError};

mod confirm;
mod sweep;

pub use confirm::{ConfirmCallback, ConfirmProbe};

#[cfg(test)]
mod tests;

// ============================================================================
// Errors
// ============================================================================

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The event log could not be written. Fatal: the bus halts.
    #[error("Durability failure: {0}")]
    Durability(#[from] LogError),

    #[error("Destination error: {0}")]
    Destination(#[from] DestinationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Event bus is closed")]
    Closed,

    #[error("Event bus halted after a durability failure")]
    Halted,
}

// ============================================================================
// Configuration
// ============================================================================

/// Bus configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Interval of the unsent-record sweep. 0 or less disables it.
    pub check_unsent_interval_ms: i64,
    /// Global streaming switch. When off nothing is fanned out and every
    /// record is confirmed by the bus itself.
    pub streaming_enabled: bool,
    /// Upper bound for draining in-flight deliveries on close.
    pub drain_timeout_ms: u64,
    /// Previous segments searched by execution queries.
    pub execution_history_depth: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            check_unsent_interval_ms: 0,
            streaming_enabled: true,
            drain_timeout_ms: 5_000,
            execution_history_depth: 1,
        }
    }
}

impl BusConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Sweep interval, `None` when the sweep is disabled.
    pub fn check_unsent_interval(&self) -> Option<Duration> {
        u64::try_from(self.check_unsent_interval_ms)
            .ok()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

// ============================================================================
// EventBus
// ============================================================================

/// Handle to the event bus. Cheap to clone; every clone refers to the same
/// bus. Construct one per process with [`EventBus::initialize`] and pass it
/// to producers.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

pub(crate) struct BusInner {
    config: BusConfig,
    writer: LogWriter,
    registry: DestinationRegistry,
    recovery: RecoveryEngine,
    halted: AtomicBool,
    closed: AtomicBool,
    /// Fan-out tasks spawned and not yet finished.
    in_flight: Arc<AtomicUsize>,
    sweep: Mutex<Option<sweep::SweepHandle>>,
}

impl EventBus {
    /// Open the event log, restore persisted destinations, and run startup
    /// recovery. Returns once recovery has finished; only then may producers
    /// send.
    pub async fn initialize(
        config: &Config,
        destination_store: Arc<dyn DestinationStore>,
        execution_store: Arc<dyn ExecutionStore>,
    ) -> Result<Self> {
        debug!(dir = %config.event_log.dir.display(), "Initializing event bus");

        // Opening the writer starts a fresh segment, so recovery below reads
        // only segments no one writes to anymore.
        let writer = LogWriter::open(config.event_log.clone()).await?;

        let registry = DestinationRegistry::new(destination_store);
        let bus = Self {
            inner: Arc::new(BusInner {
                config: config.bus.clone(),
                writer,
                registry,
                recovery: RecoveryEngine::new(execution_store),
                halted: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                in_flight: Arc::new(AtomicUsize::new(0)),
                sweep: Mutex::new(None),
            }),
        };

        bus.restore_destinations().await;

        let report = bus.inner.recovery.run(&bus).await?;
        info!(
            resent = report.resent,
            recovered = report.recovered.len(),
            skipped = report.skipped,
            "Startup recovery finished"
        );

        // Old segments are read; unsent records now live in the new one.
        bus.inner
            .writer
            .enable_retention()
            .await
            .map_err(|e| bus.inner.log_failure(e))?;

        if let Some(interval) = bus.inner.config.check_unsent_interval() {
            let handle = sweep::spawn_sweep(Arc::downgrade(&bus.inner), interval);
            *bus.inner.sweep.lock().await = Some(handle);
        }

        info!("Event bus initialized");
        Ok(bus)
    }

    /// Initialize with the destination store selected by `config.destinations`.
    pub async fn from_config(
        config: &Config,
        execution_store: Arc<dyn ExecutionStore>,
    ) -> Result<Self> {
        let destination_store = storage::init_destination_store(&config.destinations).await?;
        Self::initialize(config, destination_store, execution_store).await
    }

    async fn restore_destinations(&self) {
        let saved = match self.inner.registry.store().load_all().await {
            Ok(saved) => saved,
            Err(e) => {
                error!(error = %e, "Failed to load persisted destinations");
                return;
            }
        };

        for options in saved {
            let id = options.id.clone();
            let restored = match destination::from_options(options, self.inner.config.drain_timeout())
            {
                Ok(destination) => self.inner.registry.restore(destination).await,
                Err(e) => Err(e),
            };
            if let Err(e) = restored {
                warn!(destination = %id, error = %e, "Skipping destination that failed to initialize");
            }
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Whether a durability failure halted the bus.
    pub fn is_halted(&self) -> bool {
        self.inner.halted.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// The underlying log writer.
    pub fn log(&self) -> &LogWriter {
        &self.inner.writer
    }

    // ------------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------------

    /// Log `record` and fan it out. Returns once the record is durable;
    /// delivery happens in the background.
    ///
    /// A [`BusError::Durability`] error halts the bus. The record may still
    /// have reached the log (a rotation after the write can fail), in which
    /// case it is replayed as unsent on the next start; do not re-send it
    /// under a new id.
    #[tracing::instrument(name = "bus.send", skip_all, fields(id = %record.id, event = %record.event_name))]
    pub async fn send(&self, record: EventRecord) -> Result<()> {
        self.inner.send(record).await
    }

    /// Send records in order. Stops at the first durability failure.
    pub async fn send_many(&self, records: impl IntoIterator<Item = EventRecord>) -> Result<()> {
        for record in records {
            self.inner.send(record).await?;
        }
        Ok(())
    }

    /// Producer entry point: build a record whose kind follows the event
    /// name prefix and send it.
    pub async fn emit(&self, event_name: &str, payload: Map<String, Value>) -> Result<Uuid> {
        let record =
            EventRecord::new(EventKind::from_event_name(event_name), event_name).with_payload_map(payload);
        let id = record.id;
        self.send(record).await?;
        Ok(id)
    }

    pub async fn send_audit(&self, event_name: &str, payload: Map<String, Value>) -> Result<Uuid> {
        let record = EventRecord::audit(event_name).with_payload_map(payload);
        let id = record.id;
        self.send(record).await?;
        Ok(id)
    }

    pub async fn send_workflow(
        &self,
        event_name: &str,
        execution_id: &str,
        payload: Map<String, Value>,
    ) -> Result<Uuid> {
        let record = EventRecord::workflow(event_name, execution_id).with_payload_map(payload);
        let id = record.id;
        self.send(record).await?;
        Ok(id)
    }

    pub async fn send_node(
        &self,
        event_name: &str,
        execution_id: &str,
        node_name: &str,
        payload: Map<String, Value>,
    ) -> Result<Uuid> {
        let record =
            EventRecord::node(event_name, execution_id, node_name).with_payload_map(payload);
        let id = record.id;
        self.send(record).await?;
        Ok(id)
    }

    /// Record that `message_id` was delivered. Confirming twice is harmless.
    pub async fn confirm(&self, message_id: Uuid, source: &ConfirmSource) -> Result<()> {
        self.inner.confirm(message_id, source).await
    }

    /// Re-send every unsent record now. Returns how many were re-sent.
    pub async fn retry_unsent(&self) -> Result<usize> {
        self.inner.retry_unsent().await
    }

    // ------------------------------------------------------------------------
    // Destinations
    // ------------------------------------------------------------------------

    /// Register a destination, replacing one with the same id.
    pub async fn add_destination(
        &self,
        destination: Arc<dyn Destination>,
    ) -> Result<Arc<dyn Destination>> {
        Ok(self.inner.registry.add(destination).await?)
    }

    /// Build a destination from its configuration and register it.
    pub async fn add_destination_from_options(
        &self,
        options: DestinationOptions,
    ) -> Result<Arc<dyn Destination>> {
        let destination = destination::from_options(options, self.inner.config.drain_timeout())?;
        self.add_destination(destination).await
    }

    /// Close and unregister a destination. Unknown ids are a no-op.
    pub async fn remove_destination(&self, id: &str) -> Result<bool> {
        Ok(self.inner.registry.remove(id).await?)
    }

    pub async fn find_destination(&self, id: Option<&str>) -> Vec<DestinationOptions> {
        self.inner.registry.find(id).await
    }

    /// Deliver a synthetic probe to one destination and report whether it
    /// was accepted. The probe is not logged and confirms nothing.
    pub async fn test_destination(&self, id: &str) -> Result<bool> {
        let Some(destination) = self.inner.registry.get(id).await else {
            warn!(destination = %id, "Test requested for unknown destination");
            return Ok(false);
        };

        let probe = EventRecord::generic(DESTINATION_TEST);
        let (callback, confirmed) = ConfirmCallback::probe(probe.id);

        match destination.deliver(Arc::new(probe), callback).await {
            Ok(accepted) => {
                debug!(
                    destination = %id,
                    accepted = accepted,
                    confirmed = confirmed.is_confirmed(),
                    "Destination test finished"
                );
                Ok(accepted)
            }
            Err(e) => {
                warn!(destination = %id, error = %e, "Destination test failed");
                Ok(false)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub async fn events_all(&self) -> Result<Vec<EventRecord>> {
        Ok(self.inner.writer.query_all().await?)
    }

    pub async fn events_sent(&self) -> Result<Vec<EventRecord>> {
        Ok(self.inner.writer.query_sent().await?)
    }

    pub async fn events_unsent(&self) -> Result<Vec<EventRecord>> {
        Ok(self.inner.writer.query_unsent().await?)
    }

    /// Records of one execution in timestamp order. `history_depth` defaults
    /// to `execution_history_depth`.
    pub async fn events_by_execution_id(
        &self,
        execution_id: &str,
        history_depth: Option<usize>,
    ) -> Result<Vec<EventRecord>> {
        let depth = history_depth.unwrap_or(self.inner.config.execution_history_depth);
        Ok(self
            .inner
            .writer
            .query_by_execution_id(execution_id, depth)
            .await?)
    }

    pub async fn unfinished_executions(&self) -> Result<UnfinishedExecutions> {
        Ok(self.inner.writer.query_unfinished_executions().await?)
    }

    /// Rebuild one execution's run data from the log. Writes it back to the
    /// execution store only when `apply` is true.
    pub async fn recover_execution(
        &self,
        execution_id: &str,
        apply: bool,
    ) -> Result<Option<RunExecutionData>> {
        let records = self.inner.writer.snapshot().await?.by_execution_id(execution_id);
        Ok(self
            .inner
            .recovery
            .recover_execution(execution_id, &records, apply)
            .await?)
    }

    /// Re-run the startup reconciliation against the current log. Only
    /// executions left by an earlier process are reconstructed; runs started
    /// by this process are still live and left alone.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        self.inner.recovery.run(self).await
    }

    // ------------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------------

    /// Stop the sweep, close every destination, drain in-flight deliveries,
    /// then close the log. Later calls are no-ops.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let drain_timeout = self.inner.config.drain_timeout();

        if let Some(sweep) = self.inner.sweep.lock().await.take() {
            sweep.stop(drain_timeout).await;
        }

        self.inner.registry.close_all().await;

        let in_flight = self.inner.in_flight.clone();
        let drained = tokio::time::timeout(drain_timeout, async move {
            while in_flight.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                in_flight = self.inner.in_flight.load(Ordering::SeqCst),
                "Closing event log with fan-out tasks still running"
            );
        }

        self.inner.writer.close().await?;
        info!("Event bus shut down");
        Ok(())
    }
}

impl BusInner {
    fn check_open(&self) -> Result<()> {
        if self.halted.load(Ordering::SeqCst) {
            return Err(BusError::Halted);
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        Ok(())
    }

    /// Map a log failure to a bus error, halting on anything but a closed log.
    fn log_failure(&self, err: LogError) -> BusError {
        if matches!(err, LogError::Closed) {
            return BusError::Closed;
        }
        if !self.halted.swap(true, Ordering::SeqCst) {
            error!(error = %err, "Event log write failed, event bus halted");
        }
        BusError::Durability(err)
    }

    async fn send(self: &Arc<Self>, record: EventRecord) -> Result<()> {
        self.check_open()?;

        if let Err(e) = self.writer.append(&record).await {
            return Err(self.log_failure(e));
        }

        let targets = if self.config.streaming_enabled {
            self.registry.subscribed(&record).await
        } else {
            Vec::new()
        };

        if targets.is_empty() {
            return self.confirm(record.id, &ConfirmSource::bus()).await;
        }

        self.fan_out(Arc::new(record), targets);
        Ok(())
    }

    fn fan_out(self: &Arc<Self>, record: Arc<EventRecord>, targets: Vec<Arc<dyn Destination>>) {
        for destination in targets {
            let callback = ConfirmCallback::for_bus(Arc::downgrade(self), record.id);
            let record = record.clone();
            let guard = FanOutGuard::enter(&self.in_flight);

            tokio::spawn(async move {
                let _guard = guard;
                let id = record.id;
                match destination.deliver(record, callback).await {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!(destination = %destination.id(), id = %id, "Delivery not accepted, left unsent")
                    }
                    Err(e) => warn!(
                        destination = %destination.id(),
                        id = %id,
                        error = %e,
                        "Delivery failed, left unsent"
                    ),
                }
            });
        }
    }

    async fn confirm(&self, message_id: Uuid, source: &ConfirmSource) -> Result<()> {
        if self.halted.load(Ordering::SeqCst) {
            return Err(BusError::Halted);
        }
        self.writer
            .mark_confirmed(message_id, source)
            .await
            .map_err(|e| self.log_failure(e))
    }

    async fn retry_unsent(self: &Arc<Self>) -> Result<usize> {
        self.check_open()?;
        let unsent = self.writer.query_unsent().await?;
        let count = unsent.len();
        if count > 0 {
            debug!(count = count, "Found unsent event records");
        }
        for record in unsent {
            debug!(id = %record.id, event = %record.event_name, "Retrying");
            self.send(record).await?;
        }
        Ok(count)
    }
}

/// Counts a fan-out task as in flight until dropped.
struct FanOutGuard(Arc<AtomicUsize>);

impl FanOutGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for FanOutGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
