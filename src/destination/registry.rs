//! Destination registry.
//!
//! Holds the active destinations keyed by id. Fan-out takes a snapshot of the
//! matching destinations under a read lock (copy-on-read); `add` and `remove`
//! serialize against each other and take the write lock only for the map
//! update itself.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::{Destination, DestinationOptions, Result};
use crate::event::EventRecord;
use crate::storage::DestinationStore;

pub struct DestinationRegistry {
    destinations: RwLock<BTreeMap<String, Arc<dyn Destination>>>,
    /// Serializes add/remove so a replace cannot interleave with a removal.
    mutation: Mutex<()>,
    store: Arc<dyn DestinationStore>,
}

impl DestinationRegistry {
    pub fn new(store: Arc<dyn DestinationStore>) -> Self {
        Self {
            destinations: RwLock::new(BTreeMap::new()),
            mutation: Mutex::new(()),
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn DestinationStore> {
        &self.store
    }

    /// Register a destination, replacing any existing one with the same id,
    /// persist its configuration, and start it.
    pub async fn add(&self, destination: Arc<dyn Destination>) -> Result<Arc<dyn Destination>> {
        self.insert(destination, true).await
    }

    /// Register a destination loaded from the store. Skips re-persisting.
    pub(crate) async fn restore(
        &self,
        destination: Arc<dyn Destination>,
    ) -> Result<Arc<dyn Destination>> {
        self.insert(destination, false).await
    }

    async fn insert(
        &self,
        destination: Arc<dyn Destination>,
        persist: bool,
    ) -> Result<Arc<dyn Destination>> {
        let _mutation = self.mutation.lock().await;
        let id = destination.id().to_string();

        // Persist and start before touching the map: a failure leaves the
        // current destination registered and serving.
        if persist {
            self.store.save(destination.options()).await?;
        }

        if let Err(e) = destination.start().await {
            if persist {
                self.revert_persisted(&id).await;
            }
            return Err(e);
        }

        let previous = self
            .destinations
            .write()
            .await
            .insert(id.clone(), destination.clone());
        if let Some(previous) = previous {
            debug!(destination = %id, "Replaced existing destination");
            if let Err(e) = previous.close().await {
                warn!(destination = %id, error = %e, "Failed to close replaced destination");
            }
        }

        info!(
            destination = %id,
            destination_type = destination.options().type_name(),
            "Destination added"
        );
        Ok(destination)
    }

    /// Put the stored config back in line with the registered destination.
    async fn revert_persisted(&self, id: &str) {
        let current = self.destinations.read().await.get(id).cloned();
        let reverted = match current {
            Some(current) => self.store.save(current.options()).await,
            None => self.store.delete(id).await,
        };
        if let Err(e) = reverted {
            warn!(destination = %id, error = %e, "Failed to revert persisted destination config");
        }
    }

    /// Close and remove a destination and delete its persisted configuration.
    /// Returns false when no destination has that id.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let _mutation = self.mutation.lock().await;

        let Some(destination) = self.destinations.read().await.get(id).cloned() else {
            return Ok(false);
        };

        destination.close().await?;
        self.destinations.write().await.remove(id);
        self.store.delete(id).await?;

        info!(destination = %id, "Destination removed");
        Ok(true)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<dyn Destination>> {
        self.destinations.read().await.get(id).cloned()
    }

    /// Configurations of one destination (or all when `id` is `None`),
    /// sorted by type then id. An unknown id yields an empty list.
    pub async fn find(&self, id: Option<&str>) -> Vec<DestinationOptions> {
        let destinations = self.destinations.read().await;
        let mut result: Vec<DestinationOptions> = match id {
            Some(id) => destinations
                .get(id)
                .map(|d| vec![d.options().clone()])
                .unwrap_or_default(),
            None => destinations.values().map(|d| d.options().clone()).collect(),
        };
        result.sort_by(|a, b| {
            a.type_name()
                .cmp(b.type_name())
                .then_with(|| a.id.cmp(&b.id))
        });
        result
    }

    /// Subscription predicate for a single destination.
    pub fn matches(destination: &dyn Destination, record: &EventRecord) -> bool {
        destination.matches(record)
    }

    /// Destinations subscribed to `record`, snapshotted under the read lock.
    pub async fn subscribed(&self, record: &EventRecord) -> Vec<Arc<dyn Destination>> {
        self.destinations
            .read()
            .await
            .values()
            .filter(|d| Self::matches(d.as_ref(), record))
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.destinations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.destinations.read().await.is_empty()
    }

    /// Close every destination concurrently and clear the registry. Persisted
    /// configurations are kept so the next start restores them.
    pub async fn close_all(&self) {
        let _mutation = self.mutation.lock().await;
        let destinations: Vec<Arc<dyn Destination>> = {
            let mut map = self.destinations.write().await;
            std::mem::take(&mut *map).into_values().collect()
        };

        let results = join_all(destinations.iter().map(|d| async move {
            debug!(destination = %d.id(), "Shutting down destination");
            (d.id().to_string(), d.close().await)
        }))
        .await;

        for (id, result) in results {
            if let Err(e) = result {
                warn!(destination = %id, error = %e, "Destination failed to close cleanly");
            }
        }
    }
}
