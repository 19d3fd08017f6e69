//! In-memory store implementations for testing.
//!
//! `MockDestinationStore` also backs the `memory` destination store type.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{validate_id, DestinationStore, ExecutionStore, Result, StorageError};
use crate::destination::DestinationOptions;
use crate::execution::{ExecutionSnapshot, RunExecutionData};

/// Mock destination store that keeps configurations in memory.
#[derive(Default)]
pub struct MockDestinationStore {
    destinations: RwLock<BTreeMap<String, DestinationOptions>>,
    fail_on_load: RwLock<bool>,
    fail_on_save: RwLock<bool>,
    fail_on_delete: RwLock<bool>,
}

impl MockDestinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with configurations, as if persisted by an earlier run.
    pub fn with_destinations(destinations: impl IntoIterator<Item = DestinationOptions>) -> Self {
        Self {
            destinations: RwLock::new(
                destinations
                    .into_iter()
                    .map(|d| (d.id.clone(), d))
                    .collect(),
            ),
            ..Self::default()
        }
    }

    pub async fn set_fail_on_load(&self, fail: bool) {
        *self.fail_on_load.write().await = fail;
    }

    pub async fn set_fail_on_save(&self, fail: bool) {
        *self.fail_on_save.write().await = fail;
    }

    pub async fn set_fail_on_delete(&self, fail: bool) {
        *self.fail_on_delete.write().await = fail;
    }

    /// Ids of stored configurations, sorted.
    pub async fn saved_ids(&self) -> Vec<String> {
        self.destinations.read().await.keys().cloned().collect()
    }

    pub async fn get_stored(&self, id: &str) -> Option<DestinationOptions> {
        self.destinations.read().await.get(id).cloned()
    }
}

#[async_trait]
impl DestinationStore for MockDestinationStore {
    async fn load_all(&self) -> Result<Vec<DestinationOptions>> {
        if *self.fail_on_load.read().await {
            return Err(StorageError::Unavailable("mock load failure".to_string()));
        }
        Ok(self.destinations.read().await.values().cloned().collect())
    }

    async fn save(&self, options: &DestinationOptions) -> Result<()> {
        if *self.fail_on_save.read().await {
            return Err(StorageError::Unavailable("mock save failure".to_string()));
        }
        validate_id(&options.id)?;
        self.destinations
            .write()
            .await
            .insert(options.id.clone(), options.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        if *self.fail_on_delete.read().await {
            return Err(StorageError::Unavailable("mock delete failure".to_string()));
        }
        self.destinations.write().await.remove(id);
        Ok(())
    }
}

/// Mock execution store that keeps executions in memory and records patches.
#[derive(Default)]
pub struct MockExecutionStore {
    executions: RwLock<HashMap<String, ExecutionSnapshot>>,
    patches: RwLock<Vec<(String, RunExecutionData)>>,
    fail_on_get: RwLock<bool>,
    fail_on_patch: RwLock<bool>,
}

impl MockExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, snapshot: ExecutionSnapshot) {
        self.executions
            .write()
            .await
            .insert(snapshot.id.clone(), snapshot);
    }

    pub async fn get_stored(&self, id: &str) -> Option<ExecutionSnapshot> {
        self.executions.read().await.get(id).cloned()
    }

    /// Every patch applied so far, in order.
    pub async fn patches(&self) -> Vec<(String, RunExecutionData)> {
        self.patches.read().await.clone()
    }

    pub async fn patch_count(&self) -> usize {
        self.patches.read().await.len()
    }

    pub async fn set_fail_on_get(&self, fail: bool) {
        *self.fail_on_get.write().await = fail;
    }

    pub async fn set_fail_on_patch(&self, fail: bool) {
        *self.fail_on_patch.write().await = fail;
    }
}

#[async_trait]
impl ExecutionStore for MockExecutionStore {
    async fn get_execution_by_id(&self, id: &str) -> Result<Option<ExecutionSnapshot>> {
        if *self.fail_on_get.read().await {
            return Err(StorageError::Unavailable("mock get failure".to_string()));
        }
        Ok(self.executions.read().await.get(id).cloned())
    }

    async fn patch_execution_run_data(&self, id: &str, run_data: &RunExecutionData) -> Result<()> {
        if *self.fail_on_patch.read().await {
            return Err(StorageError::Unavailable("mock patch failure".to_string()));
        }

        let mut executions = self.executions.write().await;
        let execution = executions
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        execution.run_data = run_data.clone();

        self.patches
            .write()
            .await
            .push((id.to_string(), run_data.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::TransportOptions;
    use crate::execution::WorkflowGraph;

    #[tokio::test]
    async fn test_mock_destination_store_fail_flags() {
        let store = MockDestinationStore::new();
        store.set_fail_on_save(true).await;

        let result = store
            .save(&DestinationOptions::new("d1", TransportOptions::Log))
            .await;

        assert!(result.is_err());
        assert!(store.saved_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_mock_execution_store_patch_updates_snapshot() {
        let store = MockExecutionStore::new();
        store
            .insert(ExecutionSnapshot::new("e1", WorkflowGraph::default()))
            .await;

        let mut run_data = RunExecutionData::default();
        run_data.result_data.last_node_executed = Some("A".to_string());
        store.patch_execution_run_data("e1", &run_data).await.unwrap();

        let stored = store.get_stored("e1").await.unwrap();
        assert_eq!(stored.run_data, run_data);
        assert_eq!(store.patch_count().await, 1);
    }

    #[tokio::test]
    async fn test_mock_execution_store_patch_unknown_fails() {
        let store = MockExecutionStore::new();
        let result = store
            .patch_execution_run_data("missing", &RunExecutionData::default())
            .await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }
}
