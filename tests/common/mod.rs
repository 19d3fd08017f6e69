//! Shared utilities for integration tests.
//!
//! Builds buses over a temporary log directory with in-memory stores, so
//! a test can "crash" a bus and reopen the same log in a fresh one.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use logstream::execution::{ExecutionSnapshot, WorkflowGraph, WorkflowNode};
use logstream::storage::{MockDestinationStore, MockExecutionStore};
use logstream::{Config, EventBus};

/// Stores that outlive a single bus instance.
pub struct Stores {
    pub destinations: Arc<MockDestinationStore>,
    pub executions: Arc<MockExecutionStore>,
}

impl Stores {
    pub fn new() -> Self {
        Self {
            destinations: Arc::new(MockDestinationStore::new()),
            executions: Arc::new(MockExecutionStore::new()),
        }
    }

    pub async fn open_bus(&self, config: &Config) -> EventBus {
        EventBus::initialize(config, self.destinations.clone(), self.executions.clone())
            .await
            .expect("Failed to initialize event bus")
    }
}

pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::for_test(dir);
    config.bus.drain_timeout_ms = 500;
    config
}

/// Execution `Start -> A -> B` with a start trigger node.
pub fn three_node_execution(id: &str) -> ExecutionSnapshot {
    ExecutionSnapshot::new(
        id,
        WorkflowGraph::new([
            WorkflowNode::new("Start", "start"),
            WorkflowNode::new("A", "action"),
            WorkflowNode::new("B", "action"),
        ]),
    )
}

/// Poll `check` until it returns true or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(timeout, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .is_ok()
}
