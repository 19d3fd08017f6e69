//! Restart-time reconciliation.
//!
//! Runs once during [`EventBus::initialize`], after the log writer opened a
//! fresh segment and persisted destinations were restored:
//!
//! 1. Re-send every unsent record (same ids) through the bus.
//! 2. For each execution with no terminal record that was written by an
//!    earlier process, rebuild per-node results from the logged
//!    `node.started` / `node.finished` events, write them to the execution
//!    store, and log `workflow.crashed` so the execution is not picked up
//!    again on the next start. Executions unknown to the store or already
//!    closed there get `workflow.crashed` with `recovered: false` for the
//!    same reason. Store errors leave the execution open for the next pass.
//!
//! Executions whose records all come from the current process are still
//! running and never touched, so a manual re-run is safe on a live bus.
//!
//! A node that started but never finished gets a synthesized failure and
//! becomes the execution's last executed node. Nodes without a start event
//! are left untouched.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::bus::{self, EventBus};
use crate::event::{EventRecord, NODE_FINISHED, NODE_STARTED, WORKFLOW_CRASHED};
use crate::execution::{ExecutionSnapshot, RunExecutionData, TaskData, TaskError};
use crate::log::UnsentAndUnfinished;
use crate::storage::{self, ExecutionStore};


/// Node types that only trigger a run and never carry results.
pub const DEFAULT_START_NODE_TYPES: &[&str] = &["start", "manualTrigger"];

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveryReport {
    /// Unsent records handed back to the bus.
    pub resent: usize,
    /// Executions whose run data was rebuilt and written back.
    pub recovered: Vec<String>,
    /// Unfinished executions left alone (unknown, closed, or failed).
    pub skipped: usize,
}

pub struct RecoveryEngine {
    store: Arc<dyn ExecutionStore>,
    start_node_types: Vec<String>,
}

impl RecoveryEngine {
    pub fn new(store: Arc<dyn ExecutionStore>) -> Self {
        Self {
            store,
            start_node_types: DEFAULT_START_NODE_TYPES
                .iter()
                .map(|t| t.to_string())
                .collect(),
        }
    }

    pub fn with_start_node_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.start_node_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Matches `start` as well as namespaced types such as `acme.start`.
    fn is_start_node(&self, node_type: &str) -> bool {
        self.start_node_types.iter().any(|t| {
            node_type == t
                || node_type
                    .strip_suffix(t.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }

    /// Resend unsent records, then rebuild unfinished executions.
    ///
    /// Durability failures while re-sending abort the pass; per-execution
    /// store failures are logged and skipped.
    pub async fn run(&self, bus: &EventBus) -> bus::Result<RecoveryReport> {
        let UnsentAndUnfinished {
            unsent,
            unfinished_executions,
        } = bus.log().query_recoverable().await?;

        let mut report = RecoveryReport {
            resent: unsent.len(),
            ..RecoveryReport::default()
        };

        if !unsent.is_empty() {
            info!(count = unsent.len(), "Re-sending unsent event records");
        }
        bus.send_many(unsent).await?;

        for (execution_id, records) in unfinished_executions {
            match self.recover_execution(&execution_id, &records, true).await {
                Ok(Some(run_data)) => {
                    let mut payload = Map::new();
                    if let Some(last) = &run_data.result_data.last_node_executed {
                        payload.insert("lastNodeExecuted".to_string(), Value::String(last.clone()));
                    }
                    bus.send_workflow(WORKFLOW_CRASHED, &execution_id, payload)
                        .await?;
                    report.recovered.push(execution_id);
                }
                Ok(None) => {
                    let mut payload = Map::new();
                    payload.insert("recovered".to_string(), Value::Bool(false));
                    bus.send_workflow(WORKFLOW_CRASHED, &execution_id, payload)
                        .await?;
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!(
                        execution_id = %execution_id,
                        error = %e,
                        "Failed to recover execution, skipping"
                    );
                    report.skipped += 1;
                }
            }
        }

        Ok(report)
    }

    /// Rebuild one execution from its logged records. Returns `None` when the
    /// execution is unknown to the store, already closed, or has no records.
    pub async fn recover_execution(
        &self,
        execution_id: &str,
        records: &[EventRecord],
        apply: bool,
    ) -> storage::Result<Option<RunExecutionData>> {
        if records.is_empty() {
            return Ok(None);
        }

        let Some(execution) = self.store.get_execution_by_id(execution_id).await? else {
            warn!(execution_id = %execution_id, "Unfinished execution not found in store");
            return Ok(None);
        };

        if execution.is_closed() {
            debug!(execution_id = %execution_id, "Execution already closed, nothing to recover");
            return Ok(None);
        }

        let run_data = self.reconstruct(&execution, records);

        if apply {
            self.store
                .patch_execution_run_data(execution_id, &run_data)
                .await?;
            info!(
                execution_id = %execution_id,
                last_node_executed = run_data.result_data.last_node_executed.as_deref().unwrap_or(""),
                "Recovered execution data from event log"
            );
        }

        Ok(Some(run_data))
    }

    /// Merge the node timeline found in `records` into the execution's
    /// stored run data.
    pub fn reconstruct(
        &self,
        execution: &ExecutionSnapshot,
        records: &[EventRecord],
    ) -> RunExecutionData {
        let mut run_data = execution.run_data.clone();
        let result = &mut run_data.result_data;
        let mut last_unfinished: Option<(DateTime<Utc>, &str)> = None;

        for node in &execution.workflow.nodes {
            if self.is_start_node(&node.node_type) {
                continue;
            }

            let Some(started) = node_events(records, NODE_STARTED, &node.name)
                .max_by_key(|r| r.timestamp)
            else {
                continue;
            };
            let finished = node_events(records, NODE_FINISHED, &node.name)
                .filter(|r| r.timestamp >= started.timestamp)
                .min_by_key(|r| r.timestamp);

            let start_time = started.timestamp.timestamp_millis();
            match finished {
                Some(finished) => {
                    result
                        .run_data
                        .entry(node.name.clone())
                        .or_insert_with(|| {
                            vec![TaskData {
                                start_time,
                                execution_time: (finished.timestamp - started.timestamp)
                                    .num_milliseconds(),
                                error: None,
                            }]
                        });
                }
                None => {
                    result.run_data.insert(
                        node.name.clone(),
                        vec![TaskData {
                            start_time,
                            execution_time: 0,
                            error: Some(TaskError::unfinished(&node.name)),
                        }],
                    );
                    if last_unfinished.map_or(true, |(at, _)| started.timestamp >= at) {
                        last_unfinished = Some((started.timestamp, node.name.as_str()));
                    }
                }
            }
        }

        if let Some((_, node_name)) = last_unfinished {
            result.last_node_executed = Some(node_name.to_string());
        }
        run_data
    }
}

fn node_events<'a>(
    records: &'a [EventRecord],
    event_name: &'a str,
    node_name: &'a str,
) -> impl Iterator<Item = &'a EventRecord> + 'a {
    records
        .iter()
        .filter(move |r| r.event_name == event_name && r.node_name() == Some(node_name))
}
