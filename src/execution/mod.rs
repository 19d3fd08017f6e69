//! Execution run-data model.
//!
//! The shape the external execution store hands back and accepts when
//! recovery patches a crashed run. Times are Unix milliseconds.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message recorded for a node that started but never finished.
pub const UNFINISHED_NODE_MESSAGE: &str = "Node did not finish, possible Out Of Memory issue?";

/// An execution as known to the external store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSnapshot {
    pub id: String,
    #[serde(default)]
    pub run_data: RunExecutionData,
    #[serde(default)]
    pub workflow: WorkflowGraph,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

impl ExecutionSnapshot {
    pub fn new(id: impl Into<String>, workflow: WorkflowGraph) -> Self {
        Self {
            id: id.into(),
            run_data: RunExecutionData::default(),
            workflow,
            closed_at: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }
}

/// Node graph of the workflow an execution ran.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
}

impl WorkflowGraph {
    pub fn new(nodes: impl IntoIterator<Item = WorkflowNode>) -> Self {
        Self {
            nodes: nodes.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
}

impl WorkflowNode {
    pub fn new(name: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node_type: node_type.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunExecutionData {
    #[serde(default)]
    pub result_data: ResultData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultData {
    /// Per-node task results, keyed by node name.
    #[serde(default)]
    pub run_data: BTreeMap<String, Vec<TaskData>>,
    #[serde(default)]
    pub last_node_executed: Option<String>,
    #[serde(default)]
    pub error: Option<TaskError>,
}

/// Result of one node run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskData {
    pub start_time: i64,
    pub execution_time: i64,
    #[serde(default)]
    pub error: Option<TaskError>,
}

impl TaskData {
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskError {
    pub message: String,
    #[serde(default)]
    pub node_name: Option<String>,
}

impl TaskError {
    /// Synthesized failure for a node interrupted by a crash.
    pub fn unfinished(node_name: impl Into<String>) -> Self {
        Self {
            message: UNFINISHED_NODE_MESSAGE.to_string(),
            node_name: Some(node_name.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_parses_sparse_json() {
        let snapshot: ExecutionSnapshot = serde_json::from_str(
            r#"{"id":"e1","workflow":{"nodes":[{"name":"Start","type":"start"}]}}"#,
        )
        .unwrap();

        assert!(!snapshot.is_closed());
        assert_eq!(snapshot.workflow.nodes[0].node_type, "start");
        assert!(snapshot.run_data.result_data.run_data.is_empty());
    }

    #[test]
    fn test_run_data_json_shape() {
        let mut run_data = RunExecutionData::default();
        run_data.result_data.last_node_executed = Some("B".to_string());
        run_data.result_data.run_data.insert(
            "B".to_string(),
            vec![TaskData {
                start_time: 1_000,
                execution_time: 0,
                error: Some(TaskError::unfinished("B")),
            }],
        );

        let json = serde_json::to_value(&run_data).unwrap();
        assert_eq!(json["resultData"]["lastNodeExecuted"], "B");
        assert_eq!(json["resultData"]["runData"]["B"][0]["startTime"], 1_000);
        assert_eq!(
            json["resultData"]["runData"]["B"][0]["error"]["message"],
            UNFINISHED_NODE_MESSAGE
        );
    }
}
