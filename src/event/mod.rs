//! Event record model.
//!
//! An [`EventRecord`] is the unit of the event log. Records are immutable once
//! appended; delivery state is never stored on the record itself but derived
//! from [`ConfirmationMarker`] entries appended later in the log.
//!
//! ## Taxonomy
//!
//! Event names are dot-namespaced (`workflow.started`, `node.finished`,
//! `audit.user.login`). The first segment usually agrees with the record's
//! [`EventKind`], which drives correlation and recovery rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Payload key carrying the workflow run identifier.
pub const EXECUTION_ID_KEY: &str = "executionId";
/// Payload key carrying the node name for node-level events.
pub const NODE_NAME_KEY: &str = "nodeName";

pub const WORKFLOW_STARTED: &str = "workflow.started";
pub const WORKFLOW_SUCCESS: &str = "workflow.success";
pub const WORKFLOW_FAILED: &str = "workflow.failed";
pub const WORKFLOW_CRASHED: &str = "workflow.crashed";
pub const NODE_STARTED: &str = "node.started";
pub const NODE_FINISHED: &str = "node.finished";
/// Synthetic probe used by destination tests. Never written to the log.
pub const DESTINATION_TEST: &str = "destination.test";

/// Workflow event names that close an execution.
pub const TERMINAL_WORKFLOW_EVENTS: &[&str] = &[WORKFLOW_SUCCESS, WORKFLOW_FAILED, WORKFLOW_CRASHED];

/// Record kind. Determines which correlation and recovery rules apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Generic,
    Audit,
    Workflow,
    Node,
    Confirm,
}

impl EventKind {
    /// Infer a kind from the first segment of an event name.
    pub fn from_event_name(event_name: &str) -> Self {
        match event_name.split('.').next() {
            Some("workflow") => EventKind::Workflow,
            Some("node") => EventKind::Node,
            Some("audit") => EventKind::Audit,
            _ => EventKind::Generic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Generic => "generic",
            EventKind::Audit => "audit",
            EventKind::Workflow => "workflow",
            EventKind::Node => "node",
            EventKind::Confirm => "confirm",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable, logged fact about workflow, node, or audit activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    /// Assigned at creation. Retries reuse it, so it doubles as the dedup key.
    pub id: Uuid,
    pub event_name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: Map<String, Value>,
    pub kind: EventKind,
}

impl EventRecord {
    /// Create a record with a fresh id and the current time.
    pub fn new(kind: EventKind, event_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_name: event_name.into(),
            timestamp: Utc::now(),
            payload: Map::new(),
            kind,
        }
    }

    pub fn generic(event_name: impl Into<String>) -> Self {
        Self::new(EventKind::Generic, event_name)
    }

    pub fn audit(event_name: impl Into<String>) -> Self {
        Self::new(EventKind::Audit, event_name)
    }

    /// Workflow-level event correlated to `execution_id`.
    pub fn workflow(event_name: impl Into<String>, execution_id: impl Into<String>) -> Self {
        Self::new(EventKind::Workflow, event_name)
            .with_payload(EXECUTION_ID_KEY, Value::String(execution_id.into()))
    }

    /// Node-level event correlated to `execution_id` and `node_name`.
    pub fn node(
        event_name: impl Into<String>,
        execution_id: impl Into<String>,
        node_name: impl Into<String>,
    ) -> Self {
        Self::new(EventKind::Node, event_name)
            .with_payload(EXECUTION_ID_KEY, Value::String(execution_id.into()))
            .with_payload(NODE_NAME_KEY, Value::String(node_name.into()))
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    pub fn with_payload_map(mut self, payload: Map<String, Value>) -> Self {
        self.payload.extend(payload);
        self
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// The workflow run this record belongs to, if any.
    pub fn execution_id(&self) -> Option<&str> {
        self.payload.get(EXECUTION_ID_KEY).and_then(Value::as_str)
    }

    pub fn node_name(&self) -> Option<&str> {
        self.payload.get(NODE_NAME_KEY).and_then(Value::as_str)
    }

    /// Whether this record closes its execution.
    pub fn is_terminal(&self) -> bool {
        self.kind == EventKind::Workflow
            && TERMINAL_WORKFLOW_EVENTS.contains(&self.event_name.as_str())
    }

    /// Whether this record participates in execution correlation.
    pub fn is_execution_correlated(&self) -> bool {
        matches!(self.kind, EventKind::Workflow | EventKind::Node) && self.execution_id().is_some()
    }
}

/// Identifies who confirmed delivery of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmSource {
    pub id: String,
    pub name: String,
}

impl ConfirmSource {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Synthetic source used when no destination was subscribed.
    pub fn bus() -> Self {
        Self::new("0", "eventBus")
    }
}

/// Append-only fact recording that `message_id` was delivered somewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationMarker {
    pub message_id: Uuid,
    pub source_id: String,
    pub source_name: String,
    pub timestamp: DateTime<Utc>,
}

impl ConfirmationMarker {
    pub fn new(message_id: Uuid, source: &ConfirmSource) -> Self {
        Self {
            message_id,
            source_id: source.id.clone(),
            source_name: source.name.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// One entry of the on-disk log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "__type", rename_all = "lowercase")]
pub enum LogEntry {
    Record(EventRecord),
    Confirm(ConfirmationMarker),
}
