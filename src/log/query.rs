//! Replay views over decoded log entries.

use std::collections::{BTreeMap, HashMap, HashSet};

use uuid::Uuid;

use crate::event::{EventKind, EventRecord, LogEntry};

/// Records grouped by execution id, each group in timestamp order.
pub type UnfinishedExecutions = BTreeMap<String, Vec<EventRecord>>;

/// Result of the combined startup query.
#[derive(Debug, Default)]
pub struct UnsentAndUnfinished {
    pub unsent: Vec<EventRecord>,
    pub unfinished_executions: UnfinishedExecutions,
}

/// Deduplicated view of a set of segments.
///
/// Records keep the position of their first appearance; later copies of the
/// same id (retries) are dropped. Confirmation is a set of ids, so a marker
/// anywhere in the scanned range confirms the record.
#[derive(Debug, Default)]
pub struct LogSnapshot {
    records: Vec<EventRecord>,
    confirmed: HashSet<Uuid>,
}

impl LogSnapshot {
    pub(crate) fn from_entries(entries: impl IntoIterator<Item = LogEntry>) -> Self {
        let mut seen = HashSet::new();
        let mut records = Vec::new();
        let mut confirmed = HashSet::new();

        for entry in entries {
            match entry {
                LogEntry::Record(record) => {
                    if seen.insert(record.id) {
                        records.push(record);
                    }
                }
                LogEntry::Confirm(marker) => {
                    confirmed.insert(marker.message_id);
                }
            }
        }

        Self { records, confirmed }
    }

    pub fn is_sent(&self, id: &Uuid) -> bool {
        self.confirmed.contains(id)
    }

    pub fn all(&self) -> Vec<EventRecord> {
        self.records.clone()
    }

    pub fn sent(&self) -> Vec<EventRecord> {
        self.records
            .iter()
            .filter(|r| self.is_sent(&r.id))
            .cloned()
            .collect()
    }

    pub fn unsent(&self) -> Vec<EventRecord> {
        self.records
            .iter()
            .filter(|r| r.kind != EventKind::Confirm && !self.is_sent(&r.id))
            .cloned()
            .collect()
    }

    /// Records for one execution in timestamp order.
    pub fn by_execution_id(&self, execution_id: &str) -> Vec<EventRecord> {
        let mut matching: Vec<EventRecord> = self
            .records
            .iter()
            .filter(|r| r.execution_id() == Some(execution_id))
            .cloned()
            .collect();
        // Stable: records sharing a timestamp keep log order.
        matching.sort_by_key(|r| r.timestamp);
        matching
    }

    /// Whether any record belongs to `execution_id`.
    pub fn has_execution(&self, execution_id: &str) -> bool {
        self.records
            .iter()
            .any(|r| r.execution_id() == Some(execution_id))
    }

    /// Workflow and node records grouped by execution, minus every execution
    /// that has a terminal record.
    pub fn unfinished_executions(&self) -> UnfinishedExecutions {
        let mut groups: HashMap<&str, Vec<EventRecord>> = HashMap::new();
        let mut closed: HashSet<&str> = HashSet::new();

        for record in &self.records {
            if !record.is_execution_correlated() {
                continue;
            }
            let Some(execution_id) = record.execution_id() else {
                continue;
            };
            if record.is_terminal() {
                closed.insert(execution_id);
            }
            groups.entry(execution_id).or_default().push(record.clone());
        }

        groups
            .into_iter()
            .filter(|(id, records)| !closed.contains(id) && !records.is_empty())
            .map(|(id, mut records)| {
                records.sort_by_key(|r| r.timestamp);
                (id.to_string(), records)
            })
            .collect()
    }

    pub fn unsent_and_unfinished(&self) -> UnsentAndUnfinished {
        UnsentAndUnfinished {
            unsent: self.unsent(),
            unfinished_executions: self.unfinished_executions(),
        }
    }
}
