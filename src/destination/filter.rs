//! Subscription matching.

use serde::{Deserialize, Serialize};

use crate::event::{EventKind, EventRecord};

/// Which records a destination wants.
///
/// `events` patterns:
/// - `*` or `#` matches every event name
/// - `node.started` matches exactly
/// - `node.` (trailing dot) matches every name with that prefix
/// - `node` matches `node` and the hierarchy below it (`node.started`),
///   but not `nodes.x`
///
/// `kinds`, when non-empty, additionally restricts by record kind. A filter
/// with no event patterns matches on kind alone; an empty filter matches
/// nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionFilter {
    pub events: Vec<String>,
    pub kinds: Vec<EventKind>,
}

impl SubscriptionFilter {
    /// Subscribe to every record.
    pub fn all() -> Self {
        Self::events(["*"])
    }

    pub fn events<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            events: patterns.into_iter().map(Into::into).collect(),
            kinds: Vec::new(),
        }
    }

    pub fn kinds(kinds: impl IntoIterator<Item = EventKind>) -> Self {
        Self {
            events: Vec::new(),
            kinds: kinds.into_iter().collect(),
        }
    }

    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = EventKind>) -> Self {
        self.kinds = kinds.into_iter().collect();
        self
    }

    pub fn matches(&self, record: &EventRecord) -> bool {
        if record.kind == EventKind::Confirm {
            return false;
        }

        let kind_ok = self.kinds.is_empty() || self.kinds.contains(&record.kind);
        let name_ok = if self.events.is_empty() {
            !self.kinds.is_empty()
        } else {
            self.events
                .iter()
                .any(|pattern| event_matches(&record.event_name, pattern))
        };

        kind_ok && name_ok
    }
}

/// Check if an event name matches a single subscription pattern.
pub fn event_matches(event_name: &str, pattern: &str) -> bool {
    if pattern == "*" || pattern == "#" {
        return true;
    }
    if event_name == pattern {
        return true;
    }
    if pattern.ends_with('.') {
        return event_name.starts_with(pattern);
    }
    // Hierarchical match: pattern is a prefix of the name with dot separator
    event_name.starts_with(pattern) && event_name[pattern.len()..].starts_with('.')
}
