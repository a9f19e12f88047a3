//! Step trace.
//!
//! Every UI action and HTTP exchange lands here with its timestamp, target
//! and outcome, so a failed run can be diagnosed without re-running it.

use crate::locator::TargetDescriptor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one traced action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TraceOutcome {
    /// Action completed
    Succeeded,
    /// Action failed
    Failed {
        /// Error description
        error: String,
    },
}

impl TraceOutcome {
    /// Check if succeeded
    #[must_use]
    pub const fn is_succeeded(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// One traced action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// When the action started
    pub timestamp: DateTime<Utc>,
    /// Index of the owning step
    pub step_index: usize,
    /// Action name (`click`, `drag.down`, `http GET /tasks`, ...)
    pub action: String,
    /// Target descriptor, for UI actions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetDescriptor>,
    /// Outcome
    pub outcome: TraceOutcome,
    /// Wall-clock time spent
    pub elapsed_ms: u64,
}

impl TraceEntry {
    /// Entry for a completed action
    #[must_use]
    pub fn succeeded(
        step_index: usize,
        action: impl Into<String>,
        target: Option<TargetDescriptor>,
        started: DateTime<Utc>,
    ) -> Self {
        Self::finish(step_index, action, target, started, TraceOutcome::Succeeded)
    }

    /// Entry for a failed action
    #[must_use]
    pub fn failed(
        step_index: usize,
        action: impl Into<String>,
        target: Option<TargetDescriptor>,
        started: DateTime<Utc>,
        error: impl Into<String>,
    ) -> Self {
        Self::finish(
            step_index,
            action,
            target,
            started,
            TraceOutcome::Failed {
                error: error.into(),
            },
        )
    }

    fn finish(
        step_index: usize,
        action: impl Into<String>,
        target: Option<TargetDescriptor>,
        started: DateTime<Utc>,
        outcome: TraceOutcome,
    ) -> Self {
        let elapsed = Utc::now().signed_duration_since(started);
        Self {
            timestamp: started,
            step_index,
            action: action.into(),
            target,
            outcome,
            elapsed_ms: elapsed.num_milliseconds().max(0) as u64,
        }
    }
}

/// Append-only trace of a scenario run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepTrace {
    entries: Vec<TraceEntry>,
}

impl StepTrace {
    /// Create an empty trace
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one entry
    pub fn record(&mut self, entry: TraceEntry) {
        self.entries.push(entry);
    }

    /// Append entries in order
    pub fn extend(&mut self, entries: impl IntoIterator<Item = TraceEntry>) {
        self.entries.extend(entries);
    }

    /// All entries
    #[must_use]
    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been traced
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries belonging to one step
    pub fn for_step(&self, step_index: usize) -> impl Iterator<Item = &TraceEntry> {
        self.entries
            .iter()
            .filter(move |e| e.step_index == step_index)
    }

    /// Last failed entry, if any
    #[must_use]
    pub fn last_failure(&self) -> Option<&TraceEntry> {
        self.entries
            .iter()
            .rev()
            .find(|e| !e.outcome.is_succeeded())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::Strategy;

    #[test]
    fn test_record_and_filter() {
        let mut trace = StepTrace::new();
        let target = TargetDescriptor::single(Strategy::text("Save"));
        trace.record(TraceEntry::succeeded(0, "click", Some(target), Utc::now()));
        trace.record(TraceEntry::failed(1, "fill", None, Utc::now(), "detached"));
        trace.record(TraceEntry::succeeded(1, "fill", None, Utc::now()));

        assert_eq!(trace.len(), 3);
        assert_eq!(trace.for_step(1).count(), 2);
        assert_eq!(trace.last_failure().unwrap().action, "fill");
    }

    #[test]
    fn test_outcome_serialization() {
        let entry = TraceEntry::failed(2, "drag", None, Utc::now(), "pointer lost");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["outcome"]["status"], "failed");
        assert_eq!(json["outcome"]["error"], "pointer lost");
        assert!(json.get("target").is_none());
    }

    #[test]
    fn test_elapsed_is_non_negative() {
        let entry = TraceEntry::succeeded(0, "navigate", None, Utc::now());
        assert!(entry.elapsed_ms < 1000);
        assert!(entry.outcome.is_succeeded());
    }
}
