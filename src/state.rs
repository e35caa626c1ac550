//! Shared workflow state
//!
//! One mutable record per workflow run, visible to every tool handler and
//! agent in that run. `files` is mutated only by tool handlers and only
//! grows or overwrites by path; `summary` is written only by the coding
//! agent's response hook once the termination marker appears.
//!
//! Execution within a run is sequential, so a plain mutex suffices; the lock
//! is never held across an await point.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// Cross-cutting state for one workflow run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Task summary extracted from the termination marker; empty until the
    /// coding agent signals completion
    pub summary: String,
    /// Files produced in the sandbox, keyed by path
    pub files: BTreeMap<String, String>,
}

/// Shared handle to a run's state
pub type SharedState = Arc<Mutex<WorkflowState>>;

impl WorkflowState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap in the shared handle passed to tools and agents
    pub fn shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }

    pub fn has_summary(&self) -> bool {
        !self.summary.is_empty()
    }

    /// Merge `updates` into `files`. Later entries win per path; existing
    /// paths absent from `updates` are kept.
    pub fn merge_files(&mut self, updates: BTreeMap<String, String>) {
        for (path, content) in updates {
            self.files.insert(path, content);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_state() {
        let state = WorkflowState::new();
        assert!(!state.has_summary());
        assert!(state.files.is_empty());
    }

    #[test]
    fn test_merge_disjoint_paths_accumulate() {
        let mut state = WorkflowState::new();
        state.merge_files(BTreeMap::from([(
            "app/page.tsx".to_string(),
            "a".to_string(),
        )]));
        state.merge_files(BTreeMap::from([(
            "app/layout.tsx".to_string(),
            "b".to_string(),
        )]));
        assert_eq!(state.files.len(), 2);
        assert_eq!(state.files["app/page.tsx"], "a");
        assert_eq!(state.files["app/layout.tsx"], "b");
    }

    #[test]
    fn test_merge_overlapping_path_later_wins() {
        let mut state = WorkflowState::new();
        state.merge_files(BTreeMap::from([("a.txt".to_string(), "v1".to_string())]));
        state.merge_files(BTreeMap::from([("a.txt".to_string(), "v2".to_string())]));
        assert_eq!(state.files.len(), 1);
        assert_eq!(state.files["a.txt"], "v2");
    }

    #[test]
    fn test_state_serde_round_trip() {
        let mut state = WorkflowState::new();
        state.summary = "Created page".to_string();
        state.merge_files(BTreeMap::from([("a.txt".to_string(), "v".to_string())]));

        let json = serde_json::to_string(&state).unwrap();
        let parsed: WorkflowState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.summary, "Created page");
        assert_eq!(parsed.files["a.txt"], "v");
    }
}
