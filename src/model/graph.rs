// src/model/graph.rs

//! Persisted execution-graph mirror owned by the state tracker.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::status::{JobStatus, NodeState};
use crate::types::{JobId, Metadata, NodeId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphCounters {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub running: usize,
    /// Pending plus ready.
    pub pending: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

impl GraphCounters {
    pub fn from_states<'a>(states: impl IntoIterator<Item = &'a NodeState>) -> Self {
        let mut c = GraphCounters::default();
        for state in states {
            c.total += 1;
            match state {
                NodeState::Pending | NodeState::Ready => c.pending += 1,
                NodeState::Running => c.running += 1,
                NodeState::Completed => c.completed += 1,
                NodeState::Failed | NodeState::Timeout => c.failed += 1,
                NodeState::Skipped => c.skipped += 1,
                NodeState::Cancelled => c.cancelled += 1,
            }
        }
        c
    }

    /// Nodes that will not run again.
    pub fn resolved(&self) -> usize {
        self.completed + self.failed + self.skipped + self.cancelled
    }

    /// Resolved share of the graph, 0.0..=100.0.
    pub fn progress_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.resolved() as f64 * 100.0 / self.total as f64
    }
}

/// One accepted node transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub node_id: NodeId,
    pub from: NodeState,
    pub to: NodeState,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
    /// Applied by recovery, outside the transition table.
    #[serde(default)]
    pub forced: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub at: DateTime<Utc>,
    pub message: String,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionGraph {
    pub graph_id: String,
    pub job_id: JobId,
    pub node_states: BTreeMap<NodeId, NodeState>,
    pub dependencies: BTreeMap<NodeId, Vec<NodeId>>,
    pub counters: GraphCounters,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub node_results: BTreeMap<NodeId, Value>,
    #[serde(default)]
    pub error_summary: Vec<ErrorEntry>,
    #[serde(default)]
    pub history: Vec<TransitionRecord>,
    pub final_status: Option<JobStatus>,
    pub final_result: Option<Value>,
}

impl ExecutionGraph {
    pub fn recount(&mut self) {
        self.counters = GraphCounters::from_states(self.node_states.values());
    }

    pub fn nodes_in(&self, state: NodeState) -> Vec<NodeId> {
        self.node_states
            .iter()
            .filter(|(_, s)| **s == state)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn is_finalized(&self) -> bool {
        self.end_time.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_bucket_states() {
        let states = [
            NodeState::Pending,
            NodeState::Ready,
            NodeState::Running,
            NodeState::Completed,
            NodeState::Timeout,
            NodeState::Skipped,
        ];
        let c = GraphCounters::from_states(states.iter());
        assert_eq!(c.total, 6);
        assert_eq!(c.pending, 2);
        assert_eq!(c.running, 1);
        assert_eq!(c.completed, 1);
        assert_eq!(c.failed, 1);
        assert_eq!(c.skipped, 1);
        assert_eq!(c.resolved(), 3);
        assert!((c.progress_percent() - 50.0).abs() < f64::EPSILON);
    }
}
