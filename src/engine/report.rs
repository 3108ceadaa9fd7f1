// src/engine/report.rs

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::model::{GraphCounters, JobStatus, NodeState};
use crate::types::{JobId, NodeId};

/// Per-node record of one execution.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRun {
    pub node_id: NodeId,
    pub state: NodeState,
    /// Logical clock value when the node started running.
    pub start_seq: Option<u64>,
    /// Logical clock value when the node resolved.
    pub finish_seq: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
    pub attempts: u32,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl NodeRun {
    pub(crate) fn new(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            state: NodeState::Pending,
            start_seq: None,
            finish_seq: None,
            started_at: None,
            completed_at: None,
            duration: None,
            attempts: 0,
            result: None,
            error: None,
        }
    }
}

/// Outcome of one DAG execution.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub job_id: JobId,
    pub graph_id: String,
    pub outcome: JobStatus,
    pub counters: GraphCounters,
    pub runs: BTreeMap<NodeId, NodeRun>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionReport {
    /// Successfully resolved nodes in the order they finished.
    pub fn execution_path(&self) -> Vec<NodeId> {
        let mut done: Vec<&NodeRun> = self
            .runs
            .values()
            .filter(|r| r.state == NodeState::Completed)
            .collect();
        done.sort_by_key(|r| r.finish_seq);
        done.into_iter().map(|r| r.node_id.clone()).collect()
    }

    /// The earliest node that failed or timed out.
    pub fn first_failure(&self) -> Option<&NodeRun> {
        self.runs
            .values()
            .filter(|r| r.state.is_failure())
            .min_by_key(|r| r.finish_seq)
    }

    pub fn progress_percent(&self) -> f64 {
        self.counters.progress_percent()
    }
}
