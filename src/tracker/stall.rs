// src/tracker/stall.rs

//! Stall evaluation over an execution-graph snapshot.

use std::collections::BTreeSet;

use crate::errors::OrchestratorError;
use crate::model::{ExecutionGraph, NodeState};
use crate::types::{JobId, NodeId, StallDetection};

/// Advisory stall report. Callers decide whether to escalate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphStall {
    pub job_id: JobId,
    pub pending_nodes: Vec<NodeId>,
}

impl GraphStall {
    pub fn into_error(self) -> OrchestratorError {
        OrchestratorError::ExecutionGraphStall {
            job_id: self.job_id,
            pending_nodes: self.pending_nodes,
        }
    }
}

/// Evaluate the graph after an accepted transition.
///
/// `last_marker` is the resolved-node count seen by the previous idle check
/// (nothing running or ready). It is only updated while the graph is idle,
/// so two idle checks with the same count mean no progress in between.
pub fn evaluate(
    graph: &ExecutionGraph,
    mode: StallDetection,
    last_marker: &mut Option<usize>,
) -> Option<GraphStall> {
    let ready = graph.nodes_in(NodeState::Ready).len();
    if graph.counters.running + ready > 0 {
        return None;
    }

    let marker = graph.counters.resolved();
    let previous = last_marker.replace(marker);

    let waiting = graph.nodes_in(NodeState::Pending);
    if waiting.is_empty() {
        return None;
    }

    let pending_nodes = match mode {
        StallDetection::Conservative => {
            if previous != Some(marker) {
                return None;
            }
            waiting
        }
        StallDetection::Deadlock => blocked_nodes(graph, &waiting),
    };

    if pending_nodes.is_empty() {
        None
    } else {
        Some(GraphStall {
            job_id: graph.job_id.clone(),
            pending_nodes,
        })
    }
}

/// Pending nodes that can never run: some dependency failed, timed out or was
/// cancelled, directly or through another blocked node.
fn blocked_nodes(graph: &ExecutionGraph, waiting: &[NodeId]) -> Vec<NodeId> {
    let mut blocked: BTreeSet<NodeId> = BTreeSet::new();

    loop {
        let mut changed = false;
        for node in waiting {
            if blocked.contains(node) {
                continue;
            }
            let deps = graph.dependencies.get(node).map(Vec::as_slice).unwrap_or(&[]);
            let dead = deps.iter().any(|dep| {
                blocked.contains(dep)
                    || matches!(
                        graph.node_states.get(dep),
                        Some(NodeState::Failed | NodeState::Timeout | NodeState::Cancelled) | None
                    )
            });
            if dead {
                blocked.insert(node.clone());
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    blocked.into_iter().collect()
}
