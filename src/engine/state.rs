// src/engine/state.rs

//! Engine-local view of one DAG run.
//!
//! Mirrors the tracker's node states for fast readiness scans. Every change
//! made here is reported to the tracker by the caller before the lock is
//! released, so the two never drift by more than one transition.

use std::collections::BTreeMap;

use tracing::debug;

use crate::engine::graph::DagPlan;
use crate::engine::report::NodeRun;
use crate::errors::OrchestratorError;
use crate::model::{GraphCounters, JobStatus, NodeState};
use crate::types::NodeId;

#[derive(Debug)]
pub(crate) struct RunState {
    stages: BTreeMap<NodeId, NodeState>,
    pub(crate) runs: BTreeMap<NodeId, NodeRun>,
    pub(crate) in_flight: usize,
    pub(crate) stopping: bool,
    pub(crate) halt: Option<OrchestratorError>,
}

impl RunState {
    pub(crate) fn new(plan: &DagPlan) -> Self {
        Self {
            stages: plan
                .node_ids()
                .map(|id| (id.clone(), NodeState::Pending))
                .collect(),
            runs: plan.node_ids().map(|id| (id.clone(), NodeRun::new(id))).collect(),
            in_flight: 0,
            stopping: false,
            halt: None,
        }
    }

    pub(crate) fn stage(&self, id: &str) -> Option<NodeState> {
        self.stages.get(id).copied()
    }

    pub(crate) fn set_stage(&mut self, id: &str, state: NodeState) {
        if let Some(slot) = self.stages.get_mut(id) {
            *slot = state;
        }
        if let Some(run) = self.runs.get_mut(id) {
            run.state = state;
        }
    }

    pub(crate) fn nodes_in(&self, state: NodeState) -> Vec<NodeId> {
        self.stages
            .iter()
            .filter(|(_, s)| **s == state)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub(crate) fn count(&self, state: NodeState) -> usize {
        self.stages.values().filter(|s| **s == state).count()
    }

    /// Pending nodes whose dependencies have all resolved successfully.
    /// Skipped dependencies count as satisfied.
    pub(crate) fn collect_new_ready(&self, plan: &DagPlan) -> Vec<NodeId> {
        self.stages
            .iter()
            .filter(|(_, state)| **state == NodeState::Pending)
            .filter(|(id, _)| {
                plan.dependencies_of(id)
                    .iter()
                    .all(|dep| self.stage(dep).is_some_and(NodeState::is_success))
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Still-pending nodes downstream of `failed`.
    pub(crate) fn pending_dependents(&self, plan: &DagPlan, failed: &str) -> Vec<NodeId> {
        let doomed: Vec<NodeId> = plan
            .transitive_dependents(failed)
            .into_iter()
            .filter(|id| self.stage(id) == Some(NodeState::Pending))
            .collect();
        if !doomed.is_empty() {
            debug!(failed, dependents = ?doomed, "cancelling dependents of failed node");
        }
        doomed
    }

    /// Nodes that have not started and can still be cancelled.
    pub(crate) fn unstarted(&self) -> Vec<NodeId> {
        self.stages
            .iter()
            .filter(|(_, s)| matches!(s, NodeState::Pending | NodeState::Ready))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub(crate) fn all_resolved(&self) -> bool {
        self.stages.values().all(|s| s.is_resolved())
    }

    pub(crate) fn counters(&self) -> GraphCounters {
        GraphCounters::from_states(self.stages.values())
    }

    /// `failed` if any node failed, `completed` if every node succeeded,
    /// `aborted` otherwise.
    pub(crate) fn outcome(&self) -> JobStatus {
        if self.stages.values().any(|s| s.is_failure()) {
            JobStatus::Failed
        } else if self.stages.values().all(|s| s.is_success()) {
            JobStatus::Completed
        } else {
            JobStatus::Aborted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Node, NodeSpec, NodeType};

    fn plan(edges: &[(&str, &[&str])]) -> DagPlan {
        let nodes: Vec<Node> = edges
            .iter()
            .map(|(id, deps)| {
                let spec = NodeSpec {
                    node_id: id.to_string(),
                    node_type: NodeType::Validation,
                    execution_strategy: Default::default(),
                    depends_on: deps.iter().map(|d| d.to_string()).collect(),
                    critical: false,
                    timeout_secs: None,
                    max_retries: 0,
                    interruptible: true,
                    config: Default::default(),
                };
                Node::from_spec("j", &spec)
            })
            .collect();
        DagPlan::build("j", &nodes).unwrap()
    }

    #[test]
    fn skipped_dependencies_satisfy_dependents() {
        let plan = plan(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);
        let mut st = RunState::new(&plan);
        assert_eq!(st.collect_new_ready(&plan), vec!["a".to_string()]);

        st.set_stage("a", NodeState::Skipped);
        assert_eq!(st.collect_new_ready(&plan), vec!["b".to_string()]);
    }

    #[test]
    fn failure_dooms_only_pending_downstream() {
        let plan = plan(&[("a", &[]), ("b", &["a"]), ("c", &["b"]), ("d", &[])]);
        let mut st = RunState::new(&plan);
        st.set_stage("a", NodeState::Failed);
        assert_eq!(
            st.pending_dependents(&plan, "a"),
            vec!["b".to_string(), "c".to_string()]
        );
    }

    #[test]
    fn outcome_rules() {
        let plan = plan(&[("a", &[]), ("b", &[])]);
        let mut st = RunState::new(&plan);
        st.set_stage("a", NodeState::Completed);
        st.set_stage("b", NodeState::Skipped);
        assert_eq!(st.outcome(), JobStatus::Completed);

        st.set_stage("b", NodeState::Cancelled);
        assert_eq!(st.outcome(), JobStatus::Aborted);

        st.set_stage("b", NodeState::Timeout);
        assert_eq!(st.outcome(), JobStatus::Failed);
    }
}
