// src/engine/graph.rs

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::errors::{HaltReason, OrchestratorError, Result};
use crate::model::Node;
use crate::types::NodeId;

/// Immediate dependencies and dependents of one node.
#[derive(Debug, Clone, Default)]
struct PlanNode {
    deps: Vec<NodeId>,
    dependents: Vec<NodeId>,
}

/// Validated dependency structure of one job's nodes.
#[derive(Debug, Clone)]
pub struct DagPlan {
    nodes: BTreeMap<NodeId, PlanNode>,
    order: Vec<NodeId>,
}

impl DagPlan {
    /// Build and validate the plan.
    ///
    /// Cycles are reported first (naming one node on the cycle), then
    /// dependencies that name no node of this job.
    pub fn build(job_id: &str, nodes: &[Node]) -> Result<Self> {
        let mut plan: BTreeMap<NodeId, PlanNode> = nodes
            .iter()
            .map(|n| {
                (
                    n.node_id.clone(),
                    PlanNode {
                        deps: n.depends_on.iter().cloned().collect(),
                        dependents: Vec::new(),
                    },
                )
            })
            .collect();

        // Edge direction: dep -> node.
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for id in plan.keys() {
            graph.add_node(id.as_str());
        }

        let mut dangling: Vec<(NodeId, NodeId)> = Vec::new();
        for node in nodes {
            if node.job_id != job_id {
                return Err(OrchestratorError::GraphExecutionHalt {
                    reason: HaltReason::InvalidDependency,
                    node_id: node.node_id.clone(),
                    message: format!("node belongs to job {}, not {job_id}", node.job_id),
                });
            }
            for dep in &node.depends_on {
                match plan.get_key_value(dep) {
                    Some((dep_key, _)) => {
                        graph.add_edge(dep_key.as_str(), node.node_id.as_str(), ());
                    }
                    None => dangling.push((node.node_id.clone(), dep.clone())),
                }
            }
        }

        let order: Vec<NodeId> = match toposort(&graph, None) {
            Ok(order) => order.into_iter().map(str::to_string).collect(),
            Err(cycle) => {
                let node_id = cycle.node_id().to_string();
                return Err(OrchestratorError::GraphExecutionHalt {
                    reason: HaltReason::CycleDetected,
                    message: format!("dependency cycle in job {job_id} involving node '{node_id}'"),
                    node_id,
                });
            }
        };

        if let Some((node_id, dep)) = dangling.into_iter().next() {
            return Err(OrchestratorError::GraphExecutionHalt {
                reason: HaltReason::InvalidDependency,
                message: format!("node '{node_id}' depends on unknown node '{dep}'"),
                node_id,
            });
        }

        let edges: Vec<(NodeId, NodeId)> = plan
            .iter()
            .flat_map(|(id, n)| n.deps.iter().map(move |dep| (dep.clone(), id.clone())))
            .collect();
        for (dep, id) in edges {
            if let Some(dep_node) = plan.get_mut(&dep) {
                dep_node.dependents.push(id);
            }
        }

        Ok(Self { nodes: plan, order })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    /// Nodes in a dependency-respecting order.
    pub fn topological_order(&self) -> &[NodeId] {
        &self.order
    }

    pub fn roots(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.deps.is_empty())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn dependencies_of(&self, id: &str) -> &[NodeId] {
        self.nodes.get(id).map(|n| n.deps.as_slice()).unwrap_or(&[])
    }

    pub fn dependents_of(&self, id: &str) -> &[NodeId] {
        self.nodes
            .get(id)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Every node reachable from `id` along dependent edges.
    pub fn transitive_dependents(&self, id: &str) -> BTreeSet<NodeId> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<&NodeId> = self.dependents_of(id).iter().collect();
        while let Some(next) = stack.pop() {
            if seen.insert(next.clone()) {
                stack.extend(self.dependents_of(next));
            }
        }
        seen
    }

    /// Dependency lists keyed by node, as the tracker stores them.
    pub fn dependency_map(&self) -> BTreeMap<NodeId, Vec<NodeId>> {
        self.nodes
            .iter()
            .map(|(id, n)| (id.clone(), n.deps.clone()))
            .collect()
    }
}
