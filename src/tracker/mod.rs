// src/tracker/mod.rs

//! Execution state tracker.
//!
//! Owns the authoritative representation of every running DAG: node states,
//! counters, transition history and results. Each job's graph sits behind
//! its own mutex, which is the single gate through which node transitions
//! are validated and applied.
//!
//! Every accepted change is upserted to the document store keyed by job id.
//! A failed write is logged and the in-memory state kept; the next
//! successful write reconciles the persisted copy.

pub mod stall;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Duration;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::config::OrchestratorConfig;
use crate::errors::{OrchestratorError, Result};
use crate::model::{
    ErrorEntry, ExecutionGraph, GraphCounters, JobStatus, NodeState, TransitionRecord,
};
use crate::store::{self, DocumentStore, Filter, collections};
use crate::types::{JobId, Metadata, NodeId, StallDetection};

pub use stall::GraphStall;

#[derive(Debug)]
struct TrackedGraph {
    graph: ExecutionGraph,
    last_marker: Option<usize>,
}

#[derive(Debug)]
pub struct StateTracker {
    store: Arc<dyn DocumentStore>,
    clock: SharedClock,
    stall_detection: StallDetection,
    graphs: Mutex<HashMap<JobId, Arc<Mutex<TrackedGraph>>>>,
}

impl StateTracker {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        clock: SharedClock,
        stall_detection: StallDetection,
    ) -> Self {
        Self {
            store,
            clock,
            stall_detection,
            graphs: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(
        cfg: &OrchestratorConfig,
        store: Arc<dyn DocumentStore>,
        clock: SharedClock,
    ) -> Self {
        Self::new(store, clock, cfg.tracker.stall_detection)
    }

    /// Start tracking a fresh graph for `job_id`, replacing any previous one.
    /// All nodes start `pending`. Returns the new graph id.
    pub fn initialize_graph(
        &self,
        job_id: &str,
        nodes: &[NodeId],
        dependencies: &BTreeMap<NodeId, Vec<NodeId>>,
    ) -> String {
        let now = self.clock.now();
        let node_states: BTreeMap<NodeId, NodeState> = nodes
            .iter()
            .map(|id| (id.clone(), NodeState::Pending))
            .collect();
        let dependencies = nodes
            .iter()
            .map(|id| (id.clone(), dependencies.get(id).cloned().unwrap_or_default()))
            .collect();

        let mut graph = ExecutionGraph {
            graph_id: Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            node_states,
            dependencies,
            counters: GraphCounters::default(),
            start_time: now,
            end_time: None,
            duration_ms: None,
            node_results: BTreeMap::new(),
            error_summary: Vec::new(),
            history: Vec::new(),
            final_status: None,
            final_result: None,
        };
        graph.recount();
        let graph_id = graph.graph_id.clone();

        self.persist(&graph);
        self.lock_index().insert(
            job_id.to_string(),
            Arc::new(Mutex::new(TrackedGraph {
                graph,
                last_marker: None,
            })),
        );

        info!(job_id, graph_id = %graph_id, nodes = nodes.len(), "execution graph initialized");
        graph_id
    }

    /// Validate and apply a node transition.
    ///
    /// Returns an advisory [`GraphStall`] when the graph looks stuck after
    /// the transition. Rejected transitions change nothing.
    pub fn update_node_state(
        &self,
        job_id: &str,
        node_id: &str,
        new_state: NodeState,
        metadata: Metadata,
    ) -> Result<Option<GraphStall>> {
        let entry = self.entry(job_id)?;
        let mut tracked = lock(&entry);

        let current = *tracked
            .graph
            .node_states
            .get(node_id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("node {job_id}/{node_id}")))?;

        if !current.can_transition_to(new_state) {
            warn!(
                job_id,
                node_id,
                current = %current,
                attempted = %new_state,
                "rejected node state transition"
            );
            return Err(OrchestratorError::StateTransition {
                job_id: job_id.to_string(),
                node_id: node_id.to_string(),
                current,
                attempted: new_state,
            });
        }

        let now = self.clock.now();
        let graph = &mut tracked.graph;
        graph.node_states.insert(node_id.to_string(), new_state);
        graph.history.push(TransitionRecord {
            node_id: node_id.to_string(),
            from: current,
            to: new_state,
            at: now,
            metadata,
            forced: false,
        });
        graph.recount();
        debug!(job_id, node_id, from = %current, to = %new_state, "node transition");

        self.persist(&tracked.graph);

        let TrackedGraph { graph, last_marker } = &mut *tracked;
        let stall = stall::evaluate(graph, self.stall_detection, last_marker);
        if let Some(s) = &stall {
            warn!(job_id, pending = ?s.pending_nodes, "execution graph stalled");
        }
        Ok(stall)
    }

    /// Store a node's result payload.
    pub fn record_node_result(&self, job_id: &str, node_id: &str, result: Value) -> Result<()> {
        let entry = self.entry(job_id)?;
        let mut tracked = lock(&entry);
        tracked.graph.node_results.insert(node_id.to_string(), result);
        self.persist(&tracked.graph);
        Ok(())
    }

    /// Set a node's state outside the transition table. Used only by recovery
    /// strategies; the history entry is flagged `forced`.
    pub fn force_node_state(
        &self,
        job_id: &str,
        node_id: &str,
        state: NodeState,
        reason: &str,
    ) -> Result<()> {
        let entry = self.entry(job_id)?;
        let mut tracked = lock(&entry);
        let now = self.clock.now();
        let graph = &mut tracked.graph;

        let from = *graph
            .node_states
            .get(node_id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("node {job_id}/{node_id}")))?;
        graph.node_states.insert(node_id.to_string(), state);

        let mut metadata = Metadata::new();
        metadata.insert("reason".to_string(), reason.to_string());
        graph.history.push(TransitionRecord {
            node_id: node_id.to_string(),
            from,
            to: state,
            at: now,
            metadata,
            forced: true,
        });
        graph.recount();
        warn!(job_id, node_id, from = %from, to = %state, reason, "forced node state");

        self.persist(&tracked.graph);
        Ok(())
    }

    /// Put every node back to `pending` and clear results and end markers.
    pub fn reset_graph(&self, job_id: &str) -> Result<()> {
        let entry = self.entry(job_id)?;
        let mut tracked = lock(&entry);
        let now = self.clock.now();
        let graph = &mut tracked.graph;

        for state in graph.node_states.values_mut() {
            *state = NodeState::Pending;
        }
        graph.node_results.clear();
        graph.start_time = now;
        graph.end_time = None;
        graph.duration_ms = None;
        graph.final_status = None;
        graph.final_result = None;
        graph.recount();
        tracked.last_marker = None;

        self.persist(&tracked.graph);
        info!(job_id, "execution graph reset to pending");
        Ok(())
    }

    /// Mark the execution finished with the job's final status.
    pub fn finalize_execution(
        &self,
        job_id: &str,
        final_status: JobStatus,
        result: Option<Value>,
    ) -> Result<()> {
        let entry = self.entry(job_id)?;
        let mut tracked = lock(&entry);
        let now = self.clock.now();
        let graph = &mut tracked.graph;

        graph.final_status = Some(final_status);
        graph.final_result = result;
        graph.end_time = Some(now);
        graph.duration_ms = Some((now - graph.start_time).num_milliseconds());

        info!(
            job_id,
            status = %final_status,
            duration_ms = graph.duration_ms,
            completed = graph.counters.completed,
            failed = graph.counters.failed,
            "execution finalized"
        );
        self.persist(&tracked.graph);
        Ok(())
    }

    /// Append to the graph's error summary.
    pub fn record_failure(&self, job_id: &str, message: &str, metadata: Metadata) -> Result<()> {
        let entry = self.entry(job_id)?;
        let mut tracked = lock(&entry);
        let now = self.clock.now();
        tracked.graph.error_summary.push(ErrorEntry {
            at: now,
            message: message.to_string(),
            metadata,
        });
        warn!(job_id, message, "execution failure recorded");
        self.persist(&tracked.graph);
        Ok(())
    }

    /// Current graph for `job_id`: in-memory if tracked, otherwise loaded
    /// from the store (and cached).
    pub fn load_state(&self, job_id: &str) -> Result<Option<ExecutionGraph>> {
        if let Some(entry) = self.lock_index().get(job_id).cloned() {
            return Ok(Some(lock(&entry).graph.clone()));
        }

        let loaded: Option<ExecutionGraph> =
            store::load(self.store.as_ref(), collections::EXECUTION_GRAPHS, job_id)?;
        if let Some(graph) = &loaded {
            self.lock_index()
                .entry(job_id.to_string())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(TrackedGraph {
                        graph: graph.clone(),
                        last_marker: None,
                    }))
                });
        }
        Ok(loaded)
    }

    /// Remove finalized graphs whose execution ended more than `retention`
    /// ago, from memory and the store. Returns how many were removed.
    pub fn cleanup_completed(&self, retention: Duration) -> Result<usize> {
        let cutoff = self.clock.now() - retention;
        let expired = |graph: &ExecutionGraph| matches!(graph.end_time, Some(end) if end < cutoff);

        let persisted: Vec<ExecutionGraph> = store::load_many(
            self.store.as_ref(),
            collections::EXECUTION_GRAPHS,
            &Filter::all(),
        )?;
        let mut doomed: Vec<JobId> = persisted
            .iter()
            .filter(|g| expired(g))
            .map(|g| g.job_id.clone())
            .collect();

        {
            let mut index = self.lock_index();
            let in_memory: Vec<JobId> = index
                .iter()
                .filter(|(_, entry)| expired(&lock(entry).graph))
                .map(|(id, _)| id.clone())
                .collect();
            for id in in_memory {
                index.remove(&id);
                if !doomed.contains(&id) {
                    doomed.push(id);
                }
            }
            for id in &doomed {
                index.remove(id);
            }
        }

        self.store
            .delete_many(collections::EXECUTION_GRAPHS, &doomed)?;
        if !doomed.is_empty() {
            info!(removed = doomed.len(), "cleaned up finalized execution graphs");
        }
        Ok(doomed.len())
    }

    fn entry(&self, job_id: &str) -> Result<Arc<Mutex<TrackedGraph>>> {
        if let Some(entry) = self.lock_index().get(job_id).cloned() {
            return Ok(entry);
        }
        if self.load_state(job_id)?.is_some() {
            if let Some(entry) = self.lock_index().get(job_id).cloned() {
                return Ok(entry);
            }
        }
        Err(OrchestratorError::NotFound(format!(
            "no execution graph for job {job_id}"
        )))
    }

    fn lock_index(&self) -> MutexGuard<'_, HashMap<JobId, Arc<Mutex<TrackedGraph>>>> {
        self.graphs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, graph: &ExecutionGraph) {
        if let Err(e) = store::save(
            self.store.as_ref(),
            collections::EXECUTION_GRAPHS,
            &graph.job_id,
            graph,
        ) {
            warn!(
                job_id = %graph.job_id,
                error = %e,
                "failed to persist execution graph; keeping in-memory state"
            );
        }
    }
}

fn lock(entry: &Mutex<TrackedGraph>) -> MutexGuard<'_, TrackedGraph> {
    entry.lock().unwrap_or_else(|e| e.into_inner())
}
