// src/engine/run.rs

//! Shared state and worker loop of one DAG execution.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, Semaphore, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::engine::graph::DagPlan;
use crate::engine::state::RunState;
use crate::engine::{EngineEvent, EngineObserver};
use crate::errors::{HaltReason, OrchestratorError};
use crate::model::{Node, NodeState};
use crate::runner::{JobContext, NodeRunner};
use crate::tracker::StateTracker;
use crate::types::{JobId, Metadata, NodeId};

/// Item on the ready queue. `Stop` tells one worker to exit.
#[derive(Debug)]
pub(crate) enum ReadyItem {
    Node(NodeId),
    Stop,
}

pub(crate) type ReadyQueue = Arc<AsyncMutex<mpsc::UnboundedReceiver<ReadyItem>>>;

enum Attempt {
    Succeeded(Value),
    Failed(NodeState, OrchestratorError),
    Interrupted,
}

#[derive(Debug)]
pub(crate) struct Run {
    pub(crate) job_id: JobId,
    pub(crate) ctx: JobContext,
    pub(crate) nodes: HashMap<NodeId, Node>,
    pub(crate) plan: DagPlan,
    pub(crate) state: Mutex<RunState>,
    pub(crate) tracker: Arc<StateTracker>,
    pub(crate) runner: Arc<NodeRunner>,
    pub(crate) clock: SharedClock,
    pub(crate) cascade: bool,
    pub(crate) seq: AtomicU64,
    pub(crate) permits: Semaphore,
    pub(crate) ready_tx: mpsc::UnboundedSender<ReadyItem>,
    pub(crate) done_tx: mpsc::UnboundedSender<NodeId>,
    pub(crate) stop_tx: watch::Sender<bool>,
    pub(crate) observer: Option<EngineObserver>,
}

impl Run {
    pub(crate) fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn notify(&self, event: EngineEvent) {
        if let Some(observer) = &self.observer {
            let _ = observer.send(event);
        }
    }

    /// Report a transition to the tracker. Rejections are logged; the
    /// engine's own view is authoritative for this run.
    fn transition(&self, node_id: &str, to: NodeState, metadata: Metadata) {
        match self
            .tracker
            .update_node_state(&self.job_id, node_id, to, metadata)
        {
            Ok(Some(stall)) => {
                debug!(job_id = %self.job_id, pending = ?stall.pending_nodes, "tracker reported stall");
            }
            Ok(None) => {}
            Err(e) => {
                warn!(job_id = %self.job_id, node_id, to = %to, error = %e, "tracker rejected transition");
            }
        }
    }

    /// Move newly satisfiable pending nodes to `ready` and enqueue them.
    pub(crate) fn schedule_ready(&self, st: &mut RunState) {
        if st.stopping {
            return;
        }
        for id in st.collect_new_ready(&self.plan) {
            self.transition(&id, NodeState::Ready, Metadata::new());
            st.set_stage(&id, NodeState::Ready);
            debug!(job_id = %self.job_id, node_id = %id, "node ready");
            let _ = self.ready_tx.send(ReadyItem::Node(id));
        }
    }

    fn resolve_without_running(&self, st: &mut RunState, id: &str, state: NodeState, reason: &str) {
        let mut metadata = Metadata::new();
        metadata.insert("reason".to_string(), reason.to_string());
        self.transition(id, state, metadata);
        st.set_stage(id, state);
        let now = self.clock.now();
        let seq = self.next_seq();
        if let Some(run) = st.runs.get_mut(id) {
            run.finish_seq = Some(seq);
            run.completed_at = Some(now);
            if state == NodeState::Cancelled {
                run.error = Some(reason.to_string());
            }
        }
        if let Some(run) = st.runs.get(id) {
            self.notify(EngineEvent::NodeResolved {
                job_id: self.job_id.clone(),
                run: run.clone(),
            });
        }
    }

    /// Cancel every node that has not started.
    pub(crate) fn cancel_unstarted(&self, st: &mut RunState, reason: &str) {
        for id in st.unstarted() {
            self.resolve_without_running(st, &id, NodeState::Cancelled, reason);
        }
    }

    /// Stop scheduling and interrupt in-flight interruptible nodes.
    pub(crate) fn stop(&self, st: &mut RunState) {
        st.stopping = true;
        self.stop_tx.send_replace(true);
    }

    /// Engine-level stall: nothing running, nothing ready, yet pending nodes
    /// remain after a fresh readiness scan.
    pub(crate) fn check_stall(&self) -> Option<OrchestratorError> {
        let mut st = self.lock();
        if st.stopping {
            return None;
        }
        self.schedule_ready(&mut st);
        if st.in_flight > 0 || st.count(NodeState::Ready) > 0 {
            return None;
        }
        let stuck_nodes = st.nodes_in(NodeState::Pending);
        if stuck_nodes.is_empty() {
            return None;
        }
        let counters = st.counters();
        warn!(job_id = %self.job_id, stuck = ?stuck_nodes, "orchestration stalled");
        Some(OrchestratorError::OrchestrationStall {
            job_id: self.job_id.clone(),
            stuck_nodes,
            completed: counters.completed + counters.skipped,
            failed: counters.failed,
        })
    }

    async fn process(&self, node_id: &str) {
        let Some(node) = self.nodes.get(node_id) else {
            return;
        };

        {
            let mut st = self.lock();
            if st.stopping || st.stage(node_id) != Some(NodeState::Ready) {
                return;
            }
            if !self.runner.should_run(node, &self.ctx) {
                info!(job_id = %self.job_id, node_id, "conditions not met; skipping node");
                self.resolve_without_running(&mut st, node_id, NodeState::Skipped, "conditions not met");
                self.schedule_ready(&mut st);
                drop(st);
                let _ = self.done_tx.send(node_id.to_string());
                return;
            }

            self.transition(node_id, NodeState::Running, Metadata::new());
            st.set_stage(node_id, NodeState::Running);
            st.in_flight += 1;
            let seq = self.next_seq();
            let now = self.clock.now();
            if let Some(run) = st.runs.get_mut(node_id) {
                run.start_seq = Some(seq);
                run.started_at = Some(now);
            }
            self.notify(EngineEvent::NodeStarted {
                job_id: self.job_id.clone(),
                node_id: node_id.to_string(),
                at: now,
            });
        }

        let started = Instant::now();
        let (attempt, attempts) = self.run_with_retries(node).await;
        let elapsed = started.elapsed();

        let mut st = self.lock();
        st.in_flight = st.in_flight.saturating_sub(1);

        let (state, result, error) = match attempt {
            Attempt::Succeeded(value) if st.stopping && !node.interruptible => {
                let mut metadata = Metadata::new();
                metadata.insert("reason".to_string(), "execution stopped while running".to_string());
                self.transition(node_id, NodeState::Cancelled, metadata);
                (NodeState::Cancelled, Some(value), Some("execution stopped".to_string()))
            }
            Attempt::Succeeded(value) => {
                if let Err(e) = self.tracker.record_node_result(&self.job_id, node_id, value.clone()) {
                    warn!(job_id = %self.job_id, node_id, error = %e, "failed to record node result");
                }
                self.transition(node_id, NodeState::Completed, Metadata::new());
                (NodeState::Completed, Some(value), None)
            }
            Attempt::Interrupted => {
                let mut metadata = Metadata::new();
                metadata.insert("reason".to_string(), "interrupted".to_string());
                self.transition(node_id, NodeState::Cancelled, metadata);
                (NodeState::Cancelled, None, Some("interrupted".to_string()))
            }
            Attempt::Failed(state, err) => (state, None, Some(err.to_string())),
        };

        st.set_stage(node_id, state);
        let seq = self.next_seq();
        let now = self.clock.now();
        if let Some(run) = st.runs.get_mut(node_id) {
            run.finish_seq = Some(seq);
            run.completed_at = Some(now);
            run.duration = Some(elapsed);
            run.attempts = attempts;
            run.result = result;
            run.error = error.clone();
        }
        if let Some(run) = st.runs.get(node_id) {
            self.notify(EngineEvent::NodeResolved {
                job_id: self.job_id.clone(),
                run: run.clone(),
            });
        }

        if state.is_failure() {
            let message = error.unwrap_or_else(|| "node failed".to_string());
            let mut metadata = Metadata::new();
            metadata.insert("node_id".to_string(), node_id.to_string());
            metadata.insert("state".to_string(), state.to_string());
            if let Err(e) = self.tracker.record_failure(&self.job_id, &message, metadata) {
                warn!(job_id = %self.job_id, error = %e, "failed to record node failure");
            }

            if node.critical {
                if st.halt.is_none() {
                    warn!(job_id = %self.job_id, node_id, "critical node failed; halting execution");
                    st.halt = Some(OrchestratorError::GraphExecutionHalt {
                        reason: HaltReason::CriticalNodeFailure,
                        node_id: node_id.to_string(),
                        message,
                    });
                    self.stop(&mut st);
                    self.cancel_unstarted(&mut st, "critical node failed");
                }
            } else if self.cascade {
                let reason = format!("upstream node '{node_id}' failed");
                for id in st.pending_dependents(&self.plan, node_id) {
                    self.resolve_without_running(&mut st, &id, NodeState::Cancelled, &reason);
                }
            }
        }

        self.schedule_ready(&mut st);
        drop(st);
        let _ = self.done_tx.send(node_id.to_string());
    }

    async fn run_with_retries(&self, node: &Node) -> (Attempt, u32) {
        let mut stop_rx = self.stop_tx.subscribe();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let result = if node.interruptible {
                tokio::select! {
                    r = self.runner.execute(node, &self.ctx) => Some(r),
                    _ = stop_rx.wait_for(|stop| *stop) => None,
                }
            } else {
                Some(self.runner.execute(node, &self.ctx).await)
            };

            let Some(result) = result else {
                info!(job_id = %self.job_id, node_id = %node.node_id, "node interrupted");
                return (Attempt::Interrupted, attempts);
            };

            let err = match result {
                Ok(value) => return (Attempt::Succeeded(value), attempts),
                Err(err) => err,
            };

            // The runner already reported a timeout to the tracker.
            let failed_state = match err {
                OrchestratorError::NodeTimeout { .. } => NodeState::Timeout,
                _ => {
                    let mut metadata = Metadata::new();
                    metadata.insert("error".to_string(), err.to_string());
                    self.transition(&node.node_id, NodeState::Failed, metadata);
                    NodeState::Failed
                }
            };

            let stopping = *self.stop_tx.borrow();
            if attempts <= node.max_retries && !stopping {
                warn!(
                    job_id = %self.job_id,
                    node_id = %node.node_id,
                    attempt = attempts,
                    max_retries = node.max_retries,
                    error = %err,
                    "node attempt failed; retrying"
                );
                let mut metadata = Metadata::new();
                metadata.insert("attempt".to_string(), (attempts + 1).to_string());
                self.transition(&node.node_id, NodeState::Running, metadata);
                continue;
            }

            return (Attempt::Failed(failed_state, err), attempts);
        }
    }
}

/// Worker loop: pull ready nodes until a `Stop` item or a closed queue.
pub(crate) async fn worker(run: Arc<Run>, queue: ReadyQueue, worker_id: usize) {
    debug!(job_id = %run.job_id, worker_id, "engine worker started");
    loop {
        let item = {
            let mut rx = queue.lock().await;
            rx.recv().await
        };
        let node_id = match item {
            Some(ReadyItem::Node(id)) => id,
            Some(ReadyItem::Stop) | None => break,
        };
        let Ok(_permit) = run.permits.acquire().await else {
            break;
        };
        run.process(&node_id).await;
    }
    debug!(job_id = %run.job_id, worker_id, "engine worker finished");
}
