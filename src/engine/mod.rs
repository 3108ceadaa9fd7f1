// src/engine/mod.rs

//! DAG execution engine.
//!
//! For one job the engine:
//! - builds a [`DagPlan`] from the job's node records and rejects cycles and
//!   dangling dependencies before anything runs,
//! - seeds the ready queue with root nodes,
//! - runs a bounded pool of workers that pull ready nodes, execute them via
//!   the [`NodeRunner`](crate::runner::NodeRunner) and rescan for newly
//!   ready nodes after each resolution,
//! - watches for stalls, critical failures and cancellation, and
//! - aggregates the job outcome into an [`ExecutionReport`].
//!
//! Every node transition is reported to the
//! [`StateTracker`](crate::tracker::StateTracker) before the worker moves on.

pub mod graph;
pub mod report;
mod run;
mod state;

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::{Mutex as AsyncMutex, Semaphore, mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::clock::SharedClock;
use crate::config::{EngineSection, OrchestratorConfig};
use crate::errors::{OrchestratorError, Result};
use crate::model::{Job, JobStatus, Node};
use crate::runner::{HandlerSet, JobContext, NodeRunner};
use crate::tracker::StateTracker;
use crate::types::{JobId, Metadata, NodeId};

pub use graph::DagPlan;
pub use report::{ExecutionReport, NodeRun};

use run::{ReadyItem, Run, worker};
use state::RunState;

/// Cooperative cancellation for one execution. Clones share the signal.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress notifications emitted while a graph runs.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    NodeStarted {
        job_id: JobId,
        node_id: NodeId,
        at: DateTime<Utc>,
    },
    NodeResolved { job_id: JobId, run: NodeRun },
}

pub type EngineObserver = mpsc::UnboundedSender<EngineEvent>;

#[derive(Debug)]
pub struct ExecutionEngine {
    settings: EngineSection,
    tracker: Arc<StateTracker>,
    runner: Arc<NodeRunner>,
    clock: SharedClock,
}

impl ExecutionEngine {
    pub fn new(
        settings: EngineSection,
        tracker: Arc<StateTracker>,
        runner: Arc<NodeRunner>,
        clock: SharedClock,
    ) -> Self {
        Self {
            settings,
            tracker,
            runner,
            clock,
        }
    }

    /// Engine with a runner over `handlers`, using the config's defaults.
    pub fn from_config(
        cfg: &OrchestratorConfig,
        tracker: Arc<StateTracker>,
        handlers: HandlerSet,
        clock: SharedClock,
    ) -> Self {
        let runner = Arc::new(NodeRunner::new(
            handlers,
            Arc::clone(&tracker),
            cfg.engine.default_node_timeout(),
        ));
        Self::new(cfg.engine.clone(), tracker, runner, clock)
    }

    pub fn tracker(&self) -> &Arc<StateTracker> {
        &self.tracker
    }

    /// Run `job`'s graph to completion, stall, halt or cancellation.
    ///
    /// Ordinary node failures yield an `Ok` report with a `failed` outcome.
    /// Structural problems, critical-node failures and stalls are errors.
    pub async fn execute(
        &self,
        job: &Job,
        nodes: Vec<Node>,
        cancel: &CancelHandle,
        observer: Option<EngineObserver>,
    ) -> Result<ExecutionReport> {
        if nodes.is_empty() {
            return Err(OrchestratorError::Validation(format!(
                "job {} has no nodes to execute",
                job.job_id
            )));
        }
        let plan = DagPlan::build(&job.job_id, &nodes)?;
        let ids: Vec<NodeId> = plan.node_ids().cloned().collect();
        let graph_id = self
            .tracker
            .initialize_graph(&job.job_id, &ids, &plan.dependency_map());
        let started_at = self.clock.now();

        let workers = self.settings.max_parallel_nodes.min(plan.len()).max(1);
        info!(
            job_id = %job.job_id,
            graph_id = %graph_id,
            nodes = plan.len(),
            workers,
            "starting graph execution"
        );

        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();
        let (stop_tx, _stop_rx) = watch::channel(false);

        let run = Arc::new(Run {
            job_id: job.job_id.clone(),
            ctx: JobContext::for_job(job),
            nodes: nodes
                .into_iter()
                .map(|n| (n.node_id.clone(), n))
                .collect::<HashMap<_, _>>(),
            state: Mutex::new(RunState::new(&plan)),
            plan,
            tracker: Arc::clone(&self.tracker),
            runner: Arc::clone(&self.runner),
            clock: Arc::clone(&self.clock),
            cascade: self.settings.cascade_failures,
            seq: AtomicU64::new(0),
            permits: Semaphore::new(self.settings.max_parallel_nodes.max(1)),
            ready_tx,
            done_tx,
            stop_tx,
            observer,
        });

        {
            let mut st = run.lock();
            run.schedule_ready(&mut st);
        }

        let queue = Arc::new(AsyncMutex::new(ready_rx));
        let handles: Vec<_> = (0..workers)
            .map(|i| tokio::spawn(worker(Arc::clone(&run), Arc::clone(&queue), i)))
            .collect();

        let mut cancel_rx = cancel.subscribe();
        let mut cancelled = false;
        let mut stall: Option<OrchestratorError> = None;
        let mut poll = tokio::time::interval(self.settings.stall_poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if cancel.is_cancelled() && !cancelled {
                cancelled = true;
                self.cancel_run(&run);
            }
            {
                let st = run.lock();
                if st.all_resolved() || (st.stopping && st.in_flight == 0) {
                    break;
                }
            }
            tokio::select! {
                Some(_) = done_rx.recv() => {}
                _ = poll.tick() => {
                    if let Some(err) = run.check_stall() {
                        stall = Some(err);
                        break;
                    }
                }
                _ = cancel_rx.wait_for(|c| *c), if !cancelled => {}
            }
        }

        {
            let mut st = run.lock();
            run.stop(&mut st);
        }
        for _ in 0..workers {
            let _ = run.ready_tx.send(ReadyItem::Stop);
        }
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(job_id = %job.job_id, error = %e, "engine worker ended abnormally");
            }
        }

        let finished_at = self.clock.now();
        let (halt, runs, counters, outcome) = {
            let mut st = run.lock();
            (st.halt.take(), st.runs.clone(), st.counters(), st.outcome())
        };

        if let Some(err) = stall.or(halt) {
            let mut metadata = Metadata::new();
            metadata.insert("classification".to_string(), err.classify().to_string());
            self.tracker
                .record_failure(&job.job_id, &err.to_string(), metadata)?;
            self.tracker
                .finalize_execution(&job.job_id, JobStatus::Failed, None)?;
            warn!(job_id = %job.job_id, error = %err, "graph execution stopped");
            return Err(err);
        }

        self.tracker.finalize_execution(
            &job.job_id,
            outcome,
            Some(json!({
                "completed": counters.completed,
                "skipped": counters.skipped,
                "failed": counters.failed,
                "cancelled": counters.cancelled,
            })),
        )?;

        info!(
            job_id = %job.job_id,
            outcome = %outcome,
            completed = counters.completed,
            failed = counters.failed,
            "graph execution finished"
        );

        Ok(ExecutionReport {
            job_id: job.job_id.clone(),
            graph_id,
            outcome,
            counters,
            runs,
            started_at,
            finished_at,
        })
    }

    fn cancel_run(&self, run: &Run) {
        info!(job_id = %run.job_id, "cancellation requested");
        let mut st = run.lock();
        run.stop(&mut st);
        run.cancel_unstarted(&mut st, "execution cancelled");
    }
}
