// src/orchestrator.rs

//! Wiring of the orchestration components.
//!
//! [`Orchestrator::new`] builds every component over one store, one clock and
//! one immutable config. [`Orchestrator::start`] spawns the dispatch loop,
//! the timeout monitor and the recovery processor; [`Orchestrator::shutdown`]
//! stops them.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::clock::{SharedClock, system_clock};
use crate::config::OrchestratorConfig;
use crate::engine::ExecutionEngine;
use crate::errors::{OrchestratorError, Result};
use crate::recovery::RecoveryProcessor;
use crate::retry::RetryManager;
use crate::runner::HandlerSet;
use crate::scheduler::{DispatchQueue, DispatchReceiver, JobScheduler, LiveExecutions};
use crate::service::{AccountDirectory, OrchestratorService};
use crate::store::{DocumentStore, MemoryStore, Repository};
use crate::tracker::StateTracker;

#[derive(Debug)]
pub struct Orchestrator {
    config: Arc<OrchestratorConfig>,
    repo: Repository,
    tracker: Arc<StateTracker>,
    retry: Arc<RetryManager>,
    recovery: Arc<RecoveryProcessor>,
    scheduler: Arc<JobScheduler>,
    dispatch_rx: Mutex<Option<DispatchReceiver>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn DocumentStore>,
        clock: SharedClock,
        handlers: HandlerSet,
    ) -> Self {
        let config = Arc::new(config);
        let repo = Repository::new(Arc::clone(&store));
        let tracker = Arc::new(StateTracker::from_config(&config, store, Arc::clone(&clock)));
        let engine = Arc::new(ExecutionEngine::from_config(
            &config,
            Arc::clone(&tracker),
            handlers,
            Arc::clone(&clock),
        ));
        let (queue, dispatch_rx) = DispatchQueue::channel(config.scheduler.queue_capacity);
        let executions = Arc::new(LiveExecutions::new());

        let retry = Arc::new(RetryManager::new(
            Arc::clone(&config),
            repo.clone(),
            queue.clone(),
            Arc::clone(&clock),
        ));
        let recovery = Arc::new(RecoveryProcessor::new(
            Arc::clone(&config),
            repo.clone(),
            Arc::clone(&tracker),
            queue.clone(),
            Arc::clone(&executions),
            Arc::clone(&clock),
        ));
        let scheduler = Arc::new(JobScheduler::new(
            Arc::clone(&config),
            repo.clone(),
            engine,
            Arc::clone(&retry),
            Arc::clone(&recovery),
            queue,
            executions,
            clock,
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            repo,
            tracker,
            retry,
            recovery,
            scheduler,
            dispatch_rx: Mutex::new(Some(dispatch_rx)),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// In-memory store, system clock.
    pub fn in_memory(config: OrchestratorConfig, handlers: HandlerSet) -> Self {
        Self::new(config, Arc::new(MemoryStore::new()), system_clock(), handlers)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn tracker(&self) -> &Arc<StateTracker> {
        &self.tracker
    }

    pub fn retry(&self) -> &Arc<RetryManager> {
        &self.retry
    }

    pub fn recovery(&self) -> &Arc<RecoveryProcessor> {
        &self.recovery
    }

    pub fn scheduler(&self) -> &Arc<JobScheduler> {
        &self.scheduler
    }

    /// Request facade over this orchestrator's scheduler and store.
    pub fn service(&self, accounts: Arc<dyn AccountDirectory>) -> OrchestratorService {
        OrchestratorService::new(Arc::clone(&self.scheduler), self.repo.clone(), accounts)
    }

    /// Spawn the background loops. Fails if already started.
    pub fn start(&self) -> Result<()> {
        let rx = self
            .dispatch_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| OrchestratorError::Conflict("orchestrator already started".to_string()))?;

        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.push(tokio::spawn(
            Arc::clone(&self.scheduler).run_dispatch(rx, self.shutdown_tx.subscribe()),
        ));
        tasks.push(tokio::spawn(
            Arc::clone(&self.scheduler).run_monitor(self.shutdown_tx.subscribe()),
        ));
        tasks.push(tokio::spawn(
            Arc::clone(&self.recovery).run(self.shutdown_tx.subscribe()),
        ));
        info!(
            max_parallel_nodes = self.config.engine.max_parallel_nodes,
            pool_capacity = self.config.resources.pool_capacity,
            "orchestrator started"
        );
        Ok(())
    }

    /// Cancel running executions and stop the background loops.
    pub async fn shutdown(&self) {
        self.scheduler.cancel_all();
        self.shutdown_tx.send_replace(true);
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }
        info!("orchestrator stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn background_loops_are_send() {
        let orch = Orchestrator::in_memory(OrchestratorConfig::default(), HandlerSet::default());
        let (_tx, rx) = watch::channel(false);
        let (_queue, dispatch_rx) = DispatchQueue::channel(4);

        assert_send(&Arc::clone(&orch.scheduler).run_dispatch(dispatch_rx, rx.clone()));
        assert_send(&Arc::clone(&orch.scheduler).run_monitor(rx.clone()));
        assert_send(&Arc::clone(&orch.recovery).run(rx));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn start_twice_conflicts_and_shutdown_joins_the_loops() {
        let orch = Orchestrator::in_memory(OrchestratorConfig::default(), HandlerSet::default());
        orch.start().unwrap();
        assert!(matches!(orch.start(), Err(OrchestratorError::Conflict(_))));

        tokio::time::timeout(Duration::from_secs(5), orch.shutdown())
            .await
            .expect("loops stop on shutdown");
        assert!(orch.tasks.lock().unwrap().is_empty());
    }
}
