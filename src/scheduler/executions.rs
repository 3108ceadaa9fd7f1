// src/scheduler/executions.rs

//! Registry of live engine executions, at most one per job.
//!
//! The scheduler registers each execution it spawns and holds the returned
//! [`ExecutionLease`] until the outcome has been applied to the job record.
//! The recovery processor uses [`LiveExecutions::stop`] to cancel a job's
//! execution and wait for it to wind down before touching the job.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::engine::CancelHandle;
use crate::types::JobId;

#[derive(Debug, Clone)]
struct Live {
    generation: u64,
    cancel: CancelHandle,
    finished: watch::Receiver<()>,
}

/// Result of [`LiveExecutions::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing was running for the job.
    Idle,
    /// The execution was cancelled and has finished.
    Stopped,
    /// The execution was cancelled but did not finish in time.
    StillRunning,
}

#[derive(Debug, Default)]
pub struct LiveExecutions {
    next_generation: AtomicU64,
    live: Mutex<HashMap<JobId, Live>>,
}

/// Held by the task driving an execution. Dropping it deregisters the
/// execution and wakes everyone waiting in [`LiveExecutions::stop`].
#[derive(Debug)]
pub struct ExecutionLease {
    registry: Arc<LiveExecutions>,
    job_id: JobId,
    generation: u64,
    _finished: watch::Sender<()>,
}

impl Drop for ExecutionLease {
    fn drop(&mut self) {
        let mut live = self.registry.lock();
        if live
            .get(&self.job_id)
            .is_some_and(|l| l.generation == self.generation)
        {
            live.remove(&self.job_id);
        }
    }
}

impl LiveExecutions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `cancel` as the live execution of `job_id`, replacing any stale
    /// entry.
    pub fn register(self: &Arc<Self>, job_id: &str, cancel: CancelHandle) -> ExecutionLease {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = watch::channel(());
        let previous = self.lock().insert(
            job_id.to_string(),
            Live {
                generation,
                cancel,
                finished: rx,
            },
        );
        if previous.is_some() {
            debug!(job_id, "previous execution still finishing; entry replaced");
        }
        ExecutionLease {
            registry: Arc::clone(self),
            job_id: job_id.to_string(),
            generation,
            _finished: tx,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn is_live(&self, job_id: &str) -> bool {
        self.lock().contains_key(job_id)
    }

    /// Signal the job's execution to stop. Returns `false` if none is live.
    pub fn cancel(&self, job_id: &str) -> bool {
        match self.lock().get(job_id) {
            Some(live) => {
                live.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for live in self.lock().values() {
            live.cancel.cancel();
        }
    }

    /// Cancel the job's execution and wait up to `limit` for its lease to be
    /// dropped.
    pub async fn stop(&self, job_id: &str, limit: Duration) -> StopOutcome {
        let Some(mut live) = self.lock().get(job_id).cloned() else {
            return StopOutcome::Idle;
        };
        live.cancel.cancel();
        debug!(job_id, "waiting for live execution to wind down");

        // `changed` only errors once the lease's sender is gone.
        match tokio::time::timeout(limit, async {
            while live.finished.changed().await.is_ok() {}
        })
        .await
        {
            Ok(()) => StopOutcome::Stopped,
            Err(_) => {
                warn!(job_id, limit_ms = limit.as_millis() as u64, "live execution did not stop in time");
                StopOutcome::StillRunning
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, Live>> {
        self.live.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_waits_for_the_lease_to_drop() {
        let registry = Arc::new(LiveExecutions::new());
        let cancel = CancelHandle::new();
        let lease = registry.register("j", cancel.clone());

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.stop("j", Duration::from_secs(5)).await })
        };
        while !cancel.is_cancelled() {
            tokio::task::yield_now().await;
        }
        assert!(!waiter.is_finished());

        drop(lease);
        assert_eq!(waiter.await.unwrap(), StopOutcome::Stopped);
        assert!(!registry.is_live("j"));
        assert_eq!(registry.stop("j", Duration::from_secs(5)).await, StopOutcome::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_gives_up_after_the_limit() {
        let registry = Arc::new(LiveExecutions::new());
        let _lease = registry.register("j", CancelHandle::new());
        let outcome = registry.stop("j", Duration::from_millis(100)).await;
        assert_eq!(outcome, StopOutcome::StillRunning);
        assert!(registry.is_live("j"));
    }

    #[test]
    fn stale_lease_does_not_remove_a_newer_execution() {
        let registry = Arc::new(LiveExecutions::new());
        let old = registry.register("j", CancelHandle::new());
        let _new = registry.register("j", CancelHandle::new());
        drop(old);
        assert!(registry.is_live("j"));
        assert_eq!(registry.len(), 1);
    }
}
