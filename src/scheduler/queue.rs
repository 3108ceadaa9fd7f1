// src/scheduler/queue.rs

//! Bounded queue of job ids due for dispatch.

use tokio::sync::mpsc;
use tracing::debug;

use crate::errors::{OrchestratorError, Result};
use crate::types::JobId;

/// Sending half of the scheduler's dispatch queue. The retry manager and the
/// recovery processor push requeued jobs through it.
#[derive(Debug, Clone)]
pub struct DispatchQueue {
    tx: mpsc::Sender<JobId>,
}

pub type DispatchReceiver = mpsc::Receiver<JobId>;

impl DispatchQueue {
    pub fn channel(capacity: usize) -> (Self, DispatchReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue a job; waits while the queue is full.
    pub async fn push(&self, job_id: &str) -> Result<()> {
        debug!(job_id, "enqueueing job for dispatch");
        self.tx
            .send(job_id.to_string())
            .await
            .map_err(|_| OrchestratorError::Other(anyhow::anyhow!("dispatch queue closed")))
    }
}
