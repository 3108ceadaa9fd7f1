// src/scheduler/resources.rs

//! Resource-allocation bookkeeping.
//!
//! Allocations are opaque records; the pool only counts them against its
//! capacity.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::config::ResourcesSection;
use crate::errors::{OrchestratorError, Result};
use crate::model::ResourceAllocation;
use crate::types::JobId;

#[derive(Debug)]
pub struct ResourcePool {
    settings: ResourcesSection,
    held: Mutex<HashMap<JobId, ResourceAllocation>>,
}

impl ResourcePool {
    pub fn new(settings: ResourcesSection) -> Self {
        Self {
            settings,
            held: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, ResourceAllocation>> {
        self.held.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Allocate for `job_id`. A job that already holds an allocation gets the
    /// same one back.
    pub fn allocate(&self, job_id: &str, now: DateTime<Utc>) -> Result<ResourceAllocation> {
        let mut held = self.lock();
        if let Some(existing) = held.get(job_id) {
            return Ok(existing.clone());
        }
        if held.len() >= self.settings.pool_capacity {
            return Err(OrchestratorError::ResourceExhausted {
                pool: self.settings.pool_name.clone(),
                capacity: self.settings.pool_capacity,
            });
        }

        let allocation = ResourceAllocation {
            allocation_id: Uuid::new_v4().to_string(),
            environment_id: self.settings.environment_id.clone(),
            pool_name: self.settings.pool_name.clone(),
            allocated_at: now,
            released_at: None,
        };
        held.insert(job_id.to_string(), allocation.clone());
        debug!(job_id, allocation_id = %allocation.allocation_id, in_use = held.len(), "resources allocated");
        Ok(allocation)
    }

    /// Release `job_id`'s allocation, returning it stamped with `released_at`.
    pub fn release(&self, job_id: &str, now: DateTime<Utc>) -> Option<ResourceAllocation> {
        let mut allocation = self.lock().remove(job_id)?;
        allocation.released_at = Some(now);
        debug!(job_id, allocation_id = %allocation.allocation_id, "resources released");
        Some(allocation)
    }

    pub fn in_use(&self) -> usize {
        self.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.settings.pool_capacity
    }
}
