// src/retry/circuit.rs

//! Circuit breakers gating retries.
//!
//! A breaker opens after `failure_threshold` consecutive failures, moves to
//! half-open once `open_timeout_ms` has passed (evaluated lazily against the
//! clock), and closes after `success_threshold` successes while half-open.
//! A failure while half-open reopens it.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::clock::SharedClock;
use crate::model::{CircuitBreakerSettings, RetryPolicy};
use crate::types::CircuitScope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        })
    }
}

#[derive(Debug)]
struct Breaker {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    opened_at: Option<DateTime<Utc>>,
}

impl Breaker {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            half_open_successes: 0,
            opened_at: None,
        }
    }

    fn refresh(&mut self, settings: &CircuitBreakerSettings, now: DateTime<Utc>) {
        if self.state != CircuitState::Open {
            return;
        }
        let timeout = Duration::milliseconds(settings.open_timeout_ms as i64);
        if let Some(opened) = self.opened_at {
            if now - opened >= timeout {
                self.state = CircuitState::HalfOpen;
                self.half_open_successes = 0;
            }
        }
    }

    fn open(&mut self, now: DateTime<Utc>) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.half_open_successes = 0;
    }
}

/// Breakers for all policies. One lock guards every breaker, since many jobs
/// report outcomes concurrently.
#[derive(Debug)]
pub struct CircuitBreakers {
    scope: CircuitScope,
    clock: SharedClock,
    breakers: Mutex<HashMap<String, Breaker>>,
}

impl CircuitBreakers {
    pub fn new(scope: CircuitScope, clock: SharedClock) -> Self {
        Self {
            scope,
            clock,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    fn key(&self, policy_id: &str, job_id: &str) -> String {
        match self.scope {
            CircuitScope::Policy => policy_id.to_string(),
            CircuitScope::Job => format!("{policy_id}/{job_id}"),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Breaker>> {
        self.breakers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current state; policies without breaker settings are always closed.
    pub fn state(&self, policy: &RetryPolicy, job_id: &str) -> CircuitState {
        let Some(settings) = &policy.circuit_breaker else {
            return CircuitState::Closed;
        };
        let now = self.clock.now();
        let mut breakers = self.lock();
        match breakers.get_mut(&self.key(&policy.policy_id, job_id)) {
            Some(breaker) => {
                breaker.refresh(settings, now);
                breaker.state
            }
            None => CircuitState::Closed,
        }
    }

    pub fn record_failure(&self, policy: &RetryPolicy, job_id: &str) -> CircuitState {
        let Some(settings) = &policy.circuit_breaker else {
            return CircuitState::Closed;
        };
        let now = self.clock.now();
        let key = self.key(&policy.policy_id, job_id);
        let mut breakers = self.lock();
        let breaker = breakers.entry(key.clone()).or_insert_with(Breaker::new);
        breaker.refresh(settings, now);

        match breaker.state {
            CircuitState::Closed => {
                breaker.consecutive_failures += 1;
                if breaker.consecutive_failures >= settings.failure_threshold {
                    breaker.open(now);
                    warn!(
                        breaker = %key,
                        failures = breaker.consecutive_failures,
                        "circuit opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                breaker.open(now);
                warn!(breaker = %key, "circuit reopened from half-open");
            }
            CircuitState::Open => {}
        }
        breaker.state
    }

    pub fn record_success(&self, policy: &RetryPolicy, job_id: &str) -> CircuitState {
        let Some(settings) = &policy.circuit_breaker else {
            return CircuitState::Closed;
        };
        let now = self.clock.now();
        let key = self.key(&policy.policy_id, job_id);
        let mut breakers = self.lock();
        let breaker = breakers.entry(key.clone()).or_insert_with(Breaker::new);
        breaker.refresh(settings, now);

        match breaker.state {
            CircuitState::Closed => breaker.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                breaker.half_open_successes += 1;
                if breaker.half_open_successes >= settings.success_threshold {
                    *breaker = Breaker::new();
                    info!(breaker = %key, "circuit closed");
                }
            }
            CircuitState::Open => {}
        }
        breaker.state
    }
}
