// src/model/policy.rs

//! Retry policy records.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{OrchestratorError, Result};
use crate::model::job::JobType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    None,
    Immediate,
    Linear,
    Exponential,
    Fibonacci,
    Custom,
    CircuitBreaker,
}

impl fmt::Display for RetryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RetryStrategy::None => "none",
            RetryStrategy::Immediate => "immediate",
            RetryStrategy::Linear => "linear",
            RetryStrategy::Exponential => "exponential",
            RetryStrategy::Fibonacci => "fibonacci",
            RetryStrategy::Custom => "custom",
            RetryStrategy::CircuitBreaker => "circuit_breaker",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Successes in half-open needed to close it again.
    pub success_threshold: u32,
    /// How long the circuit stays open before probing (half-open).
    pub open_timeout_ms: u64,
}

/// A retry policy. Policies are replaced wholesale (with a bumped
/// `version`), never edited in place; in-flight computations keep the
/// version they started with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub policy_id: String,
    /// Applies to jobs of this type when they name no policy themselves.
    #[serde(default)]
    pub job_type: Option<JobType>,
    pub strategy: RetryStrategy,
    pub max_attempts: u32,
    #[serde(default)]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub backoff_multiplier: f64,
    /// Uniform jitter as a fraction of the computed delay (0.1 = ±10%).
    #[serde(default)]
    pub jitter_ratio: f64,
    /// Delays for the `custom` strategy; the last entry repeats.
    #[serde(default)]
    pub custom_delays_ms: Vec<u64>,
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerSettings>,
    /// Case-insensitive patterns; if non-empty the error must match one.
    #[serde(default)]
    pub retryable_errors: Vec<String>,
    /// Case-insensitive patterns that always refuse a retry.
    #[serde(default)]
    pub non_retryable_errors: Vec<String>,
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_max_delay_ms() -> u64 {
    300_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_version() -> u32 {
    1
}

impl RetryPolicy {
    /// Plain policy with the given strategy and sensible defaults.
    pub fn new(policy_id: &str, strategy: RetryStrategy, max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            policy_id: policy_id.to_string(),
            job_type: None,
            strategy,
            max_attempts,
            base_delay_ms,
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_multiplier(),
            jitter_ratio: 0.0,
            custom_delays_ms: Vec::new(),
            circuit_breaker: None,
            retryable_errors: Vec::new(),
            non_retryable_errors: Vec::new(),
            version: default_version(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(OrchestratorError::RetryPolicy(msg));
        if self.policy_id.trim().is_empty() {
            return fail("policy_id must not be empty".to_string());
        }
        if self.strategy == RetryStrategy::Exponential && self.backoff_multiplier <= 1.0 {
            return fail(format!(
                "policy '{}': exponential backoff needs multiplier > 1 (got {})",
                self.policy_id, self.backoff_multiplier
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return fail(format!(
                "policy '{}': max_delay_ms {} is below base_delay_ms {}",
                self.policy_id, self.max_delay_ms, self.base_delay_ms
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter_ratio) {
            return fail(format!(
                "policy '{}': jitter_ratio must be within 0..=1",
                self.policy_id
            ));
        }
        if self.strategy == RetryStrategy::Custom && self.custom_delays_ms.is_empty() {
            return fail(format!(
                "policy '{}': custom strategy needs custom_delays_ms",
                self.policy_id
            ));
        }
        if self.strategy == RetryStrategy::CircuitBreaker && self.circuit_breaker.is_none() {
            return fail(format!(
                "policy '{}': circuit_breaker strategy needs thresholds",
                self.policy_id
            ));
        }
        if let Some(cb) = &self.circuit_breaker {
            if cb.failure_threshold == 0 || cb.success_threshold == 0 {
                return fail(format!(
                    "policy '{}': circuit thresholds must be >= 1",
                    self.policy_id
                ));
            }
        }
        for pattern in self.retryable_errors.iter().chain(&self.non_retryable_errors) {
            if let Err(e) = regex::RegexBuilder::new(pattern).case_insensitive(true).build() {
                return fail(format!(
                    "policy '{}': invalid error pattern '{pattern}': {e}",
                    self.policy_id
                ));
            }
        }
        Ok(())
    }
}
