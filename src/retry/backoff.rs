// src/retry/backoff.rs

//! Retry delay computation.

use std::time::Duration;

use rand::Rng;

use crate::model::{RetryPolicy, RetryStrategy};

/// `fib(1) = fib(2) = 1`, saturating.
fn fib(n: u32) -> u64 {
    let (mut a, mut b) = (0u64, 1u64);
    for _ in 0..n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    a
}

/// Delay before retry number `attempt` (1-based), without jitter, capped at
/// the policy's `max_delay_ms`.
pub fn nominal_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let attempt = attempt.max(1);
    let base = policy.base_delay_ms;
    let cap = policy.max_delay_ms;

    let ms = match policy.strategy {
        RetryStrategy::None | RetryStrategy::Immediate => 0,
        RetryStrategy::Linear => base.saturating_mul(u64::from(attempt)),
        RetryStrategy::Exponential => {
            let raw = base as f64 * policy.backoff_multiplier.powi(attempt as i32 - 1);
            if raw.is_finite() && raw < cap as f64 {
                raw.round() as u64
            } else {
                cap
            }
        }
        RetryStrategy::Fibonacci => base.saturating_mul(fib(attempt)),
        RetryStrategy::Custom => {
            let idx = (attempt as usize - 1).min(policy.custom_delays_ms.len().saturating_sub(1));
            policy.custom_delays_ms.get(idx).copied().unwrap_or(base)
        }
        RetryStrategy::CircuitBreaker => base,
    };

    Duration::from_millis(ms.min(cap))
}

/// Nominal delay perturbed by uniform jitter of `±jitter_ratio` of itself,
/// floored at zero and never above `max_delay_ms`.
pub fn calculate_delay<R: Rng + ?Sized>(policy: &RetryPolicy, attempt: u32, rng: &mut R) -> Duration {
    let nominal = nominal_delay(policy, attempt);
    if policy.jitter_ratio <= 0.0 || nominal.is_zero() {
        return nominal;
    }
    let nominal_ms = nominal.as_millis() as f64;
    let spread = nominal_ms * policy.jitter_ratio;
    let jittered = nominal_ms + rng.gen_range(-spread..=spread);
    let ms = jittered.max(0.0).min(policy.max_delay_ms as f64);
    Duration::from_millis(ms.round() as u64)
}
