// tests/property/backoff.rs

use std::time::Duration;

use proptest::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use suiteflow::model::{RetryPolicy, RetryStrategy};
use suiteflow::retry::{calculate_delay, nominal_delay};

fn growing_policy() -> impl Strategy<Value = RetryPolicy> {
    (
        prop_oneof![
            Just(RetryStrategy::Linear),
            Just(RetryStrategy::Exponential),
            Just(RetryStrategy::Fibonacci),
        ],
        1u64..5_000,
        1.1f64..4.0,
        0u64..600_000,
    )
        .prop_map(|(strategy, base, multiplier, headroom)| {
            let mut policy = RetryPolicy::new("prop", strategy, 10, base);
            policy.backoff_multiplier = multiplier;
            policy.max_delay_ms = base + headroom;
            policy
        })
}

proptest! {
    #[test]
    fn nominal_delay_never_shrinks_and_respects_the_cap(policy in growing_policy()) {
        let cap = Duration::from_millis(policy.max_delay_ms);
        let mut previous = Duration::ZERO;
        for attempt in 1..=16 {
            let delay = nominal_delay(&policy, attempt);
            prop_assert!(delay >= previous, "attempt {} shrank: {:?} < {:?}", attempt, delay, previous);
            prop_assert!(delay <= cap);
            previous = delay;
        }
    }

    #[test]
    fn jitter_stays_within_its_band(
        mut policy in growing_policy(),
        jitter in 0.0f64..=1.0,
        attempt in 1u32..10,
        seed in any::<u64>(),
    ) {
        policy.jitter_ratio = jitter;
        let nominal = nominal_delay(&policy, attempt).as_millis() as f64;
        let mut rng = StdRng::seed_from_u64(seed);
        let delay = calculate_delay(&policy, attempt, &mut rng).as_millis() as f64;

        let low = (nominal * (1.0 - jitter)).max(0.0);
        let high = (nominal * (1.0 + jitter)).min(policy.max_delay_ms as f64);
        prop_assert!(delay >= low.floor(), "{} below {}", delay, low);
        prop_assert!(delay <= high.ceil(), "{} above {}", delay, high);
    }
}
