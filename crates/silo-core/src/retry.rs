//! Bounded, capped-exponential retry backoff with deterministic jitter.
//!
//! Resolves `SPEC_FULL.md`'s Open Question #1 (directory-refresh retry
//! backoff schedule) with a concrete, testable policy rather than a
//! bare tunable.
//!
//! Grounded in the teacher's `governance::retry::adaptive::compute`
//! jitter discipline: a deterministic SplitMix64 mix rather than a
//! `rand`-seeded source, so retries are reproducible under test — the
//! teacher's own stated reason for the same choice. This is a plain
//! capped exponential schedule rather than the teacher's RTT/backlog-
//! adaptive one: spec.md only calls for "retry after refreshing
//! membership", not congestion-aware pacing, so the adaptive inputs
//! (backlog, RTT) would have no caller to supply them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Capped exponential backoff: `base_delay_ms * 2^attempt`, clamped to
/// `max_delay_ms`, with deterministic jitter applied on top.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Backoff duration before retry attempt `attempt` (1-based).
    /// `salt` varies the deterministic jitter across call sites that
    /// land on the same attempt number and base delay, so concurrent
    /// retries for different grains don't all wake up in lockstep.
    pub fn backoff_for(&self, attempt: u32, salt: u64) -> Duration {
        let shift = attempt.min(20);
        let exp_ms = self.base_delay_ms.saturating_mul(1u64 << shift);
        let capped_ms = exp_ms.clamp(self.base_delay_ms, self.max_delay_ms);
        let jitter = jitter_factor(salt ^ attempt as u64);
        Duration::from_millis(((capped_ms as f64) * jitter) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 50,
            max_delay_ms: 2_000,
            max_attempts: 5,
        }
    }
}

const JITTER_RANGE: f64 = 0.2;

fn jitter_factor(seed: u64) -> f64 {
    let mixed = mix64(seed);
    let mantissa = (mixed >> 11) as f64;
    let unit = mantissa / ((1u64 << 53) as f64);
    1.0 + (unit * 2.0 - 1.0) * JITTER_RANGE
}

fn mix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_then_saturates_at_max_delay() {
        let policy = RetryPolicy {
            base_delay_ms: 10,
            max_delay_ms: 100,
            max_attempts: 5,
        };
        let early = policy.backoff_for(1, 0);
        let late = policy.backoff_for(10, 0);
        assert!(early.as_millis() <= 25);
        assert!(late.as_millis() <= 120);
    }

    #[test]
    fn jitter_is_deterministic_for_the_same_inputs() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(2, 7), policy.backoff_for(2, 7));
    }

    #[test]
    fn different_salts_diverge() {
        let policy = RetryPolicy::default();
        assert_ne!(policy.backoff_for(2, 7), policy.backoff_for(2, 8));
    }
}
