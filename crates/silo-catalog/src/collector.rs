//! Activation collector — spec §4.4: a bucketed time-wheel keyed by
//! quantized `collection_ticket`. Grounded in the teacher's
//! `dashmap`-per-shard pattern (already used for [`crate::catalog`]'s
//! activation table) applied here to the bucket map instead of a
//! hand-rolled timer wheel crate.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use silo_core::prelude::{ActivationId, MonotonicTimePoint};

fn next_quantum(at_ms: u64, quantum_ms: u64) -> u64 {
    if quantum_ms == 0 {
        return at_ms;
    }
    ((at_ms / quantum_ms) + 1) * quantum_ms
}

/// Outcome of [`ActivationCollector::scan_stale`] for one activation:
/// the collector itself never deactivates anything (spec §4.4), it
/// only decides whether a bucket's member is still a collection
/// candidate once its ticket has fired.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanOutcome {
    Collect,
    Rescheduled { new_ticket: u64 },
    StillScheduled,
}

/// One bucket's membership: a plain set is enough since `TryCancel`
/// and `ScanStale` both operate under the bucket's own shard lock from
/// `DashMap`, resolving the sweep/reschedule race spec §5 calls out.
type Bucket = BTreeSet<ActivationId>;

pub struct ActivationCollector {
    quantum_ms: u64,
    buckets: DashMap<u64, Bucket>,
    /// Reverse index so `TryCancel`/`TryReschedule` can find an
    /// activation's current bucket without scanning every bucket.
    tickets: DashMap<ActivationId, u64>,
}

impl ActivationCollector {
    pub fn new(quantum_ms: u64) -> Self {
        Self {
            quantum_ms,
            buckets: DashMap::new(),
            tickets: DashMap::new(),
        }
    }

    /// Spec §4.4 `Schedule`: compute `ticket = next_quantum(now +
    /// age_limit)`, insert into that bucket.
    pub fn schedule(&self, activation: ActivationId, now: MonotonicTimePoint, age_limit_ms: u64) -> u64 {
        let ticket = next_quantum(now.0 + age_limit_ms, self.quantum_ms);
        self.buckets.entry(ticket).or_default().insert(activation);
        self.tickets.insert(activation, ticket);
        ticket
    }

    /// Spec §4.4 `TryCancel`: remove from its bucket if the ticket has
    /// not yet fired (`ticket > now`). Returns `false` if the ticket
    /// already fired or the activation was never scheduled — the
    /// caller must not assume the activation is still safe from
    /// collection in that case.
    pub fn try_cancel(&self, activation: ActivationId, now: MonotonicTimePoint) -> bool {
        let Some((_, ticket)) = self.tickets.remove(&activation) else {
            return false;
        };
        if ticket <= now.0 {
            // Already fired (or firing concurrently); put the reverse
            // index entry back so a racing scan can still find it.
            self.tickets.insert(activation, ticket);
            return false;
        }
        if let Some(mut bucket) = self.buckets.get_mut(&ticket) {
            bucket.remove(&activation);
        }
        true
    }

    /// Spec §4.4 `TryReschedule`: atomically move to a later bucket, or
    /// fail if the current ticket has already fired.
    pub fn try_reschedule(&self, activation: ActivationId, now: MonotonicTimePoint, age_limit_ms: u64) -> Option<u64> {
        let current = *self.tickets.get(&activation)?;
        if current <= now.0 {
            return None;
        }
        if let Some(mut bucket) = self.buckets.get_mut(&current) {
            bucket.remove(&activation);
        }
        let new_ticket = self.schedule(activation, now, age_limit_ms);
        Some(new_ticket)
    }

    /// Spec §4.4 `ScanStale`: pop every bucket whose ticket has fired.
    /// For each member, the caller supplies a predicate deciding
    /// whether the activation is genuinely idle; activations that are
    /// not are rescheduled rather than collected.
    pub fn scan_stale<F>(&self, now: MonotonicTimePoint, age_limit_ms: impl Fn(ActivationId) -> u64, mut is_idle: F) -> Vec<(ActivationId, ScanOutcome)>
    where
        F: FnMut(ActivationId) -> bool,
    {
        let fired: Vec<u64> = self
            .buckets
            .iter()
            .filter(|kv| *kv.key() <= now.0)
            .map(|kv| *kv.key())
            .collect();

        let mut results = Vec::new();
        for ticket in fired {
            let Some((_, members)) = self.buckets.remove(&ticket) else {
                continue;
            };
            for activation in members {
                self.tickets.remove(&activation);
                if is_idle(activation) {
                    results.push((activation, ScanOutcome::Collect));
                } else {
                    let limit = age_limit_ms(activation);
                    let new_ticket = self.schedule(activation, now, limit);
                    results.push((activation, ScanOutcome::Rescheduled { new_ticket }));
                }
            }
        }
        results
    }

    pub fn is_scheduled(&self, activation: ActivationId) -> bool {
        self.tickets.contains_key(&activation)
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

pub fn shared(quantum_ms: u64) -> Arc<ActivationCollector> {
    Arc::new(ActivationCollector::new(quantum_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn schedule_then_try_cancel_before_firing_succeeds() {
        let collector = ActivationCollector::new(1_000);
        let activation = ActivationId(1);
        collector.schedule(activation, MonotonicTimePoint(0), 5_000);
        assert!(collector.try_cancel(activation, MonotonicTimePoint(100)));
        assert!(!collector.is_scheduled(activation));
    }

    #[test]
    fn scan_stale_collects_idle_and_reschedules_active() {
        let collector = ActivationCollector::new(100);
        let idle = ActivationId(1);
        let active = ActivationId(2);
        collector.schedule(idle, MonotonicTimePoint(0), 100);
        collector.schedule(active, MonotonicTimePoint(0), 100);

        let outcomes = collector.scan_stale(MonotonicTimePoint(500), |_| 100, |id| id == idle);
        let mut by_id: std::collections::HashMap<_, _> = outcomes.into_iter().collect();
        assert_eq!(by_id.remove(&idle), Some(ScanOutcome::Collect));
        assert!(matches!(by_id.remove(&active), Some(ScanOutcome::Rescheduled { .. })));
    }

    #[test]
    fn each_activation_occupies_at_most_one_bucket() {
        let collector = ActivationCollector::new(50);
        let activation = ActivationId(7);
        collector.schedule(activation, MonotonicTimePoint(0), 50);
        collector.try_reschedule(activation, MonotonicTimePoint(10), 50);
        let scheduled_buckets = collector
            .buckets
            .iter()
            .filter(|kv| kv.value().contains(&activation))
            .count();
        assert_eq!(scheduled_buckets, 1);
    }

    proptest::proptest! {
        /// spec §4.4: a scheduled ticket always lies strictly in the
        /// future and on a quantum boundary, for any deadline/quantum.
        #[test]
        fn scheduled_ticket_is_strictly_future_and_quantum_aligned(
            now in 0u64..10_000_000,
            age_limit_ms in 0u64..10_000_000,
            quantum_ms in 1u64..100_000,
        ) {
            let collector = ActivationCollector::new(quantum_ms);
            let activation = ActivationId(1);
            let ticket = collector.schedule(activation, MonotonicTimePoint(now), age_limit_ms);
            prop_assert!(ticket > now + age_limit_ms);
            prop_assert_eq!(ticket % quantum_ms, 0);
        }
    }
}
