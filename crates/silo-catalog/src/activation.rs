//! Activation state machine — spec §3 "Activation" and §4.5 invariants.

use std::sync::atomic::{AtomicU64, Ordering};

use silo_core::prelude::{ActivationId, GrainId, MonotonicTimePoint};

/// One-way transitions only: Creating < Activating < Valid <
/// Deactivating < Invalid (spec §4.5 "state monotonicity").
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ActivationState {
    Creating = 0,
    Activating = 1,
    Valid = 2,
    Deactivating = 3,
    Invalid = 4,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("illegal activation state transition from {from:?} to {to:?}")]
pub struct IllegalTransition {
    pub from: ActivationState,
    pub to: ActivationState,
}

/// Bookkeeping for one in-memory activation. `last_activity` and
/// `collection_ticket` are read by the [`crate::collector::ActivationCollector`];
/// everything else is catalog-owned.
pub struct ActivationRecord {
    pub grain_id: GrainId,
    pub activation_id: ActivationId,
    state: parking_lot::Mutex<ActivationState>,
    last_activity_ms: AtomicU64,
    pub collection_ticket: parking_lot::Mutex<Option<u64>>,
    pub keep_alive: std::sync::atomic::AtomicBool,
    pub pending_calls: AtomicU64,
}

impl ActivationRecord {
    pub fn new(grain_id: GrainId, activation_id: ActivationId, now: MonotonicTimePoint) -> Self {
        Self {
            grain_id,
            activation_id,
            state: parking_lot::Mutex::new(ActivationState::Creating),
            last_activity_ms: AtomicU64::new(now.0),
            collection_ticket: parking_lot::Mutex::new(None),
            keep_alive: std::sync::atomic::AtomicBool::new(false),
            pending_calls: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> ActivationState {
        *self.state.lock()
    }

    /// Enforces the one-way ordering; called under the catalog's
    /// per-grain mutex so no two transitions race.
    pub fn transition(&self, to: ActivationState) -> Result<(), IllegalTransition> {
        let mut guard = self.state.lock();
        if to as u8 <= *guard as u8 {
            return Err(IllegalTransition { from: *guard, to });
        }
        *guard = to;
        Ok(())
    }

    pub fn touch(&self, now: MonotonicTimePoint) {
        self.last_activity_ms.store(now.0, Ordering::Relaxed);
    }

    pub fn idle_since(&self, now: MonotonicTimePoint) -> u64 {
        now.0.saturating_sub(self.last_activity_ms.load(Ordering::Relaxed))
    }

    pub fn last_activity(&self) -> u64 {
        self.last_activity_ms.load(Ordering::Relaxed)
    }

    pub fn is_idle(&self, now: MonotonicTimePoint, age_limit_ms: u64) -> bool {
        self.pending_calls.load(Ordering::Relaxed) == 0
            && !self.keep_alive.load(Ordering::Relaxed)
            && self.idle_since(now) >= age_limit_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grain() -> GrainId {
        GrainId::new("Thermostat", "roomA")
    }

    #[test]
    fn transitions_are_one_way() {
        let rec = ActivationRecord::new(grain(), ActivationId(1), MonotonicTimePoint(0));
        rec.transition(ActivationState::Activating).unwrap();
        rec.transition(ActivationState::Valid).unwrap();
        let err = rec.transition(ActivationState::Activating).unwrap_err();
        assert_eq!(err.from, ActivationState::Valid);
    }

    #[test]
    fn idle_detection_respects_pending_calls_and_keep_alive() {
        let rec = ActivationRecord::new(grain(), ActivationId(1), MonotonicTimePoint(0));
        rec.pending_calls.store(1, Ordering::Relaxed);
        assert!(!rec.is_idle(MonotonicTimePoint(1_000_000), 10));
        rec.pending_calls.store(0, Ordering::Relaxed);
        rec.keep_alive.store(true, Ordering::Relaxed);
        assert!(!rec.is_idle(MonotonicTimePoint(1_000_000), 10));
        rec.keep_alive.store(false, Ordering::Relaxed);
        assert!(rec.is_idle(MonotonicTimePoint(1_000_000), 10));
    }
}
