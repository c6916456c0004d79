//! Grain Directory Partition — spec §4.2.
//!
//! Grounded in `spark-core/src/router/catalog.rs`'s `RouteCatalog`
//! (an enumerable, snapshot-observable registry) and
//! `spark-core/src/governance/audit/hasher.rs`'s discipline of bumping a
//! stable version stamp on every mutation.

use dashmap::DashMap;
use silo_core::prelude::{ActivationId, Etag, GrainId, SiloAddress};

/// One activation's slot within a grain-info entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActivationSlot {
    pub silo: SiloAddress,
    pub activation: ActivationId,
    pub registration_time: u64,
}

/// Insertion-ordered set of activations registered for one grain
/// identity, plus the etag that changed on the entry's last mutation
/// (spec §3 "Grain-info entry").
#[derive(Clone, Debug, Default)]
pub struct GrainInfoEntry {
    slots: Vec<ActivationSlot>,
    pub etag: Etag,
}

impl GrainInfoEntry {
    pub fn activations(&self) -> &[ActivationSlot] {
        &self.slots
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PartitionError {
    #[error("grain identity not found in this partition")]
    NotFound,
}

/// The result of `AddSingleActivation`: either the caller's registration
/// won, or another activation already holds the single-activation slot
/// and the caller must tear down its own (spec §4.2).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SingleActivationOutcome {
    Registered { etag: Etag },
    LostRace { winner: ActivationSlot },
}

/// The authoritative local slice of the registry, for grain identities
/// whose hash falls in this silo's partition. Single-writer from the
/// directory's perspective; `DashMap`'s per-shard locking gives the
/// "serialized per grain identity" guarantee spec §4.2 requires without
/// a crate-wide mutex.
#[derive(Default)]
pub struct GrainDirectoryPartition {
    entries: DashMap<GrainId, GrainInfoEntry>,
}

impl GrainDirectoryPartition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent for retries carrying the same `(grain, activation)`
    /// pair: if that exact activation already won, it is reported as the
    /// same winner rather than a fresh etag (spec §4.2 invariant).
    pub fn add_single_activation(&self, grain: GrainId, slot: ActivationSlot, now: u64) -> SingleActivationOutcome {
        let mut entry = self.entries.entry(grain).or_default();
        if let Some(existing) = entry.slots.first() {
            if existing.activation == slot.activation {
                return SingleActivationOutcome::Registered { etag: entry.etag };
            }
            return SingleActivationOutcome::LostRace {
                winner: existing.clone(),
            };
        }
        let mut slot = slot;
        slot.registration_time = now;
        entry.slots.push(slot);
        entry.etag = entry.etag.next();
        SingleActivationOutcome::Registered { etag: entry.etag }
    }

    /// Multi-activation mode: append unconditionally (optional per spec
    /// §4.2; used for stateless-worker grains that tolerate more than
    /// one concurrent activation).
    pub fn add_activation(&self, grain: GrainId, slot: ActivationSlot, now: u64) -> Etag {
        let mut entry = self.entries.entry(grain).or_default();
        let mut slot = slot;
        slot.registration_time = now;
        entry.slots.push(slot);
        entry.etag = entry.etag.next();
        entry.etag
    }

    pub fn remove_activation(&self, grain: &GrainId, activation: ActivationId) -> bool {
        let Some(mut entry) = self.entries.get_mut(grain) else {
            return false;
        };
        let before = entry.slots.len();
        entry.slots.retain(|slot| slot.activation != activation);
        let changed = entry.slots.len() != before;
        if changed {
            entry.etag = entry.etag.next();
        }
        changed
    }

    pub fn lookup(&self, grain: &GrainId) -> Option<(Vec<ActivationSlot>, Etag)> {
        self.entries.get(grain).map(|entry| (entry.slots.clone(), entry.etag))
    }

    pub fn delete(&self, grain: &GrainId) -> bool {
        self.entries.remove(grain).is_some()
    }

    /// Full snapshot for handoff — spec §4.2 `GetItems`.
    pub fn get_items(&self) -> Vec<(GrainId, GrainInfoEntry)> {
        self.entries
            .iter()
            .map(|kv| (kv.key().clone(), kv.value().clone()))
            .collect()
    }

    /// Merge entries accepted from a peer's handoff proposal, overwriting
    /// whatever this partition held for the same grain identity and
    /// bumping its etag once regardless of how many slots it carries
    /// (spec §4.3 handoff: the receiver becomes authoritative for these
    /// entries as soon as they are durably merged).
    pub fn merge_entries(&self, entries: Vec<(GrainId, GrainInfoEntry)>) -> usize {
        let mut accepted = 0;
        for (grain, mut entry) in entries {
            entry.etag = entry.etag.next();
            self.entries.insert(grain, entry);
            accepted += 1;
        }
        accepted
    }

    /// Wipe on shutdown after handoff has been acknowledged.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Remove every entry whose surviving activations all point at a
    /// silo the membership snapshot no longer considers Active or
    /// ShuttingDown (spec §3 directory-partition invariant: "entries
    /// referencing Dead silos are scrubbed when membership advances").
    pub fn scrub_dead_silo(&self, dead: SiloAddress) {
        let mut emptied = Vec::new();
        for mut entry in self.entries.iter_mut() {
            let before = entry.slots.len();
            entry.slots.retain(|slot| slot.silo != dead);
            if entry.slots.len() != before {
                entry.etag = entry.etag.next();
            }
            if entry.slots.is_empty() {
                emptied.push(entry.key().clone());
            }
        }
        for grain in emptied {
            self.entries.remove(&grain);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn silo(port: u16) -> SiloAddress {
        let ep: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        SiloAddress::new(ep, 1)
    }

    fn slot(port: u16, activation: u128) -> ActivationSlot {
        ActivationSlot {
            silo: silo(port),
            activation: ActivationId(activation),
            registration_time: 0,
        }
    }

    #[test]
    fn add_single_activation_is_idempotent_for_same_pair() {
        let partition = GrainDirectoryPartition::new();
        let grain = GrainId::new("Thermostat", "roomA");
        let a = partition.add_single_activation(grain.clone(), slot(1, 1), 0);
        let b = partition.add_single_activation(grain.clone(), slot(1, 1), 0);
        assert_eq!(a, b);
        assert_eq!(partition.lookup(&grain).unwrap().0.len(), 1);
    }

    #[test]
    fn add_single_activation_reports_loser_the_winner() {
        let partition = GrainDirectoryPartition::new();
        let grain = GrainId::new("Thermostat", "roomA");
        partition.add_single_activation(grain.clone(), slot(1, 1), 0);
        let outcome = partition.add_single_activation(grain.clone(), slot(2, 2), 0);
        match outcome {
            SingleActivationOutcome::LostRace { winner } => assert_eq!(winner.activation, ActivationId(1)),
            other => panic!("expected LostRace, got {other:?}"),
        }
    }

    #[test]
    fn etag_strictly_increases_on_mutation() {
        let partition = GrainDirectoryPartition::new();
        let grain = GrainId::new("Thermostat", "roomA");
        let SingleActivationOutcome::Registered { etag: e1 } =
            partition.add_single_activation(grain.clone(), slot(1, 1), 0)
        else {
            panic!("expected registration")
        };
        partition.remove_activation(&grain, ActivationId(1));
        let e2 = partition.add_single_activation(grain.clone(), slot(2, 2), 0);
        let SingleActivationOutcome::Registered { etag: e2 } = e2 else {
            panic!("expected registration");
        };
        assert!(e2.0 > e1.0);
    }

    #[test]
    fn scrub_removes_entries_pointing_only_at_dead_silo() {
        let partition = GrainDirectoryPartition::new();
        let grain = GrainId::new("Thermostat", "roomA");
        partition.add_single_activation(grain.clone(), slot(1, 1), 0);
        partition.scrub_dead_silo(silo(1));
        assert!(partition.lookup(&grain).is_none());
    }
}
