//! Cluster membership data model — spec §3 "Cluster membership snapshot"
//! and §4.1. This module defines values only; the service that produces
//! and advances them lives in the `silo-membership` crate so that
//! `silo-core` stays a pure data/contract crate, matching the teacher's
//! separation of `spark-core` contracts from adapter-crate behaviour.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::ids::SiloAddress;

/// Status of one silo as seen by the cluster membership provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SiloStatus {
    Joining,
    Active,
    ShuttingDown,
    Stopping,
    Dead,
}

impl SiloStatus {
    /// `terminating(s)` from spec §3: true for `ShuttingDown|Stopping|Dead`.
    pub fn terminating(self) -> bool {
        matches!(self, SiloStatus::ShuttingDown | SiloStatus::Stopping | SiloStatus::Dead)
    }
}

/// Immutable, versioned view of the cluster. Versions advance
/// monotonically; an observer that has seen version `v` is never later
/// handed a snapshot with version `< v` (enforced by
/// `silo-membership::MembershipService`, not by this value type).
#[derive(Clone, Debug)]
pub struct ClusterMembershipSnapshot {
    pub version: u64,
    members: Arc<BTreeMap<SiloAddress, SiloStatus>>,
}

impl ClusterMembershipSnapshot {
    pub fn new(version: u64, members: BTreeMap<SiloAddress, SiloStatus>) -> Self {
        Self {
            version,
            members: Arc::new(members),
        }
    }

    pub fn empty() -> Self {
        Self::new(0, BTreeMap::new())
    }

    pub fn status_of(&self, silo: &SiloAddress) -> Option<SiloStatus> {
        self.members.get(silo).copied()
    }

    pub fn members(&self) -> impl Iterator<Item = (&SiloAddress, &SiloStatus)> {
        self.members.iter()
    }

    /// Active members ordered by `consistent_hash`, forming the ring.
    /// Terminating silos never own partitions, so they are excluded.
    pub fn ring(&self) -> Vec<SiloAddress> {
        let mut ring: Vec<SiloAddress> = self
            .members
            .iter()
            .filter(|(_, status)| matches!(status, SiloStatus::Active))
            .map(|(addr, _)| *addr)
            .collect();
        ring.sort_by_key(|addr| addr.consistent_hash());
        ring
    }

    /// The nearest-higher-hash active member of `grain_id`, wrapping
    /// around the ring. `None` if the ring is empty (spec §3: "if the
    /// ring is empty the function is undefined" — we surface that as
    /// `None` rather than panicking).
    pub fn partition_owner(&self, grain_hash: u32) -> Option<SiloAddress> {
        let ring = self.ring();
        if ring.is_empty() {
            return None;
        }
        ring.iter()
            .find(|addr| addr.consistent_hash() >= grain_hash)
            .copied()
            .or_else(|| ring.first().copied())
    }

    /// Delta between this snapshot and a newer one: silos added, silos
    /// removed, and silos whose status changed. Computed against the
    /// previously-delivered snapshot per spec §4.1.
    pub fn delta(&self, newer: &ClusterMembershipSnapshot) -> MembershipDelta {
        let mut added = Vec::new();
        let mut removed = Vec::new();
        let mut status_changed = Vec::new();

        for (addr, status) in newer.members.iter() {
            match self.members.get(addr) {
                None => added.push((*addr, *status)),
                Some(old) if old != status => status_changed.push((*addr, *old, *status)),
                Some(_) => {}
            }
        }
        for (addr, status) in self.members.iter() {
            if !newer.members.contains_key(addr) {
                removed.push((*addr, *status));
            }
        }
        MembershipDelta {
            added,
            removed,
            status_changed,
        }
    }
}

/// `(added, removed, status_changed)` computed against the
/// previously-delivered snapshot — spec §4.1.
#[derive(Clone, Debug, Default)]
pub struct MembershipDelta {
    pub added: Vec<(SiloAddress, SiloStatus)>,
    pub removed: Vec<(SiloAddress, SiloStatus)>,
    pub status_changed: Vec<(SiloAddress, SiloStatus, SiloStatus)>,
}

impl MembershipDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.status_changed.is_empty()
    }
}

/// Derived, per-local-silo view used by the directory: predecessor,
/// successor, and a pure `partition_owner` closure over the ring at the
/// moment this snapshot was taken — spec §3 "Directory membership
/// snapshot".
#[derive(Clone, Debug)]
pub struct DirectoryMembershipSnapshot {
    pub cluster: ClusterMembershipSnapshot,
    pub local: SiloAddress,
    ring: Vec<SiloAddress>,
}

impl DirectoryMembershipSnapshot {
    pub fn derive(cluster: ClusterMembershipSnapshot, local: SiloAddress) -> Self {
        let ring = cluster.ring();
        Self { cluster, local, ring }
    }

    pub fn ring(&self) -> &[SiloAddress] {
        &self.ring
    }

    pub fn partition_owner(&self, grain_hash: u32) -> Option<SiloAddress> {
        self.cluster.partition_owner(grain_hash)
    }

    fn local_ring_index(&self) -> Option<usize> {
        self.ring.iter().position(|addr| *addr == self.local)
    }

    /// The silo immediately before `local` on the ring, wrapping.
    pub fn predecessor(&self) -> Option<SiloAddress> {
        if self.ring.len() < 2 {
            return None;
        }
        let idx = self.local_ring_index()?;
        let prev = if idx == 0 { self.ring.len() - 1 } else { idx - 1 };
        Some(self.ring[prev])
    }

    /// The silo immediately after `local` on the ring, wrapping.
    pub fn successor(&self) -> Option<SiloAddress> {
        if self.ring.len() < 2 {
            return None;
        }
        let idx = self.local_ring_index()?;
        let next = (idx + 1) % self.ring.len();
        Some(self.ring[next])
    }

    /// True if `local` is this snapshot's partition owner for `grain_hash`.
    pub fn owns(&self, grain_hash: u32) -> bool {
        self.partition_owner(grain_hash) == Some(self.local)
    }
}
