//! Local grain directory — spec §4.3's three-step routing algorithm,
//! its handoff-on-membership-change behaviour, and its rule that a
//! transient routing failure retries after a membership refresh rather
//! than reaching the grain caller (spec §7).
//!
//! Grounded in `spark-core/src/router/mod.rs`'s split between a pure
//! routing decision and the transport that actually carries a forwarded
//! request, and in the teacher's pattern of holding the membership
//! snapshot by value per call rather than across an await point.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use silo_core::prelude::{
    codes, ActivationId, DirectoryMembershipSnapshot, ErrorCategory, Etag, GrainId, RejectionKind, Result, RetryPolicy,
    SiloAddress, SiloError,
};
use silo_membership::MembershipService;
use tracing::{debug, info, warn};

use crate::cache::{CachedRoute, DirectoryCache};
use crate::handoff::{HandoffAck, HandoffChannel, HandoffProposal};
use crate::partition::{ActivationSlot, GrainDirectoryPartition, GrainInfoEntry, SingleActivationOutcome};
use crate::transport::{DirectoryTransport, ForwardError};

/// Outcome of resolving a grain to its live activation(s).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedRoute {
    pub activations: Vec<(SiloAddress, ActivationId)>,
    pub etag: Etag,
    /// True when the answer came from the local cache rather than the
    /// authoritative partition; a caller that acts on it and later
    /// learns the activation is gone should call
    /// [`LocalGrainDirectory::invalidate_cached`] (spec §8 "cache is an
    /// optimization").
    pub from_cache: bool,
}

/// The directory surface this silo exposes: part authoritative
/// partition (for grain identities it owns), part read-through cache
/// (for everything else), with forwarding to the true owner mediated by
/// a [`DirectoryTransport`].
pub struct LocalGrainDirectory {
    local: SiloAddress,
    partition: GrainDirectoryPartition,
    cache: DirectoryCache,
    membership: Arc<MembershipService>,
    transport: Arc<dyn DirectoryTransport>,
    handoff: Arc<dyn HandoffChannel>,
    retry: RetryPolicy,
    hop_limit: u8,
    /// Set once by [`Self::begin_shutdown`]; after that, new splits are
    /// no longer proposed (the whole partition is already leaving).
    shutting_down: AtomicBool,
    /// Set once the shutdown handoff is acknowledged; from then on this
    /// silo owns nothing and forwards everything to its ring successor.
    handed_off: AtomicBool,
}

impl LocalGrainDirectory {
    pub fn new(
        local: SiloAddress,
        cache_capacity: usize,
        membership: Arc<MembershipService>,
        transport: Arc<dyn DirectoryTransport>,
        hop_limit: u8,
        handoff: Arc<dyn HandoffChannel>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            local,
            partition: GrainDirectoryPartition::new(),
            cache: DirectoryCache::new(cache_capacity),
            membership,
            transport,
            handoff,
            retry,
            hop_limit,
            shutting_down: AtomicBool::new(false),
            handed_off: AtomicBool::new(false),
        }
    }

    fn snapshot(&self) -> DirectoryMembershipSnapshot {
        DirectoryMembershipSnapshot::derive(self.membership.current_snapshot(), self.local)
    }

    /// Step 1 of spec §4.3: who owns this grain's partition right now.
    /// Once this silo has handed off its whole partition during its own
    /// shutdown, every grain that used to hash here now routes to the
    /// ring successor instead — spec.md's prose names the predecessor at
    /// one point, but the worked shutdown scenario and the ring's
    /// nearest-higher-hash rule both resolve to the successor, which is
    /// what is implemented here.
    fn effective_owner(&self, snap: &DirectoryMembershipSnapshot, grain: &GrainId) -> Option<SiloAddress> {
        if self.shutting_down.load(Ordering::Acquire) && self.handed_off.load(Ordering::Acquire) {
            return snap.successor();
        }
        snap.partition_owner(grain.consistent_hash())
    }

    fn is_retryable(err: &SiloError) -> bool {
        matches!(err.category(), ErrorCategory::TransientNetwork | ErrorCategory::CacheInvalidation)
    }

    /// Spec §4.3/§7: a transient routing failure is retried after
    /// refreshing membership past whatever version produced it, rather
    /// than surfacing it to the grain caller. The refresh is itself the
    /// backoff: it waits up to `backoff_for(attempt)` for membership to
    /// advance, and the caller retries regardless of whether it did —
    /// an unrelated network fault (not a membership change) still needs
    /// the delay even though no new snapshot will ever arrive for it.
    async fn wait_and_refresh(&self, observed_version: u64, attempt: u32) {
        let bound = self.retry.backoff_for(attempt, observed_version);
        let _ = self.membership.refresh_at_least(observed_version + 1, bound).await;
    }

    /// Register a single-activation grain, winning or losing the race
    /// against a concurrent caller per spec §4.2. Routes to the true
    /// owner first; only ever mutates the local partition when this
    /// silo is that owner. A transient forwarding failure is retried,
    /// bounded by [`RetryPolicy::max_attempts`], after refreshing
    /// membership — it never reaches the caller directly (spec §7).
    pub async fn register_single_activation(
        &self,
        grain: GrainId,
        silo: SiloAddress,
        activation: ActivationId,
        now: u64,
        hop_count: u8,
    ) -> Result<SingleActivationOutcome> {
        let mut attempt = 0u32;
        loop {
            let snap = self.snapshot();
            let Some(owner) = self.effective_owner(&snap, &grain) else {
                return Err(no_partition_owner(&grain));
            };

            if owner == self.local {
                let slot = ActivationSlot {
                    silo,
                    activation,
                    registration_time: now,
                };
                return Ok(self.partition.add_single_activation(grain, slot, now));
            }

            match self.forward_register(owner, grain.clone(), silo, activation, now, hop_count).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) if Self::is_retryable(&err) && attempt < self.retry.max_attempts => {
                    attempt += 1;
                    self.wait_and_refresh(snap.cluster.version, attempt).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn forward_register(
        &self,
        owner: SiloAddress,
        grain: GrainId,
        silo: SiloAddress,
        activation: ActivationId,
        now: u64,
        hop_count: u8,
    ) -> Result<SingleActivationOutcome> {
        let Some(next_hop) = bump_hop(hop_count, self.hop_limit) else {
            return Err(hop_limit_exceeded(&grain));
        };
        match self.transport.forward_lookup(owner, &grain, next_hop).await {
            Ok(result) => {
                if let Some((winner_silo, winner_activation)) = result.activations.first().copied() {
                    if winner_activation == activation {
                        self.cache.insert(
                            grain,
                            CachedRoute {
                                silo: winner_silo,
                                etag: result.etag,
                            },
                        );
                        return Ok(SingleActivationOutcome::Registered { etag: result.etag });
                    }
                    let winner = ActivationSlot {
                        silo: winner_silo,
                        activation: winner_activation,
                        registration_time: now,
                    };
                    self.cache.insert(
                        grain,
                        CachedRoute {
                            silo: winner_silo,
                            etag: result.etag,
                        },
                    );
                    return Ok(SingleActivationOutcome::LostRace { winner });
                }
                let _ = now;
                self.cache.insert(
                    grain,
                    CachedRoute {
                        silo,
                        etag: result.etag,
                    },
                );
                Ok(SingleActivationOutcome::Registered { etag: result.etag })
            }
            Err(ForwardError::Unreachable) => Err(directory_unavailable(&grain)),
            Err(ForwardError::HopLimitExceeded) => Err(hop_limit_exceeded(&grain)),
        }
    }

    /// Step 2/3 of spec §4.3: serve from the local partition when this
    /// silo owns the grain, from cache when a recent answer is held,
    /// otherwise forward and cache the result. A transient forwarding
    /// failure is retried after a membership refresh rather than
    /// returned to the caller, the same as [`Self::register_single_activation`].
    pub async fn lookup(&self, grain: &GrainId, hop_count: u8) -> Result<ResolvedRoute> {
        let mut attempt = 0u32;
        loop {
            let snap = self.snapshot();
            let Some(owner) = self.effective_owner(&snap, grain) else {
                return Err(no_partition_owner(grain));
            };

            if owner == self.local {
                return match self.partition.lookup(grain) {
                    Some((slots, etag)) => Ok(ResolvedRoute {
                        activations: slots.into_iter().map(|s| (s.silo, s.activation)).collect(),
                        etag,
                        from_cache: false,
                    }),
                    None => Err(nonexistent_activation(grain)),
                };
            }

            if let Some(cached) = self.cache.get(grain) {
                debug!(grain = %grain, silo = %cached.silo, "directory cache hit");
                return Ok(ResolvedRoute {
                    activations: vec![],
                    etag: cached.etag,
                    from_cache: true,
                });
            }

            let Some(next_hop) = bump_hop(hop_count, self.hop_limit) else {
                return Err(hop_limit_exceeded(grain));
            };
            match self.transport.forward_lookup(owner, grain, next_hop).await {
                Ok(result) => {
                    if let Some((silo, _)) = result.activations.first().copied() {
                        self.cache.insert(
                            grain.clone(),
                            CachedRoute {
                                silo,
                                etag: result.etag,
                            },
                        );
                    }
                    return Ok(ResolvedRoute {
                        activations: result.activations,
                        etag: result.etag,
                        from_cache: false,
                    });
                }
                Err(ForwardError::Unreachable) => {
                    if attempt < self.retry.max_attempts {
                        attempt += 1;
                        self.wait_and_refresh(snap.cluster.version, attempt).await;
                        continue;
                    }
                    return Err(directory_unavailable(grain));
                }
                Err(ForwardError::HopLimitExceeded) => return Err(hop_limit_exceeded(grain)),
            }
        }
    }

    /// Called once a caller learns (via `RejectionKind::CacheInvalidation`)
    /// that a cached route no longer holds — spec §8's "cache is an
    /// optimization, never a source of truth" property.
    pub fn invalidate_cached(&self, grain: &GrainId) {
        warn!(grain = %grain, "invalidating stale directory cache entry");
        self.cache.invalidate(grain);
    }

    pub fn deregister(&self, grain: &GrainId, activation: ActivationId) -> bool {
        self.partition.remove_activation(grain, activation)
    }

    /// Reacts to a fresh membership snapshot — spec §4.3 handoff on ring
    /// churn. Drops cache entries a new ring no longer agrees with, then
    /// proposes every local partition entry whose owner moved away to
    /// whichever peer now owns it, removing the local copy only once
    /// that peer acknowledges. A caller (the membership-subscriber task
    /// wired up by the runtime crate) is expected to invoke this once
    /// per published snapshot.
    pub async fn on_membership_changed(&self, next: &DirectoryMembershipSnapshot) {
        self.cache.retain_consistent_with(|grain| next.partition_owner(grain.consistent_hash()));

        if self.shutting_down.load(Ordering::Acquire) {
            return;
        }

        let mut by_new_owner: HashMap<SiloAddress, Vec<(GrainId, GrainInfoEntry)>> = HashMap::new();
        for (grain, entry) in self.partition.get_items() {
            if let Some(new_owner) = next.partition_owner(grain.consistent_hash()) {
                if new_owner != self.local {
                    by_new_owner.entry(new_owner).or_default().push((grain, entry));
                }
            }
        }

        for (new_owner, entries) in by_new_owner {
            self.propose_split(new_owner, entries).await;
        }
    }

    async fn propose_split(&self, to: SiloAddress, entries: Vec<(GrainId, GrainInfoEntry)>) {
        let grains: Vec<GrainId> = entries.iter().map(|(g, _)| g.clone()).collect();
        let count = grains.len();
        let proposal = HandoffProposal { from: self.local, to, entries };
        match self.handoff.propose(to, proposal).await {
            Ok(ack) => {
                info!(to = %to, proposed = count, accepted = ack.accepted_count, "handoff split acknowledged");
                for grain in &grains {
                    self.partition.delete(grain);
                }
            }
            Err(err) => {
                warn!(to = %to, proposed = count, error = %err, "handoff split failed, entries retained for the next membership tick");
            }
        }
    }

    /// Inbound counterpart of [`Self::propose_split`]/[`Self::begin_shutdown`]:
    /// merges a peer's proposed entries into the local partition and
    /// reports how many were accepted.
    pub fn accept_handoff(&self, proposal: HandoffProposal) -> HandoffAck {
        let accepted_count = self.partition.merge_entries(proposal.entries);
        info!(from = %proposal.from, accepted = accepted_count, "merged inbound handoff proposal");
        HandoffAck { accepted_count }
    }

    /// Spec §4.3: on this silo's own shutdown, its whole partition is
    /// handed off to the ring successor before the silo reports
    /// `Stopping`. Returns `true` once the handoff is acknowledged (or
    /// there was nothing to hand off); `false` if the peer could not be
    /// reached, in which case the caller should retry before proceeding
    /// with shutdown. After this returns `true`, every subsequent
    /// `register_single_activation`/`lookup` for a grain that used to
    /// hash here forwards to that successor instead of being served
    /// locally.
    pub async fn begin_shutdown(&self) -> bool {
        self.shutting_down.store(true, Ordering::Release);
        let snap = self.snapshot();
        let Some(successor) = snap.successor() else {
            self.handed_off.store(true, Ordering::Release);
            return true;
        };

        let entries = self.partition.get_items();
        if entries.is_empty() {
            self.handed_off.store(true, Ordering::Release);
            return true;
        }

        let grains: Vec<GrainId> = entries.iter().map(|(g, _)| g.clone()).collect();
        let proposal = HandoffProposal { from: self.local, to: successor, entries };
        match self.handoff.propose(successor, proposal).await {
            Ok(ack) => {
                info!(to = %successor, accepted = ack.accepted_count, "shutdown handoff acknowledged");
                for grain in &grains {
                    self.partition.delete(grain);
                }
                self.handed_off.store(true, Ordering::Release);
                true
            }
            Err(err) => {
                warn!(to = %successor, error = %err, "shutdown handoff failed, entries retained");
                false
            }
        }
    }

    /// Bounded wait for the ring to stabilize after this silo joins, so
    /// early registrations do not race a still-converging membership
    /// view (spec §4.3 "initial stabilization").
    pub async fn wait_for_initial_stabilization(&self, retries: u32, interval: Duration) -> bool {
        for attempt in 0..retries {
            let snap = self.snapshot();
            if snap.ring().contains(&self.local) {
                return true;
            }
            debug!(attempt, "waiting for ring stabilization");
            tokio::time::sleep(interval).await;
        }
        false
    }

    pub fn partition(&self) -> &GrainDirectoryPartition {
        &self.partition
    }

    pub fn cache(&self) -> &DirectoryCache {
        &self.cache
    }

    pub fn local_address(&self) -> SiloAddress {
        self.local
    }

    pub fn membership(&self) -> &Arc<MembershipService> {
        &self.membership
    }
}

fn bump_hop(current: u8, limit: u8) -> Option<u8> {
    if current >= limit {
        None
    } else {
        Some(current + 1)
    }
}

fn no_partition_owner(grain: &GrainId) -> SiloError {
    SiloError::new(
        codes::NO_PARTITION_OWNER,
        ErrorCategory::DefiniteRouting,
        format!("no active silo owns the partition for {grain}"),
    )
}

fn hop_limit_exceeded(grain: &GrainId) -> SiloError {
    SiloError::new(
        codes::HOP_LIMIT_EXCEEDED,
        ErrorCategory::DefiniteRouting,
        format!("directory forwarding for {grain} exceeded the hop limit"),
    )
}

fn directory_unavailable(grain: &GrainId) -> SiloError {
    SiloError::new(
        codes::DIRECTORY_UNAVAILABLE,
        ErrorCategory::TransientNetwork,
        format!("directory owner for {grain} is unreachable"),
    )
}

fn nonexistent_activation(grain: &GrainId) -> SiloError {
    SiloError::new(
        codes::NONEXISTENT_ACTIVATION,
        ErrorCategory::CacheInvalidation,
        format!("no activation registered for {grain}"),
    )
}

/// Maps a lookup/registration failure's category onto the wire
/// rejection kind a caller on another silo would see — spec §6/§7.
pub fn rejection_for(err: &SiloError) -> RejectionKind {
    match err.category() {
        ErrorCategory::TransientNetwork => RejectionKind::Transient,
        ErrorCategory::CacheInvalidation => RejectionKind::CacheInvalidation,
        ErrorCategory::ResourceExhausted => RejectionKind::Overloaded,
        _ => RejectionKind::Unrecoverable,
    }
}
