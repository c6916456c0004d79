//! Membership Service — spec §4.1.
//!
//! The only operations consumed by the rest of the core are the current
//! snapshot, a subscription to updates, and a bounded wait for the
//! snapshot to reach at least a given version. The backing membership
//! *provider* (gossip, Kubernetes, a coordination service) is an
//! explicit Non-goal of spec.md §1 and is represented here only at its
//! interface: [`MembershipSource`] is the extension point a real
//! provider would implement to push snapshots into this service.
//!
//! Grounded in the teacher's `arc-swap`-backed "atomically swapped
//! pointer" pattern for immutable snapshots (spec §5) and its use of
//! `tokio::sync` primitives for subscription fan-out
//! (`spark-transport-tcp` uses `tokio::sync::Mutex`/channels
//! throughout).

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use silo_core::prelude::{ClusterMembershipSnapshot, SiloAddress, SiloStatus};
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("refresh-at-least-to-version({target}) timed out waiting past version {observed}")]
    RefreshTimedOut { target: u64, observed: u64 },
    #[error("rejected stale snapshot at version {attempted}; current version is {current}")]
    StaleSnapshot { attempted: u64, current: u64 },
}

/// Extension point for a real backing provider. Not implemented here —
/// spec.md explicitly treats the provider as an external collaborator.
pub trait MembershipSource: Send + Sync {
    /// Human-readable identifier, matching the `membership` config
    /// option in spec §6.
    fn provider_id(&self) -> &'static str;
}

/// A minimal in-memory source usable by tests and single-process
/// deployments: membership is whatever was last applied through
/// [`MembershipService::apply_snapshot`].
pub struct StaticMembershipSource;

impl MembershipSource for StaticMembershipSource {
    fn provider_id(&self) -> &'static str {
        "static"
    }
}

/// Publishes monotonically-versioned [`ClusterMembershipSnapshot`]s and
/// lets components subscribe to changes without ever observing a
/// version regression (spec §4.1 ordering contract).
pub struct MembershipService {
    current: ArcSwap<ClusterMembershipSnapshot>,
    watch_tx: watch::Sender<ClusterMembershipSnapshot>,
    #[allow(dead_code)]
    source: Arc<dyn MembershipSource>,
}

impl MembershipService {
    pub fn new(source: Arc<dyn MembershipSource>) -> Self {
        let initial = ClusterMembershipSnapshot::empty();
        let (watch_tx, _rx) = watch::channel(initial.clone());
        Self {
            current: ArcSwap::from_pointee(initial),
            watch_tx,
            source,
        }
    }

    pub fn with_static_source() -> Self {
        Self::new(Arc::new(StaticMembershipSource))
    }

    /// Current snapshot. Components must re-read this after every async
    /// suspension rather than caching it across a yield (spec §4.1).
    pub fn current_snapshot(&self) -> ClusterMembershipSnapshot {
        (**self.current.load()).clone()
    }

    /// Subscribe to future snapshots. The receiver always observes a
    /// non-decreasing sequence of versions (spec §8 "monotone membership
    /// version").
    pub fn subscribe(&self) -> watch::Receiver<ClusterMembershipSnapshot> {
        self.watch_tx.subscribe()
    }

    /// Publish a new snapshot. Rejected if its version does not strictly
    /// exceed the current one — this is the enforcement point for the
    /// ordering contract in spec §4.1.
    pub fn apply_snapshot(&self, next: ClusterMembershipSnapshot) -> Result<(), MembershipError> {
        let current_version = self.current.load().version;
        if next.version <= current_version {
            return Err(MembershipError::StaleSnapshot {
                attempted: next.version,
                current: current_version,
            });
        }
        self.current.store(Arc::new(next.clone()));
        debug!(version = next.version, members = next.members().count(), "published membership snapshot");
        // A watch send only fails if every receiver has been dropped; that
        // is not an error for the publisher, so it is ignored here.
        let _ = self.watch_tx.send(next);
        Ok(())
    }

    pub fn mark_status(&self, silo: SiloAddress, status: SiloStatus) -> Result<(), MembershipError> {
        let snapshot = self.current_snapshot();
        let mut members: std::collections::BTreeMap<SiloAddress, SiloStatus> =
            snapshot.members().map(|(a, s)| (*a, *s)).collect();
        members.insert(silo, status);
        self.apply_snapshot(ClusterMembershipSnapshot::new(snapshot.version + 1, members))
    }

    /// Waits until the published snapshot reaches at least `version`, or
    /// the bounded wait elapses. Callers use this after a transient
    /// routing error to avoid retrying against membership they already
    /// know is stale (spec §4.3 failure semantics).
    pub async fn refresh_at_least(&self, version: u64, bound: Duration) -> Result<ClusterMembershipSnapshot, MembershipError> {
        let immediate = self.current_snapshot();
        if immediate.version >= version {
            return Ok(immediate);
        }
        let mut rx = self.subscribe();
        let wait = async {
            loop {
                if rx.changed().await.is_err() {
                    break;
                }
                let snap = rx.borrow().clone();
                if snap.version >= version {
                    return Some(snap);
                }
            }
            None
        };
        match tokio::time::timeout(bound, wait).await {
            Ok(Some(snap)) => Ok(snap),
            _ => Err(MembershipError::RefreshTimedOut {
                target: version,
                observed: self.current_snapshot().version,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::net::SocketAddr;

    fn addr(port: u16) -> SiloAddress {
        let ep: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        SiloAddress::new(ep, 1)
    }

    #[test]
    fn stale_snapshot_is_rejected() {
        let svc = MembershipService::with_static_source();
        svc.mark_status(addr(1), SiloStatus::Active).unwrap();
        let err = svc.apply_snapshot(ClusterMembershipSnapshot::new(0, Default::default()));
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn refresh_at_least_observes_future_version() {
        let svc = Arc::new(MembershipService::with_static_source());
        let svc2 = svc.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            svc2.mark_status(addr(9), SiloStatus::Active).unwrap();
        });
        let snap = svc.refresh_at_least(1, Duration::from_secs(1)).await.unwrap();
        assert!(snap.version >= 1);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn refresh_at_least_times_out_without_update() {
        let svc = MembershipService::with_static_source();
        let err = svc.refresh_at_least(5, Duration::from_millis(10)).await;
        assert!(matches!(err, Err(MembershipError::RefreshTimedOut { .. })));
    }

    #[test]
    fn version_sequence_observed_by_subscriber_is_monotone() {
        let svc = MembershipService::with_static_source();
        let mut rx = svc.subscribe();
        svc.mark_status(addr(1), SiloStatus::Active).unwrap();
        svc.mark_status(addr(2), SiloStatus::Active).unwrap();
        let mut last = 0;
        while rx.has_changed().unwrap_or(false) {
            let v = rx.borrow_and_update().version;
            assert!(v >= last);
            last = v;
        }
    }

    proptest::proptest! {
        /// spec §4.1 ordering contract: for any sequence of applied
        /// versions, `apply_snapshot` accepts exactly the ones that
        /// strictly exceed whatever is currently published.
        #[test]
        fn apply_snapshot_accepts_iff_strictly_increasing(versions in proptest::collection::vec(0u64..20, 1..20)) {
            let svc = MembershipService::with_static_source();
            let mut current = 0u64;
            for version in versions {
                let result = svc.apply_snapshot(ClusterMembershipSnapshot::new(version, Default::default()));
                if version > current {
                    prop_assert!(result.is_ok());
                    current = version;
                } else {
                    prop_assert!(result.is_err());
                }
                prop_assert_eq!(svc.current_snapshot().version, current);
            }
        }
    }
}
