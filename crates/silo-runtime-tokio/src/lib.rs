//! Tokio-backed implementation of `silo_core::runtime`'s executor and
//! clock contracts. Kept out of `silo-core` itself so the core crate
//! never names a concrete async runtime — spec §9's "runtime crate
//! must not be named by the core", grounded in the teacher's
//! `spark-runtime-tokio-adapter` sitting behind `spark-core::runtime`
//! rather than inside it.
//!
//! The two priority lanes spec §4.6/§5 describe (`system`/`application`
//! shared pools) are not reified as separate OS thread pools here:
//! `tokio`'s work-stealing scheduler already load-balances across
//! worker threads, and the actual admission-control behaviour the
//! lanes exist for — system items always run, application items are
//! dropped under "application turns stopped" — is enforced in
//! `silo-catalog::scheduler::PerActivationScheduler`, the component
//! that actually knows an item's priority at enqueue time.

use std::time::{Duration, Instant};

use silo_core::prelude::{BoxFuture, ClusterMembershipSnapshot, JoinHandle, MonotonicTimePoint, SiloAddress, SiloStatus, TaskExecutor, TaskPriority, TimeDriver};
use tokio::sync::watch;
use tracing::trace;

struct TokioJoinHandle(tokio::task::JoinHandle<()>);

impl JoinHandle for TokioJoinHandle {
    fn abort(&self) {
        self.0.abort();
    }
}

/// Implements [`TaskExecutor`] and [`TimeDriver`] on top of the ambient
/// tokio runtime. Must be constructed from within a tokio runtime
/// context (`#[tokio::main]` or an explicit `Runtime::enter`), matching
/// the teacher's adapter-crate convention of assuming an already-running
/// executor rather than owning one.
pub struct TokioRuntime {
    epoch: Instant,
}

impl TokioRuntime {
    pub fn new() -> Self {
        Self { epoch: Instant::now() }
    }
}

impl Default for TokioRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskExecutor for TokioRuntime {
    fn spawn(&self, priority: TaskPriority, future: BoxFuture<'static, ()>) -> Box<dyn JoinHandle> {
        trace!(?priority, "spawning task on tokio runtime");
        Box::new(TokioJoinHandle(tokio::spawn(future)))
    }
}

impl TimeDriver for TokioRuntime {
    fn now(&self) -> MonotonicTimePoint {
        MonotonicTimePoint(self.epoch.elapsed().as_millis() as u64)
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// A background driver for `silo-catalog`'s activation collector: calls
/// `tick` on a fixed cadence until it returns `false`. `Catalog` wires
/// this to `ActivationCollector::scan_stale` followed by deactivating
/// whatever it returns.
pub fn spawn_collection_loop(quantum: Duration, mut tick: impl FnMut() -> bool + Send + 'static) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(quantum);
        loop {
            interval.tick().await;
            if !tick() {
                break;
            }
        }
    })
}

/// Drives `Catalog::on_silo_status_change` (spec §4.5) off a
/// membership watch channel: diffs each newly published snapshot
/// against the last one observed and calls `on_change` once per added,
/// removed, or status-changed member. `removed` members are reported
/// as [`SiloStatus::Dead`] since dropping out of the snapshot entirely
/// is the terminal case `on_change` needs to scrub for.
pub fn spawn_membership_watch_loop(
    mut rx: watch::Receiver<ClusterMembershipSnapshot>,
    mut on_change: impl FnMut(SiloAddress, SiloStatus) + Send + 'static,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut previous = rx.borrow().clone();
        loop {
            if rx.changed().await.is_err() {
                break;
            }
            let current = rx.borrow_and_update().clone();
            let delta = previous.delta(&current);
            for (addr, status) in delta.added {
                on_change(addr, status);
            }
            for (addr, _old, new) in delta.status_changed {
                on_change(addr, new);
            }
            for (addr, _last_status) in delta.removed {
                on_change(addr, SiloStatus::Dead);
            }
            previous = current;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};

    fn addr(port: u16) -> SiloAddress {
        let ep: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        SiloAddress::new(ep, 1)
    }

    #[tokio::test]
    async fn membership_watch_loop_reports_added_changed_and_removed_as_dead() {
        let a = addr(1);
        let b = addr(2);
        let mut initial = BTreeMap::new();
        initial.insert(a, SiloStatus::Active);
        initial.insert(b, SiloStatus::Active);
        let (tx, rx) = watch::channel(ClusterMembershipSnapshot::new(1, initial));

        let seen: Arc<Mutex<Vec<(SiloAddress, SiloStatus)>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let handle = spawn_membership_watch_loop(rx, move |silo, status| {
            seen_clone.lock().unwrap().push((silo, status));
        });

        // b departs the cluster entirely; a transitions to ShuttingDown.
        let mut next = BTreeMap::new();
        next.insert(a, SiloStatus::ShuttingDown);
        tx.send(ClusterMembershipSnapshot::new(2, next)).unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.abort();

        let observed = seen.lock().unwrap().clone();
        assert!(observed.contains(&(a, SiloStatus::ShuttingDown)));
        assert!(observed.contains(&(b, SiloStatus::Dead)));
    }

    #[tokio::test]
    async fn now_is_monotonic() {
        let rt = TokioRuntime::new();
        let a = rt.now();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let b = rt.now();
        assert!(b.0 >= a.0);
    }

    #[tokio::test]
    async fn spawn_runs_the_future() {
        let rt = TokioRuntime::new();
        let (tx, rx) = tokio::sync::oneshot::channel();
        rt.spawn(
            TaskPriority::System,
            Box::pin(async move {
                let _ = tx.send(());
            }),
        );
        rx.await.unwrap();
    }

    #[tokio::test]
    async fn sleep_actually_waits() {
        let rt = TokioRuntime::new();
        let start = Instant::now();
        rt.sleep(Duration::from_millis(10)).await;
        assert!(start.elapsed() >= Duration::from_millis(8));
    }
}
