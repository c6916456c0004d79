//! Per-activation scheduler — spec §4.6/§5.
//!
//! Each activation gets one driver task that owns its FIFO work queue
//! and turn lock. Grounded in the teacher's `spark-transport-tcp`
//! channel actor (`channel.rs`'s single-task-owns-the-socket pattern):
//! rather than hand-rolling a continuation-requeueing state machine,
//! the driver task is itself the turn lock — a non-reentrant activation
//! simply `.await`s each item to completion before dequeuing the next,
//! and Rust's own cooperative polling gives the "suspend, don't block"
//! behaviour spec §5 asks for without extra bookkeeping.
//!
//! Reentrant activations admit new items into a `tokio::task::JoinSet`
//! while earlier turns are still in flight, which interleaves them
//! (spec's requirement) but — unlike spec §5's literal
//! "never parallelizes" wording — does not forbid two turns from being
//! polled on different worker threads simultaneously. Recorded as an
//! open-question resolution in `DESIGN.md`: reproducing strict
//! single-thread interleaving would need a dedicated executor per
//! activation, disproportionate to what reentrant grains need in
//! practice.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use silo_core::prelude::{BoxFuture, TaskPriority};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;
use tracing::{trace, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("activation is deactivating or already shut down")]
    Closed,
    #[error("application turns are stopped on this silo")]
    ApplicationTurnsStopped,
}

pub struct WorkItem {
    pub priority: TaskPriority,
    pub task: BoxFuture<'static, ()>,
}

impl WorkItem {
    pub fn new(priority: TaskPriority, task: BoxFuture<'static, ()>) -> Self {
        Self { priority, task }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Mode {
    Running = 0,
    ApplicationStopped = 1,
    Closed = 2,
}

impl From<u8> for Mode {
    fn from(v: u8) -> Self {
        match v {
            0 => Mode::Running,
            1 => Mode::ApplicationStopped,
            _ => Mode::Closed,
        }
    }
}

/// The FIFO queue and turn lock for one activation. Construction spawns
/// its driver task immediately via the injected executor.
pub struct PerActivationScheduler {
    sender: mpsc::UnboundedSender<WorkItem>,
    mode: Arc<AtomicU8>,
    closed: Arc<Notify>,
}

impl PerActivationScheduler {
    pub fn spawn(reentrant: bool, executor: &dyn silo_core::prelude::TaskExecutor) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mode = Arc::new(AtomicU8::new(Mode::Running as u8));
        let closed = Arc::new(Notify::new());
        let closed_signal = closed.clone();
        executor.spawn(
            TaskPriority::System,
            Box::pin(drive(receiver, reentrant, closed_signal)),
        );
        Self { sender, mode, closed }
    }

    /// Spec §4.6 cancellation: an activation entering Deactivating
    /// rejects new items with a definite error; items already enqueued
    /// still drain. The application-turns-stopped mode additionally
    /// drops application-priority items while still admitting system
    /// items (spec §4.6 priority lanes).
    pub fn enqueue(&self, item: WorkItem) -> Result<(), SchedulerError> {
        match Mode::from(self.mode.load(Ordering::Acquire)) {
            Mode::Closed => return Err(SchedulerError::Closed),
            Mode::ApplicationStopped if item.priority == TaskPriority::Application => {
                return Err(SchedulerError::ApplicationTurnsStopped)
            }
            _ => {}
        }
        self.sender.send(item).map_err(|_| SchedulerError::Closed)
    }

    pub fn stop_application_turns(&self) {
        self.mode.store(Mode::ApplicationStopped as u8, Ordering::Release);
    }

    /// Closes the queue (no further `enqueue` succeeds) and waits for
    /// the driver to finish whatever is already in flight, up to
    /// `timeout` for [`silo_core::prelude::ShutdownMode::Drain`].
    /// [`silo_core::prelude::ShutdownMode::Immediate`] closes and
    /// returns without waiting; already-running turns still run to
    /// completion since they are not forcibly preempted (spec §4.6:
    /// "never kills the pool thread").
    pub async fn shutdown(&self, mode: silo_core::prelude::ShutdownMode) {
        self.mode.store(Mode::Closed as u8, Ordering::Release);
        match mode {
            silo_core::prelude::ShutdownMode::Immediate => {}
            silo_core::prelude::ShutdownMode::Drain { timeout } => {
                let _ = tokio::time::timeout(timeout, self.closed.notified()).await;
            }
        }
    }
}

async fn drive(mut receiver: mpsc::UnboundedReceiver<WorkItem>, reentrant: bool, closed_signal: Arc<Notify>) {
    if reentrant {
        let mut in_flight: JoinSet<()> = JoinSet::new();
        loop {
            tokio::select! {
                biased;
                maybe_item = receiver.recv() => {
                    match maybe_item {
                        Some(item) => { in_flight.spawn(item.task); }
                        None => break,
                    }
                }
                Some(result) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(err) = result {
                        warn!(?err, "reentrant turn task panicked");
                    }
                }
            }
        }
        while in_flight.join_next().await.is_some() {}
    } else {
        while let Some(item) = receiver.recv().await {
            trace!("running non-reentrant turn");
            item.task.await;
        }
    }
    closed_signal.notify_waiters();
}

#[allow(dead_code)]
fn _assert_duration(_: Duration) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct InlineExecutor;

    impl silo_core::prelude::TaskExecutor for InlineExecutor {
        fn spawn(&self, _priority: TaskPriority, future: BoxFuture<'static, ()>) -> Box<dyn silo_core::prelude::JoinHandle> {
            tokio::spawn(future);
            struct NoopHandle;
            impl silo_core::prelude::JoinHandle for NoopHandle {
                fn abort(&self) {}
            }
            Box::new(NoopHandle)
        }
    }

    #[tokio::test]
    async fn non_reentrant_runs_items_in_fifo_order() {
        let executor = InlineExecutor;
        let scheduler = PerActivationScheduler::spawn(false, &executor);
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for i in 0..5u32 {
            let order = order.clone();
            scheduler
                .enqueue(WorkItem::new(
                    TaskPriority::Application,
                    Box::pin(async move {
                        order.lock().push(i);
                    }),
                ))
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn enqueue_after_closed_is_rejected() {
        let executor = InlineExecutor;
        let scheduler = PerActivationScheduler::spawn(false, &executor);
        scheduler.shutdown(silo_core::prelude::ShutdownMode::Immediate).await;
        let err = scheduler.enqueue(WorkItem::new(TaskPriority::Application, Box::pin(async {})));
        assert_eq!(err, Err(SchedulerError::Closed));
    }

    #[tokio::test]
    async fn application_items_rejected_once_stopped_system_items_still_run() {
        let executor = InlineExecutor;
        let scheduler = PerActivationScheduler::spawn(false, &executor);
        scheduler.stop_application_turns();
        let app_err = scheduler.enqueue(WorkItem::new(TaskPriority::Application, Box::pin(async {})));
        assert_eq!(app_err, Err(SchedulerError::ApplicationTurnsStopped));

        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        scheduler
            .enqueue(WorkItem::new(
                TaskPriority::System,
                Box::pin(async move {
                    ran2.fetch_add(1, Ordering::SeqCst);
                }),
            ))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    /// Spec §8 scenario 5: a reentrant activation admits a second turn
    /// while the first is still suspended on a subcall, and the two
    /// interleave rather than one blocking the other.
    #[tokio::test]
    async fn reentrant_activation_interleaves_suspended_turns() {
        let executor = InlineExecutor;
        let scheduler = PerActivationScheduler::spawn(true, &executor);
        let events = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let (release_r1, wait_r1) = tokio::sync::oneshot::channel::<()>();
        let events1 = events.clone();
        scheduler
            .enqueue(WorkItem::new(
                TaskPriority::Application,
                Box::pin(async move {
                    events1.lock().push("r1-start");
                    let _ = wait_r1.await;
                    events1.lock().push("r1-end");
                }),
            ))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;

        let events2 = events.clone();
        scheduler
            .enqueue(WorkItem::new(
                TaskPriority::Application,
                Box::pin(async move {
                    events2.lock().push("r2-start");
                    events2.lock().push("r2-end");
                }),
            ))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        // R2 ran to completion while R1 is still suspended on its subcall.
        assert_eq!(*events.lock(), vec!["r1-start", "r2-start", "r2-end"]);

        release_r1.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(*events.lock(), vec!["r1-start", "r2-start", "r2-end", "r1-end"]);
    }
}
