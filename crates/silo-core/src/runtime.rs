//! Runtime contract surface. `silo-core` defines these traits only; a
//! concrete executor (the `silo-runtime-tokio` crate) implements them.
//! Grounded in `spark-core/src/runtime/mod.rs`'s split of
//! `TaskExecutor` + `TimeDriver` behind one `AsyncRuntime` trait, and its
//! explicit note that runtime crates must not be named by the core.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Two priority lanes per silo — spec §4.6. System items always run;
/// application items may be dropped while "application turns stopped".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskPriority {
    System,
    Application,
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A handle to a spawned task. Dropping it does not cancel the task;
/// call [`JoinHandle::abort`] explicitly.
pub trait JoinHandle: Send {
    fn abort(&self);
}

/// Submits work to the shared thread pool backing the per-activation
/// schedulers (spec §4.6, §5: "two shared work-item pools (application,
/// system), each backed by a fixed-size worker set").
pub trait TaskExecutor: Send + Sync + 'static {
    fn spawn(&self, priority: TaskPriority, future: BoxFuture<'static, ()>) -> Box<dyn JoinHandle>;
}

/// A single point in monotonic time, immune to wall-clock adjustment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct MonotonicTimePoint(pub u64);

/// Timing primitives the collector and deadline machinery need.
pub trait TimeDriver: Send + Sync + 'static {
    fn now(&self) -> MonotonicTimePoint;

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Aggregates task scheduling and time-driving capability behind one
/// injectable handle (spec §9: "moved into an explicit ... collaborator
/// injected at construction").
pub trait AsyncRuntime: TaskExecutor + TimeDriver {}

impl<T> AsyncRuntime for T where T: TaskExecutor + TimeDriver {}
