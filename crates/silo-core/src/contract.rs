//! Per-call context: deadlines and cancellation. Grounded in
//! `spark-core/src/contract.rs`'s `Deadline`/`Cancellation`/`CallContext`
//! trio; every outbound request in this runtime carries one of these
//! (spec §5 "Cancellation and timeouts").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::ids::CorrelationId;

/// A point in time after which a call is considered timed out. Built
/// from [`Instant`] rather than wall-clock time so it is immune to
/// clock adjustments.
#[derive(Clone, Copy, Debug)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn after(duration: Duration) -> Self {
        Self(Instant::now() + duration)
    }

    pub fn at(instant: Instant) -> Self {
        Self(instant)
    }

    pub fn far_future() -> Self {
        Self(Instant::now() + Duration::from_secs(u32::MAX as u64))
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.0
    }

    pub fn remaining(&self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }
}

/// A cooperative cancellation flag shared between the caller and every
/// continuation scheduled on behalf of a call. Checked at scheduler
/// dequeue time and at explicit suspension points (spec §4.6); never
/// forcibly preempts a running turn.
#[derive(Clone, Debug)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a dispatcher, scheduler, or directory call needs to honor
/// timeouts and cancellation uniformly.
#[derive(Clone, Debug)]
pub struct CallContext {
    pub correlation_id: CorrelationId,
    pub deadline: Deadline,
    pub cancellation: Cancellation,
}

impl CallContext {
    pub fn builder(correlation_id: CorrelationId) -> CallContextBuilder {
        CallContextBuilder {
            correlation_id,
            deadline: None,
            cancellation: None,
        }
    }

    pub fn is_live(&self) -> bool {
        !self.deadline.expired() && !self.cancellation.is_cancelled()
    }
}

pub struct CallContextBuilder {
    correlation_id: CorrelationId,
    deadline: Option<Deadline>,
    cancellation: Option<Cancellation>,
}

impl CallContextBuilder {
    pub fn deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn timeout(self, duration: Duration) -> Self {
        self.deadline(Deadline::after(duration))
    }

    pub fn cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = Some(cancellation);
        self
    }

    pub fn build(self) -> CallContext {
        CallContext {
            correlation_id: self.correlation_id,
            deadline: self.deadline.unwrap_or_else(Deadline::far_future),
            cancellation: self.cancellation.unwrap_or_default(),
        }
    }
}

/// Drain-vs-stop shutdown discipline for the per-activation scheduler's
/// shared pools (spec §4.6, §5).
#[derive(Clone, Copy, Debug)]
pub enum ShutdownMode {
    /// Let currently-queued items finish, up to a bound.
    Drain { timeout: Duration },
    /// Reject everything not already running.
    Immediate,
}
