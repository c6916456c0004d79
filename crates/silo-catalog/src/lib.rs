//! Local activation catalog — spec §4.4/§4.5/§4.6.
//!
//! [`catalog::Catalog`] owns activation records and is the only thing
//! that creates, invokes, or deactivates them. [`scheduler`] is the
//! per-activation FIFO turn lock each activation gets on creation.
//! [`collector`] is the bucketed time-wheel that finds idle
//! activations for the catalog to reap; it never deactivates anything
//! itself (spec §4.4).

pub mod activation;
pub mod catalog;
pub mod collector;
pub mod scheduler;

pub mod prelude {
    pub use crate::activation::{ActivationRecord, ActivationState, IllegalTransition};
    pub use crate::catalog::Catalog;
    pub use crate::collector::{ActivationCollector, ScanOutcome};
    pub use crate::scheduler::{PerActivationScheduler, SchedulerError, WorkItem};
}
