//! Error taxonomy — spec §7. Grounded in `spark-core/src/error.rs`'s
//! `CoreError` (stable code + message + optional cause + structured
//! category), trimmed to what the runtime core actually needs.

use std::borrow::Cow;
use std::fmt;

/// The seven-way error taxonomy from spec §7. Categories 1 and 2 never
/// cross the grain-call boundary; 3–6 are visible to the grain caller;
/// 7 is handled out-of-band by a fatal-error handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Silo unreachable, membership stale, hop limit not yet hit.
    TransientNetwork,
    /// `NonexistentActivation` / `MovedPartition`.
    CacheInvalidation,
    /// Queue full, load shedding.
    ResourceExhausted,
    /// Hop limit exceeded, no active silo owns the partition.
    DefiniteRouting,
    /// Exception thrown inside a grain turn.
    Application,
    /// User-supplied activation init threw.
    ActivationLifecycle,
    /// Invariant violated, corruption, unrecoverable pool state.
    Fatal,
}

impl ErrorCategory {
    /// Categories 1 and 2 are fully handled inside the runtime and must
    /// never be surfaced to a grain caller as a failed call.
    pub fn is_internal_only(self) -> bool {
        matches!(self, ErrorCategory::TransientNetwork | ErrorCategory::CacheInvalidation)
    }

    pub fn is_retryable_locally(self) -> bool {
        matches!(
            self,
            ErrorCategory::TransientNetwork | ErrorCategory::CacheInvalidation
        )
    }
}

/// Rejection categories carried on the wire — spec §6.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectionKind {
    Transient,
    Unrecoverable,
    Overloaded,
    CacheInvalidation,
}

impl RejectionKind {
    pub fn category(self) -> ErrorCategory {
        match self {
            RejectionKind::Transient => ErrorCategory::TransientNetwork,
            RejectionKind::Unrecoverable => ErrorCategory::DefiniteRouting,
            RejectionKind::Overloaded => ErrorCategory::ResourceExhausted,
            RejectionKind::CacheInvalidation => ErrorCategory::CacheInvalidation,
        }
    }
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectionKind::Transient => "transient",
            RejectionKind::Unrecoverable => "unrecoverable",
            RejectionKind::Overloaded => "overloaded",
            RejectionKind::CacheInvalidation => "cache-invalidation",
        };
        f.write_str(s)
    }
}

type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Stable, cross-crate error type: a `'static` code, a human message,
/// a structured [`ErrorCategory`], and an optional underlying cause.
#[derive(Debug)]
pub struct SiloError {
    code: &'static str,
    message: Cow<'static, str>,
    category: ErrorCategory,
    cause: Option<Cause>,
}

impl SiloError {
    pub fn new(code: &'static str, category: ErrorCategory, message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            message: message.into(),
            category,
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }
}

impl fmt::Display for SiloError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for SiloError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_ref().map(|c| c.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Stable error codes, following the teacher's `<domain>.<reason>`
/// convention (`spark-core/src/error.rs` `codes` module).
pub mod codes {
    pub const DIRECTORY_UNAVAILABLE: &str = "directory.unavailable";
    pub const HOP_LIMIT_EXCEEDED: &str = "directory.hop_limit_exceeded";
    pub const NO_PARTITION_OWNER: &str = "directory.no_partition_owner";
    pub const NONEXISTENT_ACTIVATION: &str = "dispatch.nonexistent_activation";
    pub const QUEUE_OVERLOADED: &str = "scheduler.queue_overloaded";
    pub const ACTIVATION_REJECTED: &str = "catalog.activation_rejected";
    pub const ACTIVATION_INIT_FAILED: &str = "catalog.activation_init_failed";
    pub const DEADLINE_EXCEEDED: &str = "dispatch.deadline_exceeded";
    pub const APPLICATION_ERROR: &str = "grain.application_error";
    pub const FATAL_INVARIANT_VIOLATION: &str = "runtime.fatal_invariant_violation";
}

pub type Result<T> = std::result::Result<T, SiloError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_invalidation_is_internal_only() {
        assert!(ErrorCategory::CacheInvalidation.is_internal_only());
        assert!(!ErrorCategory::Application.is_internal_only());
    }

    #[test]
    fn rejection_kind_maps_to_category() {
        assert_eq!(RejectionKind::Overloaded.category(), ErrorCategory::ResourceExhausted);
    }

    #[test]
    fn error_carries_source_chain() {
        #[derive(Debug)]
        struct Inner;
        impl fmt::Display for Inner {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("inner")
            }
        }
        impl std::error::Error for Inner {}

        let err = SiloError::new(codes::DIRECTORY_UNAVAILABLE, ErrorCategory::TransientNetwork, "unreachable")
            .with_cause(Inner);
        assert!(std::error::Error::source(&err).is_some());
    }
}
