//! Metrics-sink collaborator — spec §9: "module-level mutable statistics
//! counters ... moved into an explicit metrics-sink collaborator
//! injected at construction; no global mutable state in the core".
//! Grounded in `spark-core/src/observability/facade.rs`'s
//! `ObservabilityFacade` trait, trimmed to counters/gauges/events.

use std::borrow::Cow;

/// A single structured attribute attached to an event.
#[derive(Clone, Debug)]
pub struct Attribute {
    pub key: &'static str,
    pub value: Cow<'static, str>,
}

impl Attribute {
    pub fn new(key: &'static str, value: impl Into<Cow<'static, str>>) -> Self {
        Self { key, value: value.into() }
    }
}

/// Injected at construction into `Catalog`, `LocalGrainDirectory`,
/// `MessageCenter`, and `Gateway`. No component reaches for a global
/// counter; everything flows through this trait object.
pub trait ObservabilityFacade: Send + Sync + 'static {
    fn event(&self, name: &'static str, attributes: &[Attribute]);

    fn counter(&self, name: &'static str, delta: u64);

    fn gauge(&self, name: &'static str, value: f64);
}

/// Default implementation for tests and examples — mirrors the
/// teacher's `test_stubs` module of official no-op stand-ins.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObservability;

impl ObservabilityFacade for NoopObservability {
    fn event(&self, _name: &'static str, _attributes: &[Attribute]) {}
    fn counter(&self, _name: &'static str, _delta: u64) {}
    fn gauge(&self, _name: &'static str, _value: f64) {}
}

/// A facade that forwards to `tracing`, used by default outside tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObservability;

impl ObservabilityFacade for TracingObservability {
    fn event(&self, name: &'static str, attributes: &[Attribute]) {
        tracing::info!(event = name, attrs = ?attributes.iter().map(|a| (a.key, a.value.clone())).collect::<Vec<_>>());
    }

    fn counter(&self, name: &'static str, delta: u64) {
        tracing::trace!(metric = name, kind = "counter", delta);
    }

    fn gauge(&self, name: &'static str, value: f64) {
        tracing::trace!(metric = name, kind = "gauge", value);
    }
}
