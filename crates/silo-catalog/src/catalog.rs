//! Catalog — spec §4.5: the owner of local activation records.
//!
//! Grounded in `spark-core/src/router/mod.rs`'s pattern of a
//! `DashMap`-backed registry guarded per-key by a dedicated async
//! mutex for the slow "construct and initialize" path, rather than
//! holding a shard guard across an await.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use silo_core::prelude::{
    codes, ActivationAddress, ActivationContext, ActivationIdMinter, Attribute, CallContext, CorrelationId, ErrorCategory,
    Grain, GrainFactory, GrainId, GrainKind, MethodId, ObservabilityFacade, Result, RuntimeConfig, ShutdownMode,
    SiloAddress, SiloError, SiloStatus, TaskExecutor, TaskPriority, TimeDriver,
};
use silo_directory::prelude::LocalGrainDirectory;
use silo_directory::prelude::SingleActivationOutcome;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use crate::activation::{ActivationRecord, ActivationState};
use crate::collector::ActivationCollector;
use crate::scheduler::{PerActivationScheduler, SchedulerError, WorkItem};

struct ActivationEntry {
    record: ActivationRecord,
    scheduler: PerActivationScheduler,
    grain: AsyncMutex<Box<dyn Grain>>,
    kind: GrainKind,
}

/// Local activation table plus the machinery to create, invoke, and
/// tear down activations per spec §4.5.
pub struct Catalog {
    local_silo: SiloAddress,
    activations: DashMap<GrainId, Arc<ActivationEntry>>,
    creation_locks: DashMap<GrainId, Arc<AsyncMutex<()>>>,
    factories: DashMap<std::sync::Arc<str>, Arc<dyn GrainFactory>>,
    directory: Arc<LocalGrainDirectory>,
    collector: Arc<ActivationCollector>,
    executor: Arc<dyn TaskExecutor>,
    clock: Arc<dyn TimeDriver>,
    observability: Arc<dyn ObservabilityFacade>,
    id_minter: ActivationIdMinter,
    config: RuntimeConfig,
    outbound: DashMap<CorrelationId, (SiloAddress, tokio::sync::oneshot::Sender<()>)>,
}

impl Catalog {
    pub fn new(
        local_silo: SiloAddress,
        directory: Arc<LocalGrainDirectory>,
        collector: Arc<ActivationCollector>,
        executor: Arc<dyn TaskExecutor>,
        clock: Arc<dyn TimeDriver>,
        observability: Arc<dyn ObservabilityFacade>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            local_silo,
            activations: DashMap::new(),
            creation_locks: DashMap::new(),
            factories: DashMap::new(),
            directory,
            collector,
            executor,
            clock,
            observability,
            id_minter: ActivationIdMinter::default(),
            config,
            outbound: DashMap::new(),
        }
    }

    /// Registers an outbound request to `target` under `correlation_id`
    /// so `on_silo_status_change` can cancel it if `target` is declared
    /// dead before a reply arrives (spec §4.5 `OnSiloStatusChange`:
    /// "used to cancel outstanding operations to vanished silos").
    /// The caller must race the returned receiver against its own
    /// response future and call [`Self::untrack_outbound_call`]
    /// once the request settles either way.
    pub fn track_outbound_call(&self, correlation_id: CorrelationId, target: SiloAddress) -> tokio::sync::oneshot::Receiver<()> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.outbound.insert(correlation_id, (target, tx));
        rx
    }

    pub fn untrack_outbound_call(&self, correlation_id: CorrelationId) {
        self.outbound.remove(&correlation_id);
    }

    pub fn register_factory(&self, type_name: impl Into<std::sync::Arc<str>>, factory: Arc<dyn GrainFactory>) {
        self.factories.insert(type_name.into(), factory);
    }

    fn existing_valid(&self, grain_id: &GrainId) -> Option<ActivationAddress> {
        self.activations.get(grain_id).and_then(|entry| {
            (entry.record.state() == ActivationState::Valid).then(|| ActivationAddress {
                silo: self.local_silo,
                grain: grain_id.clone(),
                activation: entry.record.activation_id,
            })
        })
    }

    /// Spec §4.5 `GetOrCreateActivation`.
    pub async fn get_or_create_activation(&self, grain_id: &GrainId) -> Result<ActivationAddress> {
        if let Some(addr) = self.existing_valid(grain_id) {
            return Ok(addr);
        }

        let lock = self
            .creation_locks
            .entry(grain_id.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        if let Some(addr) = self.existing_valid(grain_id) {
            return Ok(addr);
        }

        let factory = self
            .factories
            .get(&grain_id.type_name)
            .ok_or_else(|| unknown_grain_type(grain_id))?
            .clone();

        let now = self.clock.now();
        let activation_id = self.id_minter.mint();
        let record = ActivationRecord::new(grain_id.clone(), activation_id, now);

        let registration = self
            .directory
            .register_single_activation(grain_id.clone(), self.local_silo, activation_id, now.0, 0)
            .await;

        let registration = match registration {
            Ok(outcome) => outcome,
            Err(err) => {
                let _ = record.transition(ActivationState::Invalid);
                return Err(err);
            }
        };

        if let SingleActivationOutcome::LostRace { winner } = registration {
            let _ = record.transition(ActivationState::Invalid);
            self.observability.event(
                "activation.creation_lost_race",
                &[Attribute::new("grain", grain_id.to_string())],
            );
            return Ok(ActivationAddress {
                silo: winner.silo,
                grain: grain_id.clone(),
                activation: winner.activation,
            });
        }

        record
            .transition(ActivationState::Activating)
            .map_err(|_| fatal_invariant(grain_id))?;

        let mut grain = factory.create(grain_id);
        let ctx = ActivationContext {
            grain_id,
            activation_id,
        };
        if let Err(err) = grain.on_activate(&ctx).await {
            self.directory.deregister(grain_id, activation_id);
            let _ = record.transition(ActivationState::Invalid);
            warn!(grain = %grain_id, error = %err, "activation init failed");
            return Err(activation_init_failed(grain_id, err));
        }

        record
            .transition(ActivationState::Valid)
            .map_err(|_| fatal_invariant(grain_id))?;

        let kind = grain.kind();
        let scheduler = PerActivationScheduler::spawn(grain.reentrant(), self.executor.as_ref());
        let entry = Arc::new(ActivationEntry {
            record,
            scheduler,
            grain: AsyncMutex::new(grain),
            kind,
        });
        self.activations.insert(grain_id.clone(), entry.clone());

        if kind != GrainKind::System {
            let age_limit = self.config.collection_age_for(&grain_id.type_name).as_millis() as u64;
            self.collector.schedule(activation_id, now, age_limit);
        }

        self.observability
            .event("activation.created", &[Attribute::new("grain", grain_id.to_string())]);

        Ok(ActivationAddress {
            silo: self.local_silo,
            grain: grain_id.clone(),
            activation: activation_id,
        })
    }

    /// Spec §4.5 `Deactivate`.
    pub async fn deactivate(&self, grain_id: &GrainId) -> Result<()> {
        let Some((_, entry)) = self.activations.remove(grain_id) else {
            return Ok(());
        };
        entry
            .record
            .transition(ActivationState::Deactivating)
            .map_err(|_| fatal_invariant(grain_id))?;

        entry
            .scheduler
            .shutdown(ShutdownMode::Drain {
                timeout: std::time::Duration::from_secs(5),
            })
            .await;

        let ctx = ActivationContext {
            grain_id,
            activation_id: entry.record.activation_id,
        };
        {
            let mut grain = entry.grain.lock().await;
            if let Err(err) = grain.on_deactivate(&ctx).await {
                warn!(grain = %grain_id, error = %err, "teardown hook failed during deactivation");
            }
        }

        self.directory.deregister(grain_id, entry.record.activation_id);
        self.collector.try_cancel(entry.record.activation_id, self.clock.now());
        entry
            .record
            .transition(ActivationState::Invalid)
            .map_err(|_| fatal_invariant(grain_id))?;
        self.observability
            .event("activation.deactivated", &[Attribute::new("grain", grain_id.to_string())]);
        Ok(())
    }

    /// Spec §4.5 `OnSiloStatusChange`: scrubs directory entries for the
    /// vanished silo and cancels every outbound call still waiting on
    /// it, rather than letting each one run out its own deadline.
    pub fn on_silo_status_change(&self, silo: SiloAddress, status: SiloStatus) {
        if status == SiloStatus::Dead {
            self.directory.partition().scrub_dead_silo(silo);
            let stale: Vec<CorrelationId> = self
                .outbound
                .iter()
                .filter(|kv| kv.value().0 == silo)
                .map(|kv| *kv.key())
                .collect();
            let cancelled = stale.len();
            for correlation_id in stale {
                if let Some((_, (_, tx))) = self.outbound.remove(&correlation_id) {
                    let _ = tx.send(());
                }
            }
            info!(silo = %silo, cancelled, "scrubbed directory entries and cancelled outstanding calls for dead silo");
        }
    }

    /// Invokes one method on a local activation's scheduler and awaits
    /// its result — spec §4.6 "message ... enqueued on its scheduler",
    /// the execution surface `silo-dispatcher` calls into after the
    /// directory has resolved a target activation.
    pub async fn invoke_activation(
        &self,
        grain_id: &GrainId,
        method: MethodId,
        args: Bytes,
        ctx: CallContext,
    ) -> Result<Bytes> {
        let entry = self
            .activations
            .get(grain_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| nonexistent_activation(grain_id))?;

        entry.record.pending_calls.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        entry.record.touch(self.clock.now());

        let (tx, rx) = tokio::sync::oneshot::channel();
        let turn_entry = entry.clone();
        let task: silo_core::prelude::BoxFuture<'static, ()> = Box::pin(async move {
            let mut guard = turn_entry.grain.lock().await;
            let result = guard.invoke(method, args, &ctx).await;
            let _ = tx.send(result);
        });
        let priority = if entry.kind == GrainKind::System {
            TaskPriority::System
        } else {
            TaskPriority::Application
        };
        if let Err(err) = entry.scheduler.enqueue(WorkItem::new(priority, task)) {
            entry.record.pending_calls.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
            return Err(scheduler_error_to_silo(err));
        }

        let result = rx.await.map_err(|_| fatal_invariant(grain_id))?;
        entry.record.pending_calls.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
        result
    }
}

fn unknown_grain_type(grain_id: &GrainId) -> SiloError {
    SiloError::new(
        codes::ACTIVATION_REJECTED,
        ErrorCategory::ActivationLifecycle,
        format!("no grain factory registered for type {}", grain_id.type_name),
    )
}

fn activation_init_failed(grain_id: &GrainId, cause: SiloError) -> SiloError {
    SiloError::new(
        codes::ACTIVATION_INIT_FAILED,
        ErrorCategory::ActivationLifecycle,
        format!("on_activate failed for {grain_id}: {cause}"),
    )
}

fn fatal_invariant(grain_id: &GrainId) -> SiloError {
    SiloError::new(
        codes::FATAL_INVARIANT_VIOLATION,
        ErrorCategory::Fatal,
        format!("illegal activation state transition observed for {grain_id}"),
    )
}

fn nonexistent_activation(grain_id: &GrainId) -> SiloError {
    SiloError::new(
        codes::NONEXISTENT_ACTIVATION,
        ErrorCategory::CacheInvalidation,
        format!("no local activation for {grain_id}"),
    )
}

fn scheduler_error_to_silo(err: SchedulerError) -> SiloError {
    match err {
        SchedulerError::Closed => SiloError::new(
            codes::NONEXISTENT_ACTIVATION,
            ErrorCategory::CacheInvalidation,
            "activation is deactivating",
        ),
        SchedulerError::ApplicationTurnsStopped => SiloError::new(
            codes::QUEUE_OVERLOADED,
            ErrorCategory::ResourceExhausted,
            "application turns are stopped on this silo",
        ),
    }
}
