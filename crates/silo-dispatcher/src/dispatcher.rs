//! Message Center / Dispatcher — spec §4.7.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use silo_catalog::prelude::Catalog;
use silo_core::prelude::{
    codes, CallContext, CorrelationId, Deadline, ErrorCategory, GrainId, InterfaceId, Message, MethodId, RejectionKind,
    Result, RetryPolicy, RuntimeConfig, SiloAddress, SiloError,
};
use silo_directory::prelude::{rejection_for, LocalGrainDirectory};
use tracing::{debug, warn};

use crate::transport::{SiloTransport, TransportError};

/// Builds and routes request/response/one-way traffic per spec §4.7.
pub struct MessageCenter {
    local_silo: SiloAddress,
    directory: Arc<LocalGrainDirectory>,
    catalog: Arc<Catalog>,
    transport: Arc<dyn SiloTransport>,
    correlation_counter: AtomicU64,
    max_forward_count: u8,
    retry: RetryPolicy,
}

impl MessageCenter {
    pub fn new(
        local_silo: SiloAddress,
        directory: Arc<LocalGrainDirectory>,
        catalog: Arc<Catalog>,
        transport: Arc<dyn SiloTransport>,
        config: &RuntimeConfig,
    ) -> Self {
        Self {
            local_silo,
            directory,
            catalog,
            transport,
            correlation_counter: AtomicU64::new(1),
            max_forward_count: config.max_forward_count,
            retry: config.retry,
        }
    }

    fn next_correlation_id(&self) -> CorrelationId {
        CorrelationId(self.correlation_counter.fetch_add(1, Ordering::Relaxed))
    }

    /// Spec §4.3/§7: a transient or cache-invalidation rejection is
    /// retried after refreshing membership past whatever version was
    /// current when it occurred, never surfaced to the grain caller.
    /// Mirrors `LocalGrainDirectory`'s own retry-after-refresh loop one
    /// layer up, where the rejection comes back over the wire instead of
    /// from a local forwarding attempt.
    async fn wait_and_refresh(&self, observed_version: u64, attempt: u32) {
        let bound = self.retry.backoff_for(attempt, observed_version);
        let _ = self.directory.membership().refresh_at_least(observed_version + 1, bound).await;
    }

    /// Originates a two-way call to `target_grain`, resolving its
    /// location (cache → remote, spec §4.7 step 1), retrying a bounded
    /// number of times when a stale cache entry causes a
    /// `NonexistentActivation`/`MovedPartition` rejection (step 3).
    pub async fn call(
        &self,
        target_grain: GrainId,
        interface: InterfaceId,
        method: MethodId,
        body: Bytes,
        deadline: Deadline,
    ) -> Result<Bytes> {
        let mut hop_count = 0u8;
        for attempt in 1..=self.max_forward_count.max(1) {
            let observed_version = self.directory.membership().current_snapshot().version;
            let route = match self.directory.lookup(&target_grain, hop_count).await {
                Ok(route) => route,
                Err(err) if err.category() == ErrorCategory::CacheInvalidation => {
                    // Local owner, nothing registered yet: this is the
                    // activation-creation path, not a routing failure.
                    let ctx = CallContext::builder(self.next_correlation_id())
                        .deadline(deadline)
                        .build();
                    return self.invoke_local(&target_grain, method, body, ctx).await;
                }
                Err(err) => return Err(err),
            };
            hop_count = hop_count.saturating_add(1);

            let Some((silo, _activation)) = route.activations.first().copied() else {
                return Err(nonexistent_activation(&target_grain));
            };

            if silo == self.local_silo {
                let ctx = CallContext::builder(self.next_correlation_id())
                    .deadline(deadline)
                    .build();
                match self.invoke_local(&target_grain, method, body.clone(), ctx).await {
                    Ok(bytes) => return Ok(bytes),
                    Err(err) if err.category() == ErrorCategory::CacheInvalidation => {
                        self.directory.invalidate_cached(&target_grain);
                        if attempt >= self.max_forward_count {
                            return Err(err);
                        }
                        self.wait_and_refresh(observed_version, attempt).await;
                        continue;
                    }
                    Err(err) => return Err(err),
                }
            }

            let correlation_id = self.next_correlation_id();
            let mut msg = Message::request(self.local_silo, target_grain.clone(), interface, method, correlation_id, body.clone())
                .with_deadline(deadline);
            msg.target_silo = Some(silo);
            msg.cache_etag = Some(route.etag);
            msg.hop_count = silo_core::prelude::HopCount(hop_count);

            // Races the reply against the silo being declared dead
            // mid-flight (spec §4.5 `OnSiloStatusChange`), rather than
            // waiting out the full deadline for a peer that is already
            // known gone.
            let cancelled = self.catalog.track_outbound_call(correlation_id, silo);
            let outcome = tokio::select! {
                result = self.transport.send_request(silo, msg) => Some(result),
                _ = cancelled => None,
            };
            self.catalog.untrack_outbound_call(correlation_id);

            match outcome {
                None => {
                    if attempt >= self.max_forward_count {
                        return Err(directory_unavailable(&target_grain));
                    }
                    self.wait_and_refresh(observed_version, attempt).await;
                    continue;
                }
                Some(Ok(resp)) => {
                    if let Some(rejection) = resp.rejection {
                        match rejection.kind {
                            RejectionKind::CacheInvalidation => {
                                self.directory.invalidate_cached(&target_grain);
                                if attempt >= self.max_forward_count {
                                    return Err(rejection_error(&target_grain, &rejection.kind, &rejection.reason));
                                }
                                self.wait_and_refresh(observed_version, attempt).await;
                                continue;
                            }
                            // Never crosses the grain-call boundary (spec
                            // §7): retried after a membership refresh the
                            // same as a cache-invalidation rejection.
                            RejectionKind::Transient => {
                                if attempt >= self.max_forward_count {
                                    return Err(rejection_error(&target_grain, &rejection.kind, &rejection.reason));
                                }
                                self.wait_and_refresh(observed_version, attempt).await;
                                continue;
                            }
                            _ => return Err(rejection_error(&target_grain, &rejection.kind, &rejection.reason)),
                        }
                    }
                    return Ok(resp.body);
                }
                Some(Err(TransportError::Unreachable)) => {
                    if attempt >= self.max_forward_count {
                        return Err(directory_unavailable(&target_grain));
                    }
                    self.wait_and_refresh(observed_version, attempt).await;
                    continue;
                }
                Some(Err(TransportError::ResponseDropped)) => return Err(response_dropped(&target_grain)),
            }
        }
        Err(nonexistent_activation(&target_grain))
    }

    async fn invoke_local(&self, grain: &GrainId, method: MethodId, body: Bytes, ctx: CallContext) -> Result<Bytes> {
        self.catalog.get_or_create_activation(grain).await?;
        self.catalog.invoke_activation(grain, method, body, ctx).await
    }

    /// Handles an inbound [`Message`] on the receiving silo — spec
    /// §4.7 steps 2–4. Returns `None` for one-way traffic (no reply is
    /// ever sent) and `Some(response_or_rejection)` for requests.
    pub async fn handle_incoming(&self, message: Message) -> Option<Message> {
        let is_one_way = message.is_one_way();
        let ctx = CallContext::builder(message.correlation_id)
            .deadline(
                message
                    .deadline_remaining_ms
                    .map(|ms| Deadline::after(std::time::Duration::from_millis(ms)))
                    .unwrap_or_else(Deadline::far_future),
            )
            .build();

        if is_one_way {
            // Reactivate for the *next* call even if this one finds no
            // activation; never retries the one-way itself (spec §4.7
            // step 4).
            if self.catalog.get_or_create_activation(&message.target_grain).await.is_err() {
                warn!(grain = %message.target_grain, "one-way delivery dropped: activation could not be created");
                return None;
            }
            if let Err(err) = self
                .catalog
                .invoke_activation(&message.target_grain, message.method_id, message.body.clone(), ctx)
                .await
            {
                debug!(grain = %message.target_grain, error = %err, "one-way invocation failed, no retry");
            }
            return None;
        }

        match self.catalog.get_or_create_activation(&message.target_grain).await {
            Ok(_) => {}
            Err(err) => return Some(message.into_rejection(rejection_for(&err), err.to_string())),
        }

        match self
            .catalog
            .invoke_activation(&message.target_grain, message.method_id, message.body.clone(), ctx)
            .await
        {
            Ok(body) => Some(message.into_response(body)),
            Err(err) => Some(message.into_rejection(rejection_for(&err), err.to_string())),
        }
    }
}

fn nonexistent_activation(grain: &GrainId) -> SiloError {
    SiloError::new(
        codes::NONEXISTENT_ACTIVATION,
        ErrorCategory::CacheInvalidation,
        format!("no activation resolvable for {grain}"),
    )
}

fn directory_unavailable(grain: &GrainId) -> SiloError {
    SiloError::new(
        codes::DIRECTORY_UNAVAILABLE,
        ErrorCategory::TransientNetwork,
        format!("directory owner for {grain} is unreachable"),
    )
}

fn response_dropped(grain: &GrainId) -> SiloError {
    SiloError::new(
        codes::DEADLINE_EXCEEDED,
        ErrorCategory::TransientNetwork,
        format!("response channel for {grain} dropped before a reply arrived"),
    )
}

fn rejection_error(grain: &GrainId, kind: &RejectionKind, reason: &str) -> SiloError {
    SiloError::new(
        codes::APPLICATION_ERROR,
        kind.category(),
        format!("{grain}: {reason}"),
    )
}
