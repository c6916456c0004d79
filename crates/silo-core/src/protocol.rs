//! Wire message envelope — spec §6. Grounded in
//! `spark-core/src/protocol.rs`'s `Message`/`Frame` pair, adapted to the
//! fields this runtime's control and data planes actually carry.

use bytes::Bytes;

use crate::ids::{ActivationId, CorrelationId, GrainId, SiloAddress};

/// Fixed forwarding cap for directory requests — spec §4.3: "a fixed
/// small constant, e.g. 6". Exceeding it is a definite routing failure,
/// never a retry target.
pub const HOP_LIMIT: u8 = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
    OneWay,
    Rejection,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InterfaceId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MethodId(pub u32);

/// One hop of directory forwarding or message routing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct HopCount(pub u8);

impl HopCount {
    pub fn increment(self) -> Option<HopCount> {
        if self.0 >= HOP_LIMIT {
            None
        } else {
            Some(HopCount(self.0 + 1))
        }
    }

    pub fn exceeds_limit(self) -> bool {
        self.0 > HOP_LIMIT
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct RetryCount(pub u8);

/// A message traveling silo-to-silo or client-to-silo. `target_silo` may
/// be unset on the first hop (spec §6): the dispatcher fills it in once
/// the directory has resolved an activation.
#[derive(Clone, Debug)]
pub struct Message {
    pub direction: Direction,
    pub sender_silo: SiloAddress,
    pub sender_grain: Option<GrainId>,
    pub target_silo: Option<SiloAddress>,
    pub target_grain: GrainId,
    pub target_activation: Option<ActivationId>,
    pub interface_id: InterfaceId,
    pub method_id: MethodId,
    pub correlation_id: CorrelationId,
    pub hop_count: HopCount,
    pub retry_count: RetryCount,
    pub cache_etag: Option<crate::ids::Etag>,
    /// Remaining budget on the sender's deadline at send time, in
    /// milliseconds — spec §5: "every outbound request carries a
    /// correlation id and a deadline." Absent on responses/rejections,
    /// which inherit the deadline context of the request they answer.
    pub deadline_remaining_ms: Option<u64>,
    pub body: Bytes,
    pub rejection: Option<RejectionInfo>,
}

/// Rejections carry a structured kind plus a human reason — spec §6.
#[derive(Clone, Debug)]
pub struct RejectionInfo {
    pub kind: crate::error::RejectionKind,
    pub reason: String,
}

impl Message {
    pub fn request(
        sender_silo: SiloAddress,
        target_grain: GrainId,
        interface_id: InterfaceId,
        method_id: MethodId,
        correlation_id: CorrelationId,
        body: Bytes,
    ) -> Self {
        Self {
            direction: Direction::Request,
            sender_silo,
            sender_grain: None,
            target_silo: None,
            target_grain,
            target_activation: None,
            interface_id,
            method_id,
            correlation_id,
            hop_count: HopCount::default(),
            retry_count: RetryCount::default(),
            cache_etag: None,
            deadline_remaining_ms: None,
            body,
            rejection: None,
        }
    }

    /// Stamps the remaining budget on `deadline` at the moment of
    /// sending, so the receiving silo can honor the same overall
    /// timeout rather than starting a fresh one (spec §5).
    pub fn with_deadline(mut self, deadline: crate::contract::Deadline) -> Self {
        self.deadline_remaining_ms = Some(deadline.remaining().as_millis() as u64);
        self
    }

    pub fn one_way(mut self) -> Self {
        self.direction = Direction::OneWay;
        self
    }

    pub fn into_response(&self, body: Bytes) -> Self {
        Self {
            direction: Direction::Response,
            sender_silo: self.target_silo.unwrap_or(self.sender_silo),
            sender_grain: Some(self.target_grain.clone()),
            target_silo: Some(self.sender_silo),
            target_grain: self.target_grain.clone(),
            target_activation: self.target_activation,
            interface_id: self.interface_id,
            method_id: self.method_id,
            correlation_id: self.correlation_id,
            hop_count: HopCount::default(),
            retry_count: RetryCount::default(),
            cache_etag: None,
            deadline_remaining_ms: None,
            body,
            rejection: None,
        }
    }

    pub fn into_rejection(&self, kind: crate::error::RejectionKind, reason: impl Into<String>) -> Self {
        Self {
            direction: Direction::Rejection,
            sender_silo: self.target_silo.unwrap_or(self.sender_silo),
            sender_grain: Some(self.target_grain.clone()),
            target_silo: Some(self.sender_silo),
            target_grain: self.target_grain.clone(),
            target_activation: self.target_activation,
            interface_id: self.interface_id,
            method_id: self.method_id,
            correlation_id: self.correlation_id,
            hop_count: HopCount::default(),
            retry_count: RetryCount::default(),
            cache_etag: self.cache_etag,
            deadline_remaining_ms: None,
            body: Bytes::new(),
            rejection: Some(RejectionInfo {
                kind,
                reason: reason.into(),
            }),
        }
    }

    pub fn is_one_way(&self) -> bool {
        matches!(self.direction, Direction::OneWay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn silo() -> SiloAddress {
        let ep: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        SiloAddress::new(ep, 1)
    }

    #[test]
    fn hop_count_refuses_beyond_limit() {
        let mut hop = HopCount(0);
        for _ in 0..HOP_LIMIT {
            hop = hop.increment().expect("within limit");
        }
        assert!(hop.increment().is_none());
    }

    #[test]
    fn response_targets_the_original_sender() {
        let grain = GrainId::new("Thermostat", "roomA");
        let req = Message::request(silo(), grain, InterfaceId(1), MethodId(1), CorrelationId(1), Bytes::new());
        let resp = req.into_response(Bytes::from_static(b"ok"));
        assert_eq!(resp.target_silo, Some(req.sender_silo));
        assert_eq!(resp.direction, Direction::Response);
    }

    #[test]
    fn rejection_preserves_cache_etag_for_invalidation() {
        let grain = GrainId::new("Thermostat", "roomA");
        let mut req = Message::request(silo(), grain, InterfaceId(1), MethodId(1), CorrelationId(1), Bytes::new());
        req.cache_etag = Some(crate::ids::Etag(7));
        let rej = req.into_rejection(crate::error::RejectionKind::CacheInvalidation, "gone");
        assert_eq!(rej.cache_etag, Some(crate::ids::Etag(7)));
    }
}
