//! Peer RPC message shapes (spec §6), grounded on
//! `fabric_cf/actor/core/apis/abc_kernel_reservation.py`'s reservation
//! accessors (id/slice/resource-set/term) and the various
//! `*_avro_message.py` schemas for the request-type vocabulary:
//! field-level, transport-agnostic — the wire encoding itself is out of
//! scope per spec §1.

use crate::id::{ActorId, DelegationId, MessageId, ReservationId, SliceId};
use crate::model::{PropertyBag, ResourceSet, Sliver};
use crate::reservation::UpdateData;
use crate::time::Term;

/// The reservation payload carried by ticket/redeem/extend/modify
/// messages (spec §6: "id, slice descriptor ..., resource set ..., term").
#[derive(Debug)]
pub struct ReservationPayload {
    pub id: ReservationId,
    pub slice: SliceId,
    pub resources: ResourceSet,
    pub term: Term,
    pub config: PropertyBag,
}

#[derive(Debug)]
pub enum PeerMessage {
    Ticket { reservation: ReservationPayload },
    ExtendTicket { reservation: ReservationPayload },
    Relinquish { reservation_id: ReservationId },
    Redeem { reservation: ReservationPayload },
    ExtendLease { reservation: ReservationPayload },
    ModifyLease { reservation: ReservationPayload },
    Close { reservation_id: ReservationId },
    UpdateTicket { reservation_id: ReservationId, resources: ResourceSet, term: Term, update: UpdateData },
    UpdateLease { reservation_id: ReservationId, resources: ResourceSet, term: Term, update: UpdateData },
    UpdateDelegation { delegation_id: DelegationId, graph: Sliver, update: UpdateData },
    ClaimDelegation { delegation_id: DelegationId },
    ReclaimDelegation { delegation_id: DelegationId },
    Query { properties: PropertyBag },
    QueryResponse { properties: PropertyBag },
}

/// The envelope every peer message travels in (spec §6): message id for
/// the pending-request table, caller identity for the unauthorized-peer
/// check, and the per-channel sequence number the receiving side's
/// state machine consumes.
#[derive(Debug)]
pub struct Envelope {
    pub message_id: MessageId,
    pub caller_identity: ActorId,
    pub sequence_in: u64,
    pub callback: Option<ActorId>,
    pub body: PeerMessage,
}

impl Envelope {
    pub fn new(caller_identity: ActorId, sequence_in: u64, body: PeerMessage) -> Self {
        Envelope { message_id: MessageId::new(), caller_identity, sequence_in, callback: None, body }
    }

    pub fn with_callback(mut self, callback: ActorId) -> Self {
        self.callback = Some(callback);
        self
    }
}
