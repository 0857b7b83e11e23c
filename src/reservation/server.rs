//! Broker/authority-side reservation transitions (spec §4.3), grounded
//! on `fabric_cf/actor/core/kernel/reservation_server.py`.
//!
//! The server-side arcs mirror the client's ticket/lease exchange from
//! the other end: `bind()` answers an incoming ticket/redeem request,
//! `generate_update_*` produces the outbound response once the policy
//! (broker or authority, §4.7) has acted.

use crate::error::{Error, Result};
use crate::id::ActorId;
use crate::model::ResourceSet;
use crate::reservation::base::{Reservation, ReservationCategory};
use crate::reservation::update_data::UpdateData;
use crate::state::{PendingState, ReservationState};
use crate::time::Term;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerAction {
    /// Hold the request pending a policy decision (broker `bind`/
    /// authority `assign`); no outbound message yet.
    AwaitPolicy,
    /// Send an update_ticket response with `approved_resources`/`approved_term`.
    SendUpdateTicket,
    /// Send an update_lease response.
    SendUpdateLease,
    /// Resend the last update sent for this pending state (duplicate
    /// request handling, spec §4.3's `handle_duplicate_request`).
    Resend,
}

fn require_server(reservation: &Reservation) -> Result<()> {
    match reservation.category() {
        ReservationCategory::Broker | ReservationCategory::Authority => Ok(()),
        ReservationCategory::Client => {
            Err(Error::InvalidState { operation: "server reservation transition".into(), state: "Client".into() })
        }
    }
}

impl Reservation {
    pub fn new_incoming_ticket(category: ReservationCategory, id: crate::id::ReservationId, slice: crate::id::SliceId, client: ActorId, requested: ResourceSet, requested_term: Term) -> Self {
        let mut r = Reservation::new_server(category, id, slice, Some(client));
        r.requested_resources = Some(requested);
        r.requested_term = Some(requested_term);
        r
    }

    /// `bind()`: a ticket (broker) or redeem (authority) request arrives.
    /// Nascent/None → Ticketed/Redeeming, awaiting the policy's decision
    /// (spec §4.3 "authority side: ... bind() → Ticketed/Redeeming →
    /// policy.bind").
    pub fn bind(&mut self) -> Result<ServerAction> {
        require_server(self)?;
        match (self.state, self.pending_state) {
            (ReservationState::Nascent, PendingState::None) => {
                self.transition("bind", ReservationState::Ticketed, PendingState::Redeeming);
                Ok(ServerAction::AwaitPolicy)
            }
            (ReservationState::Ticketed, PendingState::Redeeming) => Ok(ServerAction::AwaitPolicy),
            (state, pending) => Err(Error::InvalidState { operation: "bind".into(), state: format!("{:?}/{:?}", state, pending) }),
        }
    }

    /// Called once the policy has approved resources for a bound
    /// reservation: Ticketed/Redeeming → Ticketed/Priming (resources
    /// being primed by the substrate), then `probe_priming` resolves it.
    pub fn approve_bind(&mut self, approved: ResourceSet, approved_term: Term) -> Result<()> {
        require_server(self)?;
        if (self.state, self.pending_state) != (ReservationState::Ticketed, PendingState::Redeeming) {
            return Err(Error::InvalidState { operation: "approve_bind".into(), state: format!("{:?}/{:?}", self.state, self.pending_state) });
        }
        self.approved_resources = Some(approved);
        self.approved_term = Some(approved_term);
        self.approved = true;
        self.bid_pending = false;
        self.transition("approve_bind", ReservationState::Ticketed, PendingState::Priming);
        Ok(())
    }

    /// Probed each tick: once the concrete backing is primed (authority
    /// substrate finished, or broker ticket already concrete), the
    /// reservation becomes active and ready to answer with
    /// `update_ticket`/`update_lease`.
    pub fn probe_priming_server(&mut self, when: chrono::DateTime<chrono::Utc>) {
        if self.state == ReservationState::Ticketed && self.pending_state == PendingState::Priming {
            let has_units = self.approved_resources.as_ref().map(|r| r.get_concrete_units(when) > 0).unwrap_or(false);
            if has_units {
                self.current_resources = self.approved_resources.take();
                self.current_term = self.approved_term.take();
                self.transition("priming resolved", ReservationState::Active, PendingState::None);
            }
        }
    }

    /// Produces the outbound `update_ticket`/`update_lease` once Active,
    /// bumping the server-only outbound sequence counter and
    /// `update_count` (spec §4.5's per-channel sequence discipline), and
    /// caches a copy keyed by `is_lease` so a later duplicate
    /// ticket/redeem request can be answered by resending this exact
    /// body rather than regenerating one (spec §4.3
    /// `handle_duplicate_request`).
    pub fn generate_update(&mut self, is_lease: bool) -> Result<(ResourceSet, Term, UpdateData)> {
        require_server(self)?;
        if self.state != ReservationState::Active {
            return Err(Error::InvalidState { operation: "generate_update".into(), state: format!("{:?}", self.state) });
        }
        let resources = self.current_resources.as_ref().ok_or_else(|| Error::InvalidState { operation: "generate_update".into(), state: "no current resources".into() })?;
        let term = self.current_term.ok_or_else(|| Error::InvalidState { operation: "generate_update".into(), state: "no current term".into() })?;
        let snapshot = resources.outbound_snapshot();
        let cached = resources.outbound_snapshot();
        let update = UpdateData::new().event("update");
        let server = self.as_server_mut().unwrap();
        server.sequence_out += 1;
        server.update_count += 1;
        if is_lease {
            server.last_lease_response = Some((cached, term, update.clone()));
        } else {
            server.last_ticket_response = Some((cached, term, update.clone()));
        }
        Ok((snapshot, term, update))
    }

    /// Classifies an incoming ticket-channel request's sequence number
    /// against the highest one already seen for this reservation (spec
    /// §4.3/§4.5): advances and accepts on `Greater`, returns the cached
    /// response to resend on `Equal`, otherwise signals the caller to
    /// drop the request.
    pub fn classify_incoming_ticket(&mut self, incoming_sequence: u64) -> crate::rpc::SequenceOutcome {
        let has_pending = self.pending_state != PendingState::None;
        let server = self.as_server_mut().expect("server reservation");
        let outcome = crate::rpc::classify(incoming_sequence, server.sequence_ticket_in, has_pending);
        if outcome == crate::rpc::SequenceOutcome::Greater {
            server.sequence_ticket_in = incoming_sequence;
        }
        outcome
    }

    /// Same as `classify_incoming_ticket`, for the lease channel
    /// (redeem/extend_lease/modify_lease).
    pub fn classify_incoming_lease(&mut self, incoming_sequence: u64) -> crate::rpc::SequenceOutcome {
        let has_pending = self.pending_state != PendingState::None;
        let server = self.as_server_mut().expect("server reservation");
        let outcome = crate::rpc::classify(incoming_sequence, server.sequence_lease_in, has_pending);
        if outcome == crate::rpc::SequenceOutcome::Greater {
            server.sequence_lease_in = incoming_sequence;
        }
        outcome
    }

    pub fn last_ticket_response(&self) -> Option<(ResourceSet, Term, UpdateData)> {
        self.as_server().and_then(|s| s.last_ticket_response.as_ref()).map(|(r, t, u)| (r.outbound_snapshot(), *t, u.clone()))
    }

    pub fn last_lease_response(&self) -> Option<(ResourceSet, Term, UpdateData)> {
        self.as_server().and_then(|s| s.last_lease_response.as_ref()).map(|(r, t, u)| (r.outbound_snapshot(), *t, u.clone()))
    }

    /// `extend_broker`/`extend_authority`: Active/None → Active/ExtendingTicket
    /// mirror (server side answers the client's extend_ticket by
    /// re-entering Priming against the newly requested term).
    pub fn bind_extend(&mut self, requested: ResourceSet, requested_term: Term) -> Result<ServerAction> {
        require_server(self)?;
        if (self.state, self.pending_state) != (ReservationState::Active, PendingState::None) {
            return Err(Error::InvalidState { operation: "bind_extend".into(), state: format!("{:?}/{:?}", self.state, self.pending_state) });
        }
        self.requested_resources = Some(requested);
        self.requested_term = Some(requested_term);
        self.transition("bind_extend", ReservationState::Active, PendingState::ExtendingTicket);
        Ok(ServerAction::AwaitPolicy)
    }

    pub fn approve_extend(&mut self, approved: ResourceSet, approved_term: Term) -> Result<()> {
        require_server(self)?;
        if (self.state, self.pending_state) != (ReservationState::Active, PendingState::ExtendingTicket) {
            return Err(Error::InvalidState { operation: "approve_extend".into(), state: format!("{:?}/{:?}", self.state, self.pending_state) });
        }
        if let Some(current) = self.current_resources.as_mut() {
            current.update(approved)?;
        } else {
            self.current_resources = Some(approved);
        }
        self.current_term = Some(approved_term);
        self.transition("approve_extend", ReservationState::Active, PendingState::None);
        Ok(())
    }

    /// `bind_extend_lease`: server-side mirror of the client's
    /// `ActiveTicketed/None -> ActiveTicketed/ExtendingLease` arc (spec
    /// §4.3 "Active → optional ExtendingLease"). Active/None →
    /// Active/ExtendingLease, awaiting the policy's re-approval of the
    /// already-ticketed term/resources.
    pub fn bind_extend_lease(&mut self, requested: ResourceSet, requested_term: Term) -> Result<ServerAction> {
        require_server(self)?;
        if (self.state, self.pending_state) != (ReservationState::Active, PendingState::None) {
            return Err(Error::InvalidState { operation: "bind_extend_lease".into(), state: format!("{:?}/{:?}", self.state, self.pending_state) });
        }
        self.requested_resources = Some(requested);
        self.requested_term = Some(requested_term);
        self.transition("bind_extend_lease", ReservationState::Active, PendingState::ExtendingLease);
        Ok(ServerAction::AwaitPolicy)
    }

    pub fn approve_extend_lease(&mut self, approved: ResourceSet, approved_term: Term) -> Result<()> {
        require_server(self)?;
        if (self.state, self.pending_state) != (ReservationState::Active, PendingState::ExtendingLease) {
            return Err(Error::InvalidState { operation: "approve_extend_lease".into(), state: format!("{:?}/{:?}", self.state, self.pending_state) });
        }
        self.current_resources = Some(approved);
        self.current_term = Some(approved_term);
        self.transition("approve_extend_lease", ReservationState::Active, PendingState::None);
        Ok(())
    }

    /// `bind_modify_lease`: server-side mirror of the client's
    /// `modify_lease()` arc (spec §4.3 "Active → optional ... ModifyingLease").
    /// Active/None → Active/ModifyingLease, awaiting the policy's
    /// approval of the resized resource request.
    pub fn bind_modify_lease(&mut self, requested: ResourceSet) -> Result<ServerAction> {
        require_server(self)?;
        if (self.state, self.pending_state) != (ReservationState::Active, PendingState::None) {
            return Err(Error::InvalidState { operation: "bind_modify_lease".into(), state: format!("{:?}/{:?}", self.state, self.pending_state) });
        }
        self.requested_resources = Some(requested);
        self.transition("bind_modify_lease", ReservationState::Active, PendingState::ModifyingLease);
        Ok(ServerAction::AwaitPolicy)
    }

    pub fn approve_modify_lease(&mut self, approved: ResourceSet) -> Result<()> {
        require_server(self)?;
        if (self.state, self.pending_state) != (ReservationState::Active, PendingState::ModifyingLease) {
            return Err(Error::InvalidState { operation: "approve_modify_lease".into(), state: format!("{:?}/{:?}", self.state, self.pending_state) });
        }
        self.current_resources = Some(approved);
        self.transition("approve_modify_lease", ReservationState::Active, PendingState::None);
        Ok(())
    }

    /// Honors a close request from the client side: any non-terminal
    /// state → pending Closing, resolved once the substrate confirms
    /// relinquishment.
    pub fn close_request(&mut self) -> Result<()> {
        require_server(self)?;
        if !self.request_close() && !self.is_terminal() && self.pending_state != PendingState::Closing {
            return Err(Error::InvalidState { operation: "close_request".into(), state: format!("{:?}/{:?}", self.state, self.pending_state) });
        }
        Ok(())
    }

    pub fn probe_closing_server(&mut self) {
        if self.pending_state != PendingState::Closing {
            return;
        }
        // A broker holds a ticket, not a substrate-backed unit set: there
        // is nothing to wait on, so it closes as soon as it is asked.
        let resources_released = match self.category() {
            ReservationCategory::Broker => true,
            _ => self.current_resources.as_ref().map(|r| r.is_closed()).unwrap_or(true),
        };
        if resources_released {
            self.transition("relinquish", ReservationState::Closed, PendingState::None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{ReservationId, SliceId};
    use crate::model::ResourceType;

    fn term() -> Term {
        Term::new(chrono::DateTime::from_timestamp_millis(0).unwrap(), chrono::DateTime::from_timestamp_millis(1000).unwrap())
    }

    fn resources(units: u64) -> ResourceSet {
        ResourceSet::new(units, ResourceType::new("T1"))
    }

    /// A broker-granted resource set carries a ticket, per
    /// `BrokerSimpleUnitsPolicy::allocate_one`.
    fn ticketed_resources(units: u64) -> ResourceSet {
        let ticket = crate::model::Ticket::new(crate::id::DelegationId::new(), "authority-a", ResourceType::new("T1"), units, term());
        ResourceSet::new(units, ResourceType::new("T1")).with_ticket(ticket)
    }

    /// An authority-assigned resource set carries a unit set, per
    /// `AuthorityCalendarPolicy::assign`.
    fn unit_resources(units: u64) -> ResourceSet {
        let mut set = crate::model::UnitSet::new();
        for _ in 0..units {
            set.insert(std::sync::Arc::new(crate::model::unit::Unit::new(
                crate::id::UnitId::new(),
                ReservationId::new(),
                ResourceType::new("T1"),
                crate::model::Sliver::new(),
            )));
        }
        ResourceSet::new(units, ResourceType::new("T1")).with_units(set)
    }

    #[test]
    fn bind_then_approve_then_priming_reaches_active() {
        let mut r = Reservation::new_incoming_ticket(ReservationCategory::Broker, ReservationId::new(), SliceId::new(), ActorId::new(), resources(1), term());
        assert_eq!(r.bind().unwrap(), ServerAction::AwaitPolicy);
        r.approve_bind(ticketed_resources(1), term()).unwrap();
        assert_eq!(r.pending_state, PendingState::Priming);
        r.probe_priming_server(chrono::DateTime::from_timestamp_millis(0).unwrap());
        assert_eq!(r.state, ReservationState::Active);
    }

    #[test]
    fn generate_update_bumps_sequence_and_count() {
        let mut r = Reservation::new_incoming_ticket(ReservationCategory::Broker, ReservationId::new(), SliceId::new(), ActorId::new(), resources(1), term());
        r.bind().unwrap();
        r.approve_bind(ticketed_resources(1), term()).unwrap();
        r.probe_priming_server(chrono::DateTime::from_timestamp_millis(0).unwrap());
        let (_, _, update) = r.generate_update(false).unwrap();
        assert!(!update.failed);
        assert_eq!(r.as_server().unwrap().sequence_out, 1);
        assert!(r.last_ticket_response().is_some());
        assert_eq!(r.as_server().unwrap().update_count, 1);
    }

    fn active_authority_reservation() -> Reservation {
        let mut r = Reservation::new_incoming_ticket(ReservationCategory::Authority, ReservationId::new(), SliceId::new(), ActorId::new(), resources(1), term());
        r.bind().unwrap();
        r.approve_bind(unit_resources(1), term()).unwrap();
        r.probe_priming_server(chrono::DateTime::from_timestamp_millis(0).unwrap());
        r
    }

    #[test]
    fn bind_extend_lease_then_approve_returns_to_active() {
        let mut r = active_authority_reservation();
        let extended_term = Term::new(chrono::DateTime::from_timestamp_millis(0).unwrap(), chrono::DateTime::from_timestamp_millis(2000).unwrap());

        assert_eq!(r.bind_extend_lease(resources(1), extended_term).unwrap(), ServerAction::AwaitPolicy);
        assert_eq!(r.pending_state, PendingState::ExtendingLease);

        r.approve_extend_lease(resources(1), extended_term).unwrap();
        assert_eq!(r.state, ReservationState::Active);
        assert_eq!(r.pending_state, PendingState::None);
    }

    #[test]
    fn bind_modify_lease_then_approve_returns_to_active() {
        let mut r = active_authority_reservation();

        assert_eq!(r.bind_modify_lease(resources(2)).unwrap(), ServerAction::AwaitPolicy);
        assert_eq!(r.pending_state, PendingState::ModifyingLease);

        r.approve_modify_lease(resources(2)).unwrap();
        assert_eq!(r.state, ReservationState::Active);
        assert_eq!(r.pending_state, PendingState::None);
    }
}
