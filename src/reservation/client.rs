//! Client-side reservation transitions (spec §4.3), grounded on
//! `fabric_cf/actor/core/kernel/reservation_client.py`.
//!
//! Each method here corresponds to one row of the reservation state
//! table. Sequence-number bookkeeping (`sequence_ticket_in/out`,
//! `sequence_lease_in/out`) is incremented here since it travels with
//! the client-only fields; the accept/reject decision based on an
//! incoming message's sequence number is the RPC layer's job (§4.5),
//! which calls these methods only once it has decided to accept.

use crate::error::{Error, Result};
use crate::id::ActorId;
use crate::model::ResourceSet;
use crate::reservation::base::{Reservation, ReservationCategory};
use crate::reservation::update_data::UpdateData;
use crate::state::{JoinState, PendingState, ReservationState};
use crate::time::Term;

/// What the kernel/RPC layer should do next after a client-side
/// transition runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAction {
    /// No outbound message needed.
    None,
    /// Send a ticket request using `requested_resources`/`requested_term`.
    SendTicket,
    /// Send a redeem request.
    SendRedeem,
    /// Send an extend_ticket request.
    SendExtendTicket,
    /// Send an extend_lease request (ActiveTicketed re-invoking reserve).
    SendExtendLease,
    /// Send a modify_lease request.
    SendModifyLease,
    /// Send a close request toward the authority/broker.
    SendClose,
}

fn require_client(reservation: &Reservation) -> Result<()> {
    if reservation.category() != ReservationCategory::Client {
        return Err(Error::InvalidState { operation: "client reservation transition".into(), state: format!("{:?}", reservation.category()) });
    }
    Ok(())
}

impl Reservation {
    pub fn set_peers(&mut self, broker: ActorId, authority: ActorId) -> Result<()> {
        require_client(self)?;
        let client = self.as_client_mut().unwrap();
        client.broker = Some(broker);
        client.authority = Some(authority);
        Ok(())
    }

    /// `reserve()` dispatches on (state, pending): Nascent/None issues
    /// the first ticket, Ticketed/None issues redeem, ActiveTicketed/None
    /// re-invokes via extend_lease (spec §4.3).
    pub fn reserve(&mut self) -> Result<ClientAction> {
        require_client(self)?;
        match (self.state, self.pending_state) {
            (ReservationState::Nascent, PendingState::None) => {
                self.transition("reserve", ReservationState::Nascent, PendingState::Ticketing);
                self.as_client_mut().unwrap().sequence_ticket_out += 1;
                Ok(ClientAction::SendTicket)
            }
            (ReservationState::Ticketed, PendingState::None) => {
                let blocked = !self.as_client().unwrap().redeem_predecessors_satisfied();
                self.transition("reserve", ReservationState::Ticketed, PendingState::Redeeming);
                let client = self.as_client_mut().unwrap();
                client.sequence_lease_out += 1;
                client.join_state = if blocked { JoinState::BlockedRedeem } else { JoinState::None };
                Ok(ClientAction::SendRedeem)
            }
            (ReservationState::ActiveTicketed, PendingState::None) => {
                self.transition("extend_lease", ReservationState::ActiveTicketed, PendingState::ExtendingLease);
                self.as_client_mut().unwrap().sequence_lease_out += 1;
                Ok(ClientAction::SendExtendLease)
            }
            (state, pending) => {
                Err(Error::InvalidState { operation: "reserve".into(), state: format!("{:?}/{:?}", state, pending) })
            }
        }
    }

    pub fn extend_ticket(&mut self, requested_term: Term) -> Result<ClientAction> {
        require_client(self)?;
        if (self.state, self.pending_state) != (ReservationState::Active, PendingState::None) {
            return Err(Error::InvalidState { operation: "extend_ticket".into(), state: format!("{:?}/{:?}", self.state, self.pending_state) });
        }
        self.requested_term = Some(requested_term);
        self.transition("extend_ticket", ReservationState::Active, PendingState::ExtendingTicket);
        self.as_client_mut().unwrap().sequence_ticket_out += 1;
        Ok(ClientAction::SendExtendTicket)
    }

    pub fn modify_lease(&mut self, requested_resources: ResourceSet) -> Result<ClientAction> {
        require_client(self)?;
        if (self.state, self.pending_state) != (ReservationState::Active, PendingState::None) {
            return Err(Error::InvalidState { operation: "modify_lease".into(), state: format!("{:?}/{:?}", self.state, self.pending_state) });
        }
        self.requested_resources = Some(requested_resources);
        self.transition("modify_lease", ReservationState::Active, PendingState::ModifyingLease);
        self.as_client_mut().unwrap().sequence_lease_out += 1;
        Ok(ClientAction::SendModifyLease)
    }

    /// Applies an incoming `update_ticket` response. Handles both the
    /// Nascent/Ticketing → Ticketed/Priming arc and the
    /// Active/ExtendingTicket → ActiveTicketed/None arc.
    pub fn apply_ticket_update(&mut self, resources: ResourceSet, term: Term, update: UpdateData) -> Result<()> {
        require_client(self)?;
        if update.failed {
            self.fail_notify(update.message);
            return Ok(());
        }
        match (self.state, self.pending_state) {
            (ReservationState::Nascent, PendingState::Ticketing) => {
                self.current_resources = Some(resources);
                let client = self.as_client_mut().unwrap();
                client.ticket_term = Some(term);
                client.last_ticket_update = update;
                self.approved = false;
                self.pending_recover = false;
                self.transition("ticket update", ReservationState::Ticketed, PendingState::Priming);
                Ok(())
            }
            (ReservationState::Active, PendingState::ExtendingTicket) => {
                if let Some(current) = self.current_resources.as_mut() {
                    current.update(resources)?;
                } else {
                    self.current_resources = Some(resources);
                }
                let client = self.as_client_mut().unwrap();
                client.ticket_term = Some(term);
                client.last_ticket_update = update;
                self.transition("ticket update", ReservationState::ActiveTicketed, PendingState::None);
                Ok(())
            }
            (state, pending) => Err(Error::InvalidState { operation: "apply_ticket_update".into(), state: format!("{:?}/{:?}", state, pending) }),
        }
    }

    /// Resolves a `Ticketed/Priming` reservation once the client-side
    /// sliver actually has concrete units (there is no substrate plugin
    /// on the client, so priming always resolves as soon as a probe
    /// observes nonzero concrete units).
    pub fn probe_priming(&mut self, when: chrono::DateTime<chrono::Utc>) {
        if self.state == ReservationState::Ticketed && self.pending_state == PendingState::Priming {
            let has_units = self.current_resources.as_ref().map(|r| r.get_concrete_units(when) > 0).unwrap_or(false);
            if has_units {
                self.transition("priming resolved", ReservationState::Ticketed, PendingState::None);
            }
        }
    }

    /// Applies an incoming `update_lease` response: Ticketed/Redeeming →
    /// Active/BlockedJoin, and the CloseWait FIN arc → Closed.
    pub fn apply_lease_update(&mut self, resources: ResourceSet, term: Term, update: UpdateData) -> Result<ClientAction> {
        require_client(self)?;
        if update.failed {
            self.fail_notify(update.message);
            return Ok(ClientAction::None);
        }
        match (self.state, self.pending_state) {
            (ReservationState::Ticketed, PendingState::Redeeming) => {
                self.current_resources = Some(resources);
                let closed_during_redeem = {
                    let client = self.as_client_mut().unwrap();
                    client.lease_term = Some(term);
                    client.last_lease_update = update;
                    client.closed_during_redeem
                };
                self.transition("lease update", ReservationState::Active, PendingState::None);
                self.as_client_mut().unwrap().join_state = JoinState::BlockedJoin;
                if closed_during_redeem {
                    self.transition("deferred close", ReservationState::CloseWait, PendingState::Closing);
                    Ok(ClientAction::SendClose)
                } else {
                    Ok(ClientAction::None)
                }
            }
            (ReservationState::CloseWait, PendingState::Closing) => {
                self.current_resources = Some(resources.abstract_clone());
                self.as_client_mut().unwrap().lease_term = None;
                self.transition("FIN", ReservationState::Closed, PendingState::None);
                Ok(ClientAction::None)
            }
            (ReservationState::ActiveTicketed, PendingState::ExtendingLease) => {
                self.current_resources = Some(resources);
                let client = self.as_client_mut().unwrap();
                client.lease_term = Some(term);
                client.last_lease_update = update;
                self.transition("lease extended", ReservationState::Active, PendingState::None);
                Ok(ClientAction::None)
            }
            (ReservationState::Active, PendingState::ModifyingLease) => {
                self.current_resources = Some(resources);
                let client = self.as_client_mut().unwrap();
                client.lease_term = Some(term);
                client.last_lease_update = update;
                self.transition("lease modified", ReservationState::Active, PendingState::None);
                Ok(ClientAction::None)
            }
            (state, pending) => Err(Error::InvalidState { operation: "apply_lease_update".into(), state: format!("{:?}/{:?}", state, pending) }),
        }
    }

    /// Externally triggered (e.g. orchestrator UI) approval to run join
    /// configuration actions: Active/BlockedJoin → Active/None with
    /// joinstate=Joining and `service_pending=Joining`.
    pub fn approve_join(&mut self) -> Result<()> {
        require_client(self)?;
        if self.state != ReservationState::Active || self.as_client().unwrap().join_state != JoinState::BlockedJoin {
            return Err(Error::InvalidState { operation: "approve_join".into(), state: format!("{:?}", self.as_client().unwrap().join_state) });
        }
        self.as_client_mut().unwrap().join_state = JoinState::Joining;
        self.service_pending = Some(JoinState::Joining);
        self.dirty = true;
        Ok(())
    }

    /// Probed each tick while joinstate=Joining: resolves to NoJoin once
    /// the lease is concretely active, or fails the reservation if the
    /// lease collapsed to zero units (spec §4.3).
    pub fn probe_join(&mut self, when: chrono::DateTime<chrono::Utc>) {
        if self.state != ReservationState::Active || self.as_client().map(|c| c.join_state) != Some(JoinState::Joining) {
            return;
        }
        let concrete_units = self.current_resources.as_ref().map(|r| r.get_concrete_units(when)).unwrap_or(0);
        let active = self.current_resources.as_ref().map(|r| r.is_active()).unwrap_or(false);
        if concrete_units > 0 && active {
            self.as_client_mut().unwrap().join_state = JoinState::NoJoin;
            self.service_pending = None;
            self.dirty = true;
        } else if concrete_units == 0 {
            self.fail_notify("lease collapsed to zero concrete units during join");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::SliceId;
    use crate::model::ResourceType;

    fn term() -> Term {
        Term::new(chrono::DateTime::from_timestamp_millis(0).unwrap(), chrono::DateTime::from_timestamp_millis(1000).unwrap())
    }

    fn resources() -> ResourceSet {
        ResourceSet::new(1, ResourceType::new("T1"))
    }

    /// What a ticket update actually carries: a broker-issued `Ticket`
    /// (mirrors `BrokerSimpleUnitsPolicy::allocate_one`'s grant), not a
    /// bare abstract set — `probe_priming` gates on concrete units held.
    fn ticketed_resources() -> ResourceSet {
        let ticket = crate::model::Ticket::new(crate::id::DelegationId::new(), "authority-a", ResourceType::new("T1"), 1, term());
        ResourceSet::new(1, ResourceType::new("T1")).with_ticket(ticket)
    }

    /// What a lease update actually carries: the authority's `UnitSet`
    /// (mirrors `AuthorityCalendarPolicy::assign`'s grant).
    fn leased_resources() -> ResourceSet {
        let mut set = crate::model::UnitSet::new();
        set.insert(std::sync::Arc::new(crate::model::unit::Unit::new(
            crate::id::UnitId::new(),
            crate::id::ReservationId::new(),
            ResourceType::new("T1"),
            crate::model::Sliver::new(),
        )));
        ResourceSet::new(1, ResourceType::new("T1")).with_units(set)
    }

    #[test]
    fn reserve_from_nascent_issues_ticket_and_bumps_sequence() {
        let mut r = Reservation::new_client(SliceId::new(), resources(), term());
        let action = r.reserve().unwrap();
        assert_eq!(action, ClientAction::SendTicket);
        assert_eq!(r.state, ReservationState::Nascent);
        assert_eq!(r.pending_state, PendingState::Ticketing);
        assert_eq!(r.as_client().unwrap().sequence_ticket_out, 1);
    }

    #[test]
    fn ticket_update_then_redeem_drives_active() {
        let mut r = Reservation::new_client(SliceId::new(), resources(), term());
        r.reserve().unwrap();
        r.apply_ticket_update(ticketed_resources(), term(), UpdateData::new().event("ticketed")).unwrap();
        assert_eq!(r.state, ReservationState::Ticketed);
        assert_eq!(r.pending_state, PendingState::Priming);

        r.probe_priming(chrono::DateTime::from_timestamp_millis(0).unwrap());
        assert_eq!(r.pending_state, PendingState::None);

        let action = r.reserve().unwrap();
        assert_eq!(action, ClientAction::SendRedeem);
        assert_eq!(r.pending_state, PendingState::Redeeming);

        r.apply_lease_update(leased_resources(), term(), UpdateData::new().event("redeemed")).unwrap();
        assert_eq!(r.state, ReservationState::Active);
        assert_eq!(r.as_client().unwrap().join_state, JoinState::BlockedJoin);
    }

    #[test]
    fn close_during_redeem_is_deferred_then_reissued() {
        let mut r = Reservation::new_client(SliceId::new(), resources(), term());
        r.reserve().unwrap();
        r.apply_ticket_update(ticketed_resources(), term(), UpdateData::new()).unwrap();
        r.probe_priming(chrono::DateTime::from_timestamp_millis(0).unwrap());
        r.reserve().unwrap();
        assert_eq!(r.pending_state, PendingState::Redeeming);

        assert!(!r.request_close());
        assert!(r.as_client().unwrap().closed_during_redeem);

        let action = r.apply_lease_update(leased_resources(), term(), UpdateData::new()).unwrap();
        assert_eq!(action, ClientAction::SendClose);
        assert_eq!(r.state, ReservationState::CloseWait);
    }

    fn active_reservation() -> Reservation {
        let mut r = Reservation::new_client(SliceId::new(), resources(), term());
        r.reserve().unwrap();
        r.apply_ticket_update(ticketed_resources(), term(), UpdateData::new()).unwrap();
        r.probe_priming(chrono::DateTime::from_timestamp_millis(0).unwrap());
        r.reserve().unwrap();
        r.apply_lease_update(leased_resources(), term(), UpdateData::new()).unwrap();
        r
    }

    #[test]
    fn extend_ticket_then_extend_lease_returns_to_active() {
        let mut r = active_reservation();

        let extended_term = Term::new(chrono::DateTime::from_timestamp_millis(0).unwrap(), chrono::DateTime::from_timestamp_millis(2000).unwrap());
        let action = r.extend_ticket(extended_term).unwrap();
        assert_eq!(action, ClientAction::SendExtendTicket);
        assert_eq!(r.pending_state, PendingState::ExtendingTicket);

        r.apply_ticket_update(resources(), extended_term, UpdateData::new()).unwrap();
        assert_eq!(r.state, ReservationState::ActiveTicketed);
        assert_eq!(r.pending_state, PendingState::None);

        let action = r.reserve().unwrap();
        assert_eq!(action, ClientAction::SendExtendLease);
        assert_eq!(r.state, ReservationState::ActiveTicketed);
        assert_eq!(r.pending_state, PendingState::ExtendingLease);

        let action = r.apply_lease_update(resources(), extended_term, UpdateData::new()).unwrap();
        assert_eq!(action, ClientAction::None);
        assert_eq!(r.state, ReservationState::Active);
        assert_eq!(r.pending_state, PendingState::None);
    }

    #[test]
    fn modify_lease_resolves_back_to_active() {
        let mut r = active_reservation();

        let action = r.modify_lease(ResourceSet::new(2, ResourceType::new("T1"))).unwrap();
        assert_eq!(action, ClientAction::SendModifyLease);
        assert_eq!(r.pending_state, PendingState::ModifyingLease);

        let action = r.apply_lease_update(ResourceSet::new(2, ResourceType::new("T1")), term(), UpdateData::new()).unwrap();
        assert_eq!(action, ClientAction::None);
        assert_eq!(r.state, ReservationState::Active);
        assert_eq!(r.pending_state, PendingState::None);
    }
}
