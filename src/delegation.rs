//! Delegation — a transferable offer of inventory from one actor to
//! another, backed by a graph fragment (spec §3/GLOSSARY).
//!
//! Grounded on `fabric_cf/actor/core/delegation/resource_delegation.py`
//! and `delegation/simple_resource_delegation_factory.py`: delegations
//! mirror the reservation lifecycle but with a reduced state set
//! (Nascent/Delegated/Closed/Failed) since there is no ticket/lease
//! split — a delegation either holds its graph fragment or it doesn't.

use crate::error::{Error, Result};
use crate::id::{ActorId, DelegationId, SliceId};
use crate::model::Sliver;
use crate::state::DelegationState;

/// Cycles a `Nascent` delegation may sit unfulfilled before `tick` gives
/// up waiting for `delegate()` (the reduced delegation lifecycle has no
/// priming countdown of its own; this mirrors the reservation kernel's
/// own notion of a bounded wait before failing).
const NASCENT_PROBE_LIMIT: u32 = 50;

#[derive(Debug)]
pub struct Delegation {
    pub id: DelegationId,
    pub slice: SliceId,
    pub state: DelegationState,
    pub graph: Option<Sliver>,
    pub issuer: ActorId,
    pub holder: ActorId,
    pub dirty: bool,
    nascent_probes: u32,
}

impl Delegation {
    pub fn new(id: DelegationId, slice: SliceId, issuer: ActorId, holder: ActorId) -> Self {
        Delegation { id, slice, state: DelegationState::Nascent, graph: None, issuer, holder, dirty: false, nascent_probes: 0 }
    }

    fn transition(&mut self, state: DelegationState) {
        self.state = state;
        self.dirty = true;
    }

    /// Attaches the delegated graph fragment: Nascent → Delegated.
    pub fn delegate(&mut self, graph: Sliver) -> Result<()> {
        if self.state != DelegationState::Nascent {
            return Err(Error::InvalidState { operation: "delegate".into(), state: format!("{:?}", self.state) });
        }
        self.graph = Some(graph);
        self.transition(DelegationState::Delegated);
        Ok(())
    }

    /// Extends an already-delegated fragment with additional graph
    /// content (e.g. a broker re-delegating more inventory).
    pub fn amend_delegate(&mut self, graph: Sliver) -> Result<()> {
        if self.state != DelegationState::Delegated {
            return Err(Error::InvalidState { operation: "amend_delegate".into(), state: format!("{:?}", self.state) });
        }
        self.graph = Some(graph);
        self.dirty = true;
        Ok(())
    }

    pub fn claim(&self) -> Result<&Sliver> {
        self.graph.as_ref().ok_or_else(|| Error::DelegationNotFound(self.id.to_string()))
    }

    pub fn close(&mut self) {
        if !self.state.is_terminal() {
            self.transition(DelegationState::Closed);
        }
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        log::warn!("delegation {} failed: {}", self.id, reason.into());
        self.transition(DelegationState::Failed);
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// First step of the tick's per-delegation probe (spec §4.4 "iterate
    /// delegations probing each"): ages out a delegation stuck Nascent
    /// too long without ever being delegated.
    pub fn prepare_probe(&mut self) {
        if self.state == DelegationState::Nascent {
            self.nascent_probes += 1;
            if self.nascent_probes > NASCENT_PROBE_LIMIT {
                self.fail("nascent too long without a delegate()");
            }
        }
    }

    /// True when this delegation has an outbound `update_delegation`
    /// waiting to be sent to its holder.
    pub fn probe_pending(&self) -> bool {
        self.dirty && self.state == DelegationState::Delegated
    }

    /// Produces the outbound `update_delegation` graph and clears the
    /// dirty flag, or `None` if nothing changed since the last probe.
    pub fn service_probe(&mut self) -> Option<Sliver> {
        if self.probe_pending() {
            self.dirty = false;
            self.graph.clone()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delegate_then_claim_returns_the_graph() {
        let mut d = Delegation::new(DelegationId::new(), SliceId::new(), ActorId::new(), ActorId::new());
        d.delegate(Sliver::with_graph_node("node-1")).unwrap();
        assert_eq!(d.claim().unwrap().graph_node_id.as_deref(), Some("node-1"));
    }

    #[test]
    fn delegate_twice_without_amend_fails() {
        let mut d = Delegation::new(DelegationId::new(), SliceId::new(), ActorId::new(), ActorId::new());
        d.delegate(Sliver::new()).unwrap();
        assert!(d.delegate(Sliver::new()).is_err());
        assert!(d.amend_delegate(Sliver::new()).is_ok());
    }

    #[test]
    fn close_is_idempotent() {
        let mut d = Delegation::new(DelegationId::new(), SliceId::new(), ActorId::new(), ActorId::new());
        d.close();
        assert_eq!(d.state, DelegationState::Closed);
        d.close();
        assert_eq!(d.state, DelegationState::Closed);
    }

    #[test]
    fn prepare_probe_fails_a_delegation_stuck_nascent_too_long() {
        let mut d = Delegation::new(DelegationId::new(), SliceId::new(), ActorId::new(), ActorId::new());
        for _ in 0..=NASCENT_PROBE_LIMIT {
            d.prepare_probe();
        }
        assert_eq!(d.state, DelegationState::Failed);
    }

    #[test]
    fn service_probe_clears_dirty_and_yields_the_graph_once() {
        let mut d = Delegation::new(DelegationId::new(), SliceId::new(), ActorId::new(), ActorId::new());
        d.delegate(Sliver::with_graph_node("node-1")).unwrap();
        assert!(d.probe_pending());
        let graph = d.service_probe();
        assert_eq!(graph.unwrap().graph_node_id.as_deref(), Some("node-1"));
        assert!(!d.probe_pending());
        assert!(d.service_probe().is_none());
    }
}
