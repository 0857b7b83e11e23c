//! ResourceSet — the unit of resource exchange between actors (spec §3,
//! operations per §4.2).
//!
//! Grounded on the ConcreteSet split between `core/core/ticket.py`
//! (client/broker side) and `core/core/unit_set.py` (authority side).

use crate::error::{Error, Result};
use crate::model::properties::{PropertyBag, ResourceType};
use crate::model::sliver::Sliver;
use crate::model::ticket::Ticket;
use crate::model::unit_set::UnitSet;
use crate::time::Term;

/// The concrete backing of a `ResourceSet`: a signed `Ticket` on the
/// client/broker side, a dictionary of `Unit`s on the authority side.
#[derive(Debug, Clone)]
pub enum ConcreteSet {
    Ticket(Ticket),
    Units(UnitSet),
    /// No concrete resources yet acquired (the common case before a
    /// reservation's first ticket/lease round-trip).
    Empty,
}

#[derive(Debug)]
pub struct ResourceSet {
    pub units: u64,
    pub resource_type: ResourceType,
    pub concrete: ConcreteSet,
    pub sliver: Sliver,
    pub request_properties: PropertyBag,
    pub resource_properties: PropertyBag,
    pub configuration_properties: PropertyBag,
}

impl ResourceSet {
    pub fn new(units: u64, resource_type: ResourceType) -> Self {
        ResourceSet {
            units,
            resource_type,
            concrete: ConcreteSet::Empty,
            sliver: Sliver::new(),
            request_properties: PropertyBag::new(),
            resource_properties: PropertyBag::new(),
            configuration_properties: PropertyBag::new(),
        }
    }

    pub fn with_ticket(mut self, ticket: Ticket) -> Self {
        self.concrete = ConcreteSet::Ticket(ticket);
        self
    }

    pub fn with_units(mut self, units: UnitSet) -> Self {
        self.concrete = ConcreteSet::Units(units);
        self
    }

    pub fn get_units(&self) -> u64 {
        self.units
    }

    pub fn get_type(&self) -> &ResourceType {
        &self.resource_type
    }

    pub fn get_sliver(&self) -> &Sliver {
        &self.sliver
    }

    /// Units actually held at `when`: for a ticket, via `Ticket::holding`;
    /// for a unit set, the count of non-terminal units; otherwise zero.
    pub fn get_concrete_units(&self, when: chrono::DateTime<chrono::Utc>) -> u64 {
        match &self.concrete {
            ConcreteSet::Ticket(t) => t.holding(when),
            ConcreteSet::Units(units) => units.values().filter(|u| !u.is_terminal()).count() as u64,
            ConcreteSet::Empty => 0,
        }
    }

    /// Merges `incoming` into `self`. For a ticket, delegates to
    /// `Ticket::change` (wholesale replace + old_units bookkeeping); for
    /// a unit set, delegates to `UnitSet::change` (gained/lost diff).
    pub fn update(&mut self, incoming: ResourceSet) -> Result<()> {
        self.units = incoming.units;
        self.request_properties.merge_from(&incoming.request_properties);
        self.resource_properties.merge_from(&incoming.resource_properties);
        self.configuration_properties.merge_from(&incoming.configuration_properties);

        match (&mut self.concrete, incoming.concrete) {
            (ConcreteSet::Ticket(current), ConcreteSet::Ticket(new)) => {
                current.change(new);
            }
            (ConcreteSet::Units(current), ConcreteSet::Units(new)) => {
                current.change(&new);
            }
            (slot @ ConcreteSet::Empty, new) => {
                *slot = new;
            }
            (_, ConcreteSet::Empty) => {}
            _ => return Err(Error::InvalidArgument("ResourceSet::update: mismatched ConcreteSet kinds".into())),
        }
        Ok(())
    }

    /// Triggers side-effecting configuration (substrate transfer/modify)
    /// for the concrete resources this set now holds. The actual
    /// substrate call is made by the reservation's service phase, which
    /// owns the `SubstratePlugin` handle; this is a no-op placeholder
    /// kept for API parity with spec §4.2 and overridden by callers that
    /// need it.
    pub fn service_update(&self) {}

    /// Produces a same-shape empty set (same type/sliver template, zero
    /// units, no concrete backing) — used to build outbound "reduce to
    /// nothing" updates on close.
    pub fn abstract_clone(&self) -> ResourceSet {
        ResourceSet {
            units: 0,
            resource_type: self.resource_type.clone(),
            concrete: ConcreteSet::Empty,
            sliver: self.sliver.clone(),
            request_properties: PropertyBag::new(),
            resource_properties: PropertyBag::new(),
            configuration_properties: PropertyBag::new(),
        }
    }

    /// Produces the view of this set sent over the wire in an outbound
    /// update_ticket/update_lease: same declared unit count, type and
    /// sliver, plus the `Ticket`/`UnitSet` payload itself (spec §3's
    /// "ticket-or-unit-set opaque blob" — opaque to the transport, which
    /// is out of scope per §1, but not to the receiving reservation,
    /// which needs it to resolve priming). A `UnitSet` clone shares the
    /// same underlying `Unit`s by `Arc` rather than duplicating them.
    pub fn outbound_snapshot(&self) -> ResourceSet {
        ResourceSet {
            units: self.units,
            resource_type: self.resource_type.clone(),
            concrete: self.concrete.clone(),
            sliver: self.sliver.clone(),
            request_properties: self.request_properties.clone(),
            resource_properties: self.resource_properties.clone(),
            configuration_properties: self.configuration_properties.clone(),
        }
    }

    pub fn validate_incoming(&self) -> Result<()> {
        if self.units == 0 && !matches!(self.concrete, ConcreteSet::Empty) {
            return Err(Error::InvalidArgument("incoming resource set declares zero units but carries concrete resources".into()));
        }
        Ok(())
    }

    pub fn validate_outgoing(&self) -> Result<()> {
        match &self.concrete {
            ConcreteSet::Ticket(t) if t.units != self.units => {
                Err(Error::InvalidArgument("outgoing resource set's unit count does not match its ticket".into()))
            }
            _ => Ok(()),
        }
    }

    /// Checks an incoming ticket's term against what the reservation
    /// currently expects (spec §4.2).
    pub fn validate_incoming_ticket(&self, expected_term: &Term) -> Result<()> {
        match &self.concrete {
            ConcreteSet::Ticket(t) => {
                if t.term.start() != expected_term.start() {
                    return Err(Error::InvalidTerm("incoming ticket term start does not match requested term".into()));
                }
                Ok(())
            }
            _ => Err(Error::InvalidArgument("validate_incoming_ticket called on a non-ticket resource set".into())),
        }
    }

    /// Reconciles `units` with what the concrete backing can actually
    /// support (e.g. after a deficit correction truncates a unit set).
    pub fn fix_abstract_units(&mut self) {
        if let ConcreteSet::Units(units) = &self.concrete {
            self.units = units.values().filter(|u| !u.is_terminal()).count() as u64;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.units == 0
    }

    pub fn is_closed(&self) -> bool {
        match &self.concrete {
            ConcreteSet::Units(units) => units.is_closed(),
            ConcreteSet::Empty => true,
            ConcreteSet::Ticket(_) => false,
        }
    }

    pub fn is_active(&self) -> bool {
        match &self.concrete {
            ConcreteSet::Units(units) => units.is_active(),
            ConcreteSet::Ticket(t) => t.units > 0,
            ConcreteSet::Empty => false,
        }
    }

    pub fn close(&mut self) {
        if let ConcreteSet::Units(units) = &self.concrete {
            for unit in units.values() {
                unit.transition(crate::model::unit::UnitState::Closing);
            }
        }
    }

    /// Drains units that reached a terminal state (authority side only;
    /// a no-op returning an empty vec for tickets).
    pub fn collect_released(&mut self) -> Vec<std::sync::Arc<crate::model::unit::Unit>> {
        match &mut self.concrete {
            ConcreteSet::Units(units) => units.collect_released(),
            _ => Vec::new(),
        }
    }

    /// Prepares this set for the tick's probe phase: no mutation, just a
    /// hook point kept for symmetry with `service_*` below.
    pub fn prepare_probe(&self) {}

    pub fn service_reserve_site(&mut self) {
        if let ConcreteSet::Units(units) = &self.concrete {
            for unit in units.values() {
                unit.transition(crate::model::unit::UnitState::Priming);
            }
        }
    }

    pub fn service_extend(&self) {}

    pub fn service_modify(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abstract_clone_has_zero_units_and_no_concrete() {
        let set = ResourceSet::new(4, ResourceType::new("VM"));
        let clone = set.abstract_clone();
        assert_eq!(clone.units, 0);
        assert!(matches!(clone.concrete, ConcreteSet::Empty));
    }

    #[test]
    fn validate_incoming_rejects_zero_units_with_ticket_backing() {
        let mut set = ResourceSet::new(0, ResourceType::new("VM"));
        let term = Term::new(
            chrono::DateTime::from_timestamp_millis(0).unwrap(),
            chrono::DateTime::from_timestamp_millis(1000).unwrap(),
        );
        set.concrete =
            ConcreteSet::Ticket(Ticket::new(crate::id::DelegationId::new(), "authority-a", ResourceType::new("VM"), 3, term));
        assert!(set.validate_incoming().is_err());
    }
}
