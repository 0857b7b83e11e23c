//! Authority allocation loop (spec §4.6), grounded on
//! `fabric_cf/actor/core/policy/authority_calendar_policy.py`: `assign`
//! dispatches by resource type to a `ResourceControl`, which validates
//! capacity/labels against the node's delegated budget.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::id::UnitId;
use crate::model::unit::Unit;
use crate::model::{PropertyBag, ResourceSet, ResourceType, UnitSet};
use crate::policy::hooks::AuthorityPolicy;
use crate::policy::resource_control::ResourceControl;
use crate::reservation::Reservation;
use std::sync::Arc;

pub struct AuthorityCalendarPolicy {
    controls: HashMap<ResourceType, Box<dyn ResourceControl>>,
    /// Node each resource type places onto by default. A real deployment
    /// would consult the ARM graph (out of scope per §1); here a fixed
    /// node id per type is enough to drive assign/release end to end.
    default_nodes: HashMap<ResourceType, String>,
}

impl AuthorityCalendarPolicy {
    pub fn new() -> Self {
        AuthorityCalendarPolicy { controls: HashMap::new(), default_nodes: HashMap::new() }
    }

    pub fn add_control(&mut self, control: Box<dyn ResourceControl>, default_node: impl Into<String>) {
        let resource_type = control.resource_type().clone();
        self.default_nodes.insert(resource_type.clone(), default_node.into());
        self.controls.insert(resource_type, control);
    }

    fn control_for(&self, resource_type: &ResourceType) -> Result<&dyn ResourceControl> {
        self.controls.get(resource_type).map(|b| b.as_ref()).ok_or_else(|| Error::NotSupported(format!("no resource control for {}", resource_type)))
    }
}

impl Default for AuthorityCalendarPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthorityPolicy for AuthorityCalendarPolicy {
    fn assign(&self, reservation: &Reservation) -> Result<ResourceSet> {
        let requested = reservation.requested_resources.as_ref().ok_or_else(|| Error::InvalidArgument("reservation has no requested resources".into()))?;
        let resource_type = requested.get_type();
        let control = self.control_for(resource_type)?;
        let node_id = self.default_nodes.get(resource_type).cloned().unwrap_or_default();
        let sliver = control.assign(&node_id, reservation.id, requested.get_units(), &PropertyBag::new())?;

        let mut units = UnitSet::new();
        for _ in 0..requested.get_units() {
            units.insert(Arc::new(Unit::new(UnitId::new(), reservation.id, resource_type.clone(), sliver.clone())));
        }

        let mut assigned = ResourceSet::new(requested.get_units(), resource_type.clone()).with_units(units);
        assigned.sliver = sliver;
        Ok(assigned)
    }

    /// If fewer units were primed than requested, approve proceeding
    /// with a deficit only when the shortfall is small (spec §4.6
    /// `correct_deficit`); otherwise ask the caller to retry next tick.
    fn correct_deficit(&self, _reservation: &Reservation, held_units: u64, requested_units: u64) -> bool {
        requested_units == 0 || held_units * 2 >= requested_units
    }

    fn available(&self, _reservation: &Reservation) {}
    fn unavailable(&self, _reservation: &Reservation) {}

    fn freed(&self, reservation: &Reservation) {
        if let Some(resources) = &reservation.current_resources {
            if let Ok(control) = self.control_for(resources.get_type()) {
                let node_id = self.default_nodes.get(resources.get_type()).cloned().unwrap_or_default();
                control.release(&node_id, reservation.id, resources.get_units());
            }
        }
    }

    fn failed(&self, _reservation: &Reservation) {}
    fn recovered(&self, _reservation: &Reservation) {}

    fn release(&self, reservation: &Reservation) {
        self.freed(reservation);
    }

    fn close(&self, reservation: &Reservation) {
        self.freed(reservation);
    }

    fn configuration_complete(&self, _action: &str, _token: &str, _properties: &PropertyBag) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{ActorId, SliceId};
    use crate::policy::resource_control::VmResourceControl;
    use crate::time::Term;

    #[test]
    fn assign_then_release_round_trips_capacity() {
        let mut policy = AuthorityCalendarPolicy::new();
        let control = VmResourceControl::new(ResourceType::new("VM"));
        control.delegate_capacity("node-1", 2);
        policy.add_control(Box::new(control), "node-1");

        let term = Term::new(chrono::DateTime::from_timestamp_millis(0).unwrap(), chrono::DateTime::from_timestamp_millis(1000).unwrap());
        let mut reservation = Reservation::new_server(crate::reservation::ReservationCategory::Authority, crate::id::ReservationId::new(), SliceId::new(), Some(ActorId::new()));
        reservation.requested_resources = Some(ResourceSet::new(2, ResourceType::new("VM")));
        reservation.requested_term = Some(term);

        let assigned = policy.assign(&reservation).unwrap();
        assert_eq!(assigned.get_units(), 2);

        reservation.current_resources = Some(assigned);
        policy.close(&reservation);
    }
}
