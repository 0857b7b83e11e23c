//! Broker allocation loop (spec §4.6), grounded on
//! `fabric_cf/actor/core/policy/broker_simpler_units_policy.py`: a FIFO
//! bid queue serviced each cycle against a per-resource-type inventory,
//! with a within-pass tie-break map so two requests against the same
//! candidate node in one pass see each other.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{Error, Result};
use crate::id::ReservationId;
use crate::model::{PropertyBag, ResourceSet, ResourceType, Ticket};
use crate::policy::hooks::BrokerPolicy;
use crate::policy::inventory::Inventory;
use crate::reservation::Reservation;
use crate::time::Term;

/// A resolved allocation: the resources/term a request was granted, or
/// the reason it failed.
pub enum AllocationOutcome {
    Granted(ResourceSet, Term),
    InsufficientResources(String),
}

/// Picks a candidate node for a request (spec §4.6 step 4's "policy
/// hook"). The default round-robins across a fixed node list; tests and
/// real deployments can supply a different placement strategy.
pub trait NodeSelector: Send + Sync {
    fn select(&self, resource_type: &ResourceType, units: u64) -> Result<String>;
}

pub struct FixedNodeSelector {
    node_id: String,
}

impl FixedNodeSelector {
    pub fn new(node_id: impl Into<String>) -> Self {
        FixedNodeSelector { node_id: node_id.into() }
    }
}

impl NodeSelector for FixedNodeSelector {
    fn select(&self, _resource_type: &ResourceType, _units: u64) -> Result<String> {
        Ok(self.node_id.clone())
    }
}

pub struct BrokerSimpleUnitsPolicy<N: NodeSelector> {
    inventory: Inventory,
    node_selector: N,
    /// Within a single allocation pass, `node_id -> reservations already
    /// assigned there this pass` (spec §4.6's tie-break map). Reset at
    /// the start of each `allocate` call.
    pass_assignments: RwLock<HashMap<String, Vec<ReservationId>>>,
}

impl<N: NodeSelector> BrokerSimpleUnitsPolicy<N> {
    pub fn new(inventory: Inventory, node_selector: N) -> Self {
        BrokerSimpleUnitsPolicy { inventory, node_selector, pass_assignments: RwLock::new(HashMap::new()) }
    }

    pub fn begin_pass(&self) {
        self.pass_assignments.write().expect("broker policy lock poisoned").clear();
    }

    /// Services one growing request (spec §4.6 step 4): picks a
    /// candidate node, gathers this-pass assignments on it, allocates
    /// from the type's inventory, and records the assignment for
    /// subsequent requests in the same pass.
    pub fn allocate_one(&self, reservation: &Reservation) -> Result<AllocationOutcome> {
        let requested = reservation.requested_resources.as_ref().ok_or_else(|| Error::InvalidArgument("reservation has no requested resources".into()))?;
        let requested_term = reservation.requested_term.ok_or_else(|| Error::InvalidArgument("reservation has no requested term".into()))?;

        let node_id = self.node_selector.select(requested.get_type(), requested.get_units())?;
        let existing = {
            let assignments = self.pass_assignments.read().expect("broker policy lock poisoned");
            assignments.get(&node_id).cloned().unwrap_or_default()
        };

        let pool = match self.inventory.for_type(requested.get_type()) {
            Ok(pool) => pool,
            Err(e) => return Ok(AllocationOutcome::InsufficientResources(e.to_string())),
        };

        match pool.allocate(reservation.id, requested.get_units(), &existing, &PropertyBag::new()) {
            Ok((delegation, sliver)) => {
                let mut assignments = self.pass_assignments.write().expect("broker policy lock poisoned");
                assignments.entry(node_id.clone()).or_default().push(reservation.id);

                let source_authority = reservation.authority.map(|a| a.to_string()).unwrap_or(node_id);
                let ticket = Ticket::new(delegation, source_authority, requested.get_type().clone(), requested.get_units(), requested_term);
                let mut granted = ResourceSet::new(requested.get_units(), requested.get_type().clone()).with_ticket(ticket);
                granted.sliver = sliver;
                Ok(AllocationOutcome::Granted(granted, requested_term))
            }
            Err(Error::InsufficientResources(msg)) => Ok(AllocationOutcome::InsufficientResources(msg)),
            Err(e) => Err(e),
        }
    }
}

impl<N: NodeSelector> BrokerPolicy for BrokerSimpleUnitsPolicy<N> {
    fn bind(&self, reservation: &Reservation) -> Result<(ResourceSet, Term)> {
        match self.allocate_one(reservation)? {
            AllocationOutcome::Granted(resources, term) => Ok((resources, term)),
            AllocationOutcome::InsufficientResources(msg) => Err(Error::InsufficientResources(msg)),
        }
    }

    fn extend_broker(&self, reservation: &Reservation) -> Result<(ResourceSet, Term)> {
        self.bind(reservation)
    }

    fn closed(&self, reservation: &Reservation) {
        if let Some(resources) = &reservation.current_resources {
            if let Ok(pool) = self.inventory.for_type(resources.get_type()) {
                pool.release(reservation.id, resources.get_units());
            }
        }
    }

    fn formulate_bids(&self, _cycle: u64) -> Vec<ReservationId> {
        Vec::new()
    }

    fn get_closing(&self, _cycle: u64) -> Vec<ReservationId> {
        Vec::new()
    }

    fn query(&self, _properties: &PropertyBag) -> PropertyBag {
        PropertyBag::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{DelegationId, SliceId};
    use crate::policy::inventory::SimpleUnitsInventory;

    fn make_policy(capacity: u64) -> BrokerSimpleUnitsPolicy<FixedNodeSelector> {
        let mut inventory = Inventory::new();
        inventory.add(Box::new(SimpleUnitsInventory::new(ResourceType::new("T1"), DelegationId::new(), capacity)));
        BrokerSimpleUnitsPolicy::new(inventory, FixedNodeSelector::new("node-1"))
    }

    fn reservation() -> Reservation {
        let term = Term::new(chrono::DateTime::from_timestamp_millis(0).unwrap(), chrono::DateTime::from_timestamp_millis(1000).unwrap());
        Reservation::new_client(SliceId::new(), ResourceSet::new(1, ResourceType::new("T1")), term)
    }

    #[test]
    fn second_overlapping_request_fails_once_capacity_exhausted() {
        let policy = make_policy(1);
        let r1 = reservation();
        let r2 = reservation();
        assert!(matches!(policy.allocate_one(&r1).unwrap(), AllocationOutcome::Granted(_, _)));
        assert!(matches!(policy.allocate_one(&r2).unwrap(), AllocationOutcome::InsufficientResources(_)));
    }
}
