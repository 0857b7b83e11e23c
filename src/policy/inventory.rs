//! Broker inventory: a map from resource type to a type-specific pool
//! (spec §4.7), grounded on `fabric_cf/actor/core/policy/inventory.py`
//! and `policy/inventory_for_type.py`.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{Error, Result};
use crate::id::{DelegationId, ReservationId};
use crate::model::{PropertyBag, ResourceType, Sliver};

/// One resource-type-specific allocation pool (a flavor/pool in the
/// original's terms): tracks a delegated unit budget and hands out
/// tickets against it.
pub trait InventoryForType: Send + Sync {
    fn resource_type(&self) -> &ResourceType;

    /// Allocates `units` for `reservation` against `existing` (other
    /// reservations already placed on the same candidate node within
    /// this allocation pass, per §4.6's tie-break map), returning the
    /// delegation this ticket draws from and an optionally annotated
    /// sliver.
    fn allocate(&self, reservation: ReservationId, units: u64, existing: &[ReservationId], properties: &PropertyBag) -> Result<(DelegationId, Sliver)>;

    fn release(&self, reservation: ReservationId, units: u64);
}

/// A simple units-only pool: a fixed delegated capacity, decremented on
/// allocate and incremented on release. Sufficient to drive the S1/S6
/// scenarios (single resource type, no component-level placement).
pub struct SimpleUnitsInventory {
    resource_type: ResourceType,
    delegation: DelegationId,
    capacity: RwLock<u64>,
}

impl SimpleUnitsInventory {
    pub fn new(resource_type: ResourceType, delegation: DelegationId, capacity: u64) -> Self {
        SimpleUnitsInventory { resource_type, delegation, capacity: RwLock::new(capacity) }
    }
}

impl InventoryForType for SimpleUnitsInventory {
    fn resource_type(&self) -> &ResourceType {
        &self.resource_type
    }

    fn allocate(&self, _reservation: ReservationId, units: u64, _existing: &[ReservationId], _properties: &PropertyBag) -> Result<(DelegationId, Sliver)> {
        let mut capacity = self.capacity.write().expect("inventory lock poisoned");
        if units > *capacity {
            return Err(Error::InsufficientResources(format!("{} requested, {} available for {}", units, capacity, self.resource_type)));
        }
        *capacity -= units;
        Ok((self.delegation, Sliver::new()))
    }

    fn release(&self, _reservation: ReservationId, units: u64) {
        let mut capacity = self.capacity.write().expect("inventory lock poisoned");
        *capacity += units;
    }
}

#[derive(Default)]
pub struct Inventory {
    pools: HashMap<ResourceType, Box<dyn InventoryForType>>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, pool: Box<dyn InventoryForType>) {
        self.pools.insert(pool.resource_type().clone(), pool);
    }

    pub fn for_type(&self, resource_type: &ResourceType) -> Result<&dyn InventoryForType> {
        self.pools.get(resource_type).map(|b| b.as_ref()).ok_or_else(|| Error::NotSupported(format!("no inventory for resource type {}", resource_type)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_past_capacity_fails_with_insufficient_resources() {
        let inv = SimpleUnitsInventory::new(ResourceType::new("T1"), DelegationId::new(), 1);
        inv.allocate(ReservationId::new(), 1, &[], &PropertyBag::new()).unwrap();
        let err = inv.allocate(ReservationId::new(), 1, &[], &PropertyBag::new()).unwrap_err();
        assert!(matches!(err, Error::InsufficientResources(_)));
    }

    #[test]
    fn release_returns_capacity() {
        let inv = SimpleUnitsInventory::new(ResourceType::new("T1"), DelegationId::new(), 1);
        inv.allocate(ReservationId::new(), 1, &[], &PropertyBag::new()).unwrap();
        inv.release(ReservationId::new(), 1);
        assert!(inv.allocate(ReservationId::new(), 1, &[], &PropertyBag::new()).is_ok());
    }
}
