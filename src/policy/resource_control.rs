//! Authority-side resource controls (spec §4.6/§4.7), grounded on
//! `fabric_cf/actor/core/policy/resource_control.py`, `policy/vm_control.py`
//! and `policy/network_node_control.py`: per-resource-type validation of
//! a request against a node's delegated capacity minus what is already
//! allocated to other non-terminal reservations on that node.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{Error, Result};
use crate::id::ReservationId;
use crate::model::{PropertyBag, ResourceType, Sliver};

pub trait ResourceControl: Send + Sync {
    fn resource_type(&self) -> &ResourceType;

    /// Validates and reserves `units` against the named node's
    /// delegated capacity, returning a sliver annotated with any
    /// component-level labels (PCI/BDF, per §4.6).
    fn assign(&self, node_id: &str, reservation: ReservationId, units: u64, properties: &PropertyBag) -> Result<Sliver>;

    fn release(&self, node_id: &str, reservation: ReservationId, units: u64);
}

struct NodeCapacity {
    delegated: u64,
    allocated: HashMap<ReservationId, u64>,
}

/// A control for simple, fungible node capacity (VMs/cores on a
/// compute node) — no per-component placement, unlike a NIC/GPU
/// control that must resolve each request to a specific component id.
pub struct VmResourceControl {
    resource_type: ResourceType,
    nodes: RwLock<HashMap<String, NodeCapacity>>,
}

impl VmResourceControl {
    pub fn new(resource_type: ResourceType) -> Self {
        VmResourceControl { resource_type, nodes: RwLock::new(HashMap::new()) }
    }

    pub fn delegate_capacity(&self, node_id: impl Into<String>, capacity: u64) {
        let mut nodes = self.nodes.write().expect("resource control lock poisoned");
        nodes.entry(node_id.into()).or_insert_with(|| NodeCapacity { delegated: capacity, allocated: HashMap::new() }).delegated = capacity;
    }
}

impl ResourceControl for VmResourceControl {
    fn resource_type(&self) -> &ResourceType {
        &self.resource_type
    }

    fn assign(&self, node_id: &str, reservation: ReservationId, units: u64, _properties: &PropertyBag) -> Result<Sliver> {
        let mut nodes = self.nodes.write().expect("resource control lock poisoned");
        let node = nodes.get_mut(node_id).ok_or_else(|| Error::NotSupported(format!("unknown node {}", node_id)))?;
        let already_allocated: u64 = node.allocated.values().sum();
        if already_allocated + units > node.delegated {
            return Err(Error::InsufficientResources(format!(
                "node {} has {} delegated, {} already allocated, {} requested",
                node_id, node.delegated, already_allocated, units
            )));
        }
        node.allocated.insert(reservation, units);
        Ok(Sliver::with_graph_node(node_id))
    }

    fn release(&self, node_id: &str, reservation: ReservationId, _units: u64) {
        let mut nodes = self.nodes.write().expect("resource control lock poisoned");
        if let Some(node) = nodes.get_mut(node_id) {
            node.allocated.remove(&reservation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assign_rejects_over_delegated_capacity() {
        let control = VmResourceControl::new(ResourceType::new("VM"));
        control.delegate_capacity("node-1", 4);
        control.assign("node-1", ReservationId::new(), 3, &PropertyBag::new()).unwrap();
        let err = control.assign("node-1", ReservationId::new(), 2, &PropertyBag::new()).unwrap_err();
        assert!(matches!(err, Error::InsufficientResources(_)));
    }

    #[test]
    fn release_frees_previously_allocated_units() {
        let control = VmResourceControl::new(ResourceType::new("VM"));
        control.delegate_capacity("node-1", 4);
        let r = ReservationId::new();
        control.assign("node-1", r, 4, &PropertyBag::new()).unwrap();
        control.release("node-1", r, 4);
        assert!(control.assign("node-1", ReservationId::new(), 4, &PropertyBag::new()).is_ok());
    }
}
