//! UnitSet — the authority-side `ConcreteSet` variant: a dictionary of
//! individually tracked `Unit`s keyed by id (spec §3/§4.2).
//!
//! Grounded on `fabric_cf/actor/core/core/unit_set.py`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::id::UnitId;
use crate::model::sliver::Sliver;
use crate::model::unit::{Unit, UnitState};

/// The result of `UnitSet::change`: which units were added and which
/// were dropped relative to the previous membership.
#[derive(Debug, Default)]
pub struct UnitDelta {
    pub gained: Vec<UnitId>,
    pub lost: Vec<UnitId>,
}

/// Units are held by `Arc`, so cloning a `UnitSet` shares the same
/// underlying `Unit`s rather than duplicating their state — the clone
/// taken for an outbound update (spec §4.5) observes subsequent
/// transitions made against the original.
#[derive(Debug, Default, Clone)]
pub struct UnitSet {
    units: HashMap<UnitId, Arc<Unit>>,
}

impl UnitSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn get(&self, id: &UnitId) -> Option<Arc<Unit>> {
        self.units.get(id).cloned()
    }

    pub fn insert(&mut self, unit: Arc<Unit>) {
        self.units.insert(unit.id, unit);
    }

    pub fn values(&self) -> impl Iterator<Item = &Arc<Unit>> {
        self.units.values()
    }

    /// Replaces the membership with `incoming`, reporting which units
    /// were gained and which were lost.
    pub fn change(&mut self, incoming: &UnitSet) -> UnitDelta {
        let mut delta = UnitDelta::default();

        for id in self.units.keys() {
            if !incoming.units.contains_key(id) {
                delta.lost.push(*id);
            }
        }
        for (id, unit) in &incoming.units {
            if !self.units.contains_key(id) {
                delta.gained.push(*id);
            }
            self.units.insert(*id, Arc::clone(unit));
        }
        for id in &delta.lost {
            self.units.remove(id);
        }

        delta
    }

    /// Stages a modified sliver on `unit_id`; the substrate plugin is
    /// invoked by the caller (the reservation's `service_modify`), not
    /// here — this only records the staged state.
    pub fn modify(&self, unit_id: &UnitId, modified: Sliver) -> bool {
        match self.units.get(unit_id) {
            Some(unit) => {
                unit.stage_modified_sliver(modified);
                true
            }
            None => false,
        }
    }

    /// Units that reached a terminal state since the last collection,
    /// removed from the set as they're returned.
    pub fn collect_released(&mut self) -> Vec<Arc<Unit>> {
        let released: Vec<UnitId> = self.units.values().filter(|u| u.is_terminal()).map(|u| u.id).collect();
        released.iter().filter_map(|id| self.units.remove(id)).collect()
    }

    /// Re-drives units stuck mid-action after a kernel restart: Priming
    /// units re-issue their priming action, Modifying units re-issue
    /// their staged modification, Closing units re-issue close.
    pub fn restart_actions(&self) -> Vec<(UnitId, UnitState)> {
        self.units
            .values()
            .filter(|u| matches!(u.state(), UnitState::Priming | UnitState::Modifying | UnitState::Closing))
            .map(|u| (u.id, u.state()))
            .collect()
    }

    pub fn is_active(&self) -> bool {
        !self.is_empty() && self.units.values().all(|u| matches!(u.state(), UnitState::Active))
    }

    pub fn is_closed(&self) -> bool {
        self.is_empty() || self.units.values().all(|u| u.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ReservationId;
    use crate::model::properties::ResourceType;

    fn unit() -> Arc<Unit> {
        Arc::new(Unit::new(UnitId::new(), ReservationId::new(), ResourceType::new("VM"), Sliver::new()))
    }

    #[test]
    fn change_reports_gained_and_lost() {
        let mut set = UnitSet::new();
        let a = unit();
        set.insert(Arc::clone(&a));

        let mut incoming = UnitSet::new();
        let b = unit();
        incoming.insert(Arc::clone(&b));

        let delta = set.change(&incoming);
        assert_eq!(delta.lost, vec![a.id]);
        assert_eq!(delta.gained, vec![b.id]);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn collect_released_drains_terminal_units() {
        let mut set = UnitSet::new();
        let a = unit();
        a.transition(UnitState::Closed);
        set.insert(Arc::clone(&a));
        let b = unit();
        set.insert(Arc::clone(&b));

        let released = set.collect_released();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].id, a.id);
        assert_eq!(set.len(), 1);
    }
}
