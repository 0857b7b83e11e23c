//! Unit — a concrete, individually tracked resource instance on the
//! authority side (spec §3).
//!
//! Grounded on `fabric_cf/actor/core/core/unit.py`: each unit is guarded
//! by its own mutex so `UnitSet::modify`/`collect_released` can drive
//! many units' substrate actions independently of the reservation-level
//! lock held by the kernel dispatcher.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::id::{ReservationId, UnitId};
use crate::model::notice::Notice;
use crate::model::properties::ResourceType;
use crate::model::sliver::Sliver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitState {
    Default,
    Priming,
    Active,
    Modifying,
    Closing,
    Closed,
    Failed,
}

#[derive(Debug, Serialize, Deserialize)]
struct UnitInner {
    state: UnitState,
    sliver: Sliver,
    /// Staged sliver awaiting substrate confirmation (§4.2: "stages
    /// modified slivers").
    modified_sliver: Option<Sliver>,
    notices: Notice,
    sequence: u64,
}

/// A `Unit` is `id == reservation id` for single-unit reservations (spec
/// §3). The mutex covers the mutable inner state only; `id`/`parent_id`/
/// `resource_type` are immutable for the unit's lifetime.
#[derive(Debug)]
pub struct Unit {
    pub id: UnitId,
    pub parent_id: ReservationId,
    pub resource_type: ResourceType,
    inner: Mutex<UnitInner>,
}

impl Unit {
    pub fn new(id: UnitId, parent_id: ReservationId, resource_type: ResourceType, sliver: Sliver) -> Self {
        Unit {
            id,
            parent_id,
            resource_type,
            inner: Mutex::new(UnitInner { state: UnitState::Default, sliver, modified_sliver: None, notices: Notice::new(), sequence: 0 }),
        }
    }

    pub fn state(&self) -> UnitState {
        self.inner.lock().expect("unit mutex poisoned").state
    }

    pub fn sliver(&self) -> Sliver {
        self.inner.lock().expect("unit mutex poisoned").sliver.clone()
    }

    pub fn sequence(&self) -> u64 {
        self.inner.lock().expect("unit mutex poisoned").sequence
    }

    /// Moves the unit to `state`, bumping its sequence counter so
    /// `UnitSet::collect_released` can detect the change without a full
    /// diff (spec §4.2 supplement).
    pub fn transition(&self, state: UnitState) {
        let mut guard = self.inner.lock().expect("unit mutex poisoned");
        guard.state = state;
        guard.sequence += 1;
    }

    pub fn stage_modified_sliver(&self, sliver: Sliver) {
        let mut guard = self.inner.lock().expect("unit mutex poisoned");
        guard.modified_sliver = Some(sliver);
        guard.state = UnitState::Modifying;
        guard.sequence += 1;
    }

    /// Commits a previously staged sliver as the unit's active sliver
    /// (called once the substrate plugin reports
    /// `configuration_complete` for the modify action).
    pub fn commit_modified_sliver(&self) {
        let mut guard = self.inner.lock().expect("unit mutex poisoned");
        if let Some(sliver) = guard.modified_sliver.take() {
            guard.sliver = sliver;
        }
        guard.state = UnitState::Active;
        guard.sequence += 1;
    }

    pub fn add_notice(&self, line: impl Into<String>) {
        self.inner.lock().expect("unit mutex poisoned").notices.add(line);
    }

    pub fn notices_text(&self) -> String {
        self.inner.lock().expect("unit mutex poisoned").notices.as_text()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state(), UnitState::Closed | UnitState::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_bumps_sequence() {
        let unit = Unit::new(UnitId::new(), ReservationId::new(), ResourceType::new("VM"), Sliver::new());
        let seq0 = unit.sequence();
        unit.transition(UnitState::Priming);
        assert_eq!(unit.sequence(), seq0 + 1);
        assert_eq!(unit.state(), UnitState::Priming);
    }

    #[test]
    fn staged_sliver_is_applied_on_commit() {
        let unit = Unit::new(UnitId::new(), ReservationId::new(), ResourceType::new("VM"), Sliver::new());
        let mut staged = Sliver::new();
        staged.add_label("pci", "0000:00:1f.0");
        unit.stage_modified_sliver(staged.clone());
        assert_eq!(unit.state(), UnitState::Modifying);

        unit.commit_modified_sliver();
        assert_eq!(unit.state(), UnitState::Active);
        assert_eq!(unit.sliver().labels, staged.labels);
    }
}
