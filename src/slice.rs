//! Slice — a named group of reservations under one owner (spec
//! §3/GLOSSARY), grounded on `fabric_cf/actor/core/kernel/slice.py`.

use crate::collections::IdSet;
use crate::error::{Error, Result};
use crate::id::{ActorId, ReservationId, SliceId};
use crate::model::PropertyBag;
use crate::state::{slice_state, SliceCommand, SliceState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceKind {
    Client,
    BrokerClient,
    Inventory,
}

#[derive(Debug)]
pub struct Slice {
    pub id: SliceId,
    pub name: String,
    pub owner: ActorId,
    pub project_id: String,
    pub kind: SliceKind,
    pub graph_id: Option<String>,
    pub config: PropertyBag,
    pub dirty: bool,
    pub state: SliceState,
    reservations: IdSet<crate::id::ReservationTag>,
}

impl Slice {
    pub fn new(name: impl Into<String>, owner: ActorId, project_id: impl Into<String>, kind: SliceKind) -> Self {
        Slice {
            id: SliceId::new(),
            name: name.into(),
            owner,
            project_id: project_id.into(),
            kind,
            graph_id: None,
            config: PropertyBag::new(),
            dirty: false,
            state: SliceState::Nascent,
            reservations: IdSet::new(),
        }
    }

    fn guard(&self, command: SliceCommand) -> Result<()> {
        slice_state::guard(self.state, command)
    }

    pub fn create(&mut self) -> Result<()> {
        self.guard(SliceCommand::Create)?;
        self.state = SliceState::Configuring;
        self.dirty = true;
        Ok(())
    }

    pub fn modify(&mut self) -> Result<()> {
        self.guard(SliceCommand::Modify)?;
        self.state = SliceState::Modifying;
        self.dirty = true;
        Ok(())
    }

    pub fn modify_accept(&mut self) -> Result<()> {
        self.guard(SliceCommand::ModifyAccept)?;
        self.dirty = true;
        Ok(())
    }

    pub fn delete(&mut self) -> Result<()> {
        self.guard(SliceCommand::Delete)?;
        self.state = SliceState::Closing;
        self.dirty = true;
        Ok(())
    }

    /// Inserts `reservation` into this slice's membership, rejecting
    /// duplicates (the kernel's `register` rolls this back on a
    /// subsequent reservation-set conflict, spec §4.4).
    pub fn register_reservation(&mut self, reservation: ReservationId) -> Result<()> {
        if !self.reservations.insert(reservation) {
            return Err(Error::DuplicateReservation(reservation.to_string()));
        }
        Ok(())
    }

    pub fn unregister_reservation(&mut self, reservation: &ReservationId) {
        self.reservations.remove(reservation);
    }

    pub fn reservations(&self) -> Vec<ReservationId> {
        self.reservations.snapshot()
    }

    /// Recomputes `state` from the supplied (state, pending_state) bins
    /// of this slice's constituent reservations (spec §4.3). Guarded by
    /// `Reevaluate`'s valid-from-state set.
    pub fn reevaluate(&mut self, bins: &[crate::state::StateBin]) -> Result<()> {
        self.guard(SliceCommand::Reevaluate)?;
        let next = slice_state::reevaluate(self.state, bins);
        if next != self.state {
            self.state = next;
            self.dirty = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{PendingState, ReservationState, StateBin};

    #[test]
    fn create_then_reevaluate_to_stable_ok() {
        let mut s = Slice::new("S1", ActorId::new(), "proj-1", SliceKind::Client);
        s.create().unwrap();
        let bins = vec![StateBin::new(ReservationState::Active, PendingState::None)];
        s.reevaluate(&bins).unwrap();
        assert_eq!(s.state, SliceState::StableOK);
    }

    #[test]
    fn register_same_reservation_twice_fails() {
        let mut s = Slice::new("S1", ActorId::new(), "proj-1", SliceKind::Client);
        let r = ReservationId::new();
        s.register_reservation(r).unwrap();
        assert!(s.register_reservation(r).is_err());
    }
}
