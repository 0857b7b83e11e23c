//! Kernel registry — the slice table, reservation set, and delegation
//! dictionary behind one coarse lock (spec §4.4/§5).
//!
//! Grounded on the teacher's `reservation_store.rs` (a `SlotMap`/
//! `HashMap` pair behind a single `RwLock`), generalized from one table
//! to the three tables spec §5 names as sharing "the kernel lock":
//! slice table, reservation set, delegation dictionary. Ids are already
//! globally unique `Id<T>` values minted by the aggregate constructors,
//! so a plain `HashMap` keyed by id replaces the teacher's
//! `SlotMap`-plus-name-index (there is no separate user-facing name to
//! index by here).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::delegation::Delegation;
use crate::error::{Error, Result};
use crate::id::{DelegationId, ReservationId, SliceId};
use crate::reservation::Reservation;
use crate::slice::Slice;

#[derive(Default)]
struct Tables {
    slices: HashMap<SliceId, Slice>,
    reservations: HashMap<ReservationId, Reservation>,
    delegations: HashMap<DelegationId, Delegation>,
}

/// Cloning a `Registry` shares the same underlying tables (it is itself
/// just an `Arc` handle), matching the teacher's `ReservationStore`
/// shape where the proxy and the owning thread share one store.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RwLock<Tables>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry { inner: Arc::new(RwLock::new(Tables::default())) }
    }

    pub fn add_slice(&self, slice: Slice) {
        let mut tables = self.inner.write().expect("kernel lock poisoned");
        tables.slices.insert(slice.id, slice);
    }

    pub fn with_slice<R>(&self, id: SliceId, f: impl FnOnce(&Slice) -> R) -> Result<R> {
        let tables = self.inner.read().expect("kernel lock poisoned");
        tables.slices.get(&id).map(f).ok_or_else(|| Error::SliceNotFound(id.to_string()))
    }

    pub fn with_slice_mut<R>(&self, id: SliceId, f: impl FnOnce(&mut Slice) -> R) -> Result<R> {
        let mut tables = self.inner.write().expect("kernel lock poisoned");
        tables.slices.get_mut(&id).map(f).ok_or_else(|| Error::SliceNotFound(id.to_string()))
    }

    /// `register(reservation, slice)`: inserts into the slice first, then
    /// the reservation set; rolls the slice insertion back and raises
    /// `DuplicateReservation` on a reservation-set conflict (spec §4.4).
    pub fn register(&self, reservation: Reservation) -> Result<ReservationId> {
        let id = reservation.id;
        let slice_id = reservation.slice;
        let mut tables = self.inner.write().expect("kernel lock poisoned");
        {
            let slice = tables.slices.get_mut(&slice_id).ok_or_else(|| Error::SliceNotFound(slice_id.to_string()))?;
            slice.register_reservation(id)?;
        }
        if tables.reservations.contains_key(&id) {
            if let Some(slice) = tables.slices.get_mut(&slice_id) {
                slice.unregister_reservation(&id);
            }
            return Err(Error::DuplicateReservation(id.to_string()));
        }
        tables.reservations.insert(id, reservation);
        Ok(id)
    }

    /// Unregister accepts only reservations that have reached a terminal
    /// state (Closed, Failed, CloseWait — spec §4.4).
    pub fn unregister(&self, id: ReservationId) -> Result<()> {
        let mut tables = self.inner.write().expect("kernel lock poisoned");
        let reservation = tables.reservations.get(&id).ok_or_else(|| Error::ReservationNotFound(id.to_string()))?;
        let terminal = matches!(reservation.state, crate::state::ReservationState::Closed | crate::state::ReservationState::Failed | crate::state::ReservationState::CloseWait);
        if !terminal {
            return Err(Error::InvalidState { operation: "unregister".into(), state: format!("{:?}", reservation.state) });
        }
        let slice_id = reservation.slice;
        tables.reservations.remove(&id);
        if let Some(slice) = tables.slices.get_mut(&slice_id) {
            slice.unregister_reservation(&id);
        }
        Ok(())
    }

    pub fn with_reservation<R>(&self, id: ReservationId, f: impl FnOnce(&Reservation) -> R) -> Result<R> {
        let tables = self.inner.read().expect("kernel lock poisoned");
        tables.reservations.get(&id).map(f).ok_or_else(|| Error::ReservationNotFound(id.to_string()))
    }

    pub fn with_reservation_mut<R>(&self, id: ReservationId, f: impl FnOnce(&mut Reservation) -> R) -> Result<R> {
        let mut tables = self.inner.write().expect("kernel lock poisoned");
        tables.reservations.get_mut(&id).map(f).ok_or_else(|| Error::ReservationNotFound(id.to_string()))
    }

    pub fn reservation_ids(&self) -> Vec<ReservationId> {
        let tables = self.inner.read().expect("kernel lock poisoned");
        tables.reservations.keys().copied().collect()
    }

    pub fn slice_ids(&self) -> Vec<SliceId> {
        let tables = self.inner.read().expect("kernel lock poisoned");
        tables.slices.keys().copied().collect()
    }

    pub fn add_delegation(&self, delegation: Delegation) {
        let mut tables = self.inner.write().expect("kernel lock poisoned");
        tables.delegations.insert(delegation.id, delegation);
    }

    pub fn with_delegation_mut<R>(&self, id: DelegationId, f: impl FnOnce(&mut Delegation) -> R) -> Result<R> {
        let mut tables = self.inner.write().expect("kernel lock poisoned");
        tables.delegations.get_mut(&id).map(f).ok_or_else(|| Error::DelegationNotFound(id.to_string()))
    }

    pub fn delegation_ids(&self) -> Vec<DelegationId> {
        let tables = self.inner.read().expect("kernel lock poisoned");
        tables.delegations.keys().copied().collect()
    }

    /// Ids currently in a terminal state, read ahead of `purge_terminal`
    /// so the caller can persist their removal (spec §6) before the
    /// in-memory row disappears.
    pub fn terminal_reservation_ids(&self) -> Vec<ReservationId> {
        let tables = self.inner.read().expect("kernel lock poisoned");
        tables
            .reservations
            .iter()
            .filter(|(_, r)| matches!(r.state, crate::state::ReservationState::Closed | crate::state::ReservationState::Failed))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Purges reservations that reached Closed or Failed (spec §4.4/§8
    /// Testable Property 1) and delegations that reached a terminal
    /// state. Mirrors `unregister`'s slice-membership cleanup so a
    /// purged reservation's id does not linger in `Slice::reservations`.
    pub fn purge_terminal(&self) -> (usize, usize) {
        let mut tables = self.inner.write().expect("kernel lock poisoned");
        let terminal_ids: Vec<(ReservationId, SliceId)> = tables
            .reservations
            .iter()
            .filter(|(_, r)| matches!(r.state, crate::state::ReservationState::Closed | crate::state::ReservationState::Failed))
            .map(|(id, r)| (*id, r.slice))
            .collect();
        for (id, slice_id) in &terminal_ids {
            tables.reservations.remove(id);
            if let Some(slice) = tables.slices.get_mut(slice_id) {
                slice.unregister_reservation(id);
            }
        }
        let purged_r = terminal_ids.len();

        let before_d = tables.delegations.len();
        tables.delegations.retain(|_, d| !d.is_terminal());
        let purged_d = before_d - tables.delegations.len();

        (purged_r, purged_d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ActorId;
    use crate::model::{ResourceSet, ResourceType};
    use crate::slice::SliceKind;
    use crate::time::Term;

    fn term() -> Term {
        Term::new(chrono::DateTime::from_timestamp_millis(0).unwrap(), chrono::DateTime::from_timestamp_millis(1000).unwrap())
    }

    #[test]
    fn register_rolls_back_slice_on_duplicate_reservation_id() {
        let registry = Registry::new();
        let slice = Slice::new("S1", ActorId::new(), "proj", SliceKind::Client);
        let slice_id = slice.id;
        registry.add_slice(slice);

        let mut reservation = Reservation::new_client(slice_id, ResourceSet::new(1, ResourceType::new("T1")), term());
        let id = reservation.id;
        registry.register(reservation).unwrap();

        let mut duplicate = Reservation::new_client(slice_id, ResourceSet::new(1, ResourceType::new("T1")), term());
        duplicate.id = id;
        assert!(registry.register(duplicate).is_err());
        let reservations = registry.with_slice(slice_id, |s| s.reservations()).unwrap();
        assert_eq!(reservations.len(), 1);
    }

    #[test]
    fn unregister_rejects_non_terminal_reservation() {
        let registry = Registry::new();
        let slice = Slice::new("S1", ActorId::new(), "proj", SliceKind::Client);
        let slice_id = slice.id;
        registry.add_slice(slice);
        let reservation = Reservation::new_client(slice_id, ResourceSet::new(1, ResourceType::new("T1")), term());
        let id = registry.register(reservation).unwrap();
        assert!(registry.unregister(id).is_err());
    }

    #[test]
    fn purge_terminal_also_drops_slice_membership() {
        let registry = Registry::new();
        let slice = Slice::new("S1", ActorId::new(), "proj", SliceKind::Client);
        let slice_id = slice.id;
        registry.add_slice(slice);
        let mut reservation = Reservation::new_client(slice_id, ResourceSet::new(1, ResourceType::new("T1")), term());
        reservation.transition("force closed", crate::state::ReservationState::Closed, crate::state::PendingState::None);
        let id = registry.register(reservation).unwrap();

        let (purged_r, _) = registry.purge_terminal();
        assert_eq!(purged_r, 1);
        assert!(registry.with_reservation(id, |_| ()).is_err());
        let reservations = registry.with_slice(slice_id, |s| s.reservations()).unwrap();
        assert!(reservations.is_empty());
    }
}
