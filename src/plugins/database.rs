//! Database plugin (spec §6): add/update/remove for reservation,
//! delegation, slice; get_reservations(slice_id), get_delegation(id),
//! get_slices(id). Atomicity is per-entity — the kernel never assumes a
//! multi-entity transaction (spec §6).
//!
//! Grounded on `fabric_cf/actor/core/kernel/kernel.py`'s
//! `self.plugin.get_database().update_reservation(...)` call sites: the
//! kernel dispatcher persists a snapshot after each state-changing
//! operation (bind/extend/modify approval, close, failure, tick probe)
//! and removes the row once a reservation is purged terminal. The
//! dispatcher's own registry stays the source of truth while the actor
//! runs; `recover()` cross-checks it against `get_reservations` at
//! startup rather than reading the store back mid-tick.

use crate::delegation::Delegation;
use crate::error::Result;
use crate::id::{DelegationId, ReservationId, SliceId};
use crate::reservation::Reservation;
use crate::slice::Slice;

/// Snapshot rows the recovery path reads back at startup (spec §4.4
/// "Recovery: on startup, for each persisted reservation, the kernel
/// invokes `recover()` on it"). A real plugin would deserialize these
/// from whatever the backing store actually stores; this trait only
/// fixes the shape the kernel depends on.
pub trait DatabasePlugin: Send + Sync {
    fn add_slice(&self, slice: &Slice) -> Result<()>;
    fn update_slice(&self, slice: &Slice) -> Result<()>;
    fn remove_slice(&self, id: SliceId) -> Result<()>;
    fn get_slices(&self, id: SliceId) -> Result<Vec<SliceId>>;

    fn add_reservation(&self, reservation: &Reservation) -> Result<()>;
    fn update_reservation(&self, reservation: &Reservation) -> Result<()>;
    fn remove_reservation(&self, id: ReservationId) -> Result<()>;
    fn get_reservations(&self, slice_id: SliceId) -> Result<Vec<ReservationId>>;

    fn add_delegation(&self, delegation: &Delegation) -> Result<()>;
    fn update_delegation(&self, delegation: &Delegation) -> Result<()>;
    fn remove_delegation(&self, id: DelegationId) -> Result<()>;
    fn get_delegation(&self, id: DelegationId) -> Result<Option<DelegationId>>;
}

/// A recording-only default: tracks which ids have been persisted per
/// entity kind, without keeping the reservation/slice/delegation
/// contents themselves (the kernel's own in-memory registry is the
/// actual source of truth during a run — see `kernel::registry`).
/// Sufficient for tests asserting that persistence was invoked at the
/// right points without needing a real backing store (spec §1, out of
/// scope).
#[derive(Default)]
pub struct InMemoryDatabase {
    inner: std::sync::RwLock<InMemoryDatabaseInner>,
}

#[derive(Default)]
struct InMemoryDatabaseInner {
    slices: std::collections::HashMap<SliceId, Vec<ReservationId>>,
    reservations: std::collections::HashSet<ReservationId>,
    delegations: std::collections::HashSet<DelegationId>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DatabasePlugin for InMemoryDatabase {
    fn add_slice(&self, slice: &Slice) -> Result<()> {
        let mut inner = self.inner.write().expect("database lock poisoned");
        inner.slices.entry(slice.id).or_default();
        Ok(())
    }

    fn update_slice(&self, _slice: &Slice) -> Result<()> {
        Ok(())
    }

    fn remove_slice(&self, id: SliceId) -> Result<()> {
        self.inner.write().expect("database lock poisoned").slices.remove(&id);
        Ok(())
    }

    fn get_slices(&self, id: SliceId) -> Result<Vec<SliceId>> {
        let inner = self.inner.read().expect("database lock poisoned");
        Ok(if inner.slices.contains_key(&id) { vec![id] } else { Vec::new() })
    }

    fn add_reservation(&self, reservation: &Reservation) -> Result<()> {
        let mut inner = self.inner.write().expect("database lock poisoned");
        inner.reservations.insert(reservation.id);
        inner.slices.entry(reservation.slice).or_default().push(reservation.id);
        Ok(())
    }

    fn update_reservation(&self, _reservation: &Reservation) -> Result<()> {
        Ok(())
    }

    fn remove_reservation(&self, id: ReservationId) -> Result<()> {
        let mut inner = self.inner.write().expect("database lock poisoned");
        inner.reservations.remove(&id);
        for reservations in inner.slices.values_mut() {
            reservations.retain(|r| *r != id);
        }
        Ok(())
    }

    fn get_reservations(&self, slice_id: SliceId) -> Result<Vec<ReservationId>> {
        let inner = self.inner.read().expect("database lock poisoned");
        Ok(inner.slices.get(&slice_id).cloned().unwrap_or_default())
    }

    fn add_delegation(&self, delegation: &Delegation) -> Result<()> {
        self.inner.write().expect("database lock poisoned").delegations.insert(delegation.id);
        Ok(())
    }

    fn update_delegation(&self, _delegation: &Delegation) -> Result<()> {
        Ok(())
    }

    fn remove_delegation(&self, id: DelegationId) -> Result<()> {
        self.inner.write().expect("database lock poisoned").delegations.remove(&id);
        Ok(())
    }

    fn get_delegation(&self, id: DelegationId) -> Result<Option<DelegationId>> {
        let inner = self.inner.read().expect("database lock poisoned");
        Ok(inner.delegations.get(&id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::ActorId;
    use crate::model::{ResourceSet, ResourceType};
    use crate::slice::SliceKind;
    use crate::time::Term;

    #[test]
    fn add_then_remove_reservation_updates_slice_listing() {
        let db = InMemoryDatabase::new();
        let slice = Slice::new("S1", ActorId::new(), "proj", SliceKind::Client);
        db.add_slice(&slice).unwrap();

        let term = Term::new(chrono::DateTime::from_timestamp_millis(0).unwrap(), chrono::DateTime::from_timestamp_millis(1000).unwrap());
        let reservation = Reservation::new_client(slice.id, ResourceSet::new(1, ResourceType::new("T1")), term);
        let rid = reservation.id;
        db.add_reservation(&reservation).unwrap();
        assert_eq!(db.get_reservations(slice.id).unwrap(), vec![rid]);

        db.remove_reservation(rid).unwrap();
        assert!(db.get_reservations(slice.id).unwrap().is_empty());
    }
}
