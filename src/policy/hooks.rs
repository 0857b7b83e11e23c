//! Broker and authority policy hooks (spec §4.7).
//!
//! Grounded on `fabric_cf/actor/core/policy/broker_policy.py` and
//! `policy/authority_policy.py`: thin trait surfaces the kernel calls
//! through without knowing the concrete allocation strategy, so a test
//! or a deployment can swap in a different policy without touching the
//! kernel dispatcher.

use crate::error::Result;
use crate::id::{DelegationId, ReservationId};
use crate::model::{PropertyBag, ResourceSet};
use crate::reservation::Reservation;

/// Broker-side policy (spec §4.7's `bind`/`extend_broker`/`closed`/
/// `formulate_bids`/`get_closing`/`revisit`/`revisit_delegation`/`query`).
pub trait BrokerPolicy: Send + Sync {
    /// Approves (or rejects) a bound ticket request, returning the
    /// resources/terms the broker is prepared to grant.
    fn bind(&self, reservation: &Reservation) -> Result<(ResourceSet, crate::time::Term)>;

    /// Approves an extend_ticket request analogously to `bind`.
    fn extend_broker(&self, reservation: &Reservation) -> Result<(ResourceSet, crate::time::Term)>;

    /// Notified once a reservation this policy granted has closed, so
    /// calendar bookkeeping (outlays, renewing bucket) can be released.
    fn closed(&self, reservation: &Reservation);

    /// Produces bids due for the given cycle — reservations whose
    /// request is ready to be serviced by the allocation loop (§4.6).
    fn formulate_bids(&self, cycle: u64) -> Vec<ReservationId>;

    /// Reservations scheduled to close at `cycle`.
    fn get_closing(&self, cycle: u64) -> Vec<ReservationId>;

    /// Re-evaluates a reservation already bound by this policy (e.g.
    /// after a delegation revoking its backing inventory changes) and
    /// returns the revised grant, if the reservation should be rebound.
    fn revisit(&self, _reservation: &Reservation) -> Result<Option<(ResourceSet, crate::time::Term)>> {
        Ok(None)
    }

    /// Re-evaluates a delegation this policy is tracking, mirroring
    /// `revisit` for the delegation rather than the reservation side.
    fn revisit_delegation(&self, _delegation_id: DelegationId) {}

    fn query(&self, properties: &PropertyBag) -> PropertyBag;
}

/// Authority-side policy (spec §4.7's `assign`/`correct_deficit`/
/// `available`/`unavailable`/`freed`/`failed`/`recovered`/`release`/
/// `close`/`configuration_complete`).
pub trait AuthorityPolicy: Send + Sync {
    /// Dispatches an incoming request to the resource control for its
    /// type (§4.6's authority allocation loop), producing the concrete
    /// resource set (backed by a `UnitSet`) the reservation will hold.
    fn assign(&self, reservation: &Reservation) -> Result<ResourceSet>;

    /// Called when Priming falls short of the requested unit count;
    /// returns whether the reservation should proceed Active with a
    /// deficit (`send_with_deficit`) or keep retrying next tick.
    fn correct_deficit(&self, reservation: &Reservation, held_units: u64, requested_units: u64) -> bool;

    fn available(&self, reservation: &Reservation);
    fn unavailable(&self, reservation: &Reservation);
    fn freed(&self, reservation: &Reservation);
    fn failed(&self, reservation: &Reservation);
    fn recovered(&self, reservation: &Reservation);
    fn release(&self, reservation: &Reservation);
    fn close(&self, reservation: &Reservation);

    /// Reported asynchronously by the substrate plugin once a
    /// configuration action (transfer_in/modify/transfer_out) finishes.
    fn configuration_complete(&self, action: &str, token: &str, properties: &PropertyBag);
}
