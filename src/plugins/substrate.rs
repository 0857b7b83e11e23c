//! Substrate plugin (authority only, spec §6): `transfer_in`,
//! `transfer_out`, `modify`, `update_props` operate on (reservation,
//! unit) pairs and trigger configuration actions asynchronously,
//! reporting completion via `configuration_complete(action, token,
//! properties)`.
//!
//! Grounded on `fabric_cf/actor/core/apis/abc_substrate.py`: the real
//! implementation dispatches to a handler subprocess (out of scope per
//! spec §1); `NullSubstrate` completes every action synchronously and
//! immediately so the authority-side Priming/Modifying/Closing arcs can
//! be exercised without a handler.

use crate::id::ReservationId;
use crate::model::{PropertyBag, Unit};
use crate::policy::AuthorityPolicy;

pub trait SubstratePlugin: Send + Sync {
    fn transfer_in(&self, reservation: ReservationId, unit: &Unit);
    fn transfer_out(&self, reservation: ReservationId, unit: &Unit);
    fn modify(&self, reservation: ReservationId, unit: &Unit);
    fn update_props(&self, reservation: ReservationId, unit: &Unit);
}

/// Completes every configuration action inline against `UnitState`
/// (no real handler subprocess): `transfer_in` moves Priming → Active,
/// `transfer_out` moves Closing → Closed, `modify` commits the staged
/// sliver. Sufficient to drive the authority-side probe/service split
/// end to end in tests.
pub struct NullSubstrate;

impl SubstratePlugin for NullSubstrate {
    fn transfer_in(&self, _reservation: ReservationId, unit: &Unit) {
        unit.transition(crate::model::unit::UnitState::Active);
    }

    fn transfer_out(&self, _reservation: ReservationId, unit: &Unit) {
        unit.transition(crate::model::unit::UnitState::Closed);
    }

    fn modify(&self, _reservation: ReservationId, unit: &Unit) {
        unit.commit_modified_sliver();
    }

    fn update_props(&self, _reservation: ReservationId, unit: &Unit) {
        unit.add_notice("properties updated");
    }
}

/// Reports a configuration action's completion back to the owning
/// policy (spec §6's `configuration_complete(action, token,
/// properties)`), keeping the substrate plugin itself free of any
/// dependency on the policy trait object's lifetime beyond this call.
pub fn report_configuration_complete(policy: &dyn AuthorityPolicy, action: &str, token: &str, properties: &PropertyBag) {
    policy.configuration_complete(action, token, properties);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{ReservationId, UnitId};
    use crate::model::sliver::Sliver;
    use crate::model::unit::UnitState;

    #[test]
    fn transfer_in_activates_the_unit() {
        let unit = Unit::new(UnitId::new(), ReservationId::new(), crate::model::ResourceType::new("VM"), Sliver::new());
        let substrate = NullSubstrate;
        substrate.transfer_in(ReservationId::new(), &unit);
        assert_eq!(unit.state(), UnitState::Active);
    }
}
