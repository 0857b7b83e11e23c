//! C4: reservation state machine states (spec §4.3).
//!
//! Grounded on `fabric_cf/actor/core/kernel/reservation_states.py`:
//! three independent axes (state, pending state, join state) rather than
//! one flat enum, matching the original's `ReservationStates` /
//! `ReservationPendingStates` / `JoinState`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationState {
    Nascent,
    Ticketed,
    Active,
    ActiveTicketed,
    Closed,
    CloseWait,
    Failed,
}

impl ReservationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ReservationState::Closed | ReservationState::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PendingState {
    None,
    Ticketing,
    Redeeming,
    ExtendingTicket,
    ExtendingLease,
    ModifyingLease,
    Priming,
    Closing,
    AbsorbUpdate,
    SendUpdate,
}

/// Client-side only: tracks whether this reservation's sliver is ready
/// to "join" (have its configuration actions applied) and whether it is
/// waiting on predecessors in its join/redeem sets (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum JoinState {
    #[default]
    None,
    NoJoin,
    BlockedJoin,
    BlockedRedeem,
    Joining,
    BlockedTicket,
}

/// A (state, pending_state) pair — the unit the slice state machine's
/// predicates (spec §4.3) classify reservations by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateBin {
    pub state: ReservationState,
    pub pending: PendingState,
}

impl StateBin {
    pub fn new(state: ReservationState, pending: PendingState) -> Self {
        StateBin { state, pending }
    }
}
