//! C4: state machines for reservations, slices, and delegations (spec §4.3).

pub mod delegation_state;
pub mod reservation_state;
pub mod slice_state;

pub use delegation_state::DelegationState;
pub use reservation_state::{JoinState, PendingState, ReservationState, StateBin};
pub use slice_state::{SliceCommand, SliceState};
