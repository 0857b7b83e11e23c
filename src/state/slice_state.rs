//! C4: slice state machine (spec §3/§4.3).
//!
//! Grounded on `fabric_cf/actor/core/kernel/slice_state_machine.py`: a
//! small enum plus a `SliceOperation` table recording which states each
//! `SliceCommand` is valid from, and a pure reevaluation function driven
//! off the histogram of constituent reservation (state, pending) bins.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::state::reservation_state::{PendingState, ReservationState, StateBin};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SliceState {
    Nascent,
    Configuring,
    StableOK,
    StableError,
    Modifying,
    ModifyOK,
    ModifyError,
    Closing,
    Dead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceCommand {
    Create,
    Modify,
    ModifyAccept,
    Delete,
    Reevaluate,
}

struct SliceOperation {
    command: SliceCommand,
    valid_from: &'static [SliceState],
}

const OPERATIONS: &[SliceOperation] = &[
    SliceOperation { command: SliceCommand::Create, valid_from: &[SliceState::Nascent] },
    SliceOperation { command: SliceCommand::Modify, valid_from: &[SliceState::StableOK, SliceState::StableError] },
    SliceOperation { command: SliceCommand::ModifyAccept, valid_from: &[SliceState::Modifying] },
    SliceOperation {
        command: SliceCommand::Delete,
        valid_from: &[
            SliceState::Nascent,
            SliceState::Configuring,
            SliceState::StableOK,
            SliceState::StableError,
            SliceState::Modifying,
            SliceState::ModifyOK,
            SliceState::ModifyError,
        ],
    },
    SliceOperation {
        command: SliceCommand::Reevaluate,
        valid_from: &[
            SliceState::Nascent,
            SliceState::Configuring,
            SliceState::StableOK,
            SliceState::StableError,
            SliceState::Modifying,
            SliceState::ModifyOK,
            SliceState::ModifyError,
            SliceState::Closing,
        ],
    },
];

/// Validates that `command` may be applied from `current`, per the
/// valid-from-state guard table (spec §4.3).
pub fn guard(current: SliceState, command: SliceCommand) -> Result<()> {
    let op = OPERATIONS.iter().find(|o| o.command == command).expect("every SliceCommand has a table entry");
    if op.valid_from.contains(&current) {
        Ok(())
    } else {
        Err(Error::InvalidSliceTransition(format!("{:?} is not valid from slice state {:?}", command, current)))
    }
}

fn all_active_or_closed(bins: &[StateBin]) -> bool {
    bins.iter().all(|b| matches!(b.state, ReservationState::Active | ReservationState::Closed))
}

fn stable_error_signature(bins: &[StateBin]) -> bool {
    let no_bin_outside = bins.iter().all(|b| matches!(b.state, ReservationState::Active | ReservationState::Failed | ReservationState::Closed));
    let has_failed = bins.iter().any(|b| b.state == ReservationState::Failed);
    no_bin_outside && has_failed
}

fn terminal_signature(bins: &[StateBin]) -> bool {
    bins.iter().all(|b| matches!(b.state, ReservationState::Closed | ReservationState::CloseWait | ReservationState::Failed))
}

fn any_closing_pending(bins: &[StateBin]) -> bool {
    bins.iter().any(|b| b.pending == PendingState::Closing)
}

/// Recomputes a slice's state from the (state, pending_state) bins of
/// its constituent reservations (spec §4.3). Pure and idempotent
/// (Testable Property 5): calling it twice on the same bins from the
/// same starting state yields the same result both times.
pub fn reevaluate(current: SliceState, bins: &[StateBin]) -> SliceState {
    match current {
        SliceState::Nascent | SliceState::Configuring => {
            if all_active_or_closed(bins) {
                SliceState::StableOK
            } else if stable_error_signature(bins) {
                SliceState::StableError
            } else if terminal_signature(bins) {
                SliceState::Closing
            } else {
                SliceState::Configuring
            }
        }
        SliceState::Modifying => {
            if all_active_or_closed(bins) {
                SliceState::ModifyOK
            } else if stable_error_signature(bins) {
                SliceState::ModifyError
            } else if terminal_signature(bins) {
                SliceState::Closing
            } else {
                SliceState::Modifying
            }
        }
        SliceState::StableOK | SliceState::StableError | SliceState::ModifyOK | SliceState::ModifyError => {
            if terminal_signature(bins) && any_closing_pending(bins) {
                SliceState::Closing
            } else if terminal_signature(bins) {
                SliceState::Dead
            } else {
                current
            }
        }
        SliceState::Closing => {
            if terminal_signature(bins) {
                SliceState::Dead
            } else {
                SliceState::Closing
            }
        }
        SliceState::Dead => SliceState::Dead,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bin(state: ReservationState) -> StateBin {
        StateBin::new(state, PendingState::None)
    }

    #[test]
    fn nascent_moves_to_stable_ok_when_all_active_or_closed() {
        let bins = vec![bin(ReservationState::Active), bin(ReservationState::Closed)];
        assert_eq!(reevaluate(SliceState::Nascent, &bins), SliceState::StableOK);
    }

    #[test]
    fn nascent_moves_to_stable_error_when_any_failed() {
        let bins = vec![bin(ReservationState::Active), bin(ReservationState::Failed)];
        assert_eq!(reevaluate(SliceState::Nascent, &bins), SliceState::StableError);
    }

    #[test]
    fn stable_moves_to_dead_once_all_terminal() {
        let bins = vec![bin(ReservationState::Closed), bin(ReservationState::Closed)];
        assert_eq!(reevaluate(SliceState::StableOK, &bins), SliceState::Dead);
    }

    #[test]
    fn reevaluate_is_idempotent() {
        let bins = vec![bin(ReservationState::Active)];
        let once = reevaluate(SliceState::Nascent, &bins);
        let twice = reevaluate(once, &bins);
        assert_eq!(once, twice);
    }

    #[test]
    fn guard_rejects_modify_accept_outside_modifying() {
        assert!(guard(SliceState::StableOK, SliceCommand::ModifyAccept).is_err());
        assert!(guard(SliceState::Modifying, SliceCommand::ModifyAccept).is_ok());
    }
}
