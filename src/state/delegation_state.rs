//! C4: delegation state machine — a reduced mirror of the reservation
//! lifecycle (spec §3).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DelegationState {
    Nascent,
    Delegated,
    Closed,
    Failed,
}

impl DelegationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DelegationState::Closed | DelegationState::Failed)
    }
}
