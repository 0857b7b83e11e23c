//! FailedRPC and the reservation-level failure-handling policy (spec
//! §4.5/§7), grounded on `fabric_cf/actor/core/kernel/failed_rpc.py`.

use crate::error::Error;
use crate::id::{ActorId, MessageId, ReservationId};
use crate::reservation::Reservation;
use crate::state::{PendingState, ReservationState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedRpcKind {
    NetworkError,
    ProtocolError,
    UnauthorizedPeer,
}

#[derive(Debug)]
pub struct FailedRpc {
    pub message_id: MessageId,
    pub reservation_id: ReservationId,
    pub expected_peer: ActorId,
    pub actual_peer: Option<ActorId>,
    pub kind: FailedRpcKind,
    pub details: String,
}

/// What `handle_failed_rpc` should do with the affected reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedRpcOutcome {
    Retry,
    /// CloseWait → Closed locally (lease already released) without
    /// waiting for the peer's FIN.
    CloseLocally,
    Fail,
    /// Peer identity mismatch: raise, do not mutate the reservation.
    Unauthorized,
}

/// Dispatches a `FailedRpc` against the affected reservation per spec
/// §4.5's "Reservation-level failure handling (client)" table.
pub fn handle_failed_rpc(reservation: &Reservation, failed: &FailedRpc) -> FailedRpcOutcome {
    match failed.kind {
        FailedRpcKind::UnauthorizedPeer => FailedRpcOutcome::Unauthorized,
        FailedRpcKind::NetworkError => {
            let closing = reservation.state == ReservationState::CloseWait && reservation.pending_state == PendingState::Closing;
            if closing {
                let lease_released = reservation.as_client().map(|c| c.lease_term.is_none()).unwrap_or(false);
                if lease_released {
                    FailedRpcOutcome::CloseLocally
                } else {
                    FailedRpcOutcome::Retry
                }
            } else {
                FailedRpcOutcome::Retry
            }
        }
        FailedRpcKind::ProtocolError => FailedRpcOutcome::Fail,
    }
}

pub fn classify_error(error: &Error) -> FailedRpcKind {
    match error {
        Error::NetworkError(_) => FailedRpcKind::NetworkError,
        Error::UnauthorizedPeer { .. } => FailedRpcKind::UnauthorizedPeer,
        _ => FailedRpcKind::ProtocolError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::SliceId;
    use crate::model::{ResourceSet, ResourceType};
    use crate::time::Term;

    fn reservation() -> Reservation {
        let term = Term::new(chrono::DateTime::from_timestamp_millis(0).unwrap(), chrono::DateTime::from_timestamp_millis(1000).unwrap());
        Reservation::new_client(SliceId::new(), ResourceSet::new(1, ResourceType::new("T1")), term)
    }

    fn failed(kind: FailedRpcKind) -> FailedRpc {
        FailedRpc { message_id: crate::id::MessageId::new(), reservation_id: ReservationId::new(), expected_peer: ActorId::new(), actual_peer: None, kind, details: "boom".into() }
    }

    #[test]
    fn network_error_while_not_closing_retries() {
        let r = reservation();
        assert_eq!(handle_failed_rpc(&r, &failed(FailedRpcKind::NetworkError)), FailedRpcOutcome::Retry);
    }

    #[test]
    fn protocol_error_fails_the_reservation() {
        let r = reservation();
        assert_eq!(handle_failed_rpc(&r, &failed(FailedRpcKind::ProtocolError)), FailedRpcOutcome::Fail);
    }

    #[test]
    fn unauthorized_peer_never_mutates() {
        let r = reservation();
        assert_eq!(handle_failed_rpc(&r, &failed(FailedRpcKind::UnauthorizedPeer)), FailedRpcOutcome::Unauthorized);
    }
}
