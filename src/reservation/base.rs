//! Reservation — the central aggregate (spec §3).
//!
//! Grounded on the original's split between `kernel/reservation.py`
//! (fields/plumbing shared by every reservation), `reservation_client.py`
//! (client-only fields/behavior) and `reservation_server.py`
//! (broker/authority-only fields/behavior). Per design note §9
//! ("collapse [mixin] hierarchy into a single reservation variant
//! discriminated by category"), this crate keeps one `Reservation`
//! struct with a `role: ReservationRole` enum carrying the
//! category-specific state instead of trait-based multiple inheritance.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::collections::IdSet;
use crate::error::{Error, Result};
use crate::id::{ActorId, ReservationId, ReservationTag, SliceId};
use crate::model::{Notice, ResourceSet};
use crate::reservation::update_data::UpdateData;
use crate::state::{JoinState, PendingState, ReservationState};
use crate::time::Term;

/// How many (state, pending) transitions `Reservation::history` retains,
/// per the supplemented "reservation tracker" feature (SPEC_FULL §3).
const HISTORY_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationCategory {
    Client,
    Broker,
    Authority,
}

/// Client-side-only fields (spec §3).
#[derive(Debug, Default)]
pub struct ClientData {
    pub broker: Option<ActorId>,
    pub authority: Option<ActorId>,
    pub ticket_term: Option<Term>,
    pub lease_term: Option<Term>,
    pub join_state: JoinState,
    pub redeem_predecessors: IdSet<ReservationTag>,
    pub join_predecessors: IdSet<ReservationTag>,
    pub last_ticket_update: UpdateData,
    pub last_lease_update: UpdateData,
    pub renew_time: Option<DateTime<Utc>>,
    pub renewable: bool,
    pub closed_during_redeem: bool,
    pub sequence_ticket_in: u64,
    pub sequence_ticket_out: u64,
    pub sequence_lease_in: u64,
    pub sequence_lease_out: u64,
}

impl ClientData {
    fn new() -> Self {
        ClientData { join_state: JoinState::None, ..Default::default() }
    }

    /// True once every predecessor in `redeem_predecessors` has reached
    /// Active or Ticketed (spec §4.3's "joinstate=BlockedRedeem if
    /// predecessors unsatisfied"). Predecessor satisfaction is tracked by
    /// the kernel dispatcher, which calls `mark_predecessor_satisfied`.
    pub fn redeem_predecessors_satisfied(&self) -> bool {
        self.redeem_predecessors.is_empty()
    }
}

/// Broker/authority-side-only fields (spec §3).
#[derive(Debug, Default)]
pub struct ServerData {
    pub update_count: u64,
    pub callback: Option<ActorId>,
    pub sequence_out: u64,
    pub client: Option<ActorId>,
    /// Highest `sequence_in` seen on an incoming ticket-channel request
    /// (ticket/extend_ticket), used by the RPC layer's duplicate-request
    /// classification (spec §4.3/§4.5) before it ever touches `bind`.
    pub sequence_ticket_in: u64,
    /// Same, for the lease channel (redeem/extend_lease/modify_lease).
    pub sequence_lease_in: u64,
    /// The last `update_ticket` body actually sent, replayed verbatim on
    /// a duplicate ticket-channel request (spec §4.3
    /// `handle_duplicate_request`).
    pub last_ticket_response: Option<(ResourceSet, Term, UpdateData)>,
    /// The last `update_lease` body actually sent, replayed verbatim on
    /// a duplicate lease-channel request.
    pub last_lease_response: Option<(ResourceSet, Term, UpdateData)>,
}

#[derive(Debug)]
pub enum ReservationRole {
    Client(ClientData),
    Broker(ServerData),
    Authority(ServerData),
}

impl ReservationRole {
    pub fn category(&self) -> ReservationCategory {
        match self {
            ReservationRole::Client(_) => ReservationCategory::Client,
            ReservationRole::Broker(_) => ReservationCategory::Broker,
            ReservationRole::Authority(_) => ReservationCategory::Authority,
        }
    }
}

#[derive(Debug)]
pub struct Reservation {
    pub id: ReservationId,
    pub slice: SliceId,

    pub current_resources: Option<ResourceSet>,
    pub requested_resources: Option<ResourceSet>,
    pub approved_resources: Option<ResourceSet>,
    pub previous_resources: Option<ResourceSet>,

    pub current_term: Option<Term>,
    pub requested_term: Option<Term>,
    pub approved_term: Option<Term>,
    pub previous_term: Option<Term>,

    pub state: ReservationState,
    pub pending_state: PendingState,

    pub extended: bool,
    pub dirty: bool,
    pub approved: bool,
    pub bid_pending: bool,
    pub pending_recover: bool,
    pub expired: bool,
    pub error_message: Option<String>,
    /// Set by the probe phase of a tick, cleared by the service phase
    /// once that pending action has actually been serviced (spec §3,
    /// "service_pending=Joining" on the Active/BlockedJoin arc).
    pub service_pending: Option<JoinState>,
    pub last_transition_time: DateTime<Utc>,
    notified_about_failure: bool,
    released: bool,

    pub notices: Notice,
    history: VecDeque<(DateTime<Utc>, ReservationState, PendingState)>,

    pub role: ReservationRole,
}

impl Reservation {
    pub fn new_client(slice: SliceId, requested_resources: ResourceSet, requested_term: Term) -> Self {
        Reservation {
            id: ReservationId::new(),
            slice,
            current_resources: None,
            requested_resources: Some(requested_resources),
            approved_resources: None,
            previous_resources: None,
            current_term: None,
            requested_term: Some(requested_term),
            approved_term: None,
            previous_term: None,
            state: ReservationState::Nascent,
            pending_state: PendingState::None,
            extended: false,
            dirty: false,
            approved: false,
            bid_pending: false,
            pending_recover: false,
            expired: false,
            error_message: None,
            service_pending: None,
            last_transition_time: Utc::now(),
            notified_about_failure: false,
            released: false,
            notices: Notice::new(),
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            role: ReservationRole::Client(ClientData::new()),
        }
    }

    pub fn new_server(category: ReservationCategory, id: ReservationId, slice: SliceId, client: Option<ActorId>) -> Self {
        assert_ne!(category, ReservationCategory::Client, "new_server is for Broker/Authority reservations only");
        let server_data = ServerData { client, ..Default::default() };
        let role = if category == ReservationCategory::Broker { ReservationRole::Broker(server_data) } else { ReservationRole::Authority(server_data) };
        Reservation {
            id,
            slice,
            current_resources: None,
            requested_resources: None,
            approved_resources: None,
            previous_resources: None,
            current_term: None,
            requested_term: None,
            approved_term: None,
            previous_term: None,
            state: ReservationState::Nascent,
            pending_state: PendingState::None,
            extended: false,
            dirty: false,
            approved: false,
            bid_pending: false,
            pending_recover: false,
            expired: false,
            error_message: None,
            service_pending: None,
            last_transition_time: Utc::now(),
            notified_about_failure: false,
            released: false,
            notices: Notice::new(),
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            role,
        }
    }

    pub fn category(&self) -> ReservationCategory {
        self.role.category()
    }

    pub fn as_client(&self) -> Option<&ClientData> {
        match &self.role {
            ReservationRole::Client(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_client_mut(&mut self) -> Option<&mut ClientData> {
        match &mut self.role {
            ReservationRole::Client(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_server(&self) -> Option<&ServerData> {
        match &self.role {
            ReservationRole::Broker(s) | ReservationRole::Authority(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_server_mut(&mut self) -> Option<&mut ServerData> {
        match &mut self.role {
            ReservationRole::Broker(s) | ReservationRole::Authority(s) => Some(s),
            _ => None,
        }
    }

    /// The single operation allowed to change `state`/`pending_state`
    /// (spec §3 invariant): sets `dirty=true`, records the transition in
    /// `history`, and stamps `last_transition_time`.
    pub fn transition(&mut self, reason: &str, state: ReservationState, pending: PendingState) {
        log::debug!(
            "reservation {} transition ({}): {:?}/{:?} -> {:?}/{:?}",
            self.id,
            reason,
            self.state,
            self.pending_state,
            state,
            pending
        );
        self.state = state;
        self.pending_state = pending;
        self.dirty = true;
        self.last_transition_time = Utc::now();
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back((self.last_transition_time, state, pending));
    }

    /// The last `HISTORY_CAPACITY` (state, pending) transitions, oldest
    /// first — used by the admin CLI's `list` and by tests asserting
    /// Testable Property 2 (permitted arcs only).
    pub fn history(&self) -> &VecDeque<(DateTime<Utc>, ReservationState, PendingState)> {
        &self.history
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Moves the reservation to `Failed` and records `message`; returns
    /// `Some(UpdateData)` exactly once per failure (spec §4.3's
    /// "update-reset sent once"), `None` on any subsequent call so the
    /// kernel does not resend the reset update forever.
    pub fn fail_notify(&mut self, message: impl Into<String>) -> Option<UpdateData> {
        let message = message.into();
        self.error_message = Some(message.clone());
        self.notices.add(format!("failed: {message}"));
        self.transition("fail", ReservationState::Failed, PendingState::None);
        if self.notified_about_failure {
            None
        } else {
            self.notified_about_failure = true;
            Some(UpdateData::failure(message))
        }
    }

    /// Returns `true` exactly once, the first time this reservation is
    /// observed in `Closed`, so the kernel dispatcher can release broker/
    /// authority policy capacity and quota balance (spec §4.6/§4.7) a
    /// single time regardless of how many tick passes or close retries
    /// see it afterward.
    pub fn mark_released(&mut self) -> bool {
        if self.state == ReservationState::Closed && !self.released {
            self.released = true;
            true
        } else {
            false
        }
    }

    pub fn exceeds_timeout(&self, seconds: i64) -> bool {
        (Utc::now() - self.last_transition_time).num_seconds() > seconds
    }

    /// Close is idempotent and valid from any non-terminal state (spec
    /// §4.3/§5). Returns whether an outbound close RPC should actually be
    /// issued (false when the reservation was already terminal or
    /// closing, matching Testable Property/round-trip law "close() is
    /// idempotent").
    pub fn request_close(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        let category = self.category();
        if category == ReservationCategory::Client {
            if self.pending_state == PendingState::Redeeming {
                // Deferred: re-issued once the in-flight lease update
                // arrives (spec §4.3 "close during Redeeming").
                self.as_client_mut().expect("category checked above").closed_during_redeem = true;
                return false;
            }
            let lease_held = self.as_client().expect("category checked above").lease_term.is_some();
            if lease_held {
                self.transition("close", ReservationState::CloseWait, PendingState::Closing);
            } else {
                self.transition("close", ReservationState::Closed, PendingState::None);
            }
            true
        } else {
            if self.pending_state == PendingState::Closing {
                return false;
            }
            self.transition("close", self.state, PendingState::Closing);
            true
        }
    }

    pub fn mark_closed_during_redeem(&mut self) -> Result<()> {
        match self.as_client_mut() {
            Some(client) => {
                client.closed_during_redeem = true;
                Ok(())
            }
            None => Err(Error::InvalidState { operation: "mark_closed_during_redeem".into(), state: format!("{:?}", self.category()) }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResourceType;

    fn term() -> Term {
        Term::new(DateTime::from_timestamp_millis(0).unwrap(), DateTime::from_timestamp_millis(1000).unwrap())
    }

    #[test]
    fn fail_notify_returns_update_only_once() {
        let mut r = Reservation::new_client(SliceId::new(), ResourceSet::new(1, ResourceType::new("VM")), term());
        let first = r.fail_notify("boom");
        assert!(first.is_some());
        let second = r.fail_notify("boom again");
        assert!(second.is_none());
        assert_eq!(r.state, ReservationState::Failed);
    }

    #[test]
    fn close_is_idempotent() {
        let mut r = Reservation::new_client(SliceId::new(), ResourceSet::new(1, ResourceType::new("VM")), term());
        assert!(r.request_close());
        assert!(!r.request_close());
    }

    #[test]
    fn history_retains_transitions_in_order() {
        let mut r = Reservation::new_client(SliceId::new(), ResourceSet::new(1, ResourceType::new("VM")), term());
        r.transition("a", ReservationState::Ticketed, PendingState::Priming);
        r.transition("b", ReservationState::Active, PendingState::None);
        let history: Vec<_> = r.history().iter().map(|(_, s, p)| (*s, *p)).collect();
        assert_eq!(history.last(), Some(&(ReservationState::Active, PendingState::None)));
        assert!(history.len() >= 2);
    }
}
