//! Ticket — an issuer-signed delegation of N units for a term
//! (spec §3/§4.2, ConcreteSet::Ticket).
//!
//! Grounded on `fabric_cf/actor/core/core/ticket.py`: a ticket is
//! immutable once issued; `change` replaces the whole ticket and records
//! the previous unit count so `holding(when)` can answer "how many units
//! did this reservation actually hold at `when`" across a mid-term
//! shrink/grow.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::id::DelegationId;
use crate::model::properties::ResourceType;
use crate::time::Term;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub delegation_id: DelegationId,
    pub source_authority: String,
    pub resource_type: ResourceType,
    pub units: u64,
    pub term: Term,
    /// Unit count prior to the last `change`, used by `holding`.
    old_units: u64,
}

impl Ticket {
    pub fn new(delegation_id: DelegationId, source_authority: impl Into<String>, resource_type: ResourceType, units: u64, term: Term) -> Self {
        Ticket { delegation_id, source_authority: source_authority.into(), resource_type, units, term, old_units: units }
    }

    /// Replaces this ticket wholesale with `new`, recording the prior
    /// unit count so `holding` can still answer for the interval before
    /// the change took effect.
    pub fn change(&mut self, new: Ticket) {
        self.old_units = self.units;
        self.source_authority = new.source_authority;
        self.resource_type = new.resource_type;
        self.units = new.units;
        self.term = new.term;
    }

    /// Units actually held at `when`: `old_units` before the term's
    /// `new_start`, `units` from `new_start` through `end`, zero outside
    /// `[start, end]`.
    pub fn holding(&self, when: chrono::DateTime<chrono::Utc>) -> u64 {
        if when < self.term.start() || when > self.term.end() {
            return 0;
        }
        if when < self.term.new_start() { self.old_units } else { self.units }
    }

    /// Tickets are not mutated incrementally; `add`/`remove` always fail
    /// with `NotSupported` (spec §4.2).
    pub fn add(&self, _units: u64) -> Result<()> {
        Err(Error::NotSupported("Ticket::add: tickets are replaced wholesale via change(), not incremented".into()))
    }

    pub fn remove(&self, _units: u64) -> Result<()> {
        Err(Error::NotSupported("Ticket::remove: tickets are replaced wholesale via change(), not decremented".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration};

    fn term(start_ms: i64, end_ms: i64) -> Term {
        Term::new(DateTime::from_timestamp_millis(start_ms).unwrap(), DateTime::from_timestamp_millis(end_ms).unwrap())
    }

    #[test]
    fn change_then_holding_reports_old_then_new_units() {
        let t0 = term(0, 1000);
        let mut ticket = Ticket::new(DelegationId::new(), "authority-a", ResourceType::new("VM"), 5, t0);

        let extended_term = Term::with_new_start(
            t0.start(),
            DateTime::from_timestamp_millis(2000).unwrap(),
            DateTime::from_timestamp_millis(1001).unwrap(),
        );
        ticket.change(Ticket::new(DelegationId::new(), "authority-a", ResourceType::new("VM"), 8, extended_term));

        assert_eq!(ticket.holding(t0.start()), 5);
        assert_eq!(ticket.holding(extended_term.new_start()), 8);
        assert_eq!(ticket.holding(extended_term.start() - Duration::milliseconds(1)), 0);
    }

    #[test]
    fn add_and_remove_are_not_supported() {
        let ticket = Ticket::new(DelegationId::new(), "authority-a", ResourceType::new("VM"), 1, term(0, 10));
        assert!(matches!(ticket.add(1), Err(Error::NotSupported(_))));
        assert!(matches!(ticket.remove(1), Err(Error::NotSupported(_))));
    }
}
