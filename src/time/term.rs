//! C1: Term — a closed time interval with an extension marker.
//!
//! Grounded on `fabric_cf/actor/core/time/term.py`. Cycle numbers are
//! computed on demand from a `Clock` rather than cached (the teacher's
//! `cycle_start`/`cycle_end`/`cycle_new_start` fields exist only for
//! debugging in the original; recomputing avoids the stale-cache bug
//! class entirely).

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::time::clock::Clock;

/// A closed interval `[start, end]`. `new_start` marks where the latest
/// extension begins; for a freshly created term `new_start == start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Term {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    new_start: DateTime<Utc>,
}

impl Term {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Term { start, end, new_start: start }
    }

    pub fn with_new_start(start: DateTime<Utc>, end: DateTime<Utc>, new_start: DateTime<Utc>) -> Self {
        Term { start, end, new_start }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn new_start(&self) -> DateTime<Utc> {
        self.new_start
    }

    /// The length of `[new_start, end]`, i.e. what remains of the term
    /// after the latest extension.
    pub fn length(&self) -> chrono::Duration {
        self.end - self.new_start
    }

    /// The length of the full `[start, end]` interval.
    pub fn full_length(&self) -> chrono::Duration {
        self.end - self.start
    }

    pub fn contains(&self, when: DateTime<Utc>) -> bool {
        when >= self.start && when <= self.end
    }

    /// True when `other` is a strict time extension of `self`: same
    /// start, strictly later end.
    pub fn extends_term(&self, other: &Term) -> bool {
        self.start == other.start && self.end > other.end
    }

    /// Validates that `self` is a legal extension of `previous`,
    /// producing `InvalidTerm` otherwise (spec §4.1).
    pub fn enforce_extends_term(&self, previous: &Term) -> Result<()> {
        if self.start != previous.start {
            return Err(Error::InvalidTerm(format!(
                "extension must keep start fixed: previous start={}, new start={}",
                previous.start, self.start
            )));
        }
        if self.end <= previous.end {
            return Err(Error::InvalidTerm(format!(
                "extension must strictly increase end: previous end={}, new end={}",
                previous.end, self.end
            )));
        }
        Ok(())
    }

    /// Produces a new term whose `new_start` is `self.end + 1ms` and
    /// whose length (from `new_start` to `end`) is `length`.
    pub fn extend(&self, length: chrono::Duration) -> Term {
        let new_start = self.end + chrono::Duration::milliseconds(1);
        let end = new_start + length;
        Term { start: self.start, end, new_start }
    }

    /// Shifts the whole interval (including `new_start`) by `delta`.
    pub fn shift(&self, delta: chrono::Duration) -> Term {
        Term { start: self.start + delta, end: self.end + delta, new_start: self.new_start + delta }
    }

    /// Returns a term with the same start but a new length measured from
    /// `start` (not `new_start`).
    pub fn change_length(&self, length: chrono::Duration) -> Term {
        Term { start: self.start, end: self.start + length, new_start: self.new_start }
    }

    pub fn start_cycle(&self, clock: &Clock) -> u64 {
        clock.cycle(self.start)
    }

    pub fn end_cycle(&self, clock: &Clock) -> u64 {
        clock.cycle(self.end)
    }

    pub fn new_start_cycle(&self, clock: &Clock) -> u64 {
        clock.cycle(self.new_start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t(start_ms: i64, end_ms: i64) -> Term {
        Term::new(DateTime::from_timestamp_millis(start_ms).unwrap(), DateTime::from_timestamp_millis(end_ms).unwrap())
    }

    #[test]
    fn extends_term_requires_same_start_and_later_end() {
        let base = t(0, 100);
        let longer = t(0, 200);
        let shifted = t(10, 200);
        assert!(longer.extends_term(&base));
        assert!(!shifted.extends_term(&base));
        assert!(!base.extends_term(&longer));
    }

    #[test]
    fn enforce_extends_term_rejects_shrink_and_shift() {
        let base = t(0, 100);
        assert!(t(0, 200).enforce_extends_term(&base).is_ok());
        assert!(t(10, 200).enforce_extends_term(&base).is_err());
        assert!(t(0, 50).enforce_extends_term(&base).is_err());
    }

    #[test]
    fn extend_produces_contiguous_new_start() {
        let base = t(0, 100);
        let extended = base.extend(Duration::milliseconds(50));
        assert_eq!(extended.new_start().timestamp_millis(), 101);
        assert_eq!(extended.end().timestamp_millis(), 151);
        assert_eq!(extended.start(), base.start());
    }
}
