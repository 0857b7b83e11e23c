//! C1: Clock — discretizes wall time into cycles.
//!
//! Grounded on `fabric_cf/actor/core/time/term.py`'s cycle fields
//! (`cycle_start`/`cycle_end`/`cycle_new_start`), which imply a clock
//! parameterized by a fixed cycle length and an epoch ("beginning of
//! time"); `cycle(when)` floors the elapsed milliseconds since the epoch
//! to a cycle number, and `cycle_start_in_millis`/`cycle_end_in_millis`
//! invert that.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clock {
    cycle_millis: u64,
    beginning_of_time_millis: i64,
}

impl Clock {
    pub fn new(cycle_millis: u64, beginning_of_time: DateTime<Utc>) -> Self {
        assert!(cycle_millis > 0, "cycle length must be positive");
        Clock { cycle_millis, beginning_of_time_millis: beginning_of_time.timestamp_millis() }
    }

    pub fn with_epoch_now(cycle_millis: u64) -> Self {
        Self::new(cycle_millis, Utc::now())
    }

    pub fn cycle_millis(&self) -> u64 {
        self.cycle_millis
    }

    /// Maps a wall-clock time to its cycle number.
    pub fn cycle(&self, when: DateTime<Utc>) -> u64 {
        let elapsed = when.timestamp_millis() - self.beginning_of_time_millis;
        if elapsed <= 0 { 0 } else { (elapsed as u64) / self.cycle_millis }
    }

    /// First millisecond of the given cycle.
    pub fn cycle_start_in_millis(&self, cycle: u64) -> i64 {
        self.beginning_of_time_millis + (cycle * self.cycle_millis) as i64
    }

    /// Last millisecond of the given cycle.
    pub fn cycle_end_in_millis(&self, cycle: u64) -> i64 {
        self.cycle_start_in_millis(cycle) + self.cycle_millis as i64 - 1
    }

    pub fn cycle_start_date(&self, cycle: u64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.cycle_start_in_millis(cycle)).expect("in-range cycle start")
    }

    pub fn cycle_end_date(&self, cycle: u64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.cycle_end_in_millis(cycle)).expect("in-range cycle end")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn cycle_is_monotonic_in_wall_time() {
        let epoch = Utc::now();
        let clock = Clock::new(1000, epoch);
        let c0 = clock.cycle(epoch);
        let c1 = clock.cycle(epoch + Duration::milliseconds(2500));
        assert!(c1 > c0);
        assert_eq!(c1 - c0, 2);
    }

    #[test]
    fn cycle_start_and_end_bracket_the_cycle() {
        let epoch = Utc::now();
        let clock = Clock::new(1000, epoch);
        let when = epoch + Duration::milliseconds(3400);
        let cycle = clock.cycle(when);
        assert!(clock.cycle_start_in_millis(cycle) <= when.timestamp_millis());
        assert!(clock.cycle_end_in_millis(cycle) >= when.timestamp_millis());
    }
}
