//! Calendar — per-cycle bookkeeping for the broker/authority allocation
//! loops (spec §4.6), grounded on
//! `fabric_cf/actor/core/policy/authority_calendar_policy.py` (outlays,
//! `assign` dispatch) and `policy/broker_simpler_units_policy.py` (the
//! FIFO bid queue and `CALL_INTERVAL`/`allocation_horizon` cycle math).

use std::collections::{HashMap, VecDeque};

use crate::id::ReservationId;

#[derive(Debug, Default)]
struct CycleBucket {
    requests: Vec<ReservationId>,
    closing: Vec<ReservationId>,
    renewing: Vec<ReservationId>,
}

/// Per-cycle request/closing/renewing buckets, an outlays list
/// (authority-side active allocations), and the FIFO pending-bids queue
/// the broker allocation loop drains in order (spec §4.6).
pub struct Calendar {
    buckets: HashMap<u64, CycleBucket>,
    outlays: Vec<ReservationId>,
    pending_bids: VecDeque<(u64, ReservationId)>,
    last_allocation_cycle: u64,
    call_interval: u64,
    allocation_horizon: u64,
}

impl Calendar {
    pub fn new(call_interval: u64, allocation_horizon: u64) -> Self {
        Calendar {
            buckets: HashMap::new(),
            outlays: Vec::new(),
            pending_bids: VecDeque::new(),
            last_allocation_cycle: 0,
            call_interval,
            allocation_horizon,
        }
    }

    fn bucket_mut(&mut self, cycle: u64) -> &mut CycleBucket {
        self.buckets.entry(cycle).or_default()
    }

    pub fn add_request(&mut self, cycle: u64, reservation: ReservationId) {
        self.bucket_mut(cycle).requests.push(reservation);
        self.pending_bids.push_back((cycle, reservation));
    }

    pub fn add_closing(&mut self, cycle: u64, reservation: ReservationId) {
        self.bucket_mut(cycle).closing.push(reservation);
    }

    pub fn add_renewing(&mut self, cycle: u64, reservation: ReservationId) {
        self.bucket_mut(cycle).renewing.push(reservation);
    }

    pub fn closing(&self, cycle: u64) -> Vec<ReservationId> {
        self.buckets.get(&cycle).map(|b| b.closing.clone()).unwrap_or_default()
    }

    pub fn renewing(&self, cycle: u64) -> Vec<ReservationId> {
        self.buckets.get(&cycle).map(|b| b.renewing.clone()).unwrap_or_default()
    }

    pub fn add_outlay(&mut self, reservation: ReservationId) {
        self.outlays.push(reservation);
    }

    pub fn remove_outlay(&mut self, reservation: ReservationId) {
        self.outlays.retain(|r| *r != reservation);
    }

    pub fn outlays(&self) -> &[ReservationId] {
        &self.outlays
    }

    /// `start_cycle = last_allocation + CALL_INTERVAL`,
    /// `advance_cycle = start_cycle + allocation_horizon` (spec §4.6
    /// step 1).
    pub fn allocation_window(&self) -> (u64, u64) {
        let start_cycle = self.last_allocation_cycle + self.call_interval;
        let advance_cycle = start_cycle + self.allocation_horizon;
        (start_cycle, advance_cycle)
    }

    /// Drains bids queued for a cycle at or before `advance_cycle`, FIFO
    /// order preserved (spec §4.6 step 2/4).
    pub fn drain_due_bids(&mut self, advance_cycle: u64) -> Vec<ReservationId> {
        let mut due = Vec::new();
        while let Some((cycle, _)) = self.pending_bids.front() {
            if *cycle > advance_cycle {
                break;
            }
            let (_, reservation) = self.pending_bids.pop_front().unwrap();
            due.push(reservation);
        }
        due
    }

    pub fn requeue_bid(&mut self, cycle: u64, reservation: ReservationId) {
        self.pending_bids.push_back((cycle, reservation));
    }

    /// Pops the oldest queued bid regardless of its due cycle, used to
    /// age out a bid that has waited past `queue_threshold` (spec §4.6).
    pub fn pop_front_bid(&mut self) -> Option<ReservationId> {
        self.pending_bids.pop_front().map(|(_, reservation)| reservation)
    }

    /// Advances the horizon, dropping buckets for cycles strictly
    /// earlier than `cycle` (spec §4.6 "`tick(cycle)` advances the
    /// horizon, freeing earlier buckets").
    pub fn tick(&mut self, cycle: u64) {
        self.buckets.retain(|&bucket_cycle, _| bucket_cycle >= cycle);
        self.last_allocation_cycle = self.last_allocation_cycle.max(cycle.saturating_sub(self.call_interval));
    }

    pub fn queue_age(&self, cycle: u64) -> u64 {
        self.pending_bids.front().map(|(c, _)| cycle.saturating_sub(*c)).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_due_bids_preserves_fifo_order() {
        let mut calendar = Calendar::new(1, 5);
        let a = ReservationId::new();
        let b = ReservationId::new();
        calendar.add_request(1, a);
        calendar.add_request(2, b);
        let due = calendar.drain_due_bids(2);
        assert_eq!(due, vec![a, b]);
    }

    #[test]
    fn tick_drops_earlier_buckets() {
        let mut calendar = Calendar::new(1, 5);
        calendar.add_closing(1, ReservationId::new());
        calendar.tick(2);
        assert!(calendar.closing(1).is_empty());
    }

    #[test]
    fn pop_front_bid_ages_out_the_oldest_queued_request() {
        let mut calendar = Calendar::new(1, 5);
        let a = ReservationId::new();
        let b = ReservationId::new();
        calendar.add_request(1, a);
        calendar.add_request(2, b);
        assert_eq!(calendar.queue_age(12), 11);
        assert_eq!(calendar.pop_front_bid(), Some(a));
        assert_eq!(calendar.pop_front_bid(), Some(b));
        assert_eq!(calendar.pop_front_bid(), None);
    }
}
