//! Pending-request table (spec §4.5): outgoing requests keyed by
//! message id, carrying the target proxy, an optional response handler,
//! and retry bookkeeping.
//!
//! Grounded on `fabric_cf/actor/core/kernel/rpc_manager.py`'s pending
//! request map.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::id::{ActorId, MessageId, ReservationId};

pub struct PendingRequest {
    pub target: ActorId,
    pub reservation_id: ReservationId,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl PendingRequest {
    pub fn new(target: ActorId, reservation_id: ReservationId, max_retries: u32) -> Self {
        PendingRequest { target, reservation_id, retry_count: 0, max_retries }
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

#[derive(Clone, Default)]
pub struct PendingTable {
    inner: Arc<RwLock<HashMap<MessageId, PendingRequest>>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, message_id: MessageId, request: PendingRequest) {
        self.inner.write().expect("pending table lock poisoned").insert(message_id, request);
    }

    pub fn remove(&self, message_id: &MessageId) -> Option<PendingRequest> {
        self.inner.write().expect("pending table lock poisoned").remove(message_id)
    }

    /// Increments the retry count in place, returning whether another
    /// retry is permitted (spec §4.5 "on network-error failure, the RPC
    /// layer re-enqueues the same request").
    pub fn note_retry(&self, message_id: &MessageId) -> bool {
        let mut table = self.inner.write().expect("pending table lock poisoned");
        match table.get_mut(message_id) {
            Some(request) => {
                request.retry_count += 1;
                request.can_retry()
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("pending table lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_retry_exhausts_after_max_retries() {
        let table = PendingTable::new();
        let message_id = MessageId::new();
        table.insert(message_id, PendingRequest::new(ActorId::new(), ReservationId::new(), 2));
        assert!(table.note_retry(&message_id));
        assert!(!table.note_retry(&message_id));
    }

    #[test]
    fn remove_returns_the_request_once() {
        let table = PendingTable::new();
        let message_id = MessageId::new();
        table.insert(message_id, PendingRequest::new(ActorId::new(), ReservationId::new(), 1));
        assert!(table.remove(&message_id).is_some());
        assert!(table.remove(&message_id).is_none());
    }
}
