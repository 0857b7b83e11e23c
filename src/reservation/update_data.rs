//! UpdateData — an append-only error/event record accompanying each
//! outbound update (spec §3).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateData {
    pub events: Vec<String>,
    pub message: String,
    pub failed: bool,
}

impl UpdateData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event(mut self, event: impl Into<String>) -> Self {
        self.events.push(event.into());
        self
    }

    pub fn failure(message: impl Into<String>) -> Self {
        UpdateData { events: Vec::new(), message: message.into(), failed: true }
    }

    /// Absorbs `other` into `self`: failures win and their message is
    /// kept, otherwise events accumulate (spec §3).
    pub fn absorb(&mut self, other: &UpdateData) {
        if other.failed {
            self.failed = true;
            self.message = other.message.clone();
        } else {
            self.events.extend(other.events.iter().cloned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absorbing_a_failure_overrides_message_and_flag() {
        let mut a = UpdateData::new().event("ticketed");
        let b = UpdateData::failure("insufficient resources");
        a.absorb(&b);
        assert!(a.failed);
        assert_eq!(a.message, "insufficient resources");
    }

    #[test]
    fn absorbing_events_accumulates() {
        let mut a = UpdateData::new().event("ticketed");
        let b = UpdateData::new().event("redeemed");
        a.absorb(&b);
        assert_eq!(a.events, vec!["ticketed", "redeemed"]);
    }
}
