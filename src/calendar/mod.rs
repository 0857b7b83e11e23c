//! C7: calendar and allocator (spec §4.6).

pub mod authority_policy;
pub mod broker_policy;
pub mod calendar;

pub use authority_policy::AuthorityCalendarPolicy;
pub use broker_policy::{AllocationOutcome, BrokerSimpleUnitsPolicy, FixedNodeSelector, NodeSelector};
pub use calendar::Calendar;
