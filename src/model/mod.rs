//! C3: Resource model — resource sets, concrete sets (tickets, unit
//! sets), sliver descriptors, quantity and label accounting (spec §3/§4.2).

pub mod notice;
pub mod properties;
pub mod resource_set;
pub mod sliver;
pub mod ticket;
pub mod unit;
pub mod unit_set;

pub use notice::Notice;
pub use properties::{Label, PropertyBag, ResourceType};
pub use resource_set::{ConcreteSet, ResourceSet};
pub use sliver::{Sliver, SliverDiff, SliverKind};
pub use ticket::Ticket;
pub use unit::{Unit, UnitState};
pub use unit_set::{UnitDelta, UnitSet};
