//! C5: the kernel — reservation registry, dispatcher, and the
//! cross-thread proxy/event wiring that lets callers drive a dispatcher
//! owned by its own thread (spec §4.4/§5).

pub mod dispatcher;
pub mod event;
pub mod proxy;
pub mod registry;

pub use dispatcher::{ActorRole, Dispatcher};
pub use event::KernelEvent;
pub use proxy::{spawn, KernelProxy};
pub use registry::Registry;
