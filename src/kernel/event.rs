//! Kernel event queue (spec §4.4): every public entry point enqueues an
//! event; the dispatcher thread drains the queue serially so reservation
//! mutation never races across threads (spec §5).
//!
//! Grounded on the teacher's `vrm_component_proxy.rs` `call()` pattern —
//! an `mpsc::Sender` paired with a one-shot reply channel built per call
//! — generalized from one message enum per component method to a single
//! `Exec` variant carrying a boxed closure, since this kernel's surface
//! (twelve entry points per spec §4.4, each with its own request/response
//! shape) is wider than the teacher's fixed `VrmMessage` set. `Tick`
//! stays a first-class variant since the dispatcher's own timer source
//! enqueues it without going through `KernelProxy::call`.

use crate::kernel::dispatcher::Dispatcher;

pub enum KernelEvent {
    /// A unit of work to run on the dispatcher thread, with the result
    /// delivered back over the boxed reply sender it closes over.
    Exec(Box<dyn FnOnce(&mut Dispatcher) + Send>),
    Tick,
    Shutdown,
}

impl std::fmt::Debug for KernelEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KernelEvent::Exec(_) => write!(f, "Exec(..)"),
            KernelEvent::Tick => write!(f, "Tick"),
            KernelEvent::Shutdown => write!(f, "Shutdown"),
        }
    }
}
