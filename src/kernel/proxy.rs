//! Cross-thread handle to a dispatcher owned by its own thread (spec
//! §5: reservation mutation never races across threads). Every call
//! blocks on a one-shot reply channel, generalizing the teacher's
//! `VrmComponentProxy::call` from one channel per component method to
//! a single boxed closure carried by `KernelEvent::Exec`.

use std::sync::mpsc;
use std::thread::JoinHandle;

use crate::kernel::dispatcher::Dispatcher;
use crate::kernel::event::KernelEvent;

#[derive(Clone)]
pub struct KernelProxy {
    tx: mpsc::Sender<KernelEvent>,
}

impl KernelProxy {
    pub fn new(tx: mpsc::Sender<KernelEvent>) -> Self {
        KernelProxy { tx }
    }

    /// Runs `f` against the dispatcher on its owning thread and blocks
    /// for the result.
    pub fn call<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut Dispatcher) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = mpsc::channel();
        let event = KernelEvent::Exec(Box::new(move |dispatcher| {
            let _ = reply_tx.send(f(dispatcher));
        }));
        match self.tx.send(event) {
            Ok(()) => reply_rx.recv().expect("dispatcher thread died unexpectedly"),
            Err(_) => panic!("dispatcher thread is gone"),
        }
    }

    pub fn tick(&self) {
        let _ = self.tx.send(KernelEvent::Tick);
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(KernelEvent::Shutdown);
    }
}

/// Spawns the dispatcher thread. Recovery (spec §4.4) runs once before
/// the event loop starts draining.
pub fn spawn(mut dispatcher: Dispatcher) -> (KernelProxy, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel();
    let identity = dispatcher.identity;
    let handle = std::thread::Builder::new()
        .name(format!("kernel-{}", identity))
        .spawn(move || {
            dispatcher.recover();
            for event in rx {
                match event {
                    KernelEvent::Exec(f) => f(&mut dispatcher),
                    KernelEvent::Tick => dispatcher.tick(),
                    KernelEvent::Shutdown => break,
                }
            }
        })
        .expect("failed to spawn dispatcher thread");
    (KernelProxy::new(tx), handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use crate::id::ActorId;
    use crate::kernel::dispatcher::ActorRole;
    use crate::slice::SliceKind;

    #[test]
    fn call_round_trips_a_result_from_the_dispatcher_thread() {
        let dispatcher = Dispatcher::new(ActorId::new(), ActorRole::Orchestrator, KernelConfig::default());
        let owner = dispatcher.identity;
        let (proxy, handle) = spawn(dispatcher);

        let slice_id = proxy.call(move |d| d.add_slice("S1", owner, "proj-1", SliceKind::Client).unwrap());
        let found = proxy.call(move |d| d.registry().with_slice(slice_id, |s| s.name.clone()).unwrap());
        assert_eq!(found, "S1");

        proxy.shutdown();
        handle.join().unwrap();
    }
}
