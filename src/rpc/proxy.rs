//! Pluggable peer proxy (spec §4.5), grounded on
//! `fabric_cf/actor/core/proxies/local/local_proxy_factory.py` /
//! `proxies/kafka/kafka_proxy_factory.py`: the kernel depends only on
//! the `Proxy` trait; a real deployment could back it with a networked
//! transport, but a `LocalProxy` delivering straight into the target
//! actor's event queue is sufficient to drive the end-to-end scenarios
//! without a real wire format (out of scope per spec §1).

use std::sync::Arc;

use crate::id::ActorId;
use crate::rpc::messages::Envelope;

/// Sends an envelope toward a peer actor. `send` hands off and returns
/// immediately (spec §5's "RPC dispatch ... returns immediately");
/// delivery and any response travel back through the target's own
/// event queue as a new inbound envelope, not as this call's return
/// value.
pub trait Proxy: Send + Sync {
    fn target(&self) -> ActorId;
    fn send(&self, envelope: Envelope);
}

/// An in-process proxy: `deliver` is whatever the owning kernel wires up
/// to enqueue the envelope on the target actor's dispatcher thread, kept
/// generic here so this module does not depend on the kernel's
/// dispatcher type.
pub struct LocalProxy {
    target: ActorId,
    deliver: Arc<dyn Fn(Envelope) + Send + Sync>,
}

impl LocalProxy {
    pub fn new(target: ActorId, deliver: Arc<dyn Fn(Envelope) + Send + Sync>) -> Self {
        LocalProxy { target, deliver }
    }
}

impl Proxy for LocalProxy {
    fn target(&self) -> ActorId {
        self.target
    }

    fn send(&self, envelope: Envelope) {
        (self.deliver)(envelope);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::messages::PeerMessage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn send_invokes_the_delivery_closure() {
        let delivered = Arc::new(AtomicUsize::new(0));
        let delivered_clone = delivered.clone();
        let target = ActorId::new();
        let proxy = LocalProxy::new(target, Arc::new(move |_| { delivered_clone.fetch_add(1, Ordering::SeqCst); }));

        let envelope = Envelope::new(ActorId::new(), 1, PeerMessage::Query { properties: crate::model::PropertyBag::new() });
        proxy.send(envelope);

        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        assert_eq!(proxy.target(), target);
    }
}
