//! Kernel dispatcher (C5, spec §4.4) — the per-actor synchronous event
//! loop that owns the registry, drives tick/recovery, and dispatches
//! into reservation state-machine methods and policy hooks.
//!
//! Grounded on `fabric_cf/actor/core/kernel/kernel.py`: `tick()` probes
//! delegations, then reservations, then reevaluates client slices, then
//! purges terminal entries — in that order, each step isolated so one
//! reservation's error does not abort the others (spec §7 "errors
//! during tick iteration are logged per-reservation and do not abort
//! the tick").

use std::collections::HashMap;

use chrono::Utc;

use crate::calendar::Calendar;
use crate::config::KernelConfig;
use crate::delegation::Delegation;
use crate::error::{Error, Result};
use crate::id::{ActorId, DelegationId, ReservationId, SliceId};
use crate::model::{PropertyBag, ResourceSet, Sliver};
use crate::plugins::{DatabasePlugin, GraphPlugin, InMemoryDatabase, NullSubstrate, StubGraphPlugin, SubstratePlugin};
use crate::policy::{AuthorityPolicy, BrokerPolicy, InMemoryQuotaService, QuotaManager};
use crate::reservation::{ClientAction, Reservation, ReservationCategory, ServerAction, UpdateData};
use crate::rpc::{Envelope, PeerMessage, PendingRequest, PendingTable, Proxy};
use crate::slice::{Slice, SliceKind};
use crate::state::{DelegationState, JoinState, PendingState, ReservationState, StateBin};
use crate::time::{Clock, Term};

use super::registry::Registry;

/// Which of the three actor roles this dispatcher is playing (spec §1:
/// Orchestrator/Broker/Authority); governs which policy hooks are wired
/// in, not which RPC handlers exist — a broker still answers client
/// ticket requests and also issues its own toward an authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorRole {
    Orchestrator,
    Broker,
    Authority,
}

/// The kernel dispatcher. Every method here assumes it runs on the
/// single dispatcher thread (spec §5) — callers from other threads go
/// through `kernel::proxy::KernelProxy` instead of holding a `Dispatcher`
/// directly.
pub struct Dispatcher {
    pub identity: ActorId,
    pub role: ActorRole,
    config: KernelConfig,
    clock: Clock,
    registry: Registry,
    calendar: Calendar,
    proxies: HashMap<ActorId, Box<dyn Proxy>>,
    pending: PendingTable,
    broker_policy: Option<Box<dyn BrokerPolicy>>,
    authority_policy: Option<Box<dyn AuthorityPolicy>>,
    substrate: Option<Box<dyn SubstratePlugin>>,
    database: Box<dyn DatabasePlugin>,
    graph: Box<dyn GraphPlugin>,
    quota: Option<QuotaManager<InMemoryQuotaService>>,
}

impl Dispatcher {
    pub fn new(identity: ActorId, role: ActorRole, config: KernelConfig) -> Self {
        let clock = Clock::with_epoch_now(config.cycle_millis);
        let calendar = Calendar::new(config.call_interval, config.allocation_horizon);
        Dispatcher {
            identity,
            role,
            config,
            clock,
            registry: Registry::new(),
            calendar,
            proxies: HashMap::new(),
            pending: PendingTable::new(),
            broker_policy: None,
            authority_policy: None,
            substrate: None,
            database: Box::new(InMemoryDatabase::new()),
            graph: Box::new(StubGraphPlugin::new()),
            quota: None,
        }
    }

    pub fn with_broker_policy(mut self, policy: Box<dyn BrokerPolicy>) -> Self {
        self.broker_policy = Some(policy);
        self
    }

    pub fn with_authority_policy(mut self, policy: Box<dyn AuthorityPolicy>) -> Self {
        self.authority_policy = Some(policy);
        self
    }

    pub fn with_substrate(mut self, substrate: Box<dyn SubstratePlugin>) -> Self {
        self.substrate = Some(substrate);
        self
    }

    pub fn with_database(mut self, database: Box<dyn DatabasePlugin>) -> Self {
        self.database = database;
        self
    }

    pub fn with_graph(mut self, graph: Box<dyn GraphPlugin>) -> Self {
        self.graph = graph;
        self
    }

    pub fn with_quota(mut self, quota: QuotaManager<InMemoryQuotaService>) -> Self {
        self.quota = Some(quota);
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn add_proxy(&mut self, target: ActorId, proxy: Box<dyn Proxy>) {
        self.proxies.insert(target, proxy);
    }

    fn proxy_for(&self, target: ActorId) -> Result<&dyn Proxy> {
        self.proxies.get(&target).map(|p| p.as_ref()).ok_or_else(|| Error::NetworkError(format!("no proxy registered for peer {}", target)))
    }

    fn send(&self, target: ActorId, body: PeerMessage, sequence_out: u64, reservation_id: ReservationId) -> Result<()> {
        let proxy = self.proxy_for(target)?;
        let envelope = Envelope::new(self.identity, sequence_out, body).with_callback(self.identity);
        let message_id = envelope.message_id;
        self.pending.insert(message_id, PendingRequest::new(target, reservation_id, 3));
        proxy.send(envelope);
        Ok(())
    }

    // ---- Slice management -------------------------------------------------

    pub fn add_slice(&mut self, name: impl Into<String>, owner: ActorId, project_id: impl Into<String>, kind: SliceKind) -> Result<SliceId> {
        let mut slice = Slice::new(name, owner, project_id, kind);
        slice.create()?;
        let id = slice.id;
        self.database.add_slice(&slice)?;
        self.registry.add_slice(slice);
        Ok(id)
    }

    // ---- Client-side entry points (spec §4.4's public entry points) -------

    /// `ticket(slice, resources, term)`: registers a new client
    /// reservation and issues its first outbound ticket request toward
    /// `broker`.
    pub fn ticket(&mut self, slice_id: SliceId, broker: ActorId, authority: ActorId, resources: ResourceSet, term: Term) -> Result<ReservationId> {
        if let Some(quota) = &self.quota {
            let project_id = self.registry.with_slice(slice_id, |s| s.project_id.clone())?;
            quota.reserve(&project_id, resources.get_type(), resources.get_units(), &term)?;
        }
        let mut reservation = Reservation::new_client(slice_id, resources, term);
        reservation.set_peers(broker, authority)?;
        let id = reservation.id;
        let action = reservation.reserve()?;
        self.database.add_reservation(&reservation)?;
        self.registry.register(reservation)?;
        self.dispatch_client_action(id, action)?;
        Ok(id)
    }

    pub fn extend_ticket(&mut self, id: ReservationId, requested_term: Term) -> Result<()> {
        let action = self.registry.with_reservation_mut(id, |r| r.extend_ticket(requested_term))??;
        self.dispatch_client_action(id, action)
    }

    /// `redeem()`/`extend_lease()` share the client's `reserve()` entry
    /// point (spec §4.3): it dispatches by (state, pending) which of the
    /// three is appropriate.
    pub fn reserve(&mut self, id: ReservationId) -> Result<()> {
        let action = self.registry.with_reservation_mut(id, |r| r.reserve())??;
        self.dispatch_client_action(id, action)
    }

    pub fn modify_lease(&mut self, id: ReservationId, requested_resources: ResourceSet) -> Result<()> {
        let action = self.registry.with_reservation_mut(id, |r| r.modify_lease(requested_resources))??;
        self.dispatch_client_action(id, action)
    }

    /// `close(id)`: idempotent from any non-terminal state (spec §4.3/§5
    /// round-trip law); issues an outbound close only when one is
    /// actually needed.
    pub fn close(&mut self, id: ReservationId) -> Result<()> {
        let (category, should_send) = self.registry.with_reservation_mut(id, |r| (r.category(), r.request_close()))?;
        if should_send && category == ReservationCategory::Client {
            let target = self.registry.with_reservation(id, |r| r.as_client().and_then(|c| c.authority).or_else(|| r.as_client().and_then(|c| c.broker)))?;
            if let Some(target) = target {
                self.send(target, PeerMessage::Close { reservation_id: id }, 0, id)?;
            }
        } else if should_send {
            self.registry.with_reservation_mut(id, |r| r.probe_closing_server())?;
        }
        self.persist(id);
        self.release_if_closed(id);
        Ok(())
    }

    fn dispatch_client_action(&mut self, id: ReservationId, action: ClientAction) -> Result<()> {
        let target = self.registry.with_reservation(id, |r| r.as_client().and_then(|c| match action {
            ClientAction::SendTicket | ClientAction::SendExtendTicket => c.broker,
            ClientAction::SendRedeem | ClientAction::SendExtendLease | ClientAction::SendModifyLease | ClientAction::SendClose => c.authority,
            ClientAction::None => None,
        }))?;
        let Some(target) = target else { return Ok(()) };
        let (resources, term, sequence_out) = self.registry.with_reservation(id, |r| {
            let client = r.as_client().expect("client reservation");
            let sequence = match action {
                ClientAction::SendTicket | ClientAction::SendExtendTicket => client.sequence_ticket_out,
                _ => client.sequence_lease_out,
            };
            (r.requested_resources.as_ref().map(|r| r.outbound_snapshot()), r.requested_term, sequence)
        })?;
        let slice_id = self.registry.with_reservation(id, |r| r.slice)?;
        let body = match action {
            ClientAction::SendTicket => PeerMessage::Ticket { reservation: self.payload(id, slice_id, resources, term)? },
            ClientAction::SendExtendTicket => PeerMessage::ExtendTicket { reservation: self.payload(id, slice_id, resources, term)? },
            ClientAction::SendRedeem => PeerMessage::Redeem { reservation: self.payload(id, slice_id, resources, term)? },
            ClientAction::SendExtendLease => PeerMessage::ExtendLease { reservation: self.payload(id, slice_id, resources, term)? },
            ClientAction::SendModifyLease => PeerMessage::ModifyLease { reservation: self.payload(id, slice_id, resources, term)? },
            ClientAction::SendClose => PeerMessage::Close { reservation_id: id },
            ClientAction::None => return Ok(()),
        };
        self.send(target, body, sequence_out, id)
    }

    fn payload(&self, id: ReservationId, slice: SliceId, resources: Option<ResourceSet>, term: Option<Term>) -> Result<crate::rpc::ReservationPayload> {
        let resources = resources.ok_or_else(|| Error::InvalidArgument("reservation has no resources to send".into()))?;
        let term = term.ok_or_else(|| Error::InvalidArgument("reservation has no term to send".into()))?;
        Ok(crate::rpc::ReservationPayload { id, slice, resources, term, config: PropertyBag::new() })
    }

    // ---- Server-side (broker/authority) inbound handling -------------------

    /// Handles an incoming ticket (broker) or redeem (authority)
    /// request: registers the server-side reservation if new, classifies
    /// its sequence number (spec §4.3/§4.5; on a duplicate this resends
    /// the cached `update_ticket`/`update_lease` rather than re-running
    /// `bind()`, per Testable Property 3/round-trip law and scenario S3),
    /// then either queues the bid for the broker's next calendar-batched
    /// allocation pass (spec §4.6) or resolves the authority's
    /// assignment immediately (the authority loop has no FIFO/queue-
    /// threshold requirement of its own).
    pub fn handle_incoming_request(&mut self, from: ActorId, payload: crate::rpc::ReservationPayload, category: ReservationCategory, sequence_in: u64) -> Result<()> {
        let id = payload.id;
        let is_lease = category == ReservationCategory::Authority;
        let is_new = self.registry.with_reservation(id, |_| ()).is_err();
        if is_new {
            let reservation = Reservation::new_incoming_ticket(category, id, payload.slice, from, payload.resources, payload.term);
            self.database.add_reservation(&reservation)?;
            self.registry.register(reservation)?;
        }
        match self.classify_and_maybe_resend(id, is_lease, sequence_in, from)? {
            None => return Ok(()),
            Some(()) => {}
        }
        let action = self.registry.with_reservation_mut(id, |r| r.bind())??;
        if action == ServerAction::AwaitPolicy {
            match category {
                ReservationCategory::Broker => self.enqueue_broker_bid(id),
                ReservationCategory::Authority => self.finish_authority_bind(id)?,
                ReservationCategory::Client => return Err(Error::InvalidState { operation: "handle_incoming_request".into(), state: "Client".into() }),
            }
        }
        Ok(())
    }

    /// Classifies an inbound server-side request's sequence number
    /// against the reservation's current one (spec §4.3 "Sequence number
    /// discipline"). Returns `Ok(Some(()))` when the caller should
    /// proceed to dispatch the request, `Ok(None)` once this call has
    /// already handled it completely (resent a cached response, or
    /// silently dropped a stale/in-progress duplicate).
    fn classify_and_maybe_resend(&mut self, id: ReservationId, is_lease: bool, sequence_in: u64, from: ActorId) -> Result<Option<()>> {
        let outcome =
            self.registry.with_reservation_mut(id, |r| if is_lease { r.classify_incoming_lease(sequence_in) } else { r.classify_incoming_ticket(sequence_in) })?;
        match outcome {
            crate::rpc::SequenceOutcome::Greater => Ok(Some(())),
            crate::rpc::SequenceOutcome::Smaller => {
                log::warn!("reservation {} dropped stale request at sequence {}", id, sequence_in);
                Ok(None)
            }
            crate::rpc::SequenceOutcome::InProgress => {
                log::warn!("reservation {} dropped request at sequence {} while a request is already pending", id, sequence_in);
                Ok(None)
            }
            crate::rpc::SequenceOutcome::Equal => {
                let cached = self.registry.with_reservation(id, |r| if is_lease { r.last_lease_response() } else { r.last_ticket_response() })?;
                if let Some((resources, term, update)) = cached {
                    let body = if is_lease {
                        PeerMessage::UpdateLease { reservation_id: id, resources, term, update }
                    } else {
                        PeerMessage::UpdateTicket { reservation_id: id, resources, term, update }
                    };
                    self.send_direct(from, body)?;
                }
                Ok(None)
            }
        }
    }

    /// Queues a bound broker request into the calendar's FIFO bid queue
    /// instead of allocating synchronously (spec §4.6 step 2): the
    /// request waits for `service_broker_bids` to drain it during a
    /// later tick, batched with every other bid due the same cycle.
    fn enqueue_broker_bid(&mut self, id: ReservationId) {
        let cycle = self.clock.cycle(Utc::now());
        let _ = self.registry.with_reservation_mut(id, |r| r.bid_pending = true);
        self.calendar.add_request(cycle, id);
    }

    fn authority_assign(&self, id: ReservationId) -> Result<ResourceSet> {
        self.registry.with_reservation(id, |r| {
            let policy = self.authority_policy.as_ref().ok_or_else(|| Error::NotSupported("no authority policy configured".into()))?;
            policy.assign(r)
        })?
    }

    /// The authority side of `handle_incoming_request`'s `AwaitPolicy`
    /// branch: the authority loop has no FIFO queue of its own (spec
    /// §4.6 distinguishes broker bid-queueing from authority resource
    /// control dispatch), so `assign` runs immediately.
    fn finish_authority_bind(&mut self, id: ReservationId) -> Result<()> {
        match self.authority_assign(id) {
            Ok(resources) => {
                let term = self.registry.with_reservation(id, |r| r.requested_term.expect("requested term present once bound"))?;
                self.registry.with_reservation_mut(id, |r| r.approve_bind(resources, term))??;
                self.persist(id);
                self.substrate_transfer_in_approved(id)
            }
            Err(e) => {
                self.fail_and_notify(id, &e);
                Ok(())
            }
        }
    }

    /// Drains bids due by the calendar's advance cycle and services each
    /// against the broker policy, then ages out anything left in the
    /// queue past `queue_threshold` cycles (spec §4.6 steps 2-4,
    /// Testable Property 7).
    fn service_broker_bids(&mut self, cycle: u64) {
        let (_, advance_cycle) = self.calendar.allocation_window();
        for id in self.calendar.drain_due_bids(advance_cycle) {
            if let Err(e) = self.service_one_broker_bid(id) {
                log::warn!("tick: broker bid {} failed: {}", id, e);
            }
        }
        while self.calendar.queue_age(cycle) > self.config.queue_threshold {
            let Some(id) = self.calendar.pop_front_bid() else { break };
            let error = Error::InsufficientResources(format!("bid aged past queue_threshold ({} cycles)", self.config.queue_threshold));
            self.fail_and_notify(id, &error);
        }
    }

    fn service_one_broker_bid(&mut self, id: ReservationId) -> Result<()> {
        let outcome = self.registry.with_reservation(id, |r| {
            let policy = self.broker_policy.as_ref().ok_or_else(|| Error::NotSupported("no broker policy configured".into()))?;
            policy.bind(r)
        })?;
        match outcome {
            Ok((resources, term)) => {
                self.registry.with_reservation_mut(id, |r| r.approve_bind(resources, term))??;
                self.persist(id);
                self.substrate_transfer_in_approved(id)
            }
            Err(e) => {
                self.fail_and_notify(id, &e);
                Ok(())
            }
        }
    }

    /// Handles an incoming `extend_ticket` request (the broker-side
    /// `ExtendingTicket` arc spec §4.3 documents but which had no
    /// dispatcher wiring at all): re-approves via `extend_broker` rather
    /// than the batched bid queue, since this resizes an already-granted
    /// ticket rather than competing for fresh inventory.
    pub fn handle_incoming_extend_ticket(&mut self, from: ActorId, payload: crate::rpc::ReservationPayload, sequence_in: u64) -> Result<()> {
        let id = payload.id;
        if self.classify_and_maybe_resend(id, false, sequence_in, from)?.is_none() {
            return Ok(());
        }
        let action = self.registry.with_reservation_mut(id, |r| r.bind_extend(payload.resources, payload.term))??;
        if action == ServerAction::AwaitPolicy {
            let outcome = self.registry.with_reservation(id, |r| {
                let policy = self.broker_policy.as_ref().ok_or_else(|| Error::NotSupported("no broker policy configured".into()))?;
                policy.extend_broker(r)
            })?;
            match outcome {
                Ok((resources, term)) => {
                    self.registry.with_reservation_mut(id, |r| r.approve_extend(resources, term))??;
                    self.persist(id);
                    self.substrate_transfer_in_current(id)?;
                }
                Err(e) => self.fail_and_notify(id, &e),
            }
        }
        Ok(())
    }

    /// Handles an incoming `extend_lease` request (the authority-side
    /// `ActiveTicketed/ExtendingLease` arc): reuses `assign` since
    /// `AuthorityPolicy` has no dedicated extend hook, re-approving the
    /// already-ticketed term/resources.
    pub fn handle_incoming_extend_lease(&mut self, from: ActorId, payload: crate::rpc::ReservationPayload, sequence_in: u64) -> Result<()> {
        let id = payload.id;
        if self.classify_and_maybe_resend(id, true, sequence_in, from)?.is_none() {
            return Ok(());
        }
        let action = self.registry.with_reservation_mut(id, |r| r.bind_extend_lease(payload.resources, payload.term))??;
        if action == ServerAction::AwaitPolicy {
            match self.authority_assign(id) {
                Ok(resources) => {
                    let term = self.registry.with_reservation(id, |r| r.requested_term.expect("requested term present once bound"))?;
                    self.registry.with_reservation_mut(id, |r| r.approve_extend_lease(resources, term))??;
                    self.persist(id);
                    self.substrate_transfer_in_current(id)?;
                }
                Err(e) => self.fail_and_notify(id, &e),
            }
        }
        Ok(())
    }

    /// Handles an incoming `modify_lease` request (the authority-side
    /// `Active/ModifyingLease` arc), same re-approval path as
    /// `handle_incoming_extend_lease` but resizing resources rather than
    /// the term.
    pub fn handle_incoming_modify_lease(&mut self, from: ActorId, payload: crate::rpc::ReservationPayload, sequence_in: u64) -> Result<()> {
        let id = payload.id;
        if self.classify_and_maybe_resend(id, true, sequence_in, from)?.is_none() {
            return Ok(());
        }
        let action = self.registry.with_reservation_mut(id, |r| r.bind_modify_lease(payload.resources))??;
        if action == ServerAction::AwaitPolicy {
            match self.authority_assign(id) {
                Ok(resources) => {
                    self.registry.with_reservation_mut(id, |r| r.approve_modify_lease(resources))??;
                    self.persist(id);
                    self.substrate_transfer_in_current(id)?;
                }
                Err(e) => self.fail_and_notify(id, &e),
            }
        }
        Ok(())
    }

    /// Handles an incoming `close`/`relinquish` request: both resolve
    /// through the same server-side `close_request`/`probe_closing_server`
    /// pair (spec §4.3's close round-trip law).
    pub fn handle_incoming_close(&mut self, id: ReservationId) -> Result<()> {
        self.registry.with_reservation_mut(id, |r| r.close_request())??;
        self.registry.with_reservation_mut(id, |r| r.probe_closing_server())?;
        self.persist(id);
        self.release_if_closed(id);
        Ok(())
    }

    fn substrate_transfer_in_approved(&self, id: ReservationId) -> Result<()> {
        let Some(substrate) = &self.substrate else { return Ok(()) };
        self.registry.with_reservation(id, |r| {
            if let Some(crate::model::ConcreteSet::Units(units)) = r.approved_resources.as_ref().map(|r| &r.concrete) {
                for unit in units.values() {
                    substrate.transfer_in(id, unit);
                }
            }
        })
    }

    fn substrate_transfer_in_current(&self, id: ReservationId) -> Result<()> {
        let Some(substrate) = &self.substrate else { return Ok(()) };
        self.registry.with_reservation(id, |r| {
            if let Some(crate::model::ConcreteSet::Units(units)) = r.current_resources.as_ref().map(|r| &r.concrete) {
                for unit in units.values() {
                    substrate.transfer_in(id, unit);
                }
            }
        })
    }

    fn send_direct(&self, target: ActorId, body: PeerMessage) -> Result<()> {
        let proxy = self.proxy_for(target)?;
        proxy.send(Envelope::new(self.identity, 0, body));
        Ok(())
    }

    /// Routes an inbound `Envelope` to the dispatcher method matching
    /// its `PeerMessage` variant (spec §1's "kernel dispatcher locates
    /// the slice/reservation" step) — the single entry point a `Proxy`'s
    /// delivery closure calls once it has an envelope addressed to this
    /// actor.
    pub fn receive(&mut self, envelope: Envelope) -> Result<()> {
        let from = envelope.caller_identity;
        let sequence_in = envelope.sequence_in;
        match envelope.body {
            PeerMessage::Ticket { reservation } => self.handle_incoming_request(from, reservation, ReservationCategory::Broker, sequence_in),
            PeerMessage::Redeem { reservation } => self.handle_incoming_request(from, reservation, ReservationCategory::Authority, sequence_in),
            PeerMessage::ExtendTicket { reservation } => self.handle_incoming_extend_ticket(from, reservation, sequence_in),
            PeerMessage::ExtendLease { reservation } => self.handle_incoming_extend_lease(from, reservation, sequence_in),
            PeerMessage::ModifyLease { reservation } => self.handle_incoming_modify_lease(from, reservation, sequence_in),
            PeerMessage::Close { reservation_id } | PeerMessage::Relinquish { reservation_id } => self.handle_incoming_close(reservation_id),
            PeerMessage::UpdateTicket { reservation_id, resources, term, update } => self.handle_update(reservation_id, resources, term, update, envelope.sequence_in, false),
            PeerMessage::UpdateLease { reservation_id, resources, term, update } => self.handle_update(reservation_id, resources, term, update, envelope.sequence_in, true),
            PeerMessage::UpdateDelegation { delegation_id, graph, update } => self.handle_update_delegation(delegation_id, graph, update),
            PeerMessage::ClaimDelegation { delegation_id } => self.handle_claim_delegation(from, delegation_id),
            PeerMessage::ReclaimDelegation { delegation_id } => self.handle_reclaim_delegation(from, delegation_id),
            PeerMessage::Query { properties } => {
                let response = self.query(&properties);
                self.send_direct(from, PeerMessage::QueryResponse { properties: response })
            }
            PeerMessage::QueryResponse { .. } => Ok(()),
        }
    }

    /// Absorbs a policy/allocator error at the reservation boundary
    /// (spec §7's `map_and_update`): marks the reservation Failed and
    /// sends a one-shot failure update, rather than propagating to the
    /// caller.
    fn fail_and_notify(&mut self, id: ReservationId, error: &Error) {
        log::warn!("reservation {} failed during policy dispatch: {}", id, error);
        let _ = self.registry.with_reservation_mut(id, |r| r.fail_notify(error.to_string()));
        self.persist(id);
    }

    /// Writes the current snapshot of a reservation back to the database
    /// plugin (spec §6), mirroring the teacher's
    /// `update_reservation` call after a mutating kernel operation.
    fn persist(&self, id: ReservationId) {
        if let Ok(Err(e)) = self.registry.with_reservation(id, |r| self.database.update_reservation(r)) {
            log::warn!("reservation {} failed to persist: {}", id, e);
        }
    }

    /// Releases broker/authority policy capacity and quota balance
    /// exactly once, the first time a reservation is observed `Closed`
    /// (spec §4.6/§4.7's capacity-accounting model, Testable Property 7).
    fn release_if_closed(&mut self, id: ReservationId) {
        let released = self.registry.with_reservation_mut(id, |r| r.mark_released()).unwrap_or(false);
        if !released {
            return;
        }
        let Ok(category) = self.registry.with_reservation(id, |r| r.category()) else { return };
        match category {
            ReservationCategory::Broker => {
                if let Some(policy) = &self.broker_policy {
                    let _ = self.registry.with_reservation(id, |r| policy.closed(r));
                }
            }
            ReservationCategory::Authority => {
                if let Some(policy) = &self.authority_policy {
                    let _ = self.registry.with_reservation(id, |r| policy.close(r));
                }
            }
            ReservationCategory::Client => {
                let Some(quota) = &self.quota else { return };
                let info = self.registry.with_reservation(id, |r| {
                    let resource_type = r.current_resources.as_ref().or(r.requested_resources.as_ref()).map(|res| res.get_type().clone());
                    (r.slice, resource_type)
                });
                let Ok((slice_id, Some(resource_type))) = info else { return };
                let Ok(project_id) = self.registry.with_slice(slice_id, |s| s.project_id.clone()) else { return };
                if let Err(e) = quota.release(&project_id, &resource_type) {
                    log::warn!("reservation {} quota release failed: {}", id, e);
                }
            }
        }
    }

    /// Applies an inbound `update_ticket`/`update_lease` response on the
    /// client side, enforcing the sequence-number discipline (spec
    /// §4.3/§4.5) before touching the reservation's state machine.
    pub fn handle_update(&mut self, id: ReservationId, resources: ResourceSet, term: Term, update: crate::reservation::UpdateData, incoming_sequence: u64, is_lease: bool) -> Result<()> {
        let current = self.registry.with_reservation(id, |r| {
            let client = r.as_client().expect("update applies to client reservations");
            if is_lease { client.sequence_lease_in } else { client.sequence_ticket_in }
        })?;
        let has_pending = self.registry.with_reservation(id, |r| r.pending_state != PendingState::None)?;
        match crate::rpc::classify(incoming_sequence, current, has_pending) {
            crate::rpc::SequenceOutcome::Smaller => Err(Error::SequenceSmaller { incoming: incoming_sequence, current }),
            crate::rpc::SequenceOutcome::InProgress => Err(Error::SequenceInProgress { incoming: incoming_sequence }),
            crate::rpc::SequenceOutcome::Equal => Err(Error::DuplicateRequest { sequence: incoming_sequence }),
            crate::rpc::SequenceOutcome::Greater => {
                self.registry.with_reservation_mut(id, |r| {
                    let client = r.as_client_mut().expect("update applies to client reservations");
                    if is_lease { client.sequence_lease_in = incoming_sequence } else { client.sequence_ticket_in = incoming_sequence }
                })?;
                if is_lease {
                    let action = self.registry.with_reservation_mut(id, |r| r.apply_lease_update(resources, term, update))??;
                    self.persist(id);
                    self.release_if_closed(id);
                    self.dispatch_client_action(id, action)
                } else {
                    let result = self.registry.with_reservation_mut(id, |r| r.apply_ticket_update(resources, term, update))?;
                    self.persist(id);
                    self.release_if_closed(id);
                    result
                }
            }
        }
    }

    pub fn query(&self, properties: &PropertyBag) -> PropertyBag {
        self.broker_policy.as_ref().map(|p| p.query(properties)).unwrap_or_default()
    }

    // ---- Delegations --------------------------------------------------

    pub fn add_delegation(&mut self, slice: SliceId, issuer: ActorId, holder: ActorId) -> DelegationId {
        let delegation = Delegation::new(DelegationId::new(), slice, issuer, holder);
        let id = delegation.id;
        self.registry.add_delegation(delegation);
        id
    }

    /// Applies an inbound `update_delegation`: the first one a holder
    /// sees attaches the graph fragment (Nascent -> Delegated), later
    /// ones amend it (spec §4.5 "Claim/reclaim of delegations share the
    /// request pipeline").
    pub fn handle_update_delegation(&mut self, delegation_id: DelegationId, graph: Sliver, _update: UpdateData) -> Result<()> {
        self.registry.with_delegation_mut(delegation_id, |d| if d.graph.is_some() { d.amend_delegate(graph) } else { d.delegate(graph) })?
    }

    /// Answers a `claim_delegation` request with the delegation's
    /// current graph fragment, carried back as an `update_delegation`
    /// (there is no dedicated claim-response message in spec §6).
    pub fn handle_claim_delegation(&mut self, from: ActorId, delegation_id: DelegationId) -> Result<()> {
        let graph = self.registry.with_delegation_mut(delegation_id, |d| d.claim().map(|s| s.clone()))??;
        self.send_direct(from, PeerMessage::UpdateDelegation { delegation_id, graph, update: UpdateData::new().event("claimed") })
    }

    /// Answers a `reclaim_delegation` request by closing the delegation
    /// on this side and acknowledging with an empty `update_delegation`.
    pub fn handle_reclaim_delegation(&mut self, from: ActorId, delegation_id: DelegationId) -> Result<()> {
        self.registry.with_delegation_mut(delegation_id, |d| d.close())?;
        self.send_direct(from, PeerMessage::UpdateDelegation { delegation_id, graph: Sliver::new(), update: UpdateData::new().event("reclaimed") })
    }

    /// One delegation's share of the tick's probe pass (spec §4.4): ages
    /// out a delegation stuck Nascent too long, then sends a fresh
    /// `update_delegation` to the holder if the graph changed since the
    /// last probe.
    fn probe_delegation(&mut self, delegation_id: DelegationId) -> Result<()> {
        let (holder, pending) = self.registry.with_delegation_mut(delegation_id, |d| {
            d.prepare_probe();
            (d.holder, d.service_probe())
        })?;
        if let Some(graph) = pending {
            self.send_direct(holder, PeerMessage::UpdateDelegation { delegation_id, graph, update: UpdateData::new().event("delegated") })?;
        }
        Ok(())
    }

    // ---- Tick (spec §4.4's probe/service model) ----------------------

    /// One kernel tick: probe delegations, then reservations, then
    /// reevaluate slice state, then purge terminal entries. Each
    /// reservation/delegation is handled independently so one failure
    /// does not abort the pass (spec §7).
    pub fn tick(&mut self) {
        let now = Utc::now();
        let cycle = self.clock.cycle(now);

        for delegation_id in self.registry.delegation_ids() {
            if let Err(e) = self.probe_delegation(delegation_id) {
                log::warn!("tick: delegation {} probe failed: {}", delegation_id, e);
            }
        }

        for reservation_id in self.registry.reservation_ids() {
            if let Err(e) = self.probe_and_service(reservation_id, now) {
                log::warn!("tick: reservation {} probe failed: {}", reservation_id, e);
            }
        }

        for slice_id in self.registry.slice_ids() {
            let bins: Vec<StateBin> = self
                .registry
                .with_slice(slice_id, |s| s.reservations())
                .unwrap_or_default()
                .into_iter()
                .filter_map(|rid| self.registry.with_reservation(rid, |r| StateBin::new(r.state, r.pending_state)).ok())
                .collect();
            match self.registry.with_slice_mut(slice_id, |s| s.reevaluate(&bins)) {
                Ok(Ok(())) => {}
                Ok(Err(e)) | Err(e) => log::warn!("tick: slice {} reevaluate failed: {}", slice_id, e),
            }
        }

        self.service_broker_bids(cycle);
        self.calendar.tick(cycle);
        for id in self.registry.terminal_reservation_ids() {
            if let Err(e) = self.database.remove_reservation(id) {
                log::warn!("tick: failed to remove persisted reservation {}: {}", id, e);
            }
        }
        let (purged_r, purged_d) = self.registry.purge_terminal();
        if purged_r > 0 || purged_d > 0 {
            log::debug!("tick: purged {} reservations, {} delegations", purged_r, purged_d);
        }
    }

    fn probe_and_service(&mut self, id: ReservationId, when: chrono::DateTime<Utc>) -> Result<()> {
        let category = self.registry.with_reservation(id, |r| r.category())?;
        match category {
            ReservationCategory::Client => {
                self.registry.with_reservation_mut(id, |r| {
                    r.probe_priming(when);
                    r.probe_join(when);
                })?;
                let pending_join = self.registry.with_reservation(id, |r| r.service_pending == Some(JoinState::Joining))?;
                if pending_join {
                    if let Some(substrate) = &self.substrate {
                        self.registry.with_reservation(id, |r| {
                            if let Some(units) = r.current_resources.as_ref().map(|r| &r.concrete) {
                                if let crate::model::ConcreteSet::Units(units) = units {
                                    for unit in units.values() {
                                        substrate.transfer_in(id, unit);
                                    }
                                }
                            }
                        })?;
                    }
                }
            }
            ReservationCategory::Broker | ReservationCategory::Authority => {
                self.registry.with_reservation_mut(id, |r| {
                    r.probe_priming_server(when);
                    r.probe_closing_server();
                })?;
                let ready = self.registry.with_reservation(id, |r| r.state == ReservationState::Active && r.dirty)?;
                if ready {
                    let is_lease = category == ReservationCategory::Authority;
                    let (resources, term, update) = self.registry.with_reservation_mut(id, |r| {
                        let result = r.generate_update(is_lease);
                        r.dirty = false;
                        result
                    })??;
                    let client = self.registry.with_reservation(id, |r| r.as_server().and_then(|s| s.client))?;
                    if let Some(client) = client {
                        let body = if is_lease {
                            PeerMessage::UpdateLease { reservation_id: id, resources, term, update }
                        } else {
                            PeerMessage::UpdateTicket { reservation_id: id, resources, term, update }
                        };
                        self.send(client, body, 0, id)?;
                    }
                }
                if category == ReservationCategory::Authority && self.registry.with_reservation(id, |r| r.pending_state == PendingState::Closing)? {
                    if let Some(substrate) = &self.substrate {
                        self.registry.with_reservation(id, |r| {
                            if let Some(crate::model::ConcreteSet::Units(units)) = r.current_resources.as_ref().map(|r| &r.concrete) {
                                for unit in units.values() {
                                    substrate.transfer_out(id, unit);
                                }
                            }
                        })?;
                    }
                }
            }
        }
        self.persist(id);
        self.release_if_closed(id);
        Ok(())
    }

    // ---- Recovery (spec §4.4) ------------------------------------------

    /// Re-drives every persisted reservation through its recovery arc
    /// (spec §4.4): called once at startup before the tick loop begins.
    /// Per slice, cross-checks the in-memory registry against
    /// `database.get_reservations` and only recovers ids the database
    /// still confirms — a reservation the store no longer lists (e.g. a
    /// crash mid-remove) is skipped rather than silently re-driven from
    /// whatever last state happened to be resident in memory.
    pub fn recover(&mut self) {
        for slice_id in self.registry.slice_ids() {
            let persisted = match self.database.get_reservations(slice_id) {
                Ok(ids) => ids,
                Err(e) => {
                    log::error!("recovery: could not read persisted reservations for slice {}: {}", slice_id, e);
                    continue;
                }
            };
            let persisted: std::collections::HashSet<_> = persisted.into_iter().collect();
            let in_memory = self.registry.with_slice(slice_id, |s| s.reservations()).unwrap_or_default();
            for id in in_memory {
                if !persisted.contains(&id) {
                    log::warn!("recovery: reservation {} in slice {} is not in the persisted store, skipping", id, slice_id);
                    continue;
                }
                if let Err(e) = self.recover_one(id) {
                    log::error!("recovery failed for reservation {}: {} (left in last persisted state)", id, e);
                }
            }
        }
    }

    fn recover_one(&mut self, id: ReservationId) -> Result<()> {
        let (category, state, pending) = self.registry.with_reservation(id, |r| (r.category(), r.state, r.pending_state))?;
        if category != ReservationCategory::Client {
            if pending == PendingState::Closing {
                self.registry.with_reservation_mut(id, |r| r.probe_closing_server())?;
            }
            return Ok(());
        }
        match (state, pending) {
            (ReservationState::Nascent, PendingState::None) => self.reserve(id),
            (ReservationState::Nascent, PendingState::Ticketing) => {
                self.registry.with_reservation_mut(id, |r| {
                    r.pending_state = PendingState::None;
                    r.pending_recover = true;
                    let client = r.as_client_mut().expect("client reservation");
                    client.sequence_ticket_out = client.sequence_ticket_out.saturating_sub(1);
                })?;
                self.reserve(id)
            }
            (ReservationState::Ticketed, PendingState::Redeeming) => self.reserve(id),
            (ReservationState::Active, PendingState::None) => {
                let joining = self.registry.with_reservation(id, |r| r.as_client().map(|c| c.join_state) == Some(JoinState::Joining))?;
                if joining {
                    if let Some(substrate) = &self.substrate {
                        self.registry.with_reservation(id, |r| {
                            if let Some(crate::model::ConcreteSet::Units(units)) = r.current_resources.as_ref().map(|r| &r.concrete) {
                                for unit in units.values() {
                                    substrate.transfer_in(id, unit);
                                }
                            }
                        })?;
                    }
                    self.reserve(id)
                } else {
                    Ok(())
                }
            }
            (_, PendingState::Priming) if self.registry.with_reservation(id, |r| r.pending_recover)? => self.close(id),
            (_, PendingState::Closing) => self.close(id),
            _ => Ok(()),
        }
    }

    // ---- Failed RPC handling (spec §4.5) -------------------------------

    pub fn handle_failed_rpc(&mut self, failed: &crate::rpc::FailedRpc) -> Result<()> {
        let outcome = self.registry.with_reservation(failed.reservation_id, |r| crate::rpc::handle_failed_rpc(r, failed))?;
        match outcome {
            crate::rpc::FailedRpcOutcome::Retry => {
                if !self.pending.note_retry(&failed.message_id) {
                    self.registry.with_reservation_mut(failed.reservation_id, |r| r.fail_notify("exhausted retries after network error"))?;
                }
                Ok(())
            }
            crate::rpc::FailedRpcOutcome::CloseLocally => {
                self.registry.with_reservation_mut(failed.reservation_id, |r| r.transition("close locally", ReservationState::Closed, PendingState::None))?;
                Ok(())
            }
            crate::rpc::FailedRpcOutcome::Fail => {
                self.registry.with_reservation_mut(failed.reservation_id, |r| r.fail_notify(failed.details.clone()))?;
                Ok(())
            }
            crate::rpc::FailedRpcOutcome::Unauthorized => Err(Error::UnauthorizedPeer {
                expected: failed.expected_peer.to_string(),
                actual: failed.actual_peer.map(|a| a.to_string()).unwrap_or_default(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::broker_policy::{BrokerSimpleUnitsPolicy, FixedNodeSelector};
    use crate::model::ResourceType;
    use crate::policy::inventory::{Inventory, SimpleUnitsInventory};

    fn term() -> Term {
        Term::new(chrono::DateTime::from_timestamp_millis(0).unwrap(), chrono::DateTime::from_timestamp_millis(1000).unwrap())
    }

    struct RecordingProxy {
        target: ActorId,
        sent: std::sync::Arc<std::sync::Mutex<Vec<PeerMessage>>>,
    }

    impl Proxy for RecordingProxy {
        fn target(&self) -> ActorId {
            self.target
        }
        fn send(&self, envelope: Envelope) {
            self.sent.lock().unwrap().push(envelope.body);
        }
    }

    #[test]
    fn ticket_registers_reservation_and_sends_ticket_request() {
        let mut dispatcher = Dispatcher::new(ActorId::new(), ActorRole::Orchestrator, KernelConfig::default());
        let slice = dispatcher.add_slice("S1", dispatcher.identity, "proj-1", SliceKind::Client).unwrap();
        let broker = ActorId::new();
        let authority = ActorId::new();
        let sent = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        dispatcher.add_proxy(broker, Box::new(RecordingProxy { target: broker, sent: sent.clone() }));

        let id = dispatcher.ticket(slice, broker, authority, ResourceSet::new(1, ResourceType::new("T1")), term()).unwrap();
        assert_eq!(sent.lock().unwrap().len(), 1);
        assert!(matches!(sent.lock().unwrap()[0], PeerMessage::Ticket { .. }));
        assert_eq!(dispatcher.registry.with_reservation(id, |r| r.state).unwrap(), ReservationState::Nascent);
    }

    #[test]
    fn broker_bind_allocates_from_inventory_on_incoming_ticket() {
        let mut inventory = Inventory::new();
        inventory.add(Box::new(SimpleUnitsInventory::new(ResourceType::new("T1"), DelegationId::new(), 10)));
        let policy = BrokerSimpleUnitsPolicy::new(inventory, FixedNodeSelector::new("node-1"));

        let mut dispatcher = Dispatcher::new(ActorId::new(), ActorRole::Broker, KernelConfig::default()).with_broker_policy(Box::new(policy));
        let slice = dispatcher.add_slice("S1", dispatcher.identity, "proj-1", SliceKind::BrokerClient).unwrap();
        let client = ActorId::new();
        let payload = crate::rpc::ReservationPayload { id: ReservationId::new(), slice, resources: ResourceSet::new(1, ResourceType::new("T1")), term: term(), config: PropertyBag::new() };
        let id = payload.id;
        dispatcher.handle_incoming_request(client, payload, ReservationCategory::Broker, 1).unwrap();
        assert_eq!(dispatcher.registry.with_reservation(id, |r| r.pending_state).unwrap(), PendingState::Redeeming);

        dispatcher.tick();
        assert_eq!(dispatcher.registry.with_reservation(id, |r| r.pending_state).unwrap(), PendingState::Priming);

        // The grant now carries a real ticket, so the next tick's probe
        // phase resolves priming and the reservation goes Active (S1).
        dispatcher.tick();
        assert_eq!(dispatcher.registry.with_reservation(id, |r| r.state).unwrap(), ReservationState::Active);
        assert_eq!(dispatcher.registry.with_reservation(id, |r| r.current_resources.as_ref().map(|r| r.get_units())).unwrap(), Some(1));
    }

    #[test]
    fn receive_routes_a_ticket_across_two_dispatchers_via_local_proxy() {
        use crate::rpc::LocalProxy;
        use std::sync::Mutex;

        let mut inventory = Inventory::new();
        inventory.add(Box::new(SimpleUnitsInventory::new(ResourceType::new("T1"), DelegationId::new(), 10)));
        let policy = BrokerSimpleUnitsPolicy::new(inventory, FixedNodeSelector::new("node-1"));

        let broker_identity = ActorId::new();
        let broker = std::sync::Arc::new(Mutex::new(Dispatcher::new(broker_identity, ActorRole::Broker, KernelConfig::default()).with_broker_policy(Box::new(policy))));
        broker.lock().unwrap().add_slice("S1", broker_identity, "proj-1", SliceKind::BrokerClient).unwrap();

        let broker_for_proxy = broker.clone();
        let broker_proxy = LocalProxy::new(
            broker_identity,
            std::sync::Arc::new(move |envelope| {
                broker_for_proxy.lock().unwrap().receive(envelope).unwrap();
            }),
        );

        let authority = ActorId::new();
        let mut client = Dispatcher::new(ActorId::new(), ActorRole::Orchestrator, KernelConfig::default());
        let slice = client.add_slice("S1", client.identity, "proj-1", SliceKind::Client).unwrap();
        client.add_proxy(broker_identity, Box::new(broker_proxy));

        let id = client.ticket(slice, broker_identity, authority, ResourceSet::new(1, ResourceType::new("T1")), term()).unwrap();

        broker.lock().unwrap().tick();
        let pending_state = broker.lock().unwrap().registry.with_reservation(id, |r| r.pending_state).unwrap();
        assert_eq!(pending_state, PendingState::Priming);

        broker.lock().unwrap().tick();
        let state = broker.lock().unwrap().registry.with_reservation(id, |r| r.state).unwrap();
        assert_eq!(state, ReservationState::Active);
    }

    #[test]
    fn tick_purges_closed_reservation_after_authority_probe() {
        let mut dispatcher = Dispatcher::new(ActorId::new(), ActorRole::Authority, KernelConfig::default());
        let slice = dispatcher.add_slice("S1", dispatcher.identity, "proj-1", SliceKind::Inventory).unwrap();
        let mut r = Reservation::new_server(ReservationCategory::Authority, ReservationId::new(), slice, Some(ActorId::new()));
        r.transition("force closed", ReservationState::Closed, PendingState::None);
        let id = r.id;
        dispatcher.registry.register(r).unwrap();

        dispatcher.tick();
        assert!(dispatcher.registry.with_reservation(id, |_| ()).is_err());
    }
}
