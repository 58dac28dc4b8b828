//! The hub event loop.
//!
//! One thread owns everything here: the reactor poll, watcher dispatch, the
//! incoming/outgoing frame queues and the routing pipeline. The stabilizer
//! thread talks to this loop only through its loopback connection, and
//! other threads may only wake it through the event notifier.

use ringhub_cluster::{Gate, Node, Stabilizer, CONTROLLER, KEY_BITS};
use ringhub_codec::commands::*;
use ringhub_codec::{
    FramePool, FrameRef, Header, HubMetrics, OverlayMetrics, ResourceMetric, RouteEntry,
    TrafficMetric, MTU,
};
use ringhub_core::{Counters, DropReason, HubConfig, HubError};
use ringhub_crypto::{IdentityStore, MemoryIdentityStore, SrpGroup, SrpHash};
use ringhub_transport::{
    Alarm, Connection, FsTracker, Interest, Interrupt, Listener, Notifier, NotifierHandle,
    Reactor, ReadOutcome, Registry, Watcher, WatcherKind, WATCHER_ACTIVE, WATCHER_INVALID,
    WATCHER_OUT, WATCHER_READY,
};
use ringhub_transport::watcher::{EVENT_CLOSE, EVENT_READ, EVENT_WRITE};
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// First identifier of the ephemeral guest range.
pub const EPHEMERAL_BASE: u64 = 1 << 63;

/// Identifiers of the prime watchers, outside both the ring and the
/// ephemeral range.
const PRIME_BASE: u64 = 1 << 62;
pub const LISTENER_UID: u64 = PRIME_BASE + 1;
pub const ALARM_UID: u64 = PRIME_BASE + 2;
pub const NOTIFIER_UID: u64 = PRIME_BASE + 3;
pub const INTERRUPT_UID: u64 = PRIME_BASE + 4;
pub const TRACKER_UID: u64 = PRIME_BASE + 5;
/// The stabilizer's loopback connection.
pub const WORKER_UID: u64 = PRIME_BASE + 6;

/// Slot class used by output-queue policing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeliveryClass {
    /// Response generated by this hub; may dip into the answer reserve.
    Answer,
    /// Transit traffic; may use the whole queue.
    Forward,
    /// Client publishes and multicast fan-out; unreserved slots only.
    General,
}

struct WorkerLink {
    gate: Arc<Gate>,
    thread: std::thread::JoinHandle<()>,
}

enum Role {
    Listener,
    Link,
    Alarm,
    Notifier,
    Interrupt,
    Tracker,
}

/// Signal-safe remote cancellation: flips the stop flag and wakes the poll.
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
    notifier: Option<NotifierHandle>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
        if let Some(notifier) = &self.notifier {
            let _ = notifier.alert(1);
        }
    }
}

pub struct Hub {
    uid: u64,
    pub(crate) config: HubConfig,
    pub(crate) node: Node,
    pub(crate) registry: Registry,
    reactor: Reactor,
    pub(crate) pool: FramePool,
    incoming: ringhub_dsa::Ring<FrameRef>,
    pub(crate) outgoing: ringhub_dsa::Ring<FrameRef>,
    /// Ephemeral identifiers in admission order; each entry's lease is
    /// judged by its connection's creation clock.
    guests: ringhub_dsa::Ring<u64>,
    pub(crate) counters: Counters,
    pub(crate) identities: Box<dyn IdentityStore>,
    pub(crate) srp_group: SrpGroup,
    pub(crate) srp_hash: SrpHash,
    /// Seed for the identity-hiding fake salt.
    pub(crate) seed: [u8; 32],
    next_ephemeral: u64,
    cancel: Arc<AtomicBool>,
    notifier: Option<NotifierHandle>,
    worker: Option<WorkerLink>,
    configured: bool,
}

impl Hub {
    /// Creates a hub on the default ring.
    pub fn new(uid: u64, config: HubConfig) -> Result<Self, HubError> {
        Self::with_bits(uid, KEY_BITS, config)
    }

    /// Creates a hub on a ring of `2^bits` positions. The identifier must
    /// be a ring member; 0 is the controller, never a hub.
    pub fn with_bits(uid: u64, bits: u32, config: HubConfig) -> Result<Self, HubError> {
        let node = Node::with_bits(uid, bits)?;
        if uid == CONTROLLER {
            return Err(HubError::Config("identifier 0 is reserved".into()));
        }
        let group = SrpGroup::from_bits(config.group_size)
            .ok_or_else(|| HubError::Config(format!("unsupported group {}", config.group_size)))?;
        let hash = SrpHash::from_name(&config.hash)
            .ok_or_else(|| HubError::Config(format!("unsupported digest {}", config.hash)))?;
        let mut seed = [0u8; 32];
        rand_seed(&mut seed);
        Ok(Self {
            uid,
            node,
            registry: Registry::new(),
            reactor: Reactor::new(config.max_events)?,
            pool: FramePool::new(config.max_messages),
            incoming: ringhub_dsa::Ring::new(config.max_messages),
            outgoing: ringhub_dsa::Ring::new(config.max_messages),
            guests: ringhub_dsa::Ring::new(config.max_guests.max(2)),
            counters: Counters::new(),
            identities: Box::new(MemoryIdentityStore::new()),
            srp_group: group,
            srp_hash: hash,
            seed,
            next_ephemeral: EPHEMERAL_BASE,
            cancel: Arc::new(AtomicBool::new(false)),
            notifier: None,
            worker: None,
            configured: false,
            config,
        })
    }

    pub fn uid(&self) -> u64 {
        self.uid
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn node_mut(&mut self) -> &mut Node {
        &mut self.node
    }

    pub fn identities_mut(&mut self) -> &mut dyn IdentityStore {
        self.identities.as_mut()
    }

    /// Replaces the identity backend before the loop starts.
    pub fn set_identity_store(&mut self, store: Box<dyn IdentityStore>) {
        self.identities = store;
    }

    pub fn attached(&self, uid: u64) -> bool {
        self.registry.contains(uid)
    }

    pub fn guest_count(&self) -> usize {
        self.guests.len()
    }

    /// Handle for cancelling the loop from another thread. Complete after
    /// [`Hub::configure`]; before that only the flag is armed.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            flag: Arc::clone(&self.cancel),
            notifier: self.notifier.as_ref().and_then(|n| n.try_clone().ok()),
        }
    }

    /// Installs the prime watchers and, when bootstrap peers are known, the
    /// stabilizer service. Idempotent.
    pub fn configure(&mut self) -> Result<(), HubError> {
        if self.configured {
            return Ok(());
        }
        self.reactor.set_timeout(-1);

        if self.config.listen {
            let listener = Listener::bind(
                &self.config.bind_name,
                self.config.bind_type,
                self.config.backlog,
            )?;
            let mut w = Watcher::new(LISTENER_UID, WatcherKind::Listener(listener));
            self.reactor.add(&mut w, Interest::READ)?;
            self.registry.put(w).map_err(|_| duplicate_watcher())?;
        }

        let alarm = Alarm::new(
            self.config.alarm_expiration_ms,
            self.config.alarm_interval_ms,
        )?;
        let mut w = Watcher::new(ALARM_UID, WatcherKind::Alarm(alarm));
        self.reactor.add(&mut w, Interest::READ)?;
        self.registry.put(w).map_err(|_| duplicate_watcher())?;

        let notifier = Notifier::new(self.config.semaphore_mode)?;
        self.notifier = Some(notifier.handle()?);
        let mut w = Watcher::new(NOTIFIER_UID, WatcherKind::Notifier(notifier));
        self.reactor.add(&mut w, Interest::READ)?;
        self.registry.put(w).map_err(|_| duplicate_watcher())?;

        if self.config.signal_capture {
            let interrupt = Interrupt::new()?;
            let mut w = Watcher::new(INTERRUPT_UID, WatcherKind::Interrupt(interrupt));
            self.reactor.add(&mut w, Interest::READ)?;
            self.registry.put(w).map_err(|_| duplicate_watcher())?;
        }

        let tracker = FsTracker::new()?;
        let mut w = Watcher::new(TRACKER_UID, WatcherKind::Tracker(tracker));
        self.reactor.add(&mut w, Interest::READ)?;
        self.registry.put(w).map_err(|_| duplicate_watcher())?;

        if !self.config.bootstrap_nodes.is_empty() {
            self.install_service()?;
        }

        self.configured = true;
        Ok(())
    }

    /// Wires the stabilizer: a socketpair whose hub end joins the registry
    /// as the privileged worker connection, and a thread running the
    /// maintenance cycles on the other end.
    fn install_service(&mut self) -> Result<(), HubError> {
        let (mut connection, stream) = Connection::pair()?;
        connection.set_out_limit(self.config.out_quota);
        connection.set_auth(ringhub_transport::AuthState::Established);
        let mut w = Watcher::new(WORKER_UID, WatcherKind::Link(connection));
        w.set_flags(WATCHER_ACTIVE);
        self.reactor.add(&mut w, Interest::READ)?;
        self.registry.put(w).map_err(|_| duplicate_watcher())?;

        let gate = Arc::new(Gate::new());
        let stabilizer = Stabilizer::new(
            self.uid,
            self.node.bits(),
            stream,
            self.config.bootstrap_nodes.clone(),
            self.config.stabilize_period_ms,
            self.config.stabilize_retry_ms,
            Arc::clone(&gate),
        );
        let thread = std::thread::Builder::new()
            .name("ringhub-stabilizer".into())
            .spawn(move || stabilizer.run())?;
        self.worker = Some(WorkerLink { gate, thread });
        tracing::info!("stabilizer service installed");
        Ok(())
    }

    /// Registers a loopback guest connection and returns the peer stream.
    /// This is how test tooling and co-located services reach the hub.
    pub fn adopt_guest(&mut self) -> Result<UnixStream, HubError> {
        let (connection, stream) = Connection::pair()?;
        self.admit_connection(connection)?;
        Ok(stream)
    }

    /// Registers a loopback connection that is already trusted under the
    /// given identifier, bypassing admission. Used by co-located services.
    pub fn adopt_peer(&mut self, identity: u64) -> Result<UnixStream, HubError> {
        if identity == CONTROLLER || self.registry.contains(identity) {
            return Err(HubError::Config(format!(
                "identifier {} unavailable",
                identity
            )));
        }
        let (mut connection, stream) = Connection::pair()?;
        connection.set_out_limit(self.config.out_quota);
        connection.set_auth(ringhub_transport::AuthState::Established);
        let mut w = Watcher::new(identity, WatcherKind::Link(connection));
        w.set_flags(WATCHER_ACTIVE);
        self.reactor.add(&mut w, Interest::READ)?;
        self.registry.put(w).map_err(|_| duplicate_watcher())?;
        if identity <= self.node.max_id() {
            self.node.update(identity, true);
        }
        Ok(stream)
    }

    /// Runs the event loop until cancelled.
    pub fn execute(&mut self) -> Result<(), HubError> {
        self.configure()?;
        tracing::info!(uid = self.uid, "hub event loop running");
        while !self.cancel.load(Ordering::Acquire) {
            self.run_once()?;
        }
        self.cleanup();
        tracing::info!(uid = self.uid, "hub event loop finished");
        Ok(())
    }

    /// One loop iteration: poll, dispatch, publish, process, maintain.
    pub fn run_once(&mut self) -> Result<(), HubError> {
        self.configure()?;
        let block = self.incoming.is_empty() && self.outgoing.is_empty();
        self.reactor.poll(block, &mut self.registry)?;
        self.dispatch_ready();
        self.publish_outgoing();
        self.process_incoming();
        self.maintain();
        Ok(())
    }

    /// Requests loop termination from the loop thread itself.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    fn dispatch_ready(&mut self) {
        let rounds = self.reactor.ready_len();
        for _ in 0..rounds {
            let Some(uid) = self.reactor.pop_ready() else {
                break;
            };
            let invalid = match self.registry.get_mut(uid) {
                Some(w) => {
                    w.clear_flags(WATCHER_READY);
                    w.test_flags(WATCHER_INVALID)
                }
                None => continue,
            };
            if invalid {
                self.expel(uid);
                continue;
            }
            if self.react(uid) {
                let Hub {
                    reactor, registry, ..
                } = self;
                if let Some(w) = registry.get_mut(uid) {
                    reactor.retain(w);
                }
            }
        }
    }

    fn react(&mut self, uid: u64) -> bool {
        let role = match self.registry.get(uid).map(|w| w.kind()) {
            Some(WatcherKind::Listener(_)) => Role::Listener,
            Some(WatcherKind::Link(_)) => Role::Link,
            Some(WatcherKind::Alarm(_)) => Role::Alarm,
            Some(WatcherKind::Notifier(_)) => Role::Notifier,
            Some(WatcherKind::Interrupt(_)) => Role::Interrupt,
            Some(WatcherKind::Tracker(_)) => Role::Tracker,
            None => return false,
        };
        match role {
            Role::Listener => self.on_listener(uid),
            Role::Link => self.on_connection(uid),
            Role::Alarm => self.on_alarm(uid),
            Role::Notifier => self.on_notifier(uid),
            Role::Interrupt => self.on_interrupt(uid),
            Role::Tracker => self.on_tracker(uid),
        }
    }

    fn on_listener(&mut self, uid: u64) -> bool {
        loop {
            let accepted = {
                let Some(w) = self.registry.get_mut(uid) else {
                    return false;
                };
                w.clear_events(u32::MAX);
                let WatcherKind::Listener(listener) = w.kind() else {
                    return false;
                };
                (listener.accept(), listener.is_local())
            };
            match accepted {
                (Ok(Some(fd)), local) => self.admit(fd, local),
                (Ok(None), _) => return false,
                (Err(e), _) => {
                    tracing::warn!("accept failed: {}", e);
                    return false;
                }
            }
        }
    }

    fn on_alarm(&mut self, uid: u64) -> bool {
        let ticks = {
            let Some(w) = self.registry.get_mut(uid) else {
                return false;
            };
            w.clear_events(u32::MAX);
            match w.kind_mut() {
                WatcherKind::Alarm(alarm) => alarm.read().unwrap_or(0),
                _ => 0,
            }
        };
        if ticks > 0 {
            tracing::trace!(ticks, "alarm");
        }
        false
    }

    fn on_notifier(&mut self, uid: u64) -> bool {
        if let Some(w) = self.registry.get_mut(uid) {
            w.clear_events(u32::MAX);
            if let WatcherKind::Notifier(notifier) = w.kind_mut() {
                let _ = notifier.read();
            }
        }
        false
    }

    fn on_interrupt(&mut self, uid: u64) -> bool {
        loop {
            let signal = {
                let Some(w) = self.registry.get_mut(uid) else {
                    return false;
                };
                w.clear_events(u32::MAX);
                match w.kind_mut() {
                    WatcherKind::Interrupt(interrupt) => interrupt.read().unwrap_or(None),
                    _ => None,
                }
            };
            match signal {
                Some(libc::SIGINT) | Some(libc::SIGTERM) | Some(libc::SIGQUIT) => {
                    tracing::info!("termination signal caught");
                    self.cancel.store(true, Ordering::Release);
                }
                Some(signum) => tracing::debug!(signum, "signal ignored"),
                None => return false,
            }
        }
    }

    fn on_tracker(&mut self, uid: u64) -> bool {
        let events = {
            let Some(w) = self.registry.get_mut(uid) else {
                return false;
            };
            w.clear_events(u32::MAX);
            match w.kind_mut() {
                WatcherKind::Tracker(tracker) => tracker.read().unwrap_or_default(),
                _ => Vec::new(),
            }
        };
        for (name, mask) in events {
            tracing::debug!(name, mask, "file system event");
        }
        false
    }

    fn on_connection(&mut self, uid: u64) -> bool {
        let throttled = self.config.throttle && self.incoming.free() < self.config.in_quota;
        // Frame-pool headroom held back from unauthenticated traffic.
        let reserve_hold = self.pool.capacity().saturating_sub(self.pool.used())
            <= self.config.reserved_slots;
        let quota = self.config.in_quota;
        let step = {
            let Hub { registry, pool, .. } = &mut *self;
            let Some(w) = registry.get_mut(uid) else {
                return false;
            };
            let events = w.events();
            w.clear_events(u32::MAX);
            let held = throttled || (reserve_hold && !w.test_flags(WATCHER_ACTIVE));
            if held && events & (EVENT_READ | EVENT_CLOSE) != 0 {
                // Skip this round; re-arm the consumed edge so the next
                // iteration services it.
                w.set_events(events);
                None
            } else {
                let Some(connection) = w.as_connection_mut() else {
                    return false;
                };
                let mut outcome = ReadOutcome::default();
                let mut broken = false;
                if events & (EVENT_READ | EVENT_CLOSE) != 0 {
                    match connection.read_frames(pool, quota) {
                        Ok(o) => outcome = o,
                        Err(e) => {
                            tracing::debug!(uid, "read failed: {}", e);
                            broken = true;
                        }
                    }
                }
                if !broken && (events & EVENT_WRITE != 0 || connection.has_output()) {
                    broken = connection.write_pending().is_err();
                }
                let has_output = connection.has_output();
                if !has_output {
                    w.clear_flags(WATCHER_OUT);
                }
                let finished = outcome.closed && !has_output;
                let retain = quota > 0 && outcome.frames.len() >= quota;
                if retain {
                    // More frames may sit in the byte ring; the edge was
                    // consumed, so re-arm it for the retained round.
                    w.set_events(EVENT_READ);
                }
                Some((outcome, broken, finished, retain))
            }
        };
        let Some((outcome, broken, finished, retain)) = step else {
            return true;
        };

        for frame in outcome.frames {
            let bytes = {
                let mut f = frame.borrow_mut();
                f.set_origin(uid);
                f.set_ttl(self.config.ttl);
                f.length() as u64
            };
            self.counters.count_received(bytes);
            if !self.incoming.put(frame) {
                self.counters.count_dropped(DropReason::QueueFull, bytes);
            }
        }
        for _ in 0..outcome.starved {
            self.counters
                .count_dropped(DropReason::QueueFull, MTU as u64);
        }
        if outcome.violation || broken {
            self.counters.count_dropped(DropReason::ProtocolViolation, 0);
            self.expel(uid);
            return false;
        }
        if finished {
            self.expel(uid);
            return false;
        }
        retain
    }

    /// Wraps an accepted socket as an ephemeral guest.
    fn admit(&mut self, fd: OwnedFd, local: bool) {
        let connection = Connection::from_fd(fd, local);
        if let Err(e) = self.admit_connection(connection) {
            tracing::warn!("admission refused: {}", e);
        }
    }

    fn admit_connection(&mut self, connection: Connection) -> Result<(), HubError> {
        if self.guests.len() >= self.config.max_guests {
            return Err(HubError::Exhausted("guest slots"));
        }
        if self.registry.len() >= self.config.max_connections {
            return Err(HubError::Exhausted("connection pool"));
        }
        let uid = self.next_ephemeral;
        self.next_ephemeral += 1;
        let mut connection = connection;
        connection.set_out_limit(self.config.out_quota);
        let mut w = Watcher::new(uid, WatcherKind::Link(connection));
        self.reactor.add(&mut w, Interest::READ)?;
        self.registry.put(w).map_err(|_| duplicate_watcher())?;
        self.guests.put(uid);
        tracing::debug!(uid, "guest admitted");
        Ok(())
    }

    /// Removes a watcher from the loop and the registry, releasing its
    /// queued frames and updating the routing records for ring peers.
    pub(crate) fn expel(&mut self, uid: u64) {
        let Some(mut w) = self.registry.remove(uid) else {
            return;
        };
        self.reactor.remove(&mut w);
        if uid != CONTROLLER && uid <= self.node.max_id() && self.node.update(uid, false) {
            tracing::debug!(uid, "ring peer detached");
        } else {
            tracing::debug!(uid, "watcher expelled");
        }
    }

    /// Drains the outgoing queue into destination watchers, writing
    /// immediately so a queued frame never waits for a fresh readiness
    /// edge.
    fn publish_outgoing(&mut self) {
        while let Some(frame) = self.outgoing.get() {
            let (gateway, bytes, class) = {
                let f = frame.borrow();
                (f.gateway(), f.length() as u64, classify(&f, self.uid))
            };
            let Hub {
                registry,
                counters,
                config,
                ..
            } = self;
            let Some(w) = registry.get_mut(gateway) else {
                counters.count_dropped(DropReason::NoRoute, bytes);
                continue;
            };
            let Some(connection) = w.as_connection_mut() else {
                counters.count_dropped(DropReason::NoRoute, bytes);
                continue;
            };
            if !slots_allow(config, connection.queued(), connection.out_limit(), class) {
                counters.count_dropped(DropReason::QueueFull, bytes);
                continue;
            }
            if connection.publish(frame) {
                let _ = connection.write_pending();
                if connection.has_output() {
                    w.set_flags(WATCHER_OUT);
                }
            } else {
                counters.count_dropped(DropReason::QueueFull, bytes);
            }
        }
    }

    fn process_incoming(&mut self) {
        while let Some(frame) = self.incoming.get() {
            self.pipeline(frame);
        }
    }

    /// Probe -> validate -> serve or route.
    fn pipeline(&mut self, frame: FrameRef) {
        let (header, origin) = {
            let f = frame.borrow();
            (*f.header(), f.origin())
        };
        let bytes = header.length as u64;

        if header.aqlf == AQLF_REJECTED {
            self.probe(frame, &header);
            return;
        }
        if header.aqlf != AQLF_REQUEST && header.aqlf != AQLF_RESPONSE {
            self.counters
                .count_dropped(DropReason::ProtocolViolation, bytes);
            return;
        }
        if !self.authorized(origin, &header) {
            self.counters
                .count_dropped(DropReason::Unauthorized, bytes);
            return;
        }
        if header.destination == CONTROLLER
            && !matches!(header.command, CMD_NODE | CMD_OVERLAY | CMD_NULL)
        {
            self.counters
                .count_dropped(DropReason::ProtocolViolation, bytes);
            return;
        }
        if header.aqlf == AQLF_REQUEST && self.serves(header.destination) {
            self.serve(frame);
            return;
        }
        self.plot(frame);
    }

    /// Probe frames get an internal liveness answer and are discarded.
    fn probe(&mut self, frame: FrameRef, header: &Header) {
        if header.command == CMD_OVERLAY && header.qualifier == QLF_PING {
            let origin = frame.borrow().origin();
            {
                let mut f = frame.borrow_mut();
                f.make_response(self.uid, &[]);
                f.set_gateway(origin);
            }
            if !self.outgoing.put(frame) {
                self.counters.count_dropped(DropReason::QueueFull, 0);
            }
        }
        // Anything else probed is silently recycled.
    }

    /// Guests may only identify themselves or probe liveness; everything
    /// else needs an authenticated or internal source.
    fn authorized(&self, origin: u64, header: &Header) -> bool {
        if origin == WORKER_UID {
            return true;
        }
        let active = self
            .registry
            .get(origin)
            .is_some_and(|w| w.test_flags(WATCHER_ACTIVE));
        if active {
            return true;
        }
        match header.command {
            CMD_AUTH => true,
            CMD_NULL => header.qualifier == QLF_DESCRIBE || header.qualifier == QLF_NULL,
            CMD_OVERLAY => header.qualifier == QLF_PING,
            _ => false,
        }
    }

    /// Requests this hub answers itself: its own identifier, and the
    /// controller when this node is the root of 0 and no controller link
    /// is registered.
    fn serves(&self, destination: u64) -> bool {
        destination == self.uid
            || (destination == CONTROLLER
                && self.node.is_local(CONTROLLER)
                && !self.registry.contains(CONTROLLER))
    }

    /// Picks the carrying watcher for a frame: a local watcher when the
    /// destination resolves directly, otherwise the next overlay hop.
    pub(crate) fn plot(&mut self, frame: FrameRef) {
        let (header, bytes) = {
            let f = frame.borrow();
            (*f.header(), f.length() as u64)
        };
        let destination = header.destination;

        // Responses to this hub belong to the stabilizer's loopback.
        let local_target = if destination == self.uid {
            WORKER_UID
        } else {
            destination
        };
        if self
            .registry
            .get(local_target)
            .is_some_and(|w| w.as_connection().is_some())
        {
            frame.borrow_mut().set_gateway(local_target);
            if !self.outgoing.put(frame) {
                self.counters.count_dropped(DropReason::QueueFull, bytes);
            }
            return;
        }

        if destination > self.node.max_id() {
            self.counters.count_dropped(DropReason::NoRoute, bytes);
            return;
        }
        if !frame.borrow_mut().consume_hop() {
            self.counters.count_dropped(DropReason::TtlExpired, bytes);
            return;
        }
        let next = self.node.next_hop(destination);
        if next == self.uid || !self.registry.contains(next) {
            self.counters.count_dropped(DropReason::NoRoute, bytes);
            return;
        }
        frame.borrow_mut().set_gateway(next);
        if !self.outgoing.put(frame) {
            self.counters.count_dropped(DropReason::QueueFull, bytes);
        }
    }

    /// Periodic duties: lease enforcement over a bounded prefix of the
    /// guest ring.
    pub fn maintain(&mut self) {
        self.reap_guests(4);
    }

    fn reap_guests(&mut self, target: usize) {
        let lease = self.config.guest_lease_ms;
        let mut reaped = 0;
        while reaped < target {
            let Some(&uid) = self.guests.front() else {
                break;
            };
            // Promoted or already-expelled entries are stale; discard.
            let expired = match self.registry.get(uid) {
                Some(w) if !w.test_flags(WATCHER_ACTIVE) => match w.as_connection() {
                    Some(connection) => connection.has_timed_out(lease),
                    None => {
                        self.guests.get();
                        continue;
                    }
                },
                _ => {
                    self.guests.get();
                    continue;
                }
            };
            // Admission order matches creation order, so the first live
            // lease stops the scan.
            if !expired {
                break;
            }
            self.guests.get();
            self.expel(uid);
            reaped += 1;
            tracing::debug!(uid, "guest lease expired");
        }
    }

    /// Drops a promoted connection's entry from the guest ring.
    pub(crate) fn forget_guest(&mut self, uid: u64) {
        let _ = self.guests.drain_where(|g| *g == uid);
    }

    /// Starts monitoring file-system events on `path` (inotify mask).
    pub fn track(&mut self, path: &str, mask: u32) -> Result<(), HubError> {
        match self.registry.get_mut(TRACKER_UID).map(|w| w.kind_mut()) {
            Some(WatcherKind::Tracker(tracker)) => tracker.track(path, mask),
            _ => Err(HubError::Protocol("file-system tracker unavailable".into())),
        }
    }

    /// Stops monitoring `path`.
    pub fn untrack(&mut self, path: &str) {
        if let Some(WatcherKind::Tracker(tracker)) =
            self.registry.get_mut(TRACKER_UID).map(|w| w.kind_mut())
        {
            tracker.untrack(path);
        }
    }

    /// Snapshot served by DESCRIBE.
    pub fn metrics(&self) -> OverlayMetrics {
        let mut snapshot = OverlayMetrics {
            hub: HubMetrics {
                uid: self.uid,
                uptime: self.counters.uptime(),
                received: TrafficMetric {
                    units: self.counters.received().units,
                    bytes: self.counters.received().bytes,
                },
                dropped: TrafficMetric {
                    units: self.counters.dropped().units,
                    bytes: self.counters.dropped().bytes,
                },
                connections: ResourceMetric {
                    max: self.config.max_connections as u32,
                    used: self.registry.len() as u32,
                },
                frames: ResourceMetric {
                    max: self.pool.capacity() as u32,
                    used: self.pool.used() as u32,
                },
                mtu: MTU as u32,
            },
            predecessor: self.node.predecessor(),
            successor: self.node.successor(),
            routes: self.node.table_size() as u32,
            stable: self.node.is_stable(),
            route: [RouteEntry::default(); OverlayMetrics::MAX_ROUTES],
        };
        for i in 0..self.node.table_size().min(OverlayMetrics::MAX_ROUTES) {
            let Some(finger) = self.node.finger(i) else {
                break;
            };
            snapshot.route[i] = RouteEntry {
                start: finger.start(),
                current: finger.current(),
                committed: finger.committed(),
                connected: finger.is_connected(),
            };
        }
        snapshot
    }

    fn cleanup(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.gate.open();
            let _ = worker.thread.join();
        }
        for uid in self.registry.uids() {
            if let Some(mut w) = self.registry.remove(uid) {
                self.reactor.remove(&mut w);
            }
        }
        self.incoming.clear();
        self.outgoing.clear();
        self.guests.clear();
    }
}

fn duplicate_watcher() -> HubError {
    HubError::Protocol("watcher identifier already registered".into())
}

fn rand_seed(seed: &mut [u8; 32]) {
    use rand::RngCore;
    rand::thread_rng().fill_bytes(seed);
}

fn classify(frame: &ringhub_codec::Frame, hub: u64) -> DeliveryClass {
    let header = frame.header();
    if header.aqlf == AQLF_RESPONSE && header.source == hub {
        DeliveryClass::Answer
    } else if header.command == CMD_MULTICAST {
        DeliveryClass::General
    } else {
        DeliveryClass::Forward
    }
}

/// Reservation arithmetic: forwarded traffic may fill the queue, answers
/// keep `answer_ratio` headroom over general traffic, and general
/// publishes stay out of both reserves. The reserves are clamped so at
/// least one general slot survives.
pub(crate) fn slots_allow(
    config: &HubConfig,
    queued: usize,
    limit: usize,
    class: DeliveryClass,
) -> bool {
    if !config.policing {
        return queued < limit;
    }
    let mut reserve_answer = (limit as f64 * config.answer_ratio) as usize;
    let mut reserve_forward = (limit as f64 * config.forward_ratio) as usize;
    if reserve_answer + reserve_forward >= limit {
        let total = (reserve_answer + reserve_forward).max(1);
        reserve_answer = reserve_answer * (limit - 1) / total;
        reserve_forward = reserve_forward * (limit - 1) / total;
    }
    match class {
        DeliveryClass::Forward => queued < limit,
        DeliveryClass::Answer => queued < limit - reserve_forward,
        DeliveryClass::General => queued < limit - reserve_forward - reserve_answer,
    }
}
