//! Overlay protocol request handlers.
//!
//! Every handler validates the request marker, the payload size and the
//! caller's privilege, then rewrites the request frame in place into its
//! response. Responses travel back on the connection the request arrived
//! on; rejected requests get an empty frame with the rejection marker.

use crate::hub::{slots_allow, DeliveryClass, Hub, WORKER_UID};
use ringhub_cluster::CONTROLLER;
use ringhub_codec::commands::*;
use ringhub_codec::{FrameRef, Header, OverlayMetrics};
use ringhub_core::DropReason;
use ringhub_crypto::{HostAuth, IdentityRecord};
use ringhub_transport::{AuthState, WATCHER_ACTIVE, WATCHER_MULTICAST};

/// Handler outcome, driving the response path in [`Hub::serve`].
enum Verdict {
    /// Frame was rewritten into a response; send it back to the origin.
    Respond,
    /// Request refused; send back a rejection marker.
    Reject,
    /// Frame was re-addressed and handed to the routing pipeline.
    Forwarded,
    /// Frame fully consumed, nothing to send.
    Consumed,
    /// Frame discarded with accounting.
    Drop(DropReason),
}

impl Hub {
    /// Serves one locally-addressed request.
    pub(crate) fn serve(&mut self, frame: FrameRef) {
        let header = *frame.borrow().header();
        let verdict = match header.command {
            CMD_NULL => self.serve_null(&frame, &header),
            CMD_AUTH => self.serve_auth(&frame, &header),
            CMD_MULTICAST => self.serve_multicast(&frame, &header),
            CMD_NODE => self.serve_node(&frame, &header),
            CMD_OVERLAY => self.serve_overlay(&frame, &header),
            _ => Verdict::Reject,
        };
        // Handlers may re-home the frame (promotion moves the connection),
        // so the return path is read after they ran.
        let origin = frame.borrow().origin();
        match verdict {
            Verdict::Respond => self.answer(frame, origin),
            Verdict::Reject => {
                frame.borrow_mut().make_rejection(self.uid(), AQLF_REJECTED);
                self.answer(frame, origin);
            }
            Verdict::Forwarded | Verdict::Consumed => {}
            Verdict::Drop(reason) => {
                let bytes = frame.borrow().length() as u64;
                self.counters.count_dropped(reason, bytes);
            }
        }
    }

    /// Queues a response frame back onto the connection it came from.
    fn answer(&mut self, frame: FrameRef, origin: u64) {
        frame.borrow_mut().set_gateway(origin);
        if !self.outgoing.put(frame) {
            self.counters.count_dropped(DropReason::QueueFull, 0);
        }
    }

    /// Privileged qualifiers are honored only for the stabilizer's
    /// loopback and for sources this hub already regards as ring peers.
    fn is_privileged(&self, origin: u64, source: u64) -> bool {
        if origin == WORKER_UID {
            return true;
        }
        source != CONTROLLER
            && source <= self.node.max_id()
            && (source == self.node.predecessor()
                || source == self.node.successor()
                || self.node.is_in_route(source))
    }

    fn serve_null(&mut self, frame: &FrameRef, header: &Header) -> Verdict {
        match header.qualifier {
            QLF_NULL => {
                if frame.borrow_mut().make_response(self.uid(), &[]) {
                    Verdict::Respond
                } else {
                    Verdict::Reject
                }
            }
            QLF_DESCRIBE => {
                if header.payload_length() != 0 {
                    return Verdict::Reject;
                }
                let snapshot = self.metrics();
                let mut buf = [0u8; OverlayMetrics::MAX_BYTES];
                let Some(size) = snapshot.pack(&mut buf) else {
                    return Verdict::Reject;
                };
                if frame.borrow_mut().make_response(self.uid(), &buf[..size]) {
                    Verdict::Respond
                } else {
                    Verdict::Reject
                }
            }
            _ => Verdict::Reject,
        }
    }

    fn serve_node(&mut self, frame: &FrameRef, header: &Header) -> Verdict {
        let payload = frame.borrow().payload().to_vec();
        match header.qualifier {
            QLF_GET_PREDECESSOR => {
                if !payload.is_empty() {
                    return Verdict::Reject;
                }
                let value = self.node.predecessor().to_be_bytes();
                self.respond(frame, &value)
            }
            QLF_SET_PREDECESSOR => {
                if !self.is_privileged(frame.borrow().origin(), header.source) {
                    return Verdict::Drop(DropReason::Unauthorized);
                }
                let Some(value) = read_u64(&payload) else {
                    return Verdict::Reject;
                };
                // 0 is the legal "no predecessor" value.
                if self.node.set_predecessor(value) {
                    self.respond(frame, &value.to_be_bytes())
                } else {
                    Verdict::Reject
                }
            }
            QLF_GET_SUCCESSOR => {
                if !payload.is_empty() {
                    return Verdict::Reject;
                }
                let value = self.node.successor().to_be_bytes();
                self.respond(frame, &value)
            }
            QLF_SET_SUCCESSOR => {
                if !self.is_privileged(frame.borrow().origin(), header.source) {
                    return Verdict::Drop(DropReason::Unauthorized);
                }
                let Some(value) = read_u64(&payload) else {
                    return Verdict::Reject;
                };
                if value != CONTROLLER && self.node.set_successor(value) {
                    self.respond(frame, &value.to_be_bytes())
                } else {
                    Verdict::Reject
                }
            }
            QLF_GET_FINGER => {
                let Some(index) = read_u32(&payload) else {
                    return Verdict::Reject;
                };
                if index as usize >= self.node.table_size() {
                    return Verdict::Reject;
                }
                let value = self.node.get(index as usize);
                let mut body = [0u8; 12];
                body[0..4].copy_from_slice(&index.to_be_bytes());
                body[4..12].copy_from_slice(&value.to_be_bytes());
                self.respond(frame, &body)
            }
            QLF_SET_FINGER => {
                if !self.is_privileged(frame.borrow().origin(), header.source) {
                    return Verdict::Drop(DropReason::Unauthorized);
                }
                if payload.len() != 12 {
                    return Verdict::Reject;
                }
                let index = u32::from_be_bytes(payload[0..4].try_into().unwrap());
                let value = u64::from_be_bytes(payload[4..12].try_into().unwrap());
                if self.node.set(index as usize, value) {
                    self.respond(frame, &payload)
                } else {
                    Verdict::Reject
                }
            }
            QLF_GET_NEIGHBOURS => {
                if !payload.is_empty() {
                    return Verdict::Reject;
                }
                let mut body = [0u8; 16];
                body[0..8].copy_from_slice(&self.node.predecessor().to_be_bytes());
                body[8..16].copy_from_slice(&self.node.successor().to_be_bytes());
                self.respond(frame, &body)
            }
            QLF_NOTIFY => {
                if !self.is_privileged(frame.borrow().origin(), header.source) {
                    return Verdict::Drop(DropReason::Unauthorized);
                }
                let Some(value) = read_u64(&payload) else {
                    return Verdict::Reject;
                };
                // Re-notification by the standing predecessor is a no-op
                // success; anything else follows the adoption rule.
                if self.node.notify(value) || value == self.node.predecessor() {
                    self.respond(frame, &[])
                } else {
                    Verdict::Reject
                }
            }
            _ => Verdict::Reject,
        }
    }

    fn serve_overlay(&mut self, frame: &FrameRef, header: &Header) -> Verdict {
        match header.qualifier {
            QLF_FIND_SUCCESSOR => {
                let payload = frame.borrow().payload().to_vec();
                let Some(key) = read_u64(&payload) else {
                    return Verdict::Reject;
                };
                self.resolve_key(frame, key)
            }
            QLF_PING => {
                if header.payload_length() != 0 {
                    return Verdict::Reject;
                }
                self.respond(frame, &[])
            }
            QLF_MAP => {
                // The identity mapping over the overlay address space.
                let payload = frame.borrow().payload().to_vec();
                self.respond(frame, &payload)
            }
            _ => Verdict::Reject,
        }
    }

    /// Recursive lookup step shared by FIND_SUCCESSOR and FIND_ROOT: answer
    /// when this node is the root, otherwise push the request one hop
    /// closer, preserving source and sequence so the eventual root answers
    /// the origin directly.
    fn resolve_key(&mut self, frame: &FrameRef, key: u64) -> Verdict {
        if key > self.node.max_id() {
            return Verdict::Reject;
        }
        let root = if self.node.is_local(key) {
            self.uid()
        } else {
            // The immediate successor answers for its whole arc.
            self.node.local_successor(key)
        };
        if root != 0 {
            let mut body = [0u8; 16];
            body[0..8].copy_from_slice(&key.to_be_bytes());
            body[8..16].copy_from_slice(&root.to_be_bytes());
            return self.respond(frame, &body);
        }
        let next = self.node.next_hop(key);
        if next == self.uid() {
            return Verdict::Reject;
        }
        frame.borrow_mut().set_destination(next);
        self.plot(frame.clone());
        Verdict::Forwarded
    }

    fn serve_multicast(&mut self, frame: &FrameRef, header: &Header) -> Verdict {
        let origin = frame.borrow().origin();
        match header.qualifier {
            QLF_PUBLISH => {
                let payload = frame.borrow().payload().to_vec();
                if payload.is_empty() {
                    return Verdict::Reject;
                }
                let topic = payload[0] as usize;
                self.fan_out(frame, topic, origin);
                Verdict::Consumed
            }
            QLF_SUBSCRIBE => {
                let payload = frame.borrow().payload().to_vec();
                if payload.len() != 1 {
                    return Verdict::Reject;
                }
                let topic = payload[0] as usize;
                let Some(w) = self.registry.get_mut(origin) else {
                    return Verdict::Drop(DropReason::NoRoute);
                };
                let Some(connection) = w.as_connection_mut() else {
                    return Verdict::Drop(DropReason::NoRoute);
                };
                if !connection.subscribe(topic) {
                    return Verdict::Reject;
                }
                w.set_flags(WATCHER_MULTICAST);
                self.respond(frame, &payload)
            }
            QLF_UNSUBSCRIBE => {
                let payload = frame.borrow().payload().to_vec();
                if payload.len() != 1 {
                    return Verdict::Reject;
                }
                let topic = payload[0] as usize;
                let Some(w) = self.registry.get_mut(origin) else {
                    return Verdict::Drop(DropReason::NoRoute);
                };
                let Some(connection) = w.as_connection_mut() else {
                    return Verdict::Drop(DropReason::NoRoute);
                };
                connection.unsubscribe(topic);
                if connection.subscriptions().is_empty() {
                    w.clear_flags(WATCHER_MULTICAST);
                }
                self.respond(frame, &payload)
            }
            _ => Verdict::Reject,
        }
    }

    /// Delivers a published frame to every subscriber of the topic except
    /// the publisher, bypassing the outgoing queue the way direct
    /// deliveries do. Fan-out consumes general (unreserved) slots only.
    fn fan_out(&mut self, frame: &FrameRef, topic: usize, origin: u64) {
        let subscribers: Vec<u64> = self
            .registry
            .uids()
            .into_iter()
            .filter(|uid| *uid != origin)
            .filter(|uid| {
                self.registry
                    .get(*uid)
                    .and_then(|w| w.as_connection())
                    .is_some_and(|c| c.is_subscribed(topic))
            })
            .collect();
        let bytes = frame.borrow().length() as u64;
        for uid in subscribers {
            let Hub {
                registry,
                counters,
                config,
                ..
            } = self;
            let Some(w) = registry.get_mut(uid) else {
                continue;
            };
            let Some(connection) = w.as_connection_mut() else {
                continue;
            };
            if !slots_allow(
                config,
                connection.queued(),
                connection.out_limit(),
                DeliveryClass::General,
            ) {
                counters.count_dropped(DropReason::QueueFull, bytes);
                continue;
            }
            if connection.publish(frame.clone()) {
                let _ = connection.write_pending();
            } else {
                counters.count_dropped(DropReason::QueueFull, bytes);
            }
        }
    }

    fn serve_auth(&mut self, frame: &FrameRef, header: &Header) -> Verdict {
        match header.qualifier {
            QLF_REGISTER => self.handle_register(frame),
            QLF_TOKEN => self.handle_token(frame),
            QLF_FIND_ROOT => {
                let payload = frame.borrow().payload().to_vec();
                let Some(key) = read_u64(&payload) else {
                    return Verdict::Reject;
                };
                self.resolve_key(frame, key)
            }
            QLF_BOOTSTRAP => {
                if header.payload_length() != 0 {
                    return Verdict::Reject;
                }
                // Entry points into the overlay: this hub itself.
                let mut body = [0u8; 12];
                body[0..4].copy_from_slice(&1u32.to_be_bytes());
                body[4..12].copy_from_slice(&self.uid().to_be_bytes());
                self.respond(frame, &body)
            }
            _ => Verdict::Reject,
        }
    }

    /// REGISTER: identity (u64), salt length (u16), salt, verifier.
    fn handle_register(&mut self, frame: &FrameRef) -> Verdict {
        let payload = frame.borrow().payload().to_vec();
        if payload.len() < 8 + 2 + 1 {
            return Verdict::Reject;
        }
        let identity = u64::from_be_bytes(payload[0..8].try_into().unwrap());
        let salt_len = u16::from_be_bytes(payload[8..10].try_into().unwrap()) as usize;
        if identity == CONTROLLER || salt_len == 0 || payload.len() < 10 + salt_len + 1 {
            return Verdict::Reject;
        }
        let salt = payload[10..10 + salt_len].to_vec();
        let verifier = payload[10 + salt_len..].to_vec();
        if verifier.len() > self.srp_group.size() {
            return Verdict::Reject;
        }
        if !self.identities.put(identity, IdentityRecord { salt, verifier }) {
            return Verdict::Reject;
        }
        tracing::info!(
            identity = %display_identity(identity, self.config.redact_logs),
            "identity registered"
        );
        self.respond(frame, &identity.to_be_bytes())
    }

    /// TOKEN: two-step SRP exchange keyed off the connection's auth state.
    ///
    /// Step 1 (anonymous): identity (u64) followed by the client nonce A.
    /// The reply is salt followed by the host nonce B, byte-identical in
    /// shape whether or not the identity exists.
    ///
    /// Step 2 (challenged): the client proof. A valid proof earns the host
    /// proof and promotion of the connection to the authenticated
    /// identifier; anything else is rejected without detail.
    fn handle_token(&mut self, frame: &FrameRef) -> Verdict {
        let origin = frame.borrow().origin();
        let payload = frame.borrow().payload().to_vec();

        let state = {
            let Some(w) = self.registry.get_mut(origin) else {
                return Verdict::Drop(DropReason::NoRoute);
            };
            let Some(connection) = w.as_connection_mut() else {
                return Verdict::Drop(DropReason::NoRoute);
            };
            connection.take_auth()
        };

        match state {
            AuthState::Anonymous => {
                if payload.len() != 8 + self.srp_group.size() {
                    return Verdict::Reject;
                }
                let identity = u64::from_be_bytes(payload[0..8].try_into().unwrap());
                let record = self.identities.get(identity);
                let auth = match HostAuth::challenge(
                    self.srp_group,
                    self.srp_hash,
                    identity,
                    record.as_ref(),
                    &payload[8..],
                    &self.seed,
                ) {
                    Ok(auth) => auth,
                    Err(_) => return Verdict::Reject,
                };
                let mut body = auth.salt().to_vec();
                body.extend_from_slice(&auth.nonce());
                self.restore_auth(origin, AuthState::Challenged(Box::new(auth)));
                self.respond(frame, &body)
            }
            AuthState::Challenged(mut auth) => {
                if payload.len() != self.srp_hash.length() {
                    self.restore_auth(origin, AuthState::Anonymous);
                    return Verdict::Reject;
                }
                match auth.verify(&payload) {
                    Ok(proof) => {
                        let body = proof.to_vec();
                        let identity = auth.identity();
                        if !self.promote(origin, identity) {
                            self.restore_auth(origin, AuthState::Anonymous);
                            return Verdict::Reject;
                        }
                        self.restore_auth(identity, AuthState::Established);
                        frame.borrow_mut().set_origin(identity);
                        tracing::info!(
                            identity = %display_identity(identity, self.config.redact_logs),
                            "connection authenticated"
                        );
                        self.respond(frame, &body)
                    }
                    Err(_) => {
                        // Indistinguishable rejection; the guest lease
                        // closes the connection after the grace window.
                        self.restore_auth(origin, AuthState::Anonymous);
                        Verdict::Reject
                    }
                }
            }
            AuthState::Established => {
                self.restore_auth(origin, AuthState::Established);
                Verdict::Reject
            }
        }
    }

    fn restore_auth(&mut self, uid: u64, state: AuthState) {
        if let Some(connection) = self
            .registry
            .get_mut(uid)
            .and_then(|w| w.as_connection_mut())
        {
            connection.set_auth(state);
        }
    }

    /// Moves a verified guest onto its ring identifier: registry rename,
    /// guest-ring removal, activation and routing-table bookkeeping.
    fn promote(&mut self, ephemeral: u64, identity: u64) -> bool {
        if identity == CONTROLLER || identity >= crate::hub::EPHEMERAL_BASE {
            return false;
        }
        if !self.registry.move_key(ephemeral, identity, true) {
            return false;
        }
        if let Some(w) = self.registry.get_mut(identity) {
            w.set_flags(WATCHER_ACTIVE);
        }
        // A swap leaves the displaced holder of the identifier parked on
        // the ephemeral key; retire it.
        if self.registry.contains(ephemeral) {
            self.expel(ephemeral);
        }
        self.forget_guest(ephemeral);
        // A ring peer coming online repairs the fingers pointing at it.
        if identity <= self.node.max_id() && self.node.update(identity, true) {
            for i in 0..self.node.table_size() {
                if self.node.get(i) == identity {
                    self.node.commit(i);
                }
            }
        }
        true
    }

    fn respond(&mut self, frame: &FrameRef, payload: &[u8]) -> Verdict {
        if frame.borrow_mut().make_response(self.uid(), payload) {
            Verdict::Respond
        } else {
            Verdict::Reject
        }
    }
}

fn read_u64(payload: &[u8]) -> Option<u64> {
    (payload.len() == 8).then(|| u64::from_be_bytes(payload.try_into().unwrap()))
}

fn read_u32(payload: &[u8]) -> Option<u32> {
    (payload.len() == 4).then(|| u32::from_be_bytes(payload.try_into().unwrap()))
}

fn display_identity(identity: u64, redact: bool) -> String {
    if redact {
        "<redacted>".to_string()
    } else {
        identity.to_string()
    }
}
