//! Overlay maintenance service.
//!
//! Runs on its own thread and speaks to the local hub exclusively through a
//! loopback overlay connection. Each cycle checks the predecessor,
//! stabilizes the successor link, repairs one finger (round-robin) and
//! refreshes one backup successor. A failed cycle reschedules itself on the
//! retry interval; a failed controller grants the network one quiet cycle
//! to recover.

use crate::client::OverlayClient;
use crate::gate::Gate;
use crate::ring;
use crate::CONTROLLER;
use ringhub_core::HubError;
use std::os::unix::net::UnixStream;
use std::sync::Arc;

pub struct Stabilizer {
    uid: u64,
    bits: u32,
    client: OverlayClient,
    gate: Arc<Gate>,
    nodes: Vec<u64>,
    update_cycle: u64,
    retry_interval: u64,
    /// Backup successors, refreshed round-robin. Entry 0 follows the live
    /// successor's successor.
    successors: Vec<u64>,
    s_index: usize,
    f_index: usize,
    controller_failed: bool,
    initialized: bool,
}

impl Stabilizer {
    pub fn new(
        uid: u64,
        bits: u32,
        stream: UnixStream,
        nodes: Vec<u64>,
        update_cycle: u64,
        retry_interval: u64,
        gate: Arc<Gate>,
    ) -> Self {
        let backups = (bits.saturating_sub(1)).max(1) as usize;
        Self {
            uid,
            bits,
            client: OverlayClient::new(stream, uid),
            gate,
            nodes,
            update_cycle,
            retry_interval,
            successors: vec![0; backups],
            s_index: 0,
            f_index: 0,
            controller_failed: false,
            initialized: false,
        }
    }

    /// Runs maintenance cycles until the gate is opened. Blocks the calling
    /// thread.
    pub fn run(mut self) {
        if let Err(e) = self.client.set_timeout(self.retry_interval) {
            tracing::error!("stabilizer could not bound its round trips: {}", e);
            return;
        }
        loop {
            let delay = if self.execute() {
                self.update_cycle
            } else {
                self.retry_interval
            };
            if self.gate.wait(delay) {
                break;
            }
        }
        tracing::info!("stabilizer retired");
    }

    fn execute(&mut self) -> bool {
        if !self.initialized {
            if let Err(e) = self.setup() {
                tracing::warn!("overlay join failed: {}", e);
                return false;
            }
        }
        if !self.check_predecessor() {
            tracing::warn!("predecessor check failed");
            return false;
        }
        // Give the network one quiet cycle after a controller outage.
        if self.controller_failed {
            self.controller_failed = false;
            return false;
        }
        if !self.stabilize_cycle() {
            tracing::warn!("stabilization failed");
            return false;
        }
        if !self.fix_finger() {
            tracing::warn!("finger repair failed");
            return false;
        }
        true
    }

    fn setup(&mut self) -> Result<(), HubError> {
        self.initialized = true;
        tracing::info!("joining the overlay network, this can take a while");
        if !self.check_network() {
            return Err(HubError::Protocol("controller is unreachable".into()));
        }
        if self.bootstrap() {
            tracing::info!("bootstrap succeeded");
            Ok(())
        } else {
            Err(HubError::Protocol("bootstrap failed".into()))
        }
    }

    /// The local hub must answer, and the controller must become reachable
    /// within a few probes.
    fn check_network(&mut self) -> bool {
        for _ in 0..4 {
            if !self.is_reachable(self.uid) {
                return false;
            }
            if self.is_reachable(CONTROLLER) {
                return true;
            }
        }
        false
    }

    fn bootstrap(&mut self) -> bool {
        let nodes = self.nodes.clone();
        let mut join_self = false;
        for peer in nodes {
            if peer == self.uid {
                join_self = true;
                continue;
            }
            tracing::debug!("contacting {} ...", peer);
            if self.join(peer) {
                tracing::debug!("join succeeded through {}", peer);
                return true;
            }
        }
        join_self && self.join(self.uid)
    }

    /// Aggressive join for fast convergence: resolve the successor, then
    /// adopt its predecessor immediately and announce ourselves.
    fn join(&mut self, start: u64) -> bool {
        let mut attempt = || -> Result<(), HubError> {
            let successor = self.client.find_successor(start, self.uid)?;
            self.client.set_predecessor(self.uid, 0)?;
            self.client.set_successor(self.uid, successor)?;
            let (s_predecessor, s_successor) = self.client.get_neighbours(successor)?;
            self.successors[0] = s_successor;
            self.client.set_predecessor(self.uid, s_predecessor)?;
            self.client.notify(successor, self.uid)?;
            Ok(())
        };
        attempt().is_ok()
    }

    fn check_predecessor(&mut self) -> bool {
        match self.client.get_predecessor(self.uid) {
            Err(_) => false,
            // No predecessor recorded; verify the controller instead.
            Ok(0) => self.check_controller(),
            Ok(predecessor) => {
                if self.is_reachable(predecessor) {
                    true
                } else if self.check_controller() {
                    // Predecessor failed; clear it.
                    self.client.set_predecessor(self.uid, 0).is_ok()
                } else {
                    false
                }
            }
        }
    }

    fn stabilize_cycle(&mut self) -> bool {
        let outcome = (|| -> Result<(), HubError> {
            let mut successor = self.client.get_successor(self.uid)?;
            let (s_predecessor, s_successor) = self.client.get_neighbours(successor)?;
            if s_predecessor != 0
                && ring::is_between(self.bits, s_predecessor, self.uid, successor)
            {
                self.client.set_successor(self.uid, s_predecessor)?;
                successor = s_predecessor;
                self.successors[0] = successor;
            } else {
                self.successors[0] = s_successor;
            }
            self.client.notify(successor, self.uid)?;
            Ok(())
        })();

        match outcome {
            Ok(()) => {
                self.fix_successor_list();
                true
            }
            // An unreachable peer and an inconsistent response are the
            // same failure here: fall back to the successor list.
            Err(_) => self.repair_successor(),
        }
    }

    /// Repairs one finger per cycle, round-robin over the table.
    fn fix_finger(&mut self) -> bool {
        self.f_index = (self.f_index + 1) % self.bits as usize;
        let Some(start) = ring::successor(self.bits, self.uid, self.f_index as u32) else {
            return false;
        };
        let mut attempt = || -> Result<(), HubError> {
            let target = if self.f_index == 0 {
                self.client.get_successor(self.uid)?
            } else {
                self.uid
            };
            let key = self.client.find_successor(target, start)?;
            self.client.set_finger(self.uid, self.f_index as u32, key)
        };
        attempt().is_ok()
    }

    /// Refreshes one backup successor per cycle; entry 0 is maintained by
    /// the stabilization step itself.
    fn fix_successor_list(&mut self) {
        if self.successors.len() < 2 {
            return;
        }
        self.s_index += 1;
        if self.s_index >= self.successors.len() {
            self.s_index = 1;
        }
        let previous = self.successors[self.s_index - 1];
        if previous == 0 {
            return;
        }
        match self.client.get_successor(previous) {
            Ok(next) => self.successors[self.s_index] = next,
            Err(_) => self.s_index = 0,
        }
    }

    /// Successor failed mid-cycle: walk the backup list and adopt the first
    /// entry that still answers.
    fn repair_successor(&mut self) -> bool {
        if !self.check_controller() {
            return false;
        }
        for i in 0..self.successors.len() {
            let candidate = self.successors[i];
            if candidate == 0 {
                continue;
            }
            if candidate == self.uid || self.is_reachable(candidate) {
                return self.client.set_successor(self.uid, candidate).is_ok();
            }
            if !self.check_controller() {
                return false;
            }
        }
        tracing::error!("successor recovery exhausted the backup list");
        false
    }

    fn check_controller(&mut self) -> bool {
        if self.is_reachable(CONTROLLER) {
            true
        } else {
            self.controller_failed = true;
            // Nudge the local hub so it notices the outage too.
            let _ = self.client.ping(self.uid);
            false
        }
    }

    fn is_reachable(&mut self, id: u64) -> bool {
        self.client.ping(id).is_ok()
    }
}
