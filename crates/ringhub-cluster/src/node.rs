//! Chord routing state: the finger table and the recursive lookup and
//! stabilization primitives.
//!
//! Ref: https://pdos.csail.mit.edu/papers/chord:sigcomm01/chord_sigcomm.pdf
//!
//! All identifiers handed to these methods must stay within the key space
//! `[0, max_id]`; out-of-range values fail the operation.

use crate::finger::Finger;
use crate::ring;
use crate::{CONTROLLER, KEY_BITS, MAX_KEY_BITS};
use ringhub_core::HubError;

pub struct Node {
    key: u64,
    bits: u32,
    predecessor: Finger,
    /// `table[0]` is the immediate successor.
    table: Vec<Finger>,
    stable: bool,
}

impl Node {
    /// Creates a stand-alone node on the default ring.
    pub fn new(key: u64) -> Result<Self, HubError> {
        Self::with_bits(key, KEY_BITS)
    }

    /// Creates a stand-alone node on a ring of `2^bits` positions. The
    /// initial state routes every key to the node itself.
    pub fn with_bits(key: u64, bits: u32) -> Result<Self, HubError> {
        if bits < 1 || bits > MAX_KEY_BITS {
            return Err(HubError::Config(format!("key length {} out of range", bits)));
        }
        if key > ring::max_id(bits) {
            return Err(HubError::Config(format!("node key {} outside the ring", key)));
        }
        let mut node = Self {
            key,
            bits,
            predecessor: Finger::default(),
            table: vec![Finger::default(); bits as usize],
            stable: false,
        };
        node.reset();
        Ok(node)
    }

    /// Restores the stand-alone initial state. Required for correct routing
    /// on a hub that has not joined a network.
    pub fn reset(&mut self) {
        self.predecessor.set_current(self.key);
        self.predecessor.commit();
        for (i, finger) in self.table.iter_mut().enumerate() {
            finger.set_start(ring::successor(self.bits, self.key, i as u32).unwrap_or(self.key));
            finger.set_current(self.key);
            finger.commit();
            finger.set_connected(false);
        }
        self.stable = true;
    }

    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    pub fn max_id(&self) -> u64 {
        ring::max_id(self.bits)
    }

    /// Finger count; equals the key length.
    pub fn table_size(&self) -> usize {
        self.table.len()
    }

    pub fn finger(&self, index: usize) -> Option<&Finger> {
        self.table.get(index)
    }

    /// Current value of the finger at `index`, 0 when out of bounds.
    pub fn get(&self, index: usize) -> u64 {
        self.table.get(index).map_or(0, |f| f.current())
    }

    /// Points the finger at `index` to `key`. Fails on a bad index, an
    /// out-of-range key, or an uncommitted entry.
    pub fn set(&mut self, index: usize, key: u64) -> bool {
        if index >= self.table.len() {
            return false;
        }
        self.assign_finger(index, key, true, true)
    }

    pub fn is_consistent(&self, index: usize) -> bool {
        self.table.get(index).is_some_and(|f| f.is_consistent())
    }

    /// Acknowledges the finger's current value; returns the displaced one.
    pub fn commit(&mut self, index: usize) -> u64 {
        self.table.get_mut(index).map_or(0, |f| f.commit())
    }

    pub fn is_connected(&self, index: usize) -> bool {
        self.table.get(index).is_some_and(|f| f.is_connected())
    }

    pub fn set_connected(&mut self, index: usize, status: bool) {
        if let Some(f) = self.table.get_mut(index) {
            f.set_connected(status);
        }
    }

    pub fn predecessor(&self) -> u64 {
        self.predecessor.current()
    }

    /// Updates the predecessor. 0 is the legal "no predecessor" value.
    pub fn set_predecessor(&mut self, key: u64) -> bool {
        if key > self.max_id() {
            return false;
        }
        let old = self.predecessor.current();
        self.predecessor.set_current(key);
        if key != 0 && key != old {
            self.stable = false;
        }
        true
    }

    /// True when the predecessor changed without acknowledgement.
    pub fn predecessor_changed(&self) -> bool {
        self.predecessor.current() != 0 && !self.predecessor.is_consistent()
    }

    pub fn commit_predecessor(&mut self) -> u64 {
        self.predecessor.commit()
    }

    pub fn successor(&self) -> u64 {
        self.get(0)
    }

    pub fn set_successor(&mut self, key: u64) -> bool {
        self.set(0, key)
    }

    pub fn is_stable(&self) -> bool {
        self.stable
    }

    pub fn set_stable(&mut self, stable: bool) {
        self.stable = stable;
    }

    /// True when this node is the root of `key`, i.e. `key` lies in
    /// `(predecessor, self]`. A node that is its own predecessor owns the
    /// whole ring.
    pub fn is_local(&self, key: u64) -> bool {
        if key > self.max_id() {
            return false;
        }
        key == self.key
            || self.predecessor() == self.key
            || ring::is_between(self.bits, key, self.predecessor(), self.key)
    }

    /// Next hop of the recursive lookup for `key`: the immediate successor
    /// when it is the root, otherwise the closest connected preceding
    /// finger. Returns the node's own key when no finger qualifies, which
    /// the caller treats as a routing failure unless the key is local.
    pub fn next_hop(&self, key: u64) -> u64 {
        let n = self.local_successor(key);
        if n == 0 {
            self.closest_preceding(key, true)
        } else {
            n
        }
    }

    /// The immediate successor when it is the root of `key`, 0 otherwise.
    pub fn local_successor(&self, key: u64) -> u64 {
        let successor = self.successor();
        if key == successor || ring::is_between(self.bits, key, self.key, successor) {
            successor
        } else {
            0
        }
    }

    /// Highest finger whose current value precedes `key` on the ring. With
    /// `require_connected`, entries without an active outbound connection
    /// are skipped.
    pub fn closest_preceding(&self, key: u64, require_connected: bool) -> u64 {
        for finger in self.table.iter().rev() {
            let f = finger.current();
            if ring::is_between(self.bits, f, self.key, key)
                && (!require_connected || finger.is_connected())
            {
                return f;
            }
        }
        self.key
    }

    /// Seeds the table with a bootstrap peer: no predecessor, `key` as the
    /// successor.
    pub fn join(&mut self, key: u64) -> bool {
        self.set_predecessor(0) && self.set_successor(key)
    }

    /// Consistency step: `key` is the successor's claimed predecessor; adopt
    /// it when it sits between this node and the current successor. A node
    /// that is its own successor adopts any other claimant.
    pub fn stabilize(&mut self, key: u64) -> bool {
        if key == 0 || key > self.max_id() {
            return true;
        }
        let successor = self.successor();
        let adopt = (successor == self.key && key != self.key)
            || ring::is_between(self.bits, key, self.key, successor);
        if adopt {
            self.set_successor(key)
        } else {
            true
        }
    }

    /// `key` claims to be this node's predecessor; accept when no
    /// predecessor is known, the node stands alone, or the claim tightens
    /// the interval.
    pub fn notify(&mut self, key: u64) -> bool {
        if key > self.max_id() {
            return false;
        }
        let predecessor = self.predecessor();
        if predecessor == 0
            || predecessor == self.key
            || ring::is_between(self.bits, key, predecessor, self.key)
        {
            self.set_predecessor(key)
        } else {
            false
        }
    }

    /// Churn event: node `key` joined or departed. A failed predecessor is
    /// cleared; every finger pointing at `key` flips its connected flag.
    /// Returns whether any record changed.
    pub fn update(&mut self, key: u64, joined: bool) -> bool {
        let mut found = false;
        if self.predecessor() == key && !joined {
            self.set_predecessor(0);
            found = true;
        }
        for finger in self.table.iter_mut() {
            if finger.current() == key {
                finger.set_connected(joined);
                found = true;
            }
        }
        found
    }

    /// True when `key` appears in the routing records (the node itself, the
    /// controller, or any finger's current value).
    pub fn is_in_route(&self, key: u64) -> bool {
        key == self.key
            || key == CONTROLLER
            || self.table.iter().any(|f| f.current() == key)
    }

    fn assign_finger(
        &mut self,
        index: usize,
        key: u64,
        check_consistent: bool,
        check_connected: bool,
    ) -> bool {
        if key > self.max_id() {
            return false;
        }
        let finger = &mut self.table[index];
        if check_consistent && !finger.is_consistent() {
            return false;
        }
        finger.set_current(key);
        if key != 0 && (key != finger.committed() || (check_connected && !finger.is_connected()))
        {
            self.stable = false;
        }
        true
    }
}
