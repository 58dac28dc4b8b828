//! Registry of watchers keyed by identifier. Owns the watchers; the
//! reactor only ever sees identifiers.

use crate::watcher::Watcher;
use std::collections::HashMap;

/// Verdict of one iteration callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterAction {
    Continue,
    /// Dissociate the current watcher and continue; the removed watcher is
    /// handed back to the caller for cleanup.
    Remove,
    Halt,
}

#[derive(Default)]
pub struct Registry {
    map: HashMap<u64, Watcher>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn contains(&self, uid: u64) -> bool {
        self.map.contains_key(&uid)
    }

    pub fn get(&self, uid: u64) -> Option<&Watcher> {
        self.map.get(&uid)
    }

    pub fn get_mut(&mut self, uid: u64) -> Option<&mut Watcher> {
        self.map.get_mut(&uid)
    }

    /// Registers a watcher under its identifier; rejected when the key is
    /// taken (use [`Registry::replace`] to displace).
    pub fn put(&mut self, watcher: Watcher) -> Result<(), Watcher> {
        use std::collections::hash_map::Entry;
        match self.map.entry(watcher.uid()) {
            Entry::Occupied(_) => Err(watcher),
            Entry::Vacant(slot) => {
                slot.insert(watcher);
                Ok(())
            }
        }
    }

    /// Registers a watcher, returning whatever it displaced.
    pub fn replace(&mut self, watcher: Watcher) -> Option<Watcher> {
        self.map.insert(watcher.uid(), watcher)
    }

    pub fn remove(&mut self, uid: u64) -> Option<Watcher> {
        self.map.remove(&uid)
    }

    /// Renames or swaps registry entries, keeping stored identifiers in
    /// sync with their keys.
    ///
    /// - both keys present and `allow_swap`: the two watchers trade keys;
    /// - exactly one present: it is reinserted under the other key;
    /// - neither present, or both present without `allow_swap`: failure.
    pub fn move_key(&mut self, from: u64, to: u64, allow_swap: bool) -> bool {
        if from == to {
            return self.map.contains_key(&from);
        }
        match (self.map.contains_key(&from), self.map.contains_key(&to)) {
            (true, true) => {
                if !allow_swap {
                    return false;
                }
                let mut a = self.map.remove(&from).expect("checked");
                let mut b = self.map.remove(&to).expect("checked");
                a.set_uid(to);
                b.set_uid(from);
                self.map.insert(to, a);
                self.map.insert(from, b);
                true
            }
            (true, false) => {
                let mut w = self.map.remove(&from).expect("checked");
                w.set_uid(to);
                self.map.insert(to, w);
                true
            }
            (false, true) => {
                let mut w = self.map.remove(&to).expect("checked");
                w.set_uid(from);
                self.map.insert(from, w);
                true
            }
            (false, false) => false,
        }
    }

    /// Single-shot iteration. Watchers removed by the callback are returned
    /// so the caller can retire them from the reactor.
    pub fn iterate<F: FnMut(&mut Watcher) -> IterAction>(&mut self, mut f: F) -> Vec<Watcher> {
        let uids: Vec<u64> = self.map.keys().copied().collect();
        let mut removed = Vec::new();
        for uid in uids {
            let Some(watcher) = self.map.get_mut(&uid) else {
                continue;
            };
            match f(watcher) {
                IterAction::Continue => {}
                IterAction::Remove => {
                    if let Some(w) = self.map.remove(&uid) {
                        removed.push(w);
                    }
                }
                IterAction::Halt => break,
            }
        }
        removed
    }

    pub fn uids(&self) -> Vec<u64> {
        self.map.keys().copied().collect()
    }
}
