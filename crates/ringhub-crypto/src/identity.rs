//! Identity store interface consumed by the registration and token
//! handlers. Durable storage lives outside the core; the in-memory
//! implementation backs tests and single-process deployments.

use std::collections::HashMap;

/// Salt and password verifier recorded for one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    pub salt: Vec<u8>,
    pub verifier: Vec<u8>,
}

pub trait IdentityStore {
    fn get(&self, identity: u64) -> Option<IdentityRecord>;
    /// Records an identity. Returns false when the identity already exists.
    fn put(&mut self, identity: u64, record: IdentityRecord) -> bool;
    fn remove(&mut self, identity: u64) -> bool;
}

#[derive(Default)]
pub struct MemoryIdentityStore {
    records: HashMap<u64, IdentityRecord>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn get(&self, identity: u64) -> Option<IdentityRecord> {
        self.records.get(&identity).cloned()
    }

    fn put(&mut self, identity: u64, record: IdentityRecord) -> bool {
        use std::collections::hash_map::Entry;
        match self.records.entry(identity) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(record);
                true
            }
        }
    }

    fn remove(&mut self, identity: u64) -> bool {
        self.records.remove(&identity).is_some()
    }
}
