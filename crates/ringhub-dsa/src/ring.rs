//! Bounded FIFO ring over owned elements.
//!
//! Used for the hub's incoming/outgoing frame queues, per-connection output
//! queues and the guest admission ring. Capacity is fixed at construction
//! and rounded up to a power of two.

use alloc::collections::VecDeque;

#[derive(Debug)]
pub struct Ring<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> Ring<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() == self.capacity
    }

    /// Slots still available.
    pub fn free(&self) -> usize {
        self.capacity - self.items.len()
    }

    /// Enqueues at the back; fails when the ring is full.
    pub fn put(&mut self, item: T) -> bool {
        if self.is_full() {
            return false;
        }
        self.items.push_back(item);
        true
    }

    /// Dequeues from the front.
    pub fn get(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    pub fn front(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Removes and returns every element satisfying `pred`, preserving the
    /// order of the survivors.
    pub fn drain_where<F: FnMut(&T) -> bool>(&mut self, mut pred: F) -> alloc::vec::Vec<T> {
        let mut taken = alloc::vec::Vec::new();
        let mut kept = VecDeque::with_capacity(self.items.len());
        while let Some(item) = self.items.pop_front() {
            if pred(&item) {
                taken.push(item);
            } else {
                kept.push_back(item);
            }
        }
        self.items = kept;
        taken
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
