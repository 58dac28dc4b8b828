//! Fixed-capacity circular byte buffer with two-segment vectored access.
//!
//! Backs each connection's receive path: the kernel scatters into the two
//! writable segments, the frame assembler peeks and consumes whole frames.

use alloc::vec;
use alloc::vec::Vec;

/// Circular byte buffer. Capacity is rounded up to a power of two so that
/// index arithmetic reduces to masking.
#[derive(Debug)]
pub struct ByteRing {
    data: Vec<u8>,
    mask: usize,
    /// Monotonic read counter.
    head: usize,
    /// Monotonic write counter. Invariant: `tail - head <= capacity`.
    tail: usize,
}

impl ByteRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        Self {
            data: vec![0; capacity],
            mask: capacity - 1,
            head: 0,
            tail: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes available for reading.
    pub fn len(&self) -> usize {
        self.tail - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Bytes available for writing.
    pub fn free(&self) -> usize {
        self.capacity() - self.len()
    }

    /// Returns the writable region as up to two contiguous segments.
    ///
    /// Either segment may be empty. The caller reports how much was filled
    /// through [`ByteRing::commit_write`].
    pub fn writable_parts(&mut self) -> (&mut [u8], &mut [u8]) {
        let free = self.free();
        let start = self.tail & self.mask;
        let first = free.min(self.capacity() - start);
        let second = free - first;
        let (lo, hi) = self.data.split_at_mut(start);
        (&mut hi[..first], &mut lo[..second])
    }

    /// Advances the write index after the caller filled `n` bytes of the
    /// writable segments in order.
    pub fn commit_write(&mut self, n: usize) {
        debug_assert!(n <= self.free());
        self.tail += n;
    }

    /// Copies `buf.len()` bytes into `buf` without consuming them.
    /// Returns false if the ring holds fewer bytes.
    pub fn peek(&self, buf: &mut [u8]) -> bool {
        if buf.len() > self.len() {
            return false;
        }
        for (i, b) in buf.iter_mut().enumerate() {
            *b = self.data[(self.head + i) & self.mask];
        }
        true
    }

    /// Copies and consumes `buf.len()` bytes. Returns false (ring untouched)
    /// if not enough data is buffered.
    pub fn read_into(&mut self, buf: &mut [u8]) -> bool {
        if !self.peek(buf) {
            return false;
        }
        self.head += buf.len();
        true
    }

    /// Discards `n` buffered bytes.
    pub fn skip(&mut self, n: usize) {
        debug_assert!(n <= self.len());
        self.head += n;
    }

    /// Appends bytes, failing without a partial write if the ring is full.
    pub fn write(&mut self, src: &[u8]) -> bool {
        if src.len() > self.free() {
            return false;
        }
        for (i, b) in src.iter().enumerate() {
            let at = (self.tail + i) & self.mask;
            self.data[at] = *b;
        }
        self.tail += src.len();
        true
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
    }
}
