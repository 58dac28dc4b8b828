//! In-memory frame representation and the bounded frame pool.
//!
//! A frame keeps its wire image and the decoded header in lockstep: every
//! mutator writes both, so the serialized bytes are always current. Frames
//! are reference counted; publishing to a watcher clones the handle and
//! recycling drops it. The pool enforces the configured message cap by
//! attaching a ticket whose drop releases the slot.

use crate::commands::{AQLF_REQUEST, AQLF_RESPONSE};
use crate::header::{FrameError, Header, HEADER_SIZE, MAX_PAYLOAD, MTU};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Shared handle to a frame. The hub is single-threaded, so plain `Rc`
/// carries the reference count.
pub type FrameRef = Rc<RefCell<Frame>>;

#[derive(Debug)]
pub struct Frame {
    header: Header,
    buf: [u8; MTU],
    /// Remaining routing decisions before the frame is discarded.
    ttl: u8,
    /// Identifier of the connection the frame arrived on.
    origin: u64,
    /// Routing label: the watcher chosen to carry the frame out. Distinct
    /// from the header destination, which names the final addressee.
    gateway: u64,
    _ticket: Option<PoolTicket>,
}

impl Frame {
    pub fn new() -> Self {
        let mut frame = Self {
            header: Header {
                length: HEADER_SIZE as u16,
                ..Header::default()
            },
            buf: [0; MTU],
            ttl: 0,
            origin: 0,
            gateway: 0,
            _ticket: None,
        };
        frame.header.serialize(&mut frame.buf);
        frame
    }

    /// Builds a frame from one complete wire image. The slice must hold
    /// exactly the bytes declared by the embedded header.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, FrameError> {
        let header = Header::parse(bytes)?;
        if bytes.len() != header.length as usize {
            return Err(FrameError::BadLength(header.length));
        }
        let mut frame = Self::new();
        frame.header = header;
        frame.buf[..bytes.len()].copy_from_slice(bytes);
        Ok(frame)
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn set_address(&mut self, source: u64, destination: u64) {
        self.header.source = source;
        self.header.destination = destination;
        self.buf[0..8].copy_from_slice(&source.to_be_bytes());
        self.buf[8..16].copy_from_slice(&destination.to_be_bytes());
    }

    pub fn set_source(&mut self, source: u64) {
        self.header.source = source;
        self.buf[0..8].copy_from_slice(&source.to_be_bytes());
    }

    pub fn set_destination(&mut self, destination: u64) {
        self.header.destination = destination;
        self.buf[8..16].copy_from_slice(&destination.to_be_bytes());
    }

    pub fn set_control(&mut self, length: u16, sequence: u16, session: u8) {
        self.header.length = length;
        self.header.sequence = sequence;
        self.header.session = session;
        self.buf[16..18].copy_from_slice(&length.to_be_bytes());
        self.buf[18..20].copy_from_slice(&sequence.to_be_bytes());
        self.buf[20] = session;
    }

    pub fn set_context(&mut self, command: u8, qualifier: u8, aqlf: u8) {
        self.header.command = command;
        self.header.qualifier = qualifier;
        self.header.aqlf = aqlf;
        self.buf[21] = command;
        self.buf[22] = qualifier;
        self.buf[23] = aqlf;
    }

    /// Replaces the payload, adjusting the frame length. Fails when the
    /// payload exceeds `MAX_PAYLOAD`.
    pub fn set_payload(&mut self, payload: &[u8]) -> bool {
        if payload.len() > MAX_PAYLOAD {
            return false;
        }
        let length = (HEADER_SIZE + payload.len()) as u16;
        self.buf[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(payload);
        self.header.length = length;
        self.buf[16..18].copy_from_slice(&length.to_be_bytes());
        true
    }

    pub fn payload(&self) -> &[u8] {
        &self.buf[HEADER_SIZE..self.header.length as usize]
    }

    pub fn payload_length(&self) -> usize {
        self.header.payload_length()
    }

    /// Complete wire image of the frame.
    pub fn wire(&self) -> &[u8] {
        &self.buf[..self.header.length as usize]
    }

    pub fn length(&self) -> usize {
        self.header.length as usize
    }

    pub fn is_request(&self) -> bool {
        self.header.aqlf == AQLF_REQUEST
    }

    /// Turns a request in place into its response: the addresses are
    /// reversed, the hub becomes the source and the context is marked
    /// accepted. Sequence and session are preserved for matching.
    pub fn make_response(&mut self, hub: u64, payload: &[u8]) -> bool {
        let requester = self.header.source;
        self.set_address(hub, requester);
        self.set_context(self.header.command, self.header.qualifier, AQLF_RESPONSE);
        self.set_payload(payload)
    }

    /// Marks a request rejected, dropping any payload.
    pub fn make_rejection(&mut self, hub: u64, aqlf: u8) {
        let requester = self.header.source;
        self.set_address(hub, requester);
        self.set_context(self.header.command, self.header.qualifier, aqlf);
        self.set_payload(&[]);
    }

    pub fn ttl(&self) -> u8 {
        self.ttl
    }

    pub fn set_ttl(&mut self, ttl: u8) {
        self.ttl = ttl;
    }

    /// Consumes one hop; returns false once the budget is exhausted.
    pub fn consume_hop(&mut self) -> bool {
        if self.ttl == 0 {
            return false;
        }
        self.ttl -= 1;
        self.ttl > 0
    }

    pub fn origin(&self) -> u64 {
        self.origin
    }

    pub fn set_origin(&mut self, origin: u64) {
        self.origin = origin;
    }

    pub fn gateway(&self) -> u64 {
        self.gateway
    }

    pub fn set_gateway(&mut self, gateway: u64) {
        self.gateway = gateway;
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct PoolTicket {
    used: Rc<Cell<usize>>,
}

impl Drop for PoolTicket {
    fn drop(&mut self) {
        self.used.set(self.used.get().saturating_sub(1));
    }
}

/// Bounded source of frames. The pool hands out `FrameRef`s and reclaims a
/// slot when the last reference drops.
pub struct FramePool {
    capacity: usize,
    used: Rc<Cell<usize>>,
}

impl FramePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            used: Rc::new(Cell::new(0)),
        }
    }

    /// Allocates an empty frame, or `None` when the pool is exhausted.
    pub fn allocate(&self) -> Option<FrameRef> {
        if self.used.get() >= self.capacity {
            return None;
        }
        self.used.set(self.used.get() + 1);
        let mut frame = Frame::new();
        frame._ticket = Some(PoolTicket {
            used: Rc::clone(&self.used),
        });
        Some(Rc::new(RefCell::new(frame)))
    }

    /// Allocates a frame initialized from a wire image.
    pub fn adopt(&self, bytes: &[u8]) -> Result<Option<FrameRef>, FrameError> {
        let parsed = Frame::from_wire(bytes)?;
        match self.allocate() {
            Some(frame) => {
                let ticket = frame.borrow_mut()._ticket.take();
                *frame.borrow_mut() = parsed;
                frame.borrow_mut()._ticket = ticket;
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn used(&self) -> usize {
        self.used.get()
    }
}

/// Wrapping sequence-number source; zero is skipped so a cleared header is
/// never mistaken for a live transaction.
#[derive(Default)]
pub struct Sequencer {
    last: u16,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> u16 {
        self.last = self.last.wrapping_add(1);
        if self.last == 0 {
            self.last = 1;
        }
        self.last
    }
}
