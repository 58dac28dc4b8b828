//! Overlay connection: per-socket frame assembly and delivery.
//!
//! The read path drains the socket into a circular byte buffer (vectored,
//! edge-triggered, so every call reads until the kernel reports empty) and
//! peels complete frames off it. The write path gathers queued frames into
//! one vectored write and keeps a byte offset into the front frame across
//! short writes.

use ringhub_codec::{Frame, FramePool, FrameRef, Header, HEADER_SIZE, MTU};
use ringhub_core::HubError;
use ringhub_crypto::{HostAuth, SealError, SecureChannel, TAG_LENGTH};
use ringhub_dsa::{ByteRing, Ring, TopicSet};
use std::io::{self, IoSlice, IoSliceMut};
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

/// Upper bound on gather segments per write, well under IOV_MAX.
const MAX_SEGMENTS: usize = 64;

/// Authentication progress of a connection.
#[derive(Debug)]
pub enum AuthState {
    /// Freshly admitted guest; may only speak the auth and null commands.
    Anonymous,
    /// SRP challenge issued, waiting for the client proof.
    Challenged(Box<HostAuth>),
    /// Verified and promoted to a ring identifier.
    Established,
}

/// Result of one read cycle.
#[derive(Default)]
pub struct ReadOutcome {
    pub frames: Vec<FrameRef>,
    /// Peer performed an orderly shutdown.
    pub closed: bool,
    /// Framing violation; the connection must be expelled.
    pub violation: bool,
    /// Frames lost to pool exhaustion.
    pub starved: u32,
}

#[derive(Debug)]
pub struct Connection {
    fd: OwnedFd,
    local: bool,
    incoming: ByteRing,
    out: Ring<FrameRef>,
    out_limit: usize,
    /// Bytes of the front outgoing frame already on the wire.
    partial_out: usize,
    topics: TopicSet,
    created: Instant,
    total_in: u64,
    total_out: u64,
    auth: AuthState,
    channel: Option<SecureChannel>,
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

impl Connection {
    /// Wraps an accepted descriptor. The caller guarantees non-blocking
    /// mode.
    pub fn from_fd(fd: OwnedFd, local: bool) -> Self {
        Self {
            fd,
            local,
            incoming: ByteRing::new(2 * MTU),
            out: Ring::new(1024),
            out_limit: 0,
            partial_out: 0,
            topics: TopicSet::new(),
            created: Instant::now(),
            total_in: 0,
            total_out: 0,
            auth: AuthState::Anonymous,
            channel: None,
        }
    }

    /// Creates a loopback pair: a non-blocking hub-side connection and the
    /// blocking stream handed to the worker thread.
    pub fn pair() -> Result<(Self, UnixStream), HubError> {
        let mut fds = [0; 2];
        if unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) } < 0
        {
            return Err(HubError::Io(io::Error::last_os_error()));
        }
        let hub_side = unsafe { OwnedFd::from_raw_fd(fds[0]) };
        let worker_side = unsafe { OwnedFd::from_raw_fd(fds[1]) };
        set_nonblocking(hub_side.as_raw_fd())?;
        Ok((Self::from_fd(hub_side, true), UnixStream::from(worker_side)))
    }

    pub fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    pub fn has_timed_out(&self, lease_ms: u64) -> bool {
        self.age() >= Duration::from_millis(lease_ms)
    }

    /// Caps the outgoing queue; clamped below the ring capacity.
    pub fn set_out_limit(&mut self, limit: usize) {
        self.out_limit = limit.min(self.out.capacity() - 1);
    }

    pub fn out_limit(&self) -> usize {
        if self.out_limit == 0 {
            self.out.capacity() - 1
        } else {
            self.out_limit
        }
    }

    pub fn queued(&self) -> usize {
        self.out.len()
    }

    pub fn has_output(&self) -> bool {
        !self.out.is_empty()
    }

    /// Accepts a frame for delivery, honoring the queue cap. The refcount
    /// was already raised by cloning the handle.
    pub fn publish(&mut self, frame: FrameRef) -> bool {
        if self.out.len() >= self.out_limit() {
            return false;
        }
        self.out.put(frame)
    }

    /// Drains the socket and assembles at most `quota` frames. The fill and
    /// assembly steps alternate so a full byte ring never strands buffered
    /// socket data behind a consumed readiness edge.
    pub fn read_frames(&mut self, pool: &FramePool, quota: usize) -> io::Result<ReadOutcome> {
        let mut outcome = ReadOutcome::default();
        let quota = if quota == 0 { usize::MAX } else { quota };
        loop {
            let drained = self.fill_ring(&mut outcome)?;
            self.assemble(pool, quota, &mut outcome);
            if drained || outcome.violation || outcome.closed || outcome.frames.len() >= quota
            {
                return Ok(outcome);
            }
        }
    }

    /// Fills the byte ring from the socket. Returns true once the socket is
    /// drained (or closed), false when the ring filled up first.
    fn fill_ring(&mut self, outcome: &mut ReadOutcome) -> io::Result<bool> {
        loop {
            if self.incoming.free() == 0 {
                // Ring full; the caller peels frames off and retries.
                return Ok(false);
            }
            let received = {
                let (first, second) = self.incoming.writable_parts();
                let mut iov = [IoSliceMut::new(first), IoSliceMut::new(second)];
                match nix::sys::uio::readv(self.fd.as_fd(), &mut iov) {
                    Ok(n) => n,
                    Err(nix::errno::Errno::EAGAIN) => return Ok(true),
                    Err(nix::errno::Errno::EINTR) => continue,
                    Err(nix::errno::Errno::ECONNRESET) => {
                        outcome.closed = true;
                        return Ok(true);
                    }
                    Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
                }
            };
            if received == 0 {
                outcome.closed = true;
                return Ok(true);
            }
            self.incoming.commit_write(received);
        }
    }

    fn assemble(&mut self, pool: &FramePool, quota: usize, outcome: &mut ReadOutcome) {
        let mut header_buf = [0u8; HEADER_SIZE];
        while outcome.frames.len() < quota && self.incoming.peek(&mut header_buf) {
            let header = match Header::parse(&header_buf) {
                Ok(header) => header,
                Err(_) => {
                    outcome.violation = true;
                    return;
                }
            };
            let total = header.length as usize;
            if self.incoming.len() < total {
                // Partial frame; wait for more bytes.
                return;
            }
            let mut wire = vec![0u8; total];
            self.incoming.read_into(&mut wire);
            match pool.adopt(&wire) {
                Ok(Some(frame)) => {
                    self.total_in += 1;
                    outcome.frames.push(frame);
                }
                Ok(None) => outcome.starved += 1,
                Err(_) => {
                    outcome.violation = true;
                    return;
                }
            }
        }
    }

    /// Writes as much of the outgoing queue as the socket accepts. Returns
    /// the byte count; 0 means the socket would block or nothing is queued.
    pub fn write_pending(&mut self) -> io::Result<usize> {
        if self.out.is_empty() {
            return Ok(0);
        }
        let written = {
            let borrowed: Vec<std::cell::Ref<'_, Frame>> = self
                .out
                .iter()
                .take(MAX_SEGMENTS)
                .map(|f| f.borrow())
                .collect();
            let mut segments: Vec<IoSlice<'_>> = Vec::with_capacity(borrowed.len());
            for (i, frame) in borrowed.iter().enumerate() {
                let wire = frame.wire();
                segments.push(IoSlice::new(if i == 0 {
                    &wire[self.partial_out..]
                } else {
                    wire
                }));
            }
            loop {
                match nix::sys::uio::writev(self.fd.as_fd(), &segments) {
                    Ok(n) => break n,
                    Err(nix::errno::Errno::EAGAIN) => break 0,
                    Err(nix::errno::Errno::EINTR) => continue,
                    Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
                }
            }
        };
        self.advance_out(written);
        Ok(written)
    }

    fn advance_out(&mut self, written: usize) {
        let mut remaining = written;
        while remaining > 0 {
            let front_left = match self.out.front() {
                Some(frame) => frame.borrow().length() - self.partial_out,
                None => break,
            };
            if remaining >= front_left {
                self.out.get();
                self.partial_out = 0;
                self.total_out += 1;
                remaining -= front_left;
            } else {
                self.partial_out += remaining;
                remaining = 0;
            }
        }
    }

    pub fn total_in(&self) -> u64 {
        self.total_in
    }

    pub fn total_out(&self) -> u64 {
        self.total_out
    }

    pub fn subscribe(&mut self, topic: usize) -> bool {
        self.topics.set(topic)
    }

    pub fn unsubscribe(&mut self, topic: usize) {
        self.topics.clear(topic);
    }

    pub fn is_subscribed(&self, topic: usize) -> bool {
        self.topics.test(topic)
    }

    pub fn subscriptions(&self) -> &TopicSet {
        &self.topics
    }

    pub fn clear_subscriptions(&mut self) {
        self.topics.reset();
    }

    pub fn auth(&self) -> &AuthState {
        &self.auth
    }

    pub fn take_auth(&mut self) -> AuthState {
        std::mem::replace(&mut self.auth, AuthState::Anonymous)
    }

    pub fn set_auth(&mut self, auth: AuthState) {
        self.auth = auth;
    }

    pub fn is_established(&self) -> bool {
        matches!(self.auth, AuthState::Established)
    }

    /// Arms session-key payload protection.
    pub fn set_channel(&mut self, channel: SecureChannel) {
        self.channel = Some(channel);
    }

    pub fn is_secured(&self) -> bool {
        self.channel.is_some()
    }

    /// Seals a frame payload under the session key, appending the tag.
    /// A connection without a channel passes frames through untouched.
    pub fn seal_payload(&mut self, frame: &mut Frame) -> Result<(), SealError> {
        let Some(channel) = self.channel.as_mut() else {
            return Ok(());
        };
        let aad = context_aad(frame.header());
        let mut payload = frame.payload().to_vec();
        let tag = channel.seal_in_place(&aad, &mut payload)?;
        payload.extend_from_slice(&tag);
        if frame.set_payload(&payload) {
            Ok(())
        } else {
            Err(SealError::IntegrityCheckFailed)
        }
    }

    /// Opens a sealed frame payload, stripping the tag.
    pub fn open_payload(&mut self, frame: &mut Frame) -> Result<(), SealError> {
        let Some(channel) = self.channel.as_mut() else {
            return Ok(());
        };
        let sealed = frame.payload().to_vec();
        if sealed.len() < TAG_LENGTH {
            return Err(SealError::IntegrityCheckFailed);
        }
        let (body, tag) = sealed.split_at(sealed.len() - TAG_LENGTH);
        let mut body = body.to_vec();
        channel.open_in_place(&context_aad(frame.header()), &mut body, tag)?;
        frame.set_payload(&body);
        Ok(())
    }
}

/// Header fields bound into the AEAD: addresses and transaction context,
/// excluding the length the seal itself changes.
fn context_aad(header: &Header) -> [u8; 21] {
    let mut aad = [0u8; 21];
    aad[0..8].copy_from_slice(&header.source.to_be_bytes());
    aad[8..16].copy_from_slice(&header.destination.to_be_bytes());
    aad[16..18].copy_from_slice(&header.sequence.to_be_bytes());
    aad[18] = header.session;
    aad[19] = header.command;
    aad[20] = header.qualifier;
    aad
}
