//! Synchronous readiness demultiplexer over epoll.
//!
//! Edge-triggered: every readiness transition is reported once, so watcher
//! callbacks must drain their descriptors to EAGAIN. Watchers with pending
//! work queue up in a FIFO ready list; removal of a watcher that is still
//! in the list is deferred by marking it invalid, keeping the list free of
//! dangling entries while the dispatcher iterates.

use crate::registry::Registry;
use crate::watcher::{
    Watcher, EVENT_CLOSE, EVENT_ERROR, EVENT_READ, EVENT_WRITE, WATCHER_INVALID, WATCHER_READY,
    WATCHER_RUNNING,
};
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
use ringhub_core::HubError;
use std::collections::VecDeque;
use std::os::fd::BorrowedFd;

/// Interest set for one watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
}

impl Interest {
    pub const READ: Self = Self {
        read: true,
        write: false,
    };
    pub const WRITE: Self = Self {
        read: false,
        write: true,
    };
    pub const BOTH: Self = Self {
        read: true,
        write: true,
    };

    fn flags(&self) -> EpollFlags {
        let mut flags = EpollFlags::EPOLLET | EpollFlags::EPOLLRDHUP;
        if self.read {
            flags |= EpollFlags::EPOLLIN;
        }
        if self.write {
            flags |= EpollFlags::EPOLLOUT;
        }
        flags
    }
}

pub struct Reactor {
    epoll: Epoll,
    events: Vec<EpollEvent>,
    timeout_ms: i32,
    ready: VecDeque<u64>,
}

impl Reactor {
    pub fn new(max_events: usize) -> Result<Self, HubError> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)
            .map_err(|e| HubError::Io(std::io::Error::from_raw_os_error(e as i32)))?;
        Ok(Self {
            epoll,
            events: vec![EpollEvent::empty(); max_events.max(1)],
            timeout_ms: -1,
            ready: VecDeque::new(),
        })
    }

    /// Poll timeout in milliseconds; -1 blocks indefinitely.
    pub fn set_timeout(&mut self, timeout_ms: i32) {
        self.timeout_ms = timeout_ms;
    }

    pub fn timeout(&self) -> i32 {
        self.timeout_ms
    }

    /// Registers a watcher with the given interest.
    pub fn add(&mut self, watcher: &mut Watcher, interest: Interest) -> Result<(), HubError> {
        if watcher.test_flags(WATCHER_RUNNING) {
            return Err(HubError::Protocol("watcher already armed".into()));
        }
        let event = EpollEvent::new(interest.flags(), watcher.uid());
        let fd = unsafe { BorrowedFd::borrow_raw(watcher.fd()) };
        self.epoll
            .add(fd, event)
            .map_err(|e| HubError::Io(std::io::Error::from_raw_os_error(e as i32)))?;
        watcher.set_flags(WATCHER_RUNNING);
        Ok(())
    }

    /// Changes a registered watcher's interest.
    pub fn modify(&mut self, watcher: &mut Watcher, interest: Interest) -> Result<(), HubError> {
        if !watcher.test_flags(WATCHER_RUNNING) {
            return Err(HubError::Protocol("watcher not armed".into()));
        }
        let mut event = EpollEvent::new(interest.flags(), watcher.uid());
        let fd = unsafe { BorrowedFd::borrow_raw(watcher.fd()) };
        self.epoll
            .modify(fd, &mut event)
            .map_err(|e| HubError::Io(std::io::Error::from_raw_os_error(e as i32)))?;
        Ok(())
    }

    /// Takes a watcher out of service. Returns true when removal was
    /// deferred because the watcher still sits in the ready list; the
    /// dispatcher completes it.
    pub fn disable(&mut self, watcher: &mut Watcher) -> bool {
        if !watcher.test_flags(WATCHER_RUNNING) {
            return false;
        }
        if watcher.test_flags(WATCHER_READY) {
            watcher.set_flags(WATCHER_INVALID);
            true
        } else {
            self.remove(watcher);
            false
        }
    }

    /// Unregisters immediately. Safe on an already-removed watcher.
    pub fn remove(&mut self, watcher: &mut Watcher) {
        let fd = unsafe { BorrowedFd::borrow_raw(watcher.fd()) };
        let _ = self.epoll.delete(fd);
        watcher.clear_flags(WATCHER_RUNNING);
    }

    /// Waits for readiness and feeds the ready list. With `block` false, or
    /// with watchers already queued, the wait degenerates to a status poll.
    pub fn poll(&mut self, block: bool, registry: &mut Registry) -> Result<(), HubError> {
        let effective = if !block || !self.ready.is_empty() {
            0
        } else {
            self.timeout_ms
        };
        let timeout = if effective < 0 {
            EpollTimeout::NONE
        } else {
            EpollTimeout::from(effective.min(60_000) as u16)
        };
        let count = match self.epoll.wait(&mut self.events, timeout) {
            Ok(count) => count,
            Err(nix::errno::Errno::EINTR) => 0,
            Err(e) => return Err(HubError::Io(std::io::Error::from_raw_os_error(e as i32))),
        };
        for i in 0..count {
            let event = self.events[i];
            let uid = event.data();
            let Some(watcher) = registry.get_mut(uid) else {
                continue;
            };
            let flags = event.events();
            let mut pending = 0u32;
            if flags.contains(EpollFlags::EPOLLIN) {
                pending |= EVENT_READ;
            }
            if flags.contains(EpollFlags::EPOLLOUT) {
                pending |= EVENT_WRITE;
            }
            if flags.contains(EpollFlags::EPOLLERR) {
                pending |= EVENT_ERROR;
            }
            if flags.intersects(EpollFlags::EPOLLHUP | EpollFlags::EPOLLRDHUP) {
                pending |= EVENT_CLOSE;
            }
            watcher.set_events(pending);
            if watcher.test_events(EVENT_ERROR) {
                watcher.set_flags(WATCHER_INVALID);
            }
            if watcher.is_ready() && !watcher.test_flags(WATCHER_READY) {
                watcher.set_flags(WATCHER_READY);
                self.ready.push_back(uid);
            }
        }
        Ok(())
    }

    /// Re-enqueues a watcher that still has work.
    pub fn retain(&mut self, watcher: &mut Watcher) {
        if !watcher.test_flags(WATCHER_READY) {
            watcher.set_flags(WATCHER_READY);
            self.ready.push_back(watcher.uid());
        }
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    /// Pops the next ready identifier; the caller clears the watcher's
    /// READY flag.
    pub fn pop_ready(&mut self) -> Option<u64> {
        self.ready.pop_front()
    }
}
