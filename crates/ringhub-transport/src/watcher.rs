//! Watcher: one file descriptor, one role, one set of reactor flags.

use crate::connection::Connection;
use crate::control::{Alarm, FsTracker, Interrupt, Notifier};
use crate::listener::Listener;
use std::os::fd::RawFd;

/// Registered with the reactor.
pub const WATCHER_RUNNING: u32 = 1;
/// Scheduled for removal; the dispatcher must not run its callback.
pub const WATCHER_INVALID: u32 = 2;
/// Present in the reactor's ready list.
pub const WATCHER_READY: u32 = 4;
/// Authenticated (or internal) connection.
pub const WATCHER_ACTIVE: u32 = 8;
/// Holds buffered incoming data.
pub const WATCHER_IN: u32 = 16;
/// Holds queued outgoing frames.
pub const WATCHER_OUT: u32 = 32;
/// Subscribed to at least one multicast topic.
pub const WATCHER_MULTICAST: u32 = 64;

/// Readiness events reported by the reactor.
pub const EVENT_READ: u32 = 1;
pub const EVENT_WRITE: u32 = 2;
pub const EVENT_ERROR: u32 = 4;
pub const EVENT_CLOSE: u32 = 8;

#[derive(Debug)]
pub enum WatcherKind {
    Listener(Listener),
    Link(Connection),
    Alarm(Alarm),
    Notifier(Notifier),
    Interrupt(Interrupt),
    Tracker(FsTracker),
}

#[derive(Debug)]
pub struct Watcher {
    uid: u64,
    flags: u32,
    events: u32,
    kind: WatcherKind,
}

impl Watcher {
    pub fn new(uid: u64, kind: WatcherKind) -> Self {
        Self {
            uid,
            flags: 0,
            events: 0,
            kind,
        }
    }

    pub fn uid(&self) -> u64 {
        self.uid
    }

    pub fn set_uid(&mut self, uid: u64) {
        self.uid = uid;
    }

    pub fn fd(&self) -> RawFd {
        match &self.kind {
            WatcherKind::Listener(listener) => listener.fd(),
            WatcherKind::Link(connection) => connection.fd(),
            WatcherKind::Alarm(alarm) => alarm.fd(),
            WatcherKind::Notifier(notifier) => notifier.fd(),
            WatcherKind::Interrupt(interrupt) => interrupt.fd(),
            WatcherKind::Tracker(tracker) => tracker.fd(),
        }
    }

    pub fn kind(&self) -> &WatcherKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut WatcherKind {
        &mut self.kind
    }

    pub fn as_connection(&self) -> Option<&Connection> {
        match &self.kind {
            WatcherKind::Link(connection) => Some(connection),
            _ => None,
        }
    }

    pub fn as_connection_mut(&mut self) -> Option<&mut Connection> {
        match &mut self.kind {
            WatcherKind::Link(connection) => Some(connection),
            _ => None,
        }
    }

    pub fn test_flags(&self, mask: u32) -> bool {
        self.flags & mask != 0
    }

    pub fn set_flags(&mut self, mask: u32) {
        self.flags |= mask;
    }

    pub fn clear_flags(&mut self, mask: u32) {
        self.flags &= !mask;
    }

    pub fn events(&self) -> u32 {
        self.events
    }

    pub fn set_events(&mut self, events: u32) {
        self.events |= events;
    }

    pub fn clear_events(&mut self, mask: u32) {
        self.events &= !mask;
    }

    pub fn test_events(&self, mask: u32) -> bool {
        self.events & mask != 0
    }

    /// True when the watcher has pending work for the dispatcher.
    pub fn is_ready(&self) -> bool {
        self.events != 0
    }
}
