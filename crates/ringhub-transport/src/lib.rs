//! Event-driven transport: the epoll reactor, the watcher taxonomy and the
//! registry that owns them.
//!
//! A watcher binds one file descriptor to one role (listener, overlay
//! connection, timer, notifier, signal or file-system tracker). The reactor
//! reports readiness edge-triggered into a FIFO ready list; the hub drains
//! it and drives each watcher's I/O.

pub mod connection;
pub mod control;
pub mod listener;
pub mod reactor;
pub mod registry;
pub mod watcher;

pub use connection::{AuthState, Connection, ReadOutcome};
pub use control::{Alarm, FsTracker, Interrupt, Notifier, NotifierHandle};
pub use listener::Listener;
pub use reactor::{Interest, Reactor};
pub use registry::{IterAction, Registry};
pub use watcher::{Watcher, WatcherKind};
pub use watcher::{
    WATCHER_ACTIVE, WATCHER_IN, WATCHER_INVALID, WATCHER_MULTICAST, WATCHER_OUT, WATCHER_READY,
    WATCHER_RUNNING,
};
