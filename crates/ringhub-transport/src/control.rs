//! Control-plane watchers: periodic timer, cross-thread event notifier,
//! synchronous signal capture and file-system tracking. Semantics follow
//! the Linux timerfd/eventfd/signalfd/inotify descriptors they wrap.

use nix::sys::inotify::{AddWatchFlags, Inotify, InitFlags, WatchDescriptor};
use nix::sys::signal::Signal;
use nix::sys::signalfd::{SfdFlags, SigSet, SignalFd};
use nix::sys::time::TimeSpec;
use nix::sys::timerfd::{ClockId, Expiration, TimerFd, TimerFlags, TimerSetTimeFlags};
use ringhub_core::HubError;
use std::io;
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

fn errno_io(e: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

/// Reads one 8-byte counter from a timerfd/eventfd style descriptor.
/// Returns `None` when the descriptor would block.
fn read_counter(fd: RawFd) -> io::Result<Option<u64>> {
    let mut buf = [0u8; 8];
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if n == 8 {
        Ok(Some(u64::from_ne_bytes(buf)))
    } else if n < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock {
            Ok(None)
        } else {
            Err(err)
        }
    } else {
        Err(io::Error::new(io::ErrorKind::UnexpectedEof, "short counter read"))
    }
}

/// Periodic millisecond timer backed by a timerfd.
#[derive(Debug)]
pub struct Alarm {
    timer: TimerFd,
    expiration_ms: u64,
    interval_ms: u64,
    /// Cumulative expirations observed.
    ticks: u64,
}

impl Alarm {
    pub fn new(expiration_ms: u64, interval_ms: u64) -> Result<Self, HubError> {
        let timer = TimerFd::new(
            ClockId::CLOCK_MONOTONIC,
            TimerFlags::TFD_NONBLOCK | TimerFlags::TFD_CLOEXEC,
        )
        .map_err(errno_io)?;
        let alarm = Self {
            timer,
            expiration_ms,
            interval_ms,
            ticks: 0,
        };
        alarm.arm(expiration_ms, interval_ms)?;
        Ok(alarm)
    }

    fn arm(&self, expiration_ms: u64, interval_ms: u64) -> Result<(), HubError> {
        let initial = TimeSpec::from_duration(Duration::from_millis(expiration_ms.max(1)));
        let expiration = if interval_ms > 0 {
            let interval = TimeSpec::from_duration(Duration::from_millis(interval_ms));
            Expiration::IntervalDelayed(initial, interval)
        } else {
            Expiration::OneShot(initial)
        };
        self.timer
            .set(expiration, TimerSetTimeFlags::empty())
            .map_err(errno_io)?;
        Ok(())
    }

    /// Reprograms the timer.
    pub fn reset(&mut self, expiration_ms: u64, interval_ms: u64) -> Result<(), HubError> {
        self.arm(expiration_ms, interval_ms)?;
        self.expiration_ms = expiration_ms;
        self.interval_ms = interval_ms;
        Ok(())
    }

    pub fn settings(&self) -> (u64, u64) {
        (self.expiration_ms, self.interval_ms)
    }

    pub fn fd(&self) -> RawFd {
        self.timer.as_fd().as_raw_fd()
    }

    /// Drains the expiration counter; returns expirations since last read.
    pub fn read(&mut self) -> io::Result<u64> {
        let count = read_counter(self.fd())?.unwrap_or(0);
        self.ticks += count;
        Ok(count)
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

/// Counting event source, the only cross-thread channel into the hub
/// thread.
#[derive(Debug)]
pub struct Notifier {
    fd: OwnedFd,
    count: u64,
}

impl Notifier {
    pub fn new(semaphore: bool) -> Result<Self, HubError> {
        let mut flags = libc::EFD_NONBLOCK | libc::EFD_CLOEXEC;
        if semaphore {
            flags |= libc::EFD_SEMAPHORE;
        }
        let fd = unsafe { libc::eventfd(0, flags) };
        if fd < 0 {
            return Err(HubError::Io(io::Error::last_os_error()));
        }
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
            count: 0,
        })
    }

    pub fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Consumes pending events: the full count, or one in semaphore mode.
    pub fn read(&mut self) -> io::Result<u64> {
        let count = read_counter(self.fd())?.unwrap_or(0);
        self.count += count;
        Ok(count)
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Duplicates the descriptor for use from other threads.
    pub fn handle(&self) -> io::Result<NotifierHandle> {
        Ok(NotifierHandle(self.fd.try_clone()?))
    }
}

/// Sending side of a [`Notifier`], safe to move across threads. Writing is
/// a single syscall, which also makes it the only async-signal-safe way to
/// wake the event loop.
pub struct NotifierHandle(OwnedFd);

impl NotifierHandle {
    pub fn alert(&self, events: u64) -> io::Result<()> {
        let buf = events.to_ne_bytes();
        let n = unsafe {
            libc::write(
                self.0.as_raw_fd(),
                buf.as_ptr() as *const libc::c_void,
                buf.len(),
            )
        };
        if n == 8 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(Self(self.0.try_clone()?))
    }
}

/// Converts caught termination signals into readiness events. The signals
/// are blocked for the whole process; no user code runs in handlers.
#[derive(Debug)]
pub struct Interrupt {
    fd: SignalFd,
}

impl Interrupt {
    pub fn new() -> Result<Self, HubError> {
        let mut mask = SigSet::empty();
        mask.add(Signal::SIGINT);
        mask.add(Signal::SIGTERM);
        mask.add(Signal::SIGQUIT);
        mask.add(Signal::SIGHUP);
        mask.thread_block().map_err(errno_io)?;
        let fd = SignalFd::with_flags(&mask, SfdFlags::SFD_NONBLOCK | SfdFlags::SFD_CLOEXEC)
            .map_err(errno_io)?;
        Ok(Self { fd })
    }

    pub fn fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Next pending signal number, if any.
    pub fn read(&mut self) -> io::Result<Option<i32>> {
        match self.fd.read_signal() {
            Ok(Some(info)) => Ok(Some(info.ssi_signo as i32)),
            Ok(None) => Ok(None),
            Err(e) => Err(errno_io(e)),
        }
    }
}

/// File-system watcher over inotify.
#[derive(Debug)]
pub struct FsTracker {
    inotify: Inotify,
    watches: Vec<(String, WatchDescriptor)>,
}

impl FsTracker {
    pub fn new() -> Result<Self, HubError> {
        let inotify = Inotify::init(InitFlags::IN_NONBLOCK | InitFlags::IN_CLOEXEC)
            .map_err(errno_io)?;
        Ok(Self {
            inotify,
            watches: Vec::new(),
        })
    }

    pub fn fd(&self) -> RawFd {
        self.inotify.as_fd().as_raw_fd()
    }

    /// Starts monitoring a path for the given inotify mask.
    pub fn track(&mut self, path: &str, mask: u32) -> Result<(), HubError> {
        let flags = AddWatchFlags::from_bits_truncate(mask);
        let wd = self.inotify.add_watch(path, flags).map_err(errno_io)?;
        self.watches.push((path.to_string(), wd));
        Ok(())
    }

    pub fn untrack(&mut self, path: &str) {
        if let Some(at) = self.watches.iter().position(|(p, _)| p == path) {
            let (_, wd) = self.watches.remove(at);
            let _ = self.inotify.rm_watch(wd);
        }
    }

    /// Drains pending events as (name, mask) pairs.
    pub fn read(&mut self) -> io::Result<Vec<(String, u32)>> {
        match self.inotify.read_events() {
            Ok(events) => Ok(events
                .into_iter()
                .map(|e| {
                    let name = e
                        .name
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    (name, e.mask.bits())
                })
                .collect()),
            Err(nix::errno::Errno::EAGAIN) => Ok(Vec::new()),
            Err(e) => Err(errno_io(e)),
        }
    }
}
