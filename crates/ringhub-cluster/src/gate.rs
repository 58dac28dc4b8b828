//! Condition gate for pacing the stabilizer: the worker sleeps between
//! cycles, the hub releases it early for shutdown.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

pub struct Gate {
    released: Mutex<bool>,
    signal: Condvar,
}

impl Gate {
    pub fn new() -> Self {
        Self {
            released: Mutex::new(false),
            signal: Condvar::new(),
        }
    }

    /// Blocks for up to `timeout_ms`. Returns true when released through
    /// [`Gate::open`], false on timeout.
    pub fn wait(&self, timeout_ms: u64) -> bool {
        let deadline = Duration::from_millis(timeout_ms);
        let released = self.released.lock().unwrap_or_else(|e| e.into_inner());
        let (mut released, _) = self
            .signal
            .wait_timeout_while(released, deadline, |open| !*open)
            .unwrap_or_else(|e| e.into_inner());
        let was_open = *released;
        *released = false;
        was_open
    }

    /// Releases one pending or future wait.
    pub fn open(&self) {
        let mut released = self.released.lock().unwrap_or_else(|e| e.into_inner());
        *released = true;
        self.signal.notify_one();
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}
