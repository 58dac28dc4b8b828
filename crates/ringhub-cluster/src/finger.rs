//! One routing-table entry: the ring position it covers, the node currently
//! believed to own that position, the last acknowledged value and the state
//! of the outbound connection.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Finger {
    start: u64,
    current: u64,
    committed: u64,
    connected: bool,
}

impl Finger {
    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn set_start(&mut self, start: u64) {
        self.start = start;
    }

    pub fn current(&self) -> u64 {
        self.current
    }

    pub fn set_current(&mut self, current: u64) {
        self.current = current;
    }

    pub fn committed(&self) -> u64 {
        self.committed
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// True when the last change was acknowledged.
    pub fn is_consistent(&self) -> bool {
        self.current == self.committed
    }

    /// Acknowledges the current value; returns the displaced one.
    pub fn commit(&mut self) -> u64 {
        let old = self.committed;
        self.committed = self.current;
        old
    }
}
