//! Serialized runtime metrics returned by the DESCRIBE command.
//!
//! The payload is a 68-byte fixed prefix (identity, uptime, traffic and
//! resource counters, MTU) followed by the routing snapshot: predecessor,
//! successor, route count, stability flag and one 25-byte record per
//! finger.

/// Unit/byte pair for received or dropped traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficMetric {
    pub units: u64,
    pub bytes: u64,
}

/// Allocation/utilization pair for a bounded pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceMetric {
    pub max: u32,
    pub used: u32,
}

/// Hub-level runtime counters, the fixed prefix of the DESCRIBE payload.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HubMetrics {
    pub uid: u64,
    /// Seconds since the event loop started.
    pub uptime: f64,
    pub received: TrafficMetric,
    pub dropped: TrafficMetric,
    pub connections: ResourceMetric,
    pub frames: ResourceMetric,
    pub mtu: u32,
}

impl HubMetrics {
    /// Serialized size in bytes.
    pub const BYTES: usize = 68;

    pub fn pack(&self, buf: &mut [u8]) -> Option<usize> {
        if buf.len() < Self::BYTES {
            return None;
        }
        buf[0..8].copy_from_slice(&self.uid.to_be_bytes());
        buf[8..16].copy_from_slice(&self.uptime.to_bits().to_be_bytes());
        buf[16..24].copy_from_slice(&self.received.units.to_be_bytes());
        buf[24..32].copy_from_slice(&self.received.bytes.to_be_bytes());
        buf[32..40].copy_from_slice(&self.dropped.units.to_be_bytes());
        buf[40..48].copy_from_slice(&self.dropped.bytes.to_be_bytes());
        buf[48..52].copy_from_slice(&self.connections.max.to_be_bytes());
        buf[52..56].copy_from_slice(&self.connections.used.to_be_bytes());
        buf[56..60].copy_from_slice(&self.frames.max.to_be_bytes());
        buf[60..64].copy_from_slice(&self.frames.used.to_be_bytes());
        buf[64..68].copy_from_slice(&self.mtu.to_be_bytes());
        Some(Self::BYTES)
    }

    pub fn unpack(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::BYTES {
            return None;
        }
        Some(Self {
            uid: u64::from_be_bytes(buf[0..8].try_into().unwrap()),
            uptime: f64::from_bits(u64::from_be_bytes(buf[8..16].try_into().unwrap())),
            received: TrafficMetric {
                units: u64::from_be_bytes(buf[16..24].try_into().unwrap()),
                bytes: u64::from_be_bytes(buf[24..32].try_into().unwrap()),
            },
            dropped: TrafficMetric {
                units: u64::from_be_bytes(buf[32..40].try_into().unwrap()),
                bytes: u64::from_be_bytes(buf[40..48].try_into().unwrap()),
            },
            connections: ResourceMetric {
                max: u32::from_be_bytes(buf[48..52].try_into().unwrap()),
                used: u32::from_be_bytes(buf[52..56].try_into().unwrap()),
            },
            frames: ResourceMetric {
                max: u32::from_be_bytes(buf[56..60].try_into().unwrap()),
                used: u32::from_be_bytes(buf[60..64].try_into().unwrap()),
            },
            mtu: u32::from_be_bytes(buf[64..68].try_into().unwrap()),
        })
    }
}

/// One finger of the routing snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteEntry {
    pub start: u64,
    pub current: u64,
    pub committed: u64,
    pub connected: bool,
}

impl RouteEntry {
    pub const BYTES: usize = 25;
}

/// Full DESCRIBE payload: hub counters plus the routing snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayMetrics {
    pub hub: HubMetrics,
    pub predecessor: u64,
    pub successor: u64,
    pub routes: u32,
    pub stable: bool,
    pub route: [RouteEntry; Self::MAX_ROUTES],
}

impl Default for OverlayMetrics {
    fn default() -> Self {
        Self {
            hub: HubMetrics::default(),
            predecessor: 0,
            successor: 0,
            routes: 0,
            stable: false,
            route: [RouteEntry::default(); Self::MAX_ROUTES],
        }
    }
}

impl OverlayMetrics {
    /// Architectural limit on the finger count (16-bit key space).
    pub const MAX_ROUTES: usize = 16;
    /// Serialized size with an empty routing snapshot.
    pub const MIN_BYTES: usize = HubMetrics::BYTES + 8 + 8 + 4 + 1;
    pub const MAX_BYTES: usize = Self::MIN_BYTES + Self::MAX_ROUTES * RouteEntry::BYTES;

    pub fn pack(&self, buf: &mut [u8]) -> Option<usize> {
        let routes = (self.routes as usize).min(Self::MAX_ROUTES);
        let need = Self::MIN_BYTES + routes * RouteEntry::BYTES;
        if buf.len() < need {
            return None;
        }
        let mut at = self.hub.pack(buf)?;
        buf[at..at + 8].copy_from_slice(&self.predecessor.to_be_bytes());
        at += 8;
        buf[at..at + 8].copy_from_slice(&self.successor.to_be_bytes());
        at += 8;
        buf[at..at + 4].copy_from_slice(&(routes as u32).to_be_bytes());
        at += 4;
        buf[at] = self.stable as u8;
        at += 1;
        for entry in &self.route[..routes] {
            buf[at..at + 8].copy_from_slice(&entry.start.to_be_bytes());
            at += 8;
            buf[at..at + 8].copy_from_slice(&entry.current.to_be_bytes());
            at += 8;
            buf[at..at + 8].copy_from_slice(&entry.committed.to_be_bytes());
            at += 8;
            buf[at] = entry.connected as u8;
            at += 1;
        }
        Some(at)
    }

    pub fn unpack(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::MIN_BYTES {
            return None;
        }
        let hub = HubMetrics::unpack(buf)?;
        let mut at = HubMetrics::BYTES;
        let predecessor = u64::from_be_bytes(buf[at..at + 8].try_into().unwrap());
        at += 8;
        let successor = u64::from_be_bytes(buf[at..at + 8].try_into().unwrap());
        at += 8;
        let routes = u32::from_be_bytes(buf[at..at + 4].try_into().unwrap());
        at += 4;
        let stable = buf[at] != 0;
        at += 1;
        let count = (routes as usize).min(Self::MAX_ROUTES);
        if buf.len() < at + count * RouteEntry::BYTES {
            return None;
        }
        let mut route = [RouteEntry::default(); Self::MAX_ROUTES];
        for entry in route.iter_mut().take(count) {
            entry.start = u64::from_be_bytes(buf[at..at + 8].try_into().unwrap());
            at += 8;
            entry.current = u64::from_be_bytes(buf[at..at + 8].try_into().unwrap());
            at += 8;
            entry.committed = u64::from_be_bytes(buf[at..at + 8].try_into().unwrap());
            at += 8;
            entry.connected = buf[at] != 0;
            at += 1;
        }
        Some(Self {
            hub,
            predecessor,
            successor,
            routes: count as u32,
            stable,
            route,
        })
    }
}
