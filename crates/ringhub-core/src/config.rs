use crate::error::HubError;
use serde::Deserialize;

/// Address family of the listening socket.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    /// TCP on `bind_name` = "host:port".
    Inet,
    /// UNIX-domain stream on `bind_name` = filesystem path.
    Unix,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HubConfig {
    /// Accept external connections.
    pub listen: bool,
    pub backlog: i32,
    pub bind_name: String,
    pub bind_type: AddressFamily,

    /// Reactor events drained per poll.
    pub max_events: usize,
    /// Periodic timer: initial expiration in milliseconds.
    pub alarm_expiration_ms: u64,
    /// Periodic timer: interval in milliseconds.
    pub alarm_interval_ms: u64,
    /// Event notifier decrements by one instead of draining.
    pub semaphore_mode: bool,
    /// Convert caught signals into reactor events.
    pub signal_capture: bool,

    pub max_connections: usize,
    pub max_messages: usize,
    /// Cap on unauthenticated connections.
    pub max_guests: usize,
    /// Ephemeral connection expiration in milliseconds.
    pub guest_lease_ms: u64,

    /// Frames pulled from one connection per loop iteration.
    pub in_quota: usize,
    /// Queued outgoing frames allowed per connection.
    pub out_quota: usize,
    pub throttle: bool,
    pub policing: bool,
    pub reserved_slots: usize,
    /// Default hop limit.
    pub ttl: u8,
    /// Output-queue fraction reserved for answering requests.
    pub answer_ratio: f64,
    /// Output-queue fraction reserved for routed traffic.
    pub forward_ratio: f64,

    pub stabilize_period_ms: u64,
    pub stabilize_retry_ms: u64,
    pub bootstrap_nodes: Vec<u64>,

    /// SRP prime group size in bits (1024, 2048 or 3072).
    pub group_size: u32,
    /// SRP digest ("sha256" or "sha512").
    pub hash: String,
    /// Suppress identities in auth-path logs.
    pub redact_logs: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listen: true,
            backlog: 32,
            bind_name: "127.0.0.1:9090".to_string(),
            bind_type: AddressFamily::Inet,
            max_events: 64,
            alarm_expiration_ms: 1000,
            alarm_interval_ms: 1000,
            semaphore_mode: false,
            signal_capture: true,
            max_connections: 1024,
            max_messages: 4096,
            max_guests: 128,
            guest_lease_ms: 60_000,
            in_quota: 32,
            out_quota: 256,
            throttle: false,
            policing: false,
            reserved_slots: 16,
            ttl: 8,
            answer_ratio: 0.15,
            forward_ratio: 0.70,
            stabilize_period_ms: 2000,
            stabilize_retry_ms: 5000,
            bootstrap_nodes: Vec::new(),
            group_size: 3072,
            hash: "sha512".to_string(),
            redact_logs: false,
        }
    }
}

impl HubConfig {
    /// Loads the configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, HubError> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| HubError::Config(e.to_string()))
    }
}
