//! Command space of the overlay protocol.
//!
//! A handler is selected by the (command, qualifier) pair; `aqlf` decides
//! whether the frame is a request (may be answered) or a response (may only
//! be delivered).

/// Administrative commands.
pub const CMD_NULL: u8 = 0;
/// Identification and session establishment.
pub const CMD_AUTH: u8 = 1;
/// Topic-based multicasting.
pub const CMD_MULTICAST: u8 = 2;
/// Routing-table maintenance between hubs.
pub const CMD_NODE: u8 = 3;
/// Distributed lookup and liveness.
pub const CMD_OVERLAY: u8 = 4;

pub const QLF_NULL: u8 = 0;
pub const QLF_DESCRIBE: u8 = 127;

pub const QLF_REGISTER: u8 = 0;
pub const QLF_TOKEN: u8 = 1;
pub const QLF_FIND_ROOT: u8 = 2;
pub const QLF_BOOTSTRAP: u8 = 3;

pub const QLF_PUBLISH: u8 = 0;
pub const QLF_SUBSCRIBE: u8 = 1;
pub const QLF_UNSUBSCRIBE: u8 = 2;

pub const QLF_GET_PREDECESSOR: u8 = 0;
pub const QLF_SET_PREDECESSOR: u8 = 1;
pub const QLF_GET_SUCCESSOR: u8 = 2;
pub const QLF_SET_SUCCESSOR: u8 = 3;
pub const QLF_GET_FINGER: u8 = 4;
pub const QLF_SET_FINGER: u8 = 5;
pub const QLF_GET_NEIGHBOURS: u8 = 6;
pub const QLF_NOTIFY: u8 = 7;

pub const QLF_FIND_SUCCESSOR: u8 = 0;
pub const QLF_PING: u8 = 1;
pub const QLF_MAP: u8 = 2;

/// Frame is a request; the receiving hub may reply.
pub const AQLF_REQUEST: u8 = 0;
/// Frame is an accepted response; it may only be delivered.
pub const AQLF_RESPONSE: u8 = 1;
/// Rejection marker, doubles as the probe marker on requests.
pub const AQLF_REJECTED: u8 = 127;
