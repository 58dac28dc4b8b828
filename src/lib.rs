//! Overlay hub: a peer-to-peer message-routing node on a Chord-style
//! identifier ring.
//!
//! The hub multiplexes many client connections on one reactor thread,
//! assembles fixed-header frames, routes them with a finger-table lookup
//! and serves the overlay maintenance protocol. A background stabilizer
//! thread keeps the routing table converged through a loopback connection.

pub mod handlers;
pub mod hub;

pub use hub::{CancelHandle, Hub, EPHEMERAL_BASE, WORKER_UID};
