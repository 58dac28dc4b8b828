//! Overlay wire protocol: fixed-header binary frames, command space and the
//! serialized runtime-metrics payload served by DESCRIBE.
//!
//! Every frame starts with a 32-byte big-endian header followed by at most
//! `MTU - HEADER_SIZE` payload bytes. Frames are self-delimiting: a receiver
//! reads the header, then `length - 32` payload bytes, then owns one frame.

pub mod commands;
pub mod frame;
pub mod header;
pub mod metrics;

pub use frame::{Frame, FramePool, FrameRef, Sequencer};
pub use header::{FrameError, Header, HEADER_SIZE, MAX_PAYLOAD, MTU};
pub use metrics::{HubMetrics, OverlayMetrics, ResourceMetric, RouteEntry, TrafficMetric};
