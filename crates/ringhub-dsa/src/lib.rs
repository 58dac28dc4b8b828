#![no_std]
extern crate alloc;

pub mod byte_ring;
pub mod ring;
pub mod topics;

pub use byte_ring::ByteRing;
pub use ring::Ring;
pub use topics::{TopicSet, TOPIC_COUNT};
