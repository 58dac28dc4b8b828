//! # Transport Layer Unit Tests
//!
//! Byte-ring mechanics, frame assembly over a loopback pair, back-pressure
//! on the per-connection output queue and the subscription bitmap.

use ringhub_codec::commands::*;
use ringhub_codec::{Frame, FramePool, HEADER_SIZE};
use ringhub_dsa::{ByteRing, Ring, TopicSet};
use ringhub_transport::Connection;
use std::cell::RefCell;
use std::io::{Read, Write};
use std::rc::Rc;

fn request(source: u64, destination: u64, sequence: u16, payload: &[u8]) -> Frame {
    let mut frame = Frame::new();
    frame.set_address(source, destination);
    frame.set_control((HEADER_SIZE + payload.len()) as u16, sequence, 0);
    frame.set_context(CMD_OVERLAY, QLF_PING, AQLF_REQUEST);
    frame.set_payload(payload);
    frame
}

#[test]
fn test_byte_ring_wraps_and_preserves_order() {
    let mut ring = ByteRing::new(16);
    assert_eq!(ring.capacity(), 16);
    assert!(ring.write(&[1; 10]));
    let mut sink = [0u8; 6];
    assert!(ring.read_into(&mut sink));
    // The next write wraps over the ring boundary.
    assert!(ring.write(&[2; 10]));
    assert!(!ring.write(&[3; 4]), "over-capacity write must fail whole");

    let mut rest = [0u8; 14];
    assert!(ring.read_into(&mut rest));
    assert_eq!(&rest[..4], &[1, 1, 1, 1]);
    assert_eq!(&rest[4..], &[2; 10]);
    assert!(ring.is_empty());
}

#[test]
fn test_byte_ring_vectored_parts_cover_the_free_space() {
    let mut ring = ByteRing::new(8);
    ring.write(&[9; 5]);
    ring.skip(5);
    // Head sits mid-ring, so the writable region splits in two.
    let (first, second) = ring.writable_parts();
    assert_eq!(first.len() + second.len(), 8);
    assert!(!second.is_empty());
}

#[test]
fn test_bounded_ring_back_pressure() {
    let mut ring: Ring<u32> = Ring::new(4);
    for i in 0..4 {
        assert!(ring.put(i));
    }
    assert!(ring.is_full());
    assert!(!ring.put(99), "full ring must refuse");
    assert_eq!(ring.get(), Some(0));
    assert!(ring.put(99));
}

#[test]
fn test_topic_set_counts_and_clears() {
    let mut topics = TopicSet::new();
    assert!(topics.set(0));
    assert!(topics.set(255));
    assert!(!topics.set(256), "topic id past the space must fail");
    assert_eq!(topics.count(), 2);
    assert!(topics.test(255));
    topics.clear(255);
    assert!(!topics.test(255));
    assert!(!topics.is_empty());
    topics.reset();
    assert!(topics.is_empty());
}

#[test]
fn test_connection_assembles_frames_from_a_byte_stream() {
    let (mut connection, mut stream) = Connection::pair().expect("socketpair");
    let pool = FramePool::new(8);

    let first = request(1, 2, 10, b"alpha");
    let second = request(1, 2, 11, b"beta");
    let mut bytes = first.wire().to_vec();
    bytes.extend_from_slice(second.wire());
    // Deliver a split frame: everything except the last 3 bytes first.
    stream.write_all(&bytes[..bytes.len() - 3]).unwrap();

    let outcome = connection.read_frames(&pool, 0).unwrap();
    assert_eq!(outcome.frames.len(), 1, "second frame is still partial");
    assert_eq!(outcome.frames[0].borrow().payload(), b"alpha");
    assert!(!outcome.closed);
    assert!(!outcome.violation);

    stream.write_all(&bytes[bytes.len() - 3..]).unwrap();
    let outcome = connection.read_frames(&pool, 0).unwrap();
    assert_eq!(outcome.frames.len(), 1);
    assert_eq!(outcome.frames[0].borrow().payload(), b"beta");
    assert_eq!(outcome.frames[0].borrow().header().sequence, 11);
}

#[test]
fn test_connection_flags_framing_violations() {
    let (mut connection, mut stream) = Connection::pair().expect("socketpair");
    let pool = FramePool::new(8);

    // A header declaring a 4-byte frame is below the fixed header size.
    let mut bogus = [0u8; HEADER_SIZE];
    bogus[16..18].copy_from_slice(&4u16.to_be_bytes());
    stream.write_all(&bogus).unwrap();

    let outcome = connection.read_frames(&pool, 0).unwrap();
    assert!(outcome.violation);
    assert!(outcome.frames.is_empty());
}

#[test]
fn test_publish_respects_the_out_quota() {
    let (mut connection, _stream) = Connection::pair().expect("socketpair");
    let quota = 4;
    connection.set_out_limit(quota);

    let mut accepted = 0;
    for i in 0..quota + 3 {
        let frame = Rc::new(RefCell::new(request(1, 2, i as u16, b"x")));
        if connection.publish(frame) {
            accepted += 1;
        } else {
            // Refusals begin exactly past the quota and stay refused.
            assert!(i >= quota, "premature refusal at {}", i);
        }
    }
    assert_eq!(accepted, quota);
    assert_eq!(connection.queued(), quota);
}

#[test]
fn test_write_pending_drains_the_queue_to_the_peer() {
    let (mut connection, mut stream) = Connection::pair().expect("socketpair");
    connection.set_out_limit(8);

    let frame = request(3, 4, 21, b"payload");
    let expected = frame.wire().to_vec();
    assert!(connection.publish(Rc::new(RefCell::new(frame))));
    assert!(connection.has_output());

    let written = connection.write_pending().unwrap();
    assert_eq!(written, expected.len());
    assert!(!connection.has_output());

    let mut received = vec![0u8; expected.len()];
    stream.read_exact(&mut received).unwrap();
    assert_eq!(received, expected);
}

#[test]
fn test_guest_lease_clock() {
    let (connection, _stream) = Connection::pair().expect("socketpair");
    assert!(!connection.has_timed_out(10_000));
    std::thread::sleep(std::time::Duration::from_millis(15));
    assert!(connection.has_timed_out(10));
}
