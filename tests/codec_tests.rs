//! # Wire Codec Tests
//!
//! Header round trips, length validation and the serialized DESCRIBE
//! payload.

use ringhub_codec::commands::*;
use ringhub_codec::{
    Frame, FramePool, Header, HubMetrics, OverlayMetrics, ResourceMetric, RouteEntry, Sequencer,
    TrafficMetric, HEADER_SIZE, MAX_PAYLOAD, MTU,
};

fn sample_header() -> Header {
    Header {
        source: 7,
        destination: 11,
        length: 40,
        sequence: 513,
        session: 2,
        command: CMD_NODE,
        qualifier: QLF_SET_PREDECESSOR,
        aqlf: AQLF_REQUEST,
    }
}

#[test]
fn test_header_round_trip() {
    let header = sample_header();
    let mut wire = [0u8; HEADER_SIZE];
    header.serialize(&mut wire);
    let parsed = Header::parse(&wire).expect("valid header");
    assert_eq!(parsed, header);
}

#[test]
fn test_header_rejects_bad_lengths() {
    let mut header = sample_header();
    let mut wire = [0u8; HEADER_SIZE];

    header.length = (HEADER_SIZE - 1) as u16;
    header.serialize(&mut wire);
    assert!(Header::parse(&wire).is_err(), "undersized length must fail");

    header.length = (MTU + 1) as u16;
    header.serialize(&mut wire);
    assert!(Header::parse(&wire).is_err(), "oversized length must fail");

    assert!(Header::parse(&wire[..HEADER_SIZE - 1]).is_err());
}

#[test]
fn test_frame_keeps_wire_image_current() {
    let mut frame = Frame::new();
    frame.set_address(3, 9);
    frame.set_control(HEADER_SIZE as u16, 77, 1);
    frame.set_context(CMD_OVERLAY, QLF_FIND_SUCCESSOR, AQLF_REQUEST);
    assert!(frame.set_payload(&9u64.to_be_bytes()));

    let parsed = Header::parse(frame.wire()).expect("wire image must parse");
    assert_eq!(parsed.source, 3);
    assert_eq!(parsed.destination, 9);
    assert_eq!(parsed.length as usize, HEADER_SIZE + 8);
    assert_eq!(parsed.sequence, 77);
    assert_eq!(frame.payload(), &9u64.to_be_bytes());
}

#[test]
fn test_frame_rejects_oversized_payload() {
    let mut frame = Frame::new();
    assert!(frame.set_payload(&vec![0u8; MAX_PAYLOAD]));
    assert!(!frame.set_payload(&vec![0u8; MAX_PAYLOAD + 1]));
}

#[test]
fn test_response_reverses_the_addresses() {
    let mut frame = Frame::new();
    frame.set_address(42, 7);
    frame.set_control(HEADER_SIZE as u16, 5, 0);
    frame.set_context(CMD_NODE, QLF_GET_SUCCESSOR, AQLF_REQUEST);
    assert!(frame.make_response(7, &11u64.to_be_bytes()));

    let header = frame.header();
    assert_eq!(header.source, 7);
    assert_eq!(header.destination, 42);
    assert_eq!(header.aqlf, AQLF_RESPONSE);
    assert_eq!(header.sequence, 5);
    assert_eq!(frame.payload(), &11u64.to_be_bytes());
}

#[test]
fn test_pool_enforces_the_frame_cap() {
    let pool = FramePool::new(2);
    let a = pool.allocate().expect("slot 1");
    let b = pool.allocate().expect("slot 2");
    assert!(pool.allocate().is_none(), "pool must refuse past capacity");
    assert_eq!(pool.used(), 2);

    drop(a);
    assert_eq!(pool.used(), 1);
    let _c = pool.allocate().expect("slot released by drop");
    drop(b);
}

#[test]
fn test_pool_adopt_validates_the_wire_image() {
    let pool = FramePool::new(4);
    let mut frame = Frame::new();
    frame.set_address(1, 2);
    frame.set_control((HEADER_SIZE + 4) as u16, 9, 0);
    frame.set_context(CMD_MULTICAST, QLF_PUBLISH, AQLF_REQUEST);
    frame.set_payload(&[1, 2, 3, 4]);

    let adopted = pool.adopt(frame.wire()).expect("valid frame").expect("slot");
    assert_eq!(adopted.borrow().payload(), &[1, 2, 3, 4]);

    // Truncated image must not produce a frame.
    assert!(pool.adopt(&frame.wire()[..HEADER_SIZE]).is_err());
}

#[test]
fn test_sequencer_skips_zero() {
    let mut sequencer = Sequencer::new();
    assert_eq!(sequencer.next(), 1);
    for _ in 0..u16::MAX {
        assert_ne!(sequencer.next(), 0);
    }
}

#[test]
fn test_metrics_round_trip() {
    let mut metrics = OverlayMetrics {
        hub: HubMetrics {
            uid: 7,
            uptime: 12.5,
            received: TrafficMetric {
                units: 10,
                bytes: 320,
            },
            dropped: TrafficMetric { units: 1, bytes: 32 },
            connections: ResourceMetric { max: 64, used: 3 },
            frames: ResourceMetric { max: 128, used: 5 },
            mtu: MTU as u32,
        },
        predecessor: 7,
        successor: 7,
        routes: 4,
        stable: true,
        route: [RouteEntry::default(); OverlayMetrics::MAX_ROUTES],
    };
    for (i, entry) in metrics.route.iter_mut().take(4).enumerate() {
        entry.start = 7 + (1 << i);
        entry.current = 7;
        entry.committed = 7;
        entry.connected = false;
    }

    let mut buf = [0u8; OverlayMetrics::MAX_BYTES];
    let size = metrics.pack(&mut buf).expect("pack");
    assert_eq!(size, OverlayMetrics::MIN_BYTES + 4 * RouteEntry::BYTES);

    let unpacked = OverlayMetrics::unpack(&buf[..size]).expect("unpack");
    assert_eq!(unpacked, metrics);
}

#[test]
fn test_metrics_unpack_rejects_short_buffers() {
    assert!(OverlayMetrics::unpack(&[0u8; OverlayMetrics::MIN_BYTES - 1]).is_none());
}
