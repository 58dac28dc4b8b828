//! # Hub End-To-End Tests
//!
//! Drives a live hub through loopback connections: DESCRIBE on a
//! stand-alone node, two-node successor lookups, privileged finger
//! updates, guest lease expiry and the full SRP promotion flow.

use ringhub::{Hub, EPHEMERAL_BASE};
use ringhub_codec::commands::*;
use ringhub_codec::{Frame, Header, OverlayMetrics, HEADER_SIZE};
use ringhub_core::HubConfig;
use ringhub_crypto::{SrpGroup, SrpHash, UserAuth};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::time::Duration;

fn test_config() -> HubConfig {
    HubConfig {
        listen: false,
        signal_capture: false,
        alarm_expiration_ms: 5,
        alarm_interval_ms: 20,
        group_size: 1024,
        hash: "sha512".to_string(),
        ..HubConfig::default()
    }
}

fn request(source: u64, destination: u64, command: u8, qualifier: u8, payload: &[u8]) -> Frame {
    let mut frame = Frame::new();
    frame.set_address(source, destination);
    frame.set_control((HEADER_SIZE + payload.len()) as u16, 1, 0);
    frame.set_context(command, qualifier, AQLF_REQUEST);
    frame.set_payload(payload);
    frame
}

/// Runs enough loop iterations for a request to be served and its
/// response flushed.
fn pump(hub: &mut Hub) {
    for _ in 0..3 {
        hub.run_once().expect("event loop iteration");
    }
}

fn transact(hub: &mut Hub, stream: &mut UnixStream, frame: &Frame) -> Frame {
    stream.write_all(frame.wire()).expect("request written");
    pump(hub);
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let mut head = [0u8; HEADER_SIZE];
    stream.read_exact(&mut head).expect("response header");
    let header = Header::parse(&head).expect("well-formed response");
    let mut wire = head.to_vec();
    wire.resize(header.length as usize, 0);
    stream.read_exact(&mut wire[HEADER_SIZE..]).expect("payload");
    Frame::from_wire(&wire).expect("response frame")
}

#[test]
fn test_standalone_describe() {
    let mut hub = Hub::with_bits(7, 4, test_config()).unwrap();
    let mut stream = hub.adopt_guest().unwrap();

    let response = transact(
        &mut hub,
        &mut stream,
        &request(0, 7, CMD_NULL, QLF_DESCRIBE, &[]),
    );
    assert_eq!(response.header().aqlf, AQLF_RESPONSE);

    let metrics = OverlayMetrics::unpack(response.payload()).expect("describe payload");
    assert_eq!(metrics.hub.uid, 7);
    assert_eq!(metrics.predecessor, 7);
    assert_eq!(metrics.successor, 7);
    assert_eq!(metrics.routes, 4);
    assert!(metrics.stable);
    for entry in &metrics.route[..4] {
        assert_eq!(entry.current, 7);
        assert_eq!(entry.committed, 7);
        assert!(!entry.connected);
    }
}

#[test]
fn test_find_successor_on_a_two_node_ring() {
    let mut hub = Hub::with_bits(3, 4, test_config()).unwrap();
    hub.node_mut().set_predecessor(11);
    hub.node_mut().set_successor(11);
    let mut stream = hub.adopt_peer(5).unwrap();

    let response = transact(
        &mut hub,
        &mut stream,
        &request(5, 3, CMD_OVERLAY, QLF_FIND_SUCCESSOR, &9u64.to_be_bytes()),
    );
    assert_eq!(response.header().aqlf, AQLF_RESPONSE);
    let payload = response.payload();
    assert_eq!(u64::from_be_bytes(payload[0..8].try_into().unwrap()), 9);
    assert_eq!(u64::from_be_bytes(payload[8..16].try_into().unwrap()), 11);

    let response = transact(
        &mut hub,
        &mut stream,
        &request(5, 3, CMD_OVERLAY, QLF_FIND_SUCCESSOR, &2u64.to_be_bytes()),
    );
    let payload = response.payload();
    assert_eq!(u64::from_be_bytes(payload[0..8].try_into().unwrap()), 2);
    assert_eq!(u64::from_be_bytes(payload[8..16].try_into().unwrap()), 3);
}

#[test]
fn test_finger_update_keeps_the_committed_slot() {
    let mut hub = Hub::with_bits(7, 4, test_config()).unwrap();
    let mut stream = hub.adopt_peer(2).unwrap();

    // Privileged update: the source is the hub's own neighbor set.
    let mut body = [0u8; 12];
    body[4..12].copy_from_slice(&11u64.to_be_bytes());
    let response = transact(
        &mut hub,
        &mut stream,
        &request(7, 7, CMD_NODE, QLF_SET_FINGER, &body),
    );
    assert_eq!(response.header().aqlf, AQLF_RESPONSE);
    assert_eq!(response.payload(), &body);

    assert_eq!(hub.node().get(0), 11);
    assert_eq!(hub.node().finger(0).unwrap().committed(), 7);
    assert!(!hub.node().is_stable());

    let response = transact(
        &mut hub,
        &mut stream,
        &request(7, 7, CMD_NODE, QLF_GET_FINGER, &0u32.to_be_bytes()),
    );
    assert_eq!(response.header().aqlf, AQLF_RESPONSE);
    let payload = response.payload();
    assert_eq!(u32::from_be_bytes(payload[0..4].try_into().unwrap()), 0);
    assert_eq!(u64::from_be_bytes(payload[4..12].try_into().unwrap()), 11);
}

#[test]
fn test_guests_expire_after_their_lease() {
    let mut config = test_config();
    config.max_guests = 2;
    config.guest_lease_ms = 100;
    let mut hub = Hub::with_bits(7, 4, config).unwrap();

    let _one = hub.adopt_guest().unwrap();
    let _two = hub.adopt_guest().unwrap();
    assert!(hub.adopt_guest().is_err(), "guest cap must hold");
    assert_eq!(hub.guest_count(), 2);
    assert!(hub.attached(EPHEMERAL_BASE));
    assert!(hub.attached(EPHEMERAL_BASE + 1));

    std::thread::sleep(Duration::from_millis(150));
    hub.maintain();

    assert_eq!(hub.guest_count(), 0);
    assert!(!hub.attached(EPHEMERAL_BASE));
    assert!(!hub.attached(EPHEMERAL_BASE + 1));
}

fn register_payload(identity: u64, salt: &[u8], verifier: &[u8]) -> Vec<u8> {
    let mut payload = identity.to_be_bytes().to_vec();
    payload.extend_from_slice(&(salt.len() as u16).to_be_bytes());
    payload.extend_from_slice(salt);
    payload.extend_from_slice(verifier);
    payload
}

#[test]
fn test_srp_promotion_happy_path() {
    let group = SrpGroup::G1024;
    let hash = SrpHash::Sha512;
    let identity = 42u64;
    let password = b"swordfish";

    let mut hub = Hub::with_bits(7, 10, test_config()).unwrap();
    let mut stream = hub.adopt_guest().unwrap();
    let guest_uid = EPHEMERAL_BASE;

    // Register the verifier.
    let record = ringhub_crypto::enroll(group, hash, identity, password, 1).unwrap();
    let response = transact(
        &mut hub,
        &mut stream,
        &request(
            0,
            7,
            CMD_AUTH,
            QLF_REGISTER,
            &register_payload(identity, &record.salt, &record.verifier),
        ),
    );
    assert_eq!(response.header().aqlf, AQLF_RESPONSE);

    // Token step one: identity and client nonce.
    let mut user = UserAuth::start(group, hash, identity, password, 1).unwrap();
    let mut step = identity.to_be_bytes().to_vec();
    step.extend_from_slice(&user.nonce());
    let challenge = transact(&mut hub, &mut stream, &request(0, 7, CMD_AUTH, QLF_TOKEN, &step));
    assert_eq!(challenge.header().aqlf, AQLF_RESPONSE);
    let body = challenge.payload();
    let (salt, host_nonce) = body.split_at(body.len() - group.size());

    // Token step two: the client proof earns the host proof.
    let proof = user.respond(salt, host_nonce).expect("client proof");
    let confirmation = transact(&mut hub, &mut stream, &request(0, 7, CMD_AUTH, QLF_TOKEN, &proof));
    assert_eq!(confirmation.header().aqlf, AQLF_RESPONSE);
    user.confirm(confirmation.payload())
        .expect("host proof verifies");

    // The connection now answers to its ring identifier.
    assert!(hub.attached(identity));
    assert!(!hub.attached(guest_uid));
    assert_eq!(hub.guest_count(), 0);
}

#[test]
fn test_srp_unknown_identity_is_rejected_without_tells() {
    let group = SrpGroup::G1024;
    let hash = SrpHash::Sha512;

    let mut hub = Hub::with_bits(7, 10, test_config()).unwrap();

    // Known identity for the shape baseline.
    let record = ringhub_crypto::enroll(group, hash, 42, b"pw", 1).unwrap();
    hub.identities_mut()
        .put(42, record)
        .then_some(())
        .expect("registered");

    let mut known_stream = hub.adopt_guest().unwrap();
    let known_user = UserAuth::start(group, hash, 42, b"pw", 1).unwrap();
    let mut step = 42u64.to_be_bytes().to_vec();
    step.extend_from_slice(&known_user.nonce());
    let known_challenge = transact(
        &mut hub,
        &mut known_stream,
        &request(0, 7, CMD_AUTH, QLF_TOKEN, &step),
    );

    // Unknown identity gets a byte-compatible challenge.
    let mut stream = hub.adopt_guest().unwrap();
    let mut user = UserAuth::start(group, hash, 999, b"pw", 1).unwrap();
    let mut step = 999u64.to_be_bytes().to_vec();
    step.extend_from_slice(&user.nonce());
    let challenge = transact(&mut hub, &mut stream, &request(0, 7, CMD_AUTH, QLF_TOKEN, &step));
    assert_eq!(challenge.header().aqlf, AQLF_RESPONSE);
    assert_eq!(
        challenge.payload().len(),
        known_challenge.payload().len(),
        "challenge shape must not leak identity existence"
    );

    // The final proof is refused and the guest is never promoted.
    let body = challenge.payload();
    let (salt, host_nonce) = body.split_at(body.len() - group.size());
    let proof = user.respond(salt, host_nonce).expect("client proof");
    let rejection = transact(&mut hub, &mut stream, &request(0, 7, CMD_AUTH, QLF_TOKEN, &proof));
    assert_eq!(rejection.header().aqlf, AQLF_REJECTED);
    assert!(!hub.attached(999));
}
