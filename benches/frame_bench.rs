use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ringhub_cluster::node::Node;
use ringhub_codec::commands::*;
use ringhub_codec::{Frame, Header, HEADER_SIZE};

fn bench_frame_path(c: &mut Criterion) {
    let mut frame = Frame::new();
    frame.set_address(3, 11);
    frame.set_control((HEADER_SIZE + 8) as u16, 77, 0);
    frame.set_context(CMD_OVERLAY, QLF_FIND_SUCCESSOR, AQLF_REQUEST);
    frame.set_payload(&9u64.to_be_bytes());
    let wire = frame.wire().to_vec();

    let mut group = c.benchmark_group("frame_path");

    group.bench_function("header_parse", |b| {
        b.iter(|| {
            black_box(Header::parse(black_box(&wire)).unwrap());
        })
    });

    group.bench_function("frame_from_wire", |b| {
        b.iter(|| {
            black_box(Frame::from_wire(black_box(&wire)).unwrap());
        })
    });

    group.finish();
}

fn bench_routing_lookup(c: &mut Criterion) {
    let mut node = Node::with_bits(1, 16).unwrap();
    // A sparsely populated, fully connected table.
    for i in (0..16).step_by(3) {
        let peer = (1u64 + (1 << i)) & 0xFFFF;
        node.set(i, peer);
        node.commit(i);
        node.update(peer, true);
    }

    c.bench_function("next_hop", |b| {
        b.iter(|| {
            for key in [7u64, 513, 9000, 65535] {
                black_box(node.next_hop(black_box(key)));
            }
        })
    });
}

criterion_group!(benches, bench_frame_path, bench_routing_lookup);
criterion_main!(benches);
