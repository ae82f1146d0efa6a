//! Performance benchmarks for the framing hot paths.
//!
//! Run with: `cargo bench`

use bytes::{Bytes, BytesMut};
use criterion::{BatchSize, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rswc::codec::FrameCodec;
use rswc::config::Limits;
use rswc::protocol::handshake::compute_accept_key;
use rswc::protocol::{FragmentAssembler, Frame, FrameValidator, OpCode, apply_mask};
use rswc::{MessageKind, OutgoingFrameSplitter, Role};

const SIZES: [(usize, &str); 3] = [(10, "small_10b"), (1024, "medium_1kb"), (65536, "large_64kb")];

// =============================================================================
// Decoding
// =============================================================================

fn masked_wire(payload_size: usize) -> BytesMut {
    let mut wire = BytesMut::new();
    FrameCodec::client(1 << 20)
        .encode(&Frame::binary(vec![0xAB; payload_size]), &mut wire)
        .unwrap();
    wire
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    let server = FrameCodec::new(FrameValidator::new(Role::Server, 1 << 20));

    for (size, name) in SIZES {
        let wire = masked_wire(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(name, |b| {
            b.iter_batched(
                || wire.clone(),
                |mut buf| server.decode(black_box(&mut buf)).unwrap(),
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

// =============================================================================
// Encoding
// =============================================================================

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_masked");
    let client = FrameCodec::client(1 << 20);

    for (size, name) in SIZES {
        let frame = Frame::binary(vec![0xAB; size]);
        let mut dst = BytesMut::with_capacity(size + 14);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(name, |b| {
            b.iter(|| {
                dst.clear();
                client.encode(black_box(&frame), &mut dst).unwrap();
            })
        });
    }
    group.finish();
}

// =============================================================================
// Masking
// =============================================================================

fn bench_masking(c: &mut Criterion) {
    let mut group = c.benchmark_group("masking");
    let key = [0x37, 0xfa, 0x21, 0x3d];

    for (size, name) in SIZES {
        let mut data = vec![0xAB; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(name, |b| b.iter(|| apply_mask(black_box(&mut data), key)));
    }
    group.finish();
}

fn bench_handshake(c: &mut Criterion) {
    c.bench_function("accept_key", |b| {
        b.iter(|| compute_accept_key(black_box("dGhlIHNhbXBsZSBub25jZQ==")))
    });
}

// =============================================================================
// Splitting and reassembly
// =============================================================================

fn bench_split_and_reassemble(c: &mut Criterion) {
    let mut group = c.benchmark_group("fragmentation");
    let payload = Bytes::from(vec![0x5A; 256 * 1024]);
    let splitter = OutgoingFrameSplitter::new(16 * 1024, true);
    group.throughput(Throughput::Bytes(payload.len() as u64));

    group.bench_function("split_256kb", |b| {
        b.iter(|| {
            splitter
                .split_message(MessageKind::Binary, black_box(payload.clone()))
                .unwrap()
        })
    });

    let frames = splitter
        .split_message(MessageKind::Binary, payload.clone())
        .unwrap();
    group.bench_function("reassemble_256kb", |b| {
        b.iter_batched(
            || frames.clone(),
            |frames| {
                let mut assembler = FragmentAssembler::new(&Limits::default());
                let mut out = None;
                for frame in frames {
                    out = assembler.push(frame).unwrap();
                }
                out
            },
            BatchSize::SmallInput,
        )
    });

    group.bench_function("ping_between_fragments", |b| {
        b.iter_batched(
            || frames.clone(),
            |frames| {
                let mut assembler = FragmentAssembler::new(&Limits::default());
                let mut out = None;
                for frame in frames {
                    assembler.push(Frame::new(true, OpCode::Ping, Bytes::new())).unwrap();
                    out = assembler.push(frame).unwrap();
                }
                out
            },
            BatchSize::SmallInput,
        )
    });
    group.finish();
}

// =============================================================================
// Criterion Setup
// =============================================================================

criterion_group!(
    benches,
    bench_decode,
    bench_encode,
    bench_masking,
    bench_handshake,
    bench_split_and_reassemble
);

criterion_main!(benches);
