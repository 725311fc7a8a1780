//! Codec benchmarks for courier-protocol.

use courier_protocol::{codec, ChatMessage, ClientFrame};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

fn chat_frame(len: usize) -> ClientFrame {
    ClientFrame::ChatMessage(ChatMessage::new("alice", "bob", "alice_bob", "x".repeat(len)))
}

fn bench_msgpack(c: &mut Criterion) {
    let frame = chat_frame(64);
    let encoded = codec::encode(&frame).unwrap();

    let mut group = c.benchmark_group("msgpack");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("encode_64B", |b| b.iter(|| codec::encode(black_box(&frame))));
    group.bench_function("decode_64B", |b| {
        b.iter(|| codec::decode::<ClientFrame>(black_box(&encoded)))
    });
    group.finish();
}

fn bench_json(c: &mut Criterion) {
    let frame = chat_frame(64);
    let text = codec::encode_json(&frame).unwrap();

    let mut group = c.benchmark_group("json");
    group.throughput(Throughput::Bytes(text.len() as u64));
    group.bench_function("encode_64B", |b| {
        b.iter(|| codec::encode_json(black_box(&frame)))
    });
    group.bench_function("decode_64B", |b| {
        b.iter(|| codec::decode_json::<ClientFrame>(black_box(&text)))
    });
    group.finish();
}

criterion_group!(benches, bench_msgpack, bench_json);
criterion_main!(benches);
