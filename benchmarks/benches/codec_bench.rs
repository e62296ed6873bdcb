//! Wire codec benchmarks

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use tallyman_benchmarks::{call_events, encoded_session};
use tallyman_recorder::wire::encode_event;
use tallyman_recorder::EventCodec;
use tokio_util::codec::Decoder;

fn bench_encode(c: &mut Criterion) {
    let events = call_events(8, 1_000, 1);
    let mut group = c.benchmark_group("codec");
    group.throughput(Throughput::Elements(events.len() as u64));

    group.bench_function("encode", |b| {
        let mut buf = BytesMut::with_capacity(64 * 1024);
        b.iter(|| {
            buf.clear();
            for event in &events {
                encode_event(black_box(event), &mut buf).unwrap();
            }
            black_box(buf.len())
        })
    });

    let session = encoded_session(&events).unwrap();
    group.throughput(Throughput::Bytes(session.len() as u64));
    group.bench_function("decode", |b| {
        b.iter(|| {
            let mut codec = EventCodec::with_settings();
            let mut src = session.clone();
            let mut frames = 0usize;
            while let Some(frame) = codec.decode(&mut src).unwrap() {
                black_box(frame);
                frames += 1;
            }
            frames
        })
    });
    group.finish();
}

criterion_group!(benches, bench_encode);
criterion_main!(benches);
