//! Benchmark for the envelope frame codec.
//!
//! Measures encoding and decoding of response envelopes with payloads of
//! increasing size, as a client sees them during a chatty build.

use bytes::BytesMut;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;

use buildlink::protocol::{Envelope, EnvelopeCodec, ResponsePayload, SessionId};
use serde_json::json;
use tokio_util::codec::{Decoder, Encoder};

/// Build a progress response carrying `lines` lines of compiler output.
fn progress_envelope(lines: usize) -> Envelope {
    let output: Vec<String> = (0..lines)
        .map(|i| format!("src/module_{}.rs: compiled in {}ms", i, i % 97))
        .collect();
    Envelope::response(
        SessionId::new(),
        ResponsePayload::progress(json!({ "stage": "compile", "output": output })),
    )
}

fn encoded(envelope: &Envelope) -> BytesMut {
    let mut buf = BytesMut::new();
    EnvelopeCodec::new()
        .encode(envelope.clone(), &mut buf)
        .expect("encode benchmark envelope");
    buf
}

fn benchmark_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode");

    for lines in [1, 64, 4096] {
        let envelope = progress_envelope(lines);
        group.throughput(Throughput::Bytes(encoded(&envelope).len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(lines), &envelope, |b, envelope| {
            let mut codec = EnvelopeCodec::new();
            let mut buf = BytesMut::new();
            b.iter(|| {
                buf.clear();
                codec
                    .encode(black_box(envelope.clone()), &mut buf)
                    .expect("encode");
            });
        });
    }

    group.finish();
}

fn benchmark_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_decode");

    for lines in [1, 64, 4096] {
        let frame = encoded(&progress_envelope(lines));
        group.throughput(Throughput::Bytes(frame.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(lines), &frame, |b, frame| {
            let mut codec = EnvelopeCodec::new();
            b.iter(|| {
                let mut src = frame.clone();
                black_box(codec.decode(&mut src).expect("decode"))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_encode, benchmark_decode);
criterion_main!(benches);
