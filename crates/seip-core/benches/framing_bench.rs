//! Criterion benchmarks for packet framing and message serialization.
//!
//! Every server request pays for one JSON encode, one frame write, one frame
//! read, and one JSON decode.  These benches keep an eye on that path.
//!
//! Run with:
//! ```bash
//! cargo bench --package seip-core --bench framing_bench
//! ```

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use seip_core::{
    codes, write_frame, ErrorLayer, FrameLimits, FrameReader, RequestCode, RequestMessage,
    ResponsePacket,
};

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn make_request(data_len: usize) -> RequestMessage {
    RequestMessage::new(RequestCode::Command, "A".repeat(data_len), 2000)
}

fn make_responses() -> Vec<(&'static str, ResponsePacket)> {
    vec![
        ("ok", ResponsePacket::ok()),
        ("ok_data", ResponsePacket::ok_with_data("6F1A8407A0000000041010A50F500A4D617374657243617264")),
        (
            "ko_terminal",
            ResponsePacket::ko(ErrorLayer::Terminal, codes::ERR_TERMINAL, "no field"),
        ),
    ]
}

// ── Benchmark groups ──────────────────────────────────────────────────────────

fn bench_request_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_to_json");
    for len in [0usize, 256, 4096] {
        let msg = make_request(len);
        group.bench_with_input(BenchmarkId::new("data_len", len), &msg, |b, msg| {
            b.iter(|| black_box(msg).to_json().expect("encode must succeed"))
        });
    }
    group.finish();
}

fn bench_response_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("response_from_json");
    for (name, packet) in make_responses() {
        let bytes = packet.to_json().expect("encode must succeed");
        group.bench_with_input(BenchmarkId::new("packet", name), &bytes, |b, bytes| {
            b.iter(|| ResponsePacket::from_json(black_box(bytes)).expect("decode must succeed"))
        });
    }
    group.finish();
}

fn bench_frame_roundtrip(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime");
    let limits = FrameLimits::default();
    let mut group = c.benchmark_group("frame_write_read");

    for len in [16usize, 1024, 16 * 1024] {
        let payload = vec![0x5Au8; len];
        group.bench_with_input(BenchmarkId::new("payload", len), &payload, |b, payload| {
            b.iter(|| {
                rt.block_on(async {
                    let mut wire = Vec::with_capacity(payload.len() + 4);
                    write_frame(&mut wire, black_box(payload), &limits)
                        .await
                        .expect("write must succeed");
                    let mut reader = FrameReader::new(limits);
                    reader
                        .read_frame(&mut wire.as_slice(), Duration::from_secs(1))
                        .await
                        .expect("read must succeed")
                })
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_request_encode,
    bench_response_decode,
    bench_frame_roundtrip
);
criterion_main!(benches);
