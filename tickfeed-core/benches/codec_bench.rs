// Codec Benchmarks
//
// Decode throughput for the resynchronizing stream decoder:
// - Clean stream delivered in receive-sized chunks
// - Same stream split into small fragments
// - Stream with periodic corruption forcing resynchronization

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;
use tickfeed_core::core::Tick;
use tickfeed_core::protocol::{encode_tick, FrameDecoder};

fn build_stream(frames: usize) -> Vec<u8> {
    let mut stream = Vec::with_capacity(frames * 44);
    for i in 0..frames {
        let id = (i % 500) as u16;
        let seq = (i / 500) as u32 + 1;
        let tick = if i % 10 < 3 {
            Tick::trade(i as u64, id, seq, 1000.0 + i as f64 * 0.01, 50)
        } else {
            Tick::quote(i as u64, id, seq, (999.5, 100), (1000.5, 100))
        };
        encode_tick(&tick, &mut stream);
    }
    stream
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec/encode");
    group.measurement_time(Duration::from_secs(2));

    let trade = Tick::trade(1, 7, 1, 1234.5, 50);
    let quote = Tick::quote(1, 7, 1, (1234.0, 100), (1235.0, 100));
    let mut out = Vec::with_capacity(64);

    group.bench_function("trade", |b| {
        b.iter(|| {
            out.clear();
            encode_tick(black_box(&trade), &mut out);
        })
    });

    group.bench_function("quote", |b| {
        b.iter(|| {
            out.clear();
            encode_tick(black_box(&quote), &mut out);
        })
    });

    group.finish();
}

fn bench_decode_chunked(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec/decode");
    group.measurement_time(Duration::from_secs(3));

    let stream = build_stream(10_000);
    group.throughput(Throughput::Bytes(stream.len() as u64));

    for chunk in [64usize, 1500, 64 * 1024] {
        group.bench_with_input(BenchmarkId::new("chunk", chunk), &chunk, |b, &chunk| {
            let mut decoder = FrameDecoder::new();
            b.iter(|| {
                let mut ticks = 0usize;
                for piece in stream.chunks(chunk) {
                    ticks += decoder.consume(piece, |tick| {
                        black_box(tick);
                    });
                }
                black_box(ticks)
            })
        });
    }

    group.finish();
}

fn bench_decode_corrupted(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec/resync");
    group.measurement_time(Duration::from_secs(3));

    let mut stream = build_stream(10_000);
    // One flipped byte roughly every 50 frames
    for at in (0..stream.len()).step_by(50 * 40) {
        stream[at] ^= 0x5A;
    }
    group.throughput(Throughput::Bytes(stream.len() as u64));

    group.bench_function("flip_every_50_frames", |b| {
        let mut decoder = FrameDecoder::new();
        b.iter(|| {
            let mut ticks = 0usize;
            for piece in stream.chunks(64 * 1024) {
                ticks += decoder.consume(piece, |tick| {
                    black_box(tick);
                });
            }
            black_box(ticks)
        })
    });

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode_chunked, bench_decode_corrupted);
criterion_main!(benches);
